//! Data model → instruction list (encode direction).
use super::{optimize, Accessor, BranchCase, Codec, Instruction, LoopKind, Selector, WriteKind};
use crate::config::JsonFlags;
use crate::formatter::FormatterRef;
use crate::json::escape_str;
use crate::metadata::PropertyAccessor;
use crate::model::{DataModelNode, PropertyNode};
use crate::types::ScalarKind;

pub fn compile(root: &DataModelNode, flags: JsonFlags) -> Codec {
    let mut compiler = Compiler { flags, next_local: 1 };
    let instructions = compiler.node(root, &Accessor::ROOT);
    Codec { instructions: optimize(instructions), locals: compiler.next_local }
}

struct Compiler {
    flags: JsonFlags,
    next_local: usize,
}

fn literal(text: impl Into<String>) -> Instruction {
    Instruction::WriteLiteral(text.into())
}

fn null_branch(accessor: &Accessor, value: Vec<Instruction>) -> Instruction {
    Instruction::Branch {
        accessor: accessor.clone(),
        selector: Selector::Null,
        cases: vec![
            BranchCase { key: "null".into(), body: vec![literal("null")] },
            BranchCase { key: "value".into(), body: value },
        ],
    }
}

impl Compiler {
    fn alloc(&mut self) -> usize {
        let local = self.next_local;
        self.next_local += 1;
        local
    }

    fn node(&mut self, node: &DataModelNode, accessor: &Accessor) -> Vec<Instruction> {
        match node {
            DataModelNode::Scalar(kind) => {
                vec![Instruction::WriteValue { accessor: accessor.clone(), kind: WriteKind::Scalar(*kind) }]
            }
            DataModelNode::Null => vec![literal("null")],
            DataModelNode::Mixed => vec![Instruction::WriteValue { accessor: accessor.clone(), kind: WriteKind::Mixed }],
            DataModelNode::Nullable(inner) => {
                let value = self.node(inner, accessor);
                vec![null_branch(accessor, value)]
            }
            DataModelNode::List(item) => {
                let local = self.alloc();
                let body = self.node(item, &Accessor::Local(local));
                vec![
                    literal("["),
                    Instruction::Loop {
                        iterable: accessor.clone(),
                        kind: LoopKind::List,
                        locals: vec![local],
                        separator: ",".into(),
                        body: vec![Instruction::Block(body)],
                    },
                    literal("]"),
                ]
            }
            DataModelNode::Dict { item, .. } => {
                let key = self.alloc();
                let value = self.alloc();
                let body = self.node(item, &Accessor::Local(value));
                vec![
                    literal("{"),
                    Instruction::Loop {
                        iterable: accessor.clone(),
                        kind: LoopKind::Dict,
                        locals: vec![key, value],
                        separator: ",".into(),
                        body: vec![
                            Instruction::WriteKey { accessor: Accessor::Local(key) },
                            literal(":"),
                            Instruction::Block(body),
                        ],
                    },
                    literal("}"),
                ]
            }
            DataModelNode::Object { properties, .. } => {
                let mut out = vec![literal("{")];
                for (i, property) in properties.iter().enumerate() {
                    if i > 0 {
                        out.push(literal(","));
                    }
                    out.push(literal(format!("{}:", escape_str(&property.encoded_name, self.flags))));
                    out.push(Instruction::Block(self.property(property, accessor)));
                }
                out.push(literal("}"));
                out
            }
            DataModelNode::Union { candidates, discriminator } => {
                let cases = candidates
                    .iter()
                    .map(|candidate| BranchCase {
                        key: match discriminator {
                            Some(_) => candidate.key.clone(),
                            None => candidate.shape.clone().unwrap_or_default(),
                        },
                        body: self.node(&candidate.node, accessor),
                    })
                    .collect();
                let selector = match discriminator {
                    Some(name) => Selector::Discriminator(name.clone()),
                    None => Selector::Kind,
                };
                vec![Instruction::Branch { accessor: accessor.clone(), selector, cases }]
            }
            DataModelNode::Enum { backing, .. } => {
                vec![Instruction::WriteValue { accessor: accessor.clone(), kind: WriteKind::Enum(*backing) }]
            }
            DataModelNode::DateTime { format } => {
                let bind = self.alloc();
                vec![Instruction::Call {
                    formatter: FormatterRef::DateTimeFormat(format.clone()),
                    argument: accessor.clone(),
                    bind,
                    body: vec![Instruction::WriteValue {
                        accessor: Accessor::Local(bind),
                        kind: WriteKind::Scalar(ScalarKind::String),
                    }],
                }]
            }
        }
    }

    fn property(&mut self, property: &PropertyNode, object: &Accessor) -> Vec<Instruction> {
        let source = match &property.accessor {
            PropertyAccessor::Field(name) => Accessor::property(object, name.clone()),
            PropertyAccessor::Computed => object.clone(),
        };
        if property.formatters.is_empty() {
            return self.node(&property.node, &source);
        }
        let calls = self.chain(&property.formatters, &source, &property.node);
        // a null field skips its formatters
        match property.accessor {
            PropertyAccessor::Field(_) if property.node.accepts_null() => vec![null_branch(&source, calls)],
            _ => calls,
        }
    }

    fn chain(&mut self, formatters: &[FormatterRef], argument: &Accessor, node: &DataModelNode) -> Vec<Instruction> {
        let Some((first, rest)) = formatters.split_first() else {
            return self.node(node, argument);
        };
        let bind = self.alloc();
        let body = self.chain(rest, &Accessor::Local(bind), node);
        vec![Instruction::Call { formatter: first.clone(), argument: argument.clone(), bind, body }]
    }
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::UnionCandidate;

    fn object(properties: Vec<(&str, DataModelNode)>) -> DataModelNode {
        DataModelNode::Object {
            class: "Dummy".into(),
            properties: properties
                .into_iter()
                .map(|(name, node)| PropertyNode {
                    source_name: name.into(),
                    encoded_name: name.into(),
                    accessor: PropertyAccessor::Field(name.into()),
                    formatters: Vec::new(),
                    node: Arc::new(node),
                })
                .collect(),
        }
    }

    #[test]
    fn object_literals_are_merged() {
        let node = object(vec![
            ("@id", DataModelNode::Scalar(ScalarKind::Int)),
            ("name", DataModelNode::Scalar(ScalarKind::String)),
        ]);
        let codec = compile(&node, JsonFlags::NONE);
        let root = Accessor::ROOT;
        assert_eq!(
            codec.instructions,
            vec![
                literal("{\"@id\":"),
                Instruction::WriteValue { accessor: Accessor::property(&root, "@id"), kind: WriteKind::Scalar(ScalarKind::Int) },
                literal(",\"name\":"),
                Instruction::WriteValue {
                    accessor: Accessor::property(&root, "name"),
                    kind: WriteKind::Scalar(ScalarKind::String)
                },
                literal("}"),
            ]
        );
        assert_eq!(codec.locals, 1);
    }

    #[test]
    fn property_names_follow_flags() {
        let node = object(vec![("a/b", DataModelNode::Null)]);
        let escaped = compile(&node, JsonFlags::NONE);
        assert_eq!(escaped.instructions, vec![literal("{\"a\\/b\":null}")]);
        let raw = compile(&node, JsonFlags::UNESCAPED_SLASHES);
        assert_eq!(raw.instructions, vec![literal("{\"a/b\":null}")]);
    }

    #[test]
    fn lists_loop_over_a_fresh_local() {
        let node = DataModelNode::List(Arc::new(DataModelNode::Nullable(Arc::new(DataModelNode::Scalar(ScalarKind::Int)))));
        let codec = compile(&node, JsonFlags::NONE);
        assert_eq!(codec.locals, 2);
        let Instruction::Loop { locals, body, .. } = &codec.instructions[1] else { panic!("loop expected") };
        assert_eq!(locals, &vec![1]);
        assert!(matches!(&body[0], Instruction::Branch { selector: Selector::Null, .. }));
    }

    #[test]
    fn unions_branch_on_shape_or_discriminator() {
        let candidates = vec![
            UnionCandidate { key: "int".into(), shape: Some("int".into()), node: Arc::new(DataModelNode::Scalar(ScalarKind::Int)) },
            UnionCandidate { key: "string".into(), shape: Some("string".into()), node: Arc::new(DataModelNode::Scalar(ScalarKind::String)) },
        ];
        let by_shape = compile(&DataModelNode::Union { candidates: candidates.clone(), discriminator: None }, JsonFlags::NONE);
        assert!(matches!(&by_shape.instructions[0], Instruction::Branch { selector: Selector::Kind, .. }));
        let by_name = compile(&DataModelNode::Union { candidates, discriminator: Some("d".into()) }, JsonFlags::NONE);
        assert!(matches!(&by_name.instructions[0], Instruction::Branch { selector: Selector::Discriminator(d), .. } if d == "d"));
    }

    #[test]
    fn formatters_nest_calls() {
        let node = DataModelNode::Object {
            class: "Article".into(),
            properties: vec![PropertyNode {
                source_name: "published".into(),
                encoded_name: "published".into(),
                accessor: PropertyAccessor::Field("published".into()),
                formatters: vec![FormatterRef::Named("shift".into()), FormatterRef::DateTimeFormat(None)],
                node: Arc::new(DataModelNode::Nullable(Arc::new(DataModelNode::Scalar(ScalarKind::String)))),
            }],
        };
        let codec = compile(&node, JsonFlags::NONE);
        let Instruction::Branch { cases, .. } = &codec.instructions[1] else { panic!("null branch expected") };
        let Instruction::Call { bind, body, .. } = &cases[1].body[0] else { panic!("call expected") };
        let Instruction::Call { argument, .. } = &body[0] else { panic!("nested call expected") };
        assert_eq!(argument, &Accessor::Local(*bind));
    }
}
