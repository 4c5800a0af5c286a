//! Runs a `Codec` against a value, writing JSON bytes.
use std::io::Write;

use super::{Accessor, Codec, Instruction, LoopKind, Selector, WriteKind};
use crate::config::{Config, JsonFlags};
use crate::error::{ConfigurationError, Error, Result};
use crate::formatter::format_date_time;
use crate::json::{format_float, write_str};
use crate::registry::Registry;
use crate::types::ScalarKind;
use crate::value::{DictKey, Value};

pub struct EncodeContext<'a> {
    pub registry: &'a Registry,
    pub config: &'a Config,
}

impl Codec {
    pub fn encode<W: Write + ?Sized>(&self, value: &Value, ctx: &EncodeContext<'_>, out: &mut W) -> Result<()> {
        let mut locals = vec![Value::Null; self.locals.max(1)];
        locals[0] = value.clone();
        Machine { ctx, flags: ctx.config.format_json_flags, locals }.run(&self.instructions, out)
    }

    pub fn encode_to_string(&self, value: &Value, ctx: &EncodeContext<'_>) -> Result<String> {
        let mut out = Vec::new();
        self.encode(value, ctx, &mut out)?;
        String::from_utf8(out).map_err(|e| Error::unexpected_value("utf-8 output", e.to_string()))
    }
}

/// Runtime shape used by `Selector::Kind`; matches `DataModelNode::shape` for
/// the encode direction.
pub fn value_shape(value: &Value) -> String {
    match value {
        Value::Object(object) => format!("object:{}", object.class()),
        Value::Enum { class, .. } => format!("enum:{class}"),
        other => other.kind_name().to_string(),
    }
}

struct Machine<'a, 'c> {
    ctx: &'a EncodeContext<'c>,
    flags: JsonFlags,
    locals: Vec<Value>,
}

impl Machine<'_, '_> {
    fn run<W: Write + ?Sized>(&mut self, instructions: &[Instruction], out: &mut W) -> Result<()> {
        for instruction in instructions {
            match instruction {
                Instruction::WriteLiteral(text) => out.write_all(text.as_bytes())?,
                Instruction::WriteValue { accessor, kind } => {
                    let value = self.resolve(accessor)?;
                    self.write_value(&value, *kind, out).map_err(|e| e.at(&accessor.to_string()))?;
                }
                Instruction::WriteKey { accessor } => match self.resolve(accessor)? {
                    Value::String(key) => write_str(out, &key, self.flags)?,
                    Value::Int(key) => write_str(out, &key.to_string(), self.flags)?,
                    other => {
                        return Err(Error::unexpected_value("int or string key", other.kind_name())
                            .at(&accessor.to_string()));
                    }
                },
                Instruction::Call { formatter, argument, bind, body } => {
                    let value = self.resolve(argument)?;
                    let formatted = formatter
                        .apply(value, self.ctx.registry.formatters(), self.ctx.config)
                        .map_err(|e| e.at(&argument.to_string()))?;
                    self.locals[*bind] = formatted;
                    self.run(body, out)?;
                }
                Instruction::Loop { iterable, kind, locals, separator, body } => {
                    match (kind, self.resolve(iterable)?) {
                        (LoopKind::List, Value::List(items)) => {
                            for (i, item) in items.into_iter().enumerate() {
                                if i > 0 {
                                    out.write_all(separator.as_bytes())?;
                                }
                                self.locals[locals[0]] = item;
                                self.run(body, out)?;
                            }
                        }
                        (LoopKind::Dict, Value::Dict(entries)) => {
                            for (i, (key, item)) in entries.into_iter().enumerate() {
                                if i > 0 {
                                    out.write_all(separator.as_bytes())?;
                                }
                                self.locals[locals[0]] = match key {
                                    DictKey::Int(k) => Value::Int(k),
                                    DictKey::String(k) => Value::String(k),
                                };
                                self.locals[locals[1]] = item;
                                self.run(body, out)?;
                            }
                        }
                        (LoopKind::List, other) => {
                            return Err(Error::unexpected_value("list", other.kind_name()).at(&iterable.to_string()));
                        }
                        (LoopKind::Dict, other) => {
                            return Err(Error::unexpected_value("dict", other.kind_name()).at(&iterable.to_string()));
                        }
                    }
                }
                Instruction::Branch { accessor, selector, cases } => {
                    let value = self.resolve(accessor)?;
                    let key = self.select(selector, &value).map_err(|e| e.at(&accessor.to_string()))?;
                    let case = cases
                        .iter()
                        .find(|c| c.key == key)
                        .or_else(|| match (selector, &value) {
                            (Selector::Kind, Value::Int(_)) => cases.iter().find(|c| c.key == "float"),
                            _ => None,
                        })
                        .ok_or_else(|| {
                            let expected = cases.iter().map(|c| c.key.as_str()).collect::<Vec<_>>().join("|");
                            Error::unexpected_value(expected, key.clone()).at(&accessor.to_string())
                        })?;
                    self.run(&case.body, out)?;
                }
                Instruction::Block(body) => self.run(body, out)?,
            }
        }
        Ok(())
    }

    fn select(&self, selector: &Selector, value: &Value) -> Result<String> {
        match selector {
            Selector::Null => Ok(if value.is_null() { "null" } else { "value" }.to_string()),
            Selector::Kind => Ok(value_shape(value)),
            Selector::Discriminator(name) => {
                let discriminator = self
                    .ctx
                    .registry
                    .discriminators()
                    .by_name(name)
                    .ok_or_else(|| ConfigurationError::UnknownDiscriminator(name.clone()))?;
                (discriminator.select)(value)
                    .ok_or_else(|| Error::unexpected_value(format!("a member chosen by `{name}`"), value.kind_name()))
            }
        }
    }

    fn resolve(&self, accessor: &Accessor) -> Result<Value> {
        match accessor {
            Accessor::Local(n) => Ok(self.locals.get(*n).cloned().unwrap_or(Value::Null)),
            Accessor::Property { base, name } => match self.resolve(base)? {
                Value::Object(object) => {
                    let field = object.get(name).map_err(|e| e.at(&accessor.to_string()))?;
                    Ok(field.unwrap_or(Value::Null))
                }
                other => Err(Error::unexpected_value("object", other.kind_name()).at(&base.to_string())),
            },
        }
    }

    fn write_value<W: Write + ?Sized>(&self, value: &Value, kind: WriteKind, out: &mut W) -> Result<()> {
        match (kind, value) {
            (WriteKind::Mixed, value) => self.write_mixed(value, out),
            (WriteKind::Enum(backing), Value::Enum { case, .. }) => self.write_value(case, WriteKind::Scalar(backing), out),
            (WriteKind::Enum(backing), scalar) => self.write_value(scalar, WriteKind::Scalar(backing), out),
            (WriteKind::Scalar(ScalarKind::Int), Value::Int(i)) => Ok(write!(out, "{i}")?),
            (WriteKind::Scalar(ScalarKind::Float), Value::Float(f)) => self.write_float(f.0, out),
            (WriteKind::Scalar(ScalarKind::Float), Value::Int(i)) => self.write_float(*i as f64, out),
            (WriteKind::Scalar(ScalarKind::Bool), Value::Bool(b)) => Ok(write!(out, "{b}")?),
            (WriteKind::Scalar(ScalarKind::String), Value::String(s)) => Ok(write_str(out, s, self.flags)?),
            (WriteKind::Scalar(expected), found) => Err(Error::unexpected_value(expected.name(), found.kind_name())),
        }
    }

    fn write_float<W: Write + ?Sized>(&self, f: f64, out: &mut W) -> Result<()> {
        let text = format_float(f, self.flags).ok_or_else(|| Error::unexpected_value("finite float", f.to_string()))?;
        Ok(out.write_all(text.as_bytes())?)
    }

    fn write_mixed<W: Write + ?Sized>(&self, value: &Value, out: &mut W) -> Result<()> {
        match value {
            Value::Null => out.write_all(b"null")?,
            Value::Bool(b) => write!(out, "{b}")?,
            Value::Int(i) => write!(out, "{i}")?,
            Value::Float(f) => self.write_float(f.0, out)?,
            Value::String(s) => write_str(out, s, self.flags)?,
            Value::List(items) => {
                out.write_all(b"[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.write_all(b",")?;
                    }
                    self.write_mixed(item, out)?;
                }
                out.write_all(b"]")?;
            }
            Value::Dict(entries) => {
                out.write_all(b"{")?;
                for (i, (key, item)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.write_all(b",")?;
                    }
                    write_str(out, &key.to_string(), self.flags)?;
                    out.write_all(b":")?;
                    self.write_mixed(item, out)?;
                }
                out.write_all(b"}")?;
            }
            Value::Object(object) => {
                out.write_all(b"{")?;
                for (i, (name, item)) in object.resolve_all()?.iter().enumerate() {
                    if i > 0 {
                        out.write_all(b",")?;
                    }
                    write_str(out, name, self.flags)?;
                    out.write_all(b":")?;
                    self.write_mixed(item, out)?;
                }
                out.write_all(b"}")?;
            }
            Value::Enum { case, .. } => self.write_mixed(case, out)?,
            Value::DateTime(dt) => {
                let text = format_date_time(dt, self.ctx.config.date_time_format.as_deref()).map_err(|message| {
                    Error::Formatter { path: None, name: "datetime.format".into(), message }
                })?;
                write_str(out, &text, self.flags)?;
            }
        }
        Ok(())
    }
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::codec::compile;
    use crate::metadata::PropertyAccessor;
    use crate::model::{DataModelNode, PropertyNode, UnionCandidate};
    use crate::value::Object;

    fn encode(node: &DataModelNode, value: &Value, config: &Config) -> Result<String> {
        let registry = Registry::new();
        let codec = compile(node, config.format_json_flags);
        codec.encode_to_string(value, &EncodeContext { registry: &registry, config })
    }

    fn scalar(kind: ScalarKind) -> Arc<DataModelNode> {
        Arc::new(DataModelNode::Scalar(kind))
    }

    #[test]
    fn writes_objects_in_declaration_order() {
        let node = DataModelNode::Object {
            class: "Dummy".into(),
            properties: vec![
                PropertyNode {
                    source_name: "id".into(),
                    encoded_name: "@id".into(),
                    accessor: PropertyAccessor::Field("id".into()),
                    formatters: vec![],
                    node: scalar(ScalarKind::Int),
                },
                PropertyNode {
                    source_name: "name".into(),
                    encoded_name: "name".into(),
                    accessor: PropertyAccessor::Field("name".into()),
                    formatters: vec![],
                    node: scalar(ScalarKind::String),
                },
            ],
        };
        let value = Object::builder("Dummy").field("name", "dummy").field("id", 1).build();
        assert_eq!(encode(&node, &value, &Config::default()).unwrap(), r#"{"@id":1,"name":"dummy"}"#);
    }

    #[test]
    fn lists_dicts_and_nulls() {
        let node = DataModelNode::Dict {
            key: ScalarKind::String,
            item: Arc::new(DataModelNode::List(Arc::new(DataModelNode::Nullable(scalar(ScalarKind::Float))))),
        };
        let mut map = indexmap::IndexMap::new();
        map.insert(DictKey::from("a"), Value::List(vec![Value::from(1.5), Value::Null, Value::Int(2)]));
        map.insert(DictKey::from("b"), Value::List(vec![]));
        let out = encode(&node, &Value::Dict(map.clone()), &Config::default()).unwrap();
        assert_eq!(out, r#"{"a":[1.5,null,2],"b":[]}"#);

        let preserve = Config::default().with_json_flags(JsonFlags::PRESERVE_ZERO_FRACTION);
        let out = encode(&node, &Value::Dict(map), &preserve).unwrap();
        assert_eq!(out, r#"{"a":[1.5,null,2.0],"b":[]}"#);
    }

    #[test]
    fn kind_branches_pick_by_runtime_shape() {
        let node = DataModelNode::Union {
            candidates: vec![
                UnionCandidate { key: "float".into(), shape: Some("float".into()), node: scalar(ScalarKind::Float) },
                UnionCandidate { key: "string".into(), shape: Some("string".into()), node: scalar(ScalarKind::String) },
            ],
            discriminator: None,
        };
        let config = Config::default();
        assert_eq!(encode(&node, &Value::from("x"), &config).unwrap(), r#""x""#);
        assert_eq!(encode(&node, &Value::Int(3), &config).unwrap(), "3");
        let err = encode(&node, &Value::Bool(true), &config).unwrap_err();
        assert_eq!(err.to_string(), "unexpected value at $: expected float|string, found bool");
    }

    #[test]
    fn type_mismatches_carry_the_accessor_path() {
        let node = DataModelNode::List(scalar(ScalarKind::Int));
        let err = encode(&node, &Value::List(vec![Value::from("x")]), &Config::default()).unwrap_err();
        assert_eq!(err.path(), Some("$1"));
        assert!(encode(&node, &Value::from(f64::NAN), &Config::default()).is_err());
    }

    #[test]
    fn mixed_values_write_by_kind() {
        let value = Value::List(vec![
            Value::Null,
            Value::Bool(false),
            Value::from("a/b"),
            Object::builder("P").field("x", 1).build(),
        ]);
        let out = encode(&DataModelNode::Mixed, &value, &Config::default()).unwrap();
        assert_eq!(out, r#"[null,false,"a\/b",{"x":1}]"#);
    }
}
