//! Peephole pass over compiled instructions.
//!
//! Blocks are spliced into their parent, runs of literals become one literal
//! and empty literals disappear, recursively through every nested body. The
//! pass is idempotent.
use super::{BranchCase, Instruction};

pub fn optimize(instructions: Vec<Instruction>) -> Vec<Instruction> {
    let mut out = Vec::with_capacity(instructions.len());
    splice(&mut out, instructions);
    out
}

fn splice(out: &mut Vec<Instruction>, instructions: Vec<Instruction>) {
    for instruction in instructions {
        match instruction {
            Instruction::Block(body) => splice(out, body),
            Instruction::WriteLiteral(text) if text.is_empty() => {}
            Instruction::WriteLiteral(text) => match out.last_mut() {
                Some(Instruction::WriteLiteral(previous)) => previous.push_str(&text),
                _ => out.push(Instruction::WriteLiteral(text)),
            },
            Instruction::Call { formatter, argument, bind, body } => {
                out.push(Instruction::Call { formatter, argument, bind, body: optimize(body) });
            }
            Instruction::Loop { iterable, kind, locals, separator, body } => {
                out.push(Instruction::Loop { iterable, kind, locals, separator, body: optimize(body) });
            }
            Instruction::Branch { accessor, selector, cases } => {
                let cases = cases
                    .into_iter()
                    .map(|case| BranchCase { key: case.key, body: optimize(case.body) })
                    .collect();
                out.push(Instruction::Branch { accessor, selector, cases });
            }
            other @ (Instruction::WriteValue { .. } | Instruction::WriteKey { .. }) => out.push(other),
        }
    }
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Accessor, LoopKind, Selector, WriteKind};
    use crate::types::ScalarKind;

    fn lit(s: &str) -> Instruction {
        Instruction::WriteLiteral(s.into())
    }

    fn value() -> Instruction {
        Instruction::WriteValue { accessor: Accessor::ROOT, kind: WriteKind::Scalar(ScalarKind::Int) }
    }

    fn sample() -> Vec<Instruction> {
        vec![
            lit("{"),
            Instruction::Block(vec![lit(""), lit("\"a\":"), Instruction::Block(vec![lit("["), lit("]")])]),
            lit(","),
            Instruction::Loop {
                iterable: Accessor::ROOT,
                kind: LoopKind::List,
                locals: vec![1],
                separator: ",".into(),
                body: vec![Instruction::Block(vec![lit("<"), value(), lit(">"), lit("")])],
            },
            Instruction::Branch {
                accessor: Accessor::ROOT,
                selector: Selector::Null,
                cases: vec![
                    crate::codec::BranchCase { key: "null".into(), body: vec![lit("nu"), lit("ll")] },
                    crate::codec::BranchCase { key: "value".into(), body: vec![Instruction::Block(vec![value()])] },
                ],
            },
            lit("}"),
        ]
    }

    #[test]
    fn flattens_and_merges() {
        let out = optimize(sample());
        assert_eq!(out[0], lit("{\"a\":[],"));
        let Instruction::Loop { body, .. } = &out[1] else { panic!("loop expected") };
        assert_eq!(body, &vec![lit("<"), value(), lit(">")]);
        let Instruction::Branch { cases, .. } = &out[2] else { panic!("branch expected") };
        assert_eq!(cases[0].body, vec![lit("null")]);
        assert_eq!(cases[1].body, vec![value()]);
        assert_eq!(out[3], lit("}"));
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn idempotent() {
        let once = optimize(sample());
        assert_eq!(optimize(once.clone()), once);
    }

    #[test]
    fn no_blocks_or_adjacent_literals_remain() {
        fn check(instructions: &[Instruction]) {
            for pair in instructions.windows(2) {
                assert!(!matches!(pair, [Instruction::WriteLiteral(_), Instruction::WriteLiteral(_)]));
            }
            for instruction in instructions {
                match instruction {
                    Instruction::Block(_) => panic!("block left behind"),
                    Instruction::WriteLiteral(text) => assert!(!text.is_empty()),
                    Instruction::Loop { body, .. } | Instruction::Call { body, .. } => check(body),
                    Instruction::Branch { cases, .. } => cases.iter().for_each(|c| check(&c.body)),
                    _ => {}
                }
            }
        }
        check(&optimize(sample()));
    }
}
