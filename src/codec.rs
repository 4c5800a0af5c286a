//! Compiled encoders and decode plans.
//!
//! An encoder is a flat list of `Instruction`s over accessors into the value
//! being written. Formatters and discriminators are referenced by name so a
//! `Codec` serializes with serde and can be persisted by the `CodecCache`.
pub mod compile;
pub mod interpret;
pub mod optimize;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::formatter::FormatterRef;
use crate::metadata::Direction;
use crate::model::DataModelNode;
use crate::types::ScalarKind;

pub use compile::compile;
pub use interpret::EncodeContext;
pub use optimize::optimize;

/// Where an instruction reads its value from. `Local(0)` is the root value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Accessor {
    Local(usize),
    Property { base: Box<Accessor>, name: String },
}

impl Accessor {
    pub const ROOT: Accessor = Accessor::Local(0);

    pub fn property(base: &Accessor, name: impl Into<String>) -> Accessor {
        Accessor::Property { base: Box::new(base.clone()), name: name.into() }
    }
}

impl fmt::Display for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accessor::Local(0) => f.write_str("$"),
            Accessor::Local(n) => write!(f, "${n}"),
            Accessor::Property { base, name } => write!(f, "{base}.{name}"),
        }
    }
}

/// How a `WriteValue` renders its value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WriteKind {
    Scalar(ScalarKind),
    /// backing value of an enum case
    Enum(ScalarKind),
    /// anything, written by runtime kind
    Mixed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoopKind {
    /// locals: `[item]`
    List,
    /// locals: `[key, value]`
    Dict,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Selector {
    /// cases `"null"` and `"value"`
    Null,
    /// cases keyed by the member type the named discriminator returns
    Discriminator(String),
    /// cases keyed by the runtime shape of the value
    Kind,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchCase {
    pub key: String,
    pub body: Vec<Instruction>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Instruction {
    WriteLiteral(String),
    WriteValue { accessor: Accessor, kind: WriteKind },
    /// dict key, always written as a JSON string
    WriteKey { accessor: Accessor },
    /// Binds `formatter(argument)` to local `bind` for the duration of `body`.
    Call { formatter: FormatterRef, argument: Accessor, bind: usize, body: Vec<Instruction> },
    Loop { iterable: Accessor, kind: LoopKind, locals: Vec<usize>, separator: String, body: Vec<Instruction> },
    Branch { accessor: Accessor, selector: Selector, cases: Vec<BranchCase> },
    Block(Vec<Instruction>),
}

/// A compiled encoder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Codec {
    pub instructions: Vec<Instruction>,
    /// number of local slots, the root included
    pub locals: usize,
}

/// A decoder is driven by the data model itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecodePlan {
    pub root: Arc<DataModelNode>,
}

/// What the codec cache stores.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Artifact {
    Encoder(Codec),
    Decoder(DecodePlan),
}

impl Artifact {
    pub fn direction(&self) -> Direction {
        match self {
            Artifact::Encoder(_) => Direction::Encode,
            Artifact::Decoder(_) => Direction::Decode,
        }
    }

    pub fn as_encoder(&self) -> Option<&Codec> {
        match self {
            Artifact::Encoder(codec) => Some(codec),
            Artifact::Decoder(_) => None,
        }
    }

    pub fn as_decoder(&self) -> Option<&DecodePlan> {
        match self {
            Artifact::Decoder(plan) => Some(plan),
            Artifact::Encoder(_) => None,
        }
    }
}

// ------------------------------- Tests ------------------------------------ //
