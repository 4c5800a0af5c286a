//! Error taxonomy shared by every stage.
//!
//! `ConfigurationError`s are raised while resolving types, loading metadata
//! or building the data model and are always fatal. Decode-side errors
//! (`InvalidResource`, `UnexpectedToken`, `UnexpectedValue`) are scoped to one
//! element and may be collected instead of aborting, see `Config::collect_errors`.
use std::io;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("invalid type `{input}`: {reason}")]
    InvalidType { input: String, reason: String },

    #[error("class `{class}` declares {expected} template parameter(s) but {found} were given")]
    GenericsMismatch { class: String, expected: usize, found: usize },

    #[error("unknown class `{0}`")]
    UnknownClass(String),

    #[error("unknown formatter `{0}`")]
    UnknownFormatter(String),

    #[error("invalid formatter `{name}`: {reason}")]
    InvalidFormatter { name: String, reason: String },

    #[error("cannot resolve type of `{class}::{property}`: {reason}")]
    UnresolvedPropertyType { class: String, property: String, reason: String },

    #[error("union `{0}` has candidates with overlapping shapes and no discriminator")]
    AmbiguousUnion(String),

    #[error("unknown discriminator `{0}`")]
    UnknownDiscriminator(String),

    #[error("invalid option at {path}: {message}")]
    InvalidOption { path: String, message: String },

    #[error("class `{class}` cannot be proxied: {reason}")]
    UnsupportedShape { class: String, reason: String },
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("configuration: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("circular reference to `{class}` ({chain})")]
    CircularReference { class: String, chain: String },

    #[error("invalid resource at offset {offset}{}: {reason}", fmt_path(.path))]
    InvalidResource { path: Option<String>, offset: u64, reason: String },

    #[error("unexpected token `{found}` at offset {offset}{}", fmt_path(.path))]
    UnexpectedToken { path: Option<String>, offset: u64, found: String },

    #[error("unexpected value{}: expected {expected}, found {found}", fmt_path(.path))]
    UnexpectedValue { path: Option<String>, expected: String, found: String },

    #[error("formatter `{name}` failed{}: {message}", fmt_path(.path))]
    Formatter { path: Option<String>, name: String, message: String },

    #[error("io: {0}")]
    Io(#[from] io::Error),
}

fn fmt_path(path: &Option<String>) -> String {
    match path {
        Some(p) => format!(" at {p}"),
        None => String::new(),
    }
}

impl Error {
    pub fn unexpected_value(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Error::UnexpectedValue { path: None, expected: expected.into(), found: found.into() }
    }

    pub fn unexpected_token(offset: u64, found: impl Into<String>) -> Self {
        Error::UnexpectedToken { path: None, offset, found: found.into() }
    }

    pub fn invalid_resource(offset: u64, reason: impl Into<String>) -> Self {
        Error::InvalidResource { path: None, offset, reason: reason.into() }
    }

    /// Property path the error is attached to, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            Error::InvalidResource { path, .. }
            | Error::UnexpectedToken { path, .. }
            | Error::UnexpectedValue { path, .. }
            | Error::Formatter { path, .. } => path.as_deref(),
            _ => None,
        }
    }

    /// Attach `at` as the property path unless a deeper one is already set.
    pub fn at(mut self, at: &str) -> Self {
        match &mut self {
            Error::InvalidResource { path, .. }
            | Error::UnexpectedToken { path, .. }
            | Error::UnexpectedValue { path, .. }
            | Error::Formatter { path, .. } => {
                if path.is_none() {
                    *path = Some(at.to_string());
                }
            }
            _ => {}
        }
        self
    }

    /// Whether the error is scoped to a single element and may be collected.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::InvalidResource { .. }
                | Error::UnexpectedToken { .. }
                | Error::UnexpectedValue { .. }
                | Error::Formatter { .. }
        )
    }
}

// ------------------------------- Tests ------------------------------------ //
