//! Named value transformers applied while encoding or decoding a property.
//!
//! Formatters are registered with an explicit signature. Codecs refer to them
//! by name (`FormatterRef`) so compiled artifacts stay serializable; the
//! function itself is looked up in the `FormatterRegistry` at run time.
use std::fmt::{self, Write as _};
use std::sync::Arc;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{ConfigurationError, Error, Result};
use crate::types::Type;
use crate::value::Value;

pub type FormatterFn = Arc<dyn Fn(Value, &Config) -> Result<Value, String> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Receiver {
    Static,
    Bound,
}

/// A parameter or return position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureType {
    Value(Type),
    Void,
    Never,
}

impl SignatureType {
    pub fn as_type(&self) -> Option<&Type> {
        match self {
            SignatureType::Value(ty) => Some(ty),
            SignatureType::Void | SignatureType::Never => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub receiver: Receiver,
    pub params: Vec<SignatureType>,
    pub returns: SignatureType,
}

impl Signature {
    /// `static fn(param) -> returns`, the common case.
    pub fn unary(param: Type, returns: Type) -> Self {
        Self {
            receiver: Receiver::Static,
            params: vec![SignatureType::Value(param)],
            returns: SignatureType::Value(returns),
        }
    }
}

#[derive(Clone)]
pub struct Formatter {
    pub name: String,
    pub signature: Signature,
    pub func: FormatterFn,
}

impl Formatter {
    pub fn new(
        name: impl Into<String>,
        signature: Signature,
        func: impl Fn(Value, &Config) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        Self { name: name.into(), signature, func: Arc::new(func) }
    }

    /// Checks the signature can be used as a property formatter and returns
    /// `(input type, output type)`.
    pub fn validate(&self) -> Result<(Type, Type), ConfigurationError> {
        let invalid = |reason: &str| ConfigurationError::InvalidFormatter {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.signature.receiver != Receiver::Static {
            return Err(invalid("formatter must be static"));
        }
        let Some(first) = self.signature.params.first() else {
            return Err(invalid("formatter must take the value as first parameter"));
        };
        let Some(input) = first.as_type() else {
            return Err(invalid("value parameter cannot be void or never"));
        };
        let Some(output) = self.signature.returns.as_type() else {
            return Err(invalid("return type cannot be void or never"));
        };
        Ok((input.clone(), output.clone()))
    }
}

impl fmt::Debug for Formatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Formatter")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, Default)]
pub struct FormatterRegistry {
    formatters: IndexMap<String, Formatter>,
}

impl FormatterRegistry {
    pub fn register(&mut self, formatter: Formatter) {
        self.formatters.insert(formatter.name.clone(), formatter);
    }

    pub fn get(&self, name: &str) -> Option<&Formatter> {
        self.formatters.get(name)
    }

    /// Lookup plus signature validation.
    pub fn resolve(&self, name: &str) -> Result<(&Formatter, Type, Type), ConfigurationError> {
        let formatter = self
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownFormatter(name.to_string()))?;
        let (input, output) = formatter.validate()?;
        Ok((formatter, input, output))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Formatter> {
        self.formatters.values()
    }
}

// ------------------------------ References -------------------------------- //

/// Serializable reference to a formatter inside a codec or decode plan.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatterRef {
    Named(String),
    /// date-time to string; `None` is RFC 3339
    DateTimeFormat(Option<String>),
    /// string to date-time; `None` is RFC 3339
    DateTimeParse(Option<String>),
}

impl FormatterRef {
    pub fn name(&self) -> &str {
        match self {
            FormatterRef::Named(name) => name,
            FormatterRef::DateTimeFormat(_) => "datetime.format",
            FormatterRef::DateTimeParse(_) => "datetime.parse",
        }
    }

    pub fn apply(&self, value: Value, formatters: &FormatterRegistry, config: &Config) -> Result<Value> {
        let failed = |message: String| Error::Formatter { path: None, name: self.name().to_string(), message };
        match self {
            FormatterRef::Named(name) => {
                let formatter = formatters
                    .get(name)
                    .ok_or_else(|| Error::from(ConfigurationError::UnknownFormatter(name.clone())))?;
                (formatter.func)(value, config).map_err(failed)
            }
            FormatterRef::DateTimeFormat(format) => match value {
                Value::DateTime(dt) => format_date_time(&dt, format.as_deref()).map(Value::String).map_err(failed),
                Value::Null => Ok(Value::Null),
                other => Err(failed(format!("expected a date-time, found {}", other.kind_name()))),
            },
            FormatterRef::DateTimeParse(format) => match value {
                Value::String(s) => parse_date_time(&s, format.as_deref()).map(Value::DateTime).map_err(failed),
                Value::Null => Ok(Value::Null),
                other => Err(failed(format!("expected a string, found {}", other.kind_name()))),
            },
        }
    }
}

pub fn format_date_time(dt: &DateTime<FixedOffset>, format: Option<&str>) -> Result<String, String> {
    match format {
        None => Ok(dt.to_rfc3339()),
        Some(f) => {
            let mut out = String::new();
            write!(out, "{}", dt.format(f)).map_err(|_| format!("cannot format a date-time with `{f}`"))?;
            Ok(out)
        }
    }
}

/// Rejects strftime patterns chrono cannot render.
pub fn check_date_time_format(format: &str) -> Result<(), ConfigurationError> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(ConfigurationError::InvalidOption {
            path: "dateTimeFormat".into(),
            message: format!("invalid strftime pattern `{format}`"),
        });
    }
    Ok(())
}

/// Formats without an offset are read as UTC.
pub fn parse_date_time(input: &str, format: Option<&str>) -> Result<DateTime<FixedOffset>, String> {
    match format {
        None => DateTime::parse_from_rfc3339(input).map_err(|e| format!("`{input}`: {e}")),
        Some(f) => DateTime::parse_from_str(input, f)
            .or_else(|_| NaiveDateTime::parse_from_str(input, f).map(|naive| naive.and_utc().fixed_offset()))
            .map_err(|e| format!("`{input}` does not match `{f}`: {e}")),
    }
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;

    fn upper() -> Formatter {
        Formatter::new("upper", Signature::unary(Type::string(), Type::string()), |v, _| match v {
            Value::String(s) => Ok(Value::String(s.to_uppercase())),
            other => Err(format!("cannot upper-case {}", other.kind_name())),
        })
    }

    #[test]
    fn signature_validation() {
        assert!(upper().validate().is_ok());

        let mut bound = upper();
        bound.signature.receiver = Receiver::Bound;
        assert!(matches!(bound.validate(), Err(ConfigurationError::InvalidFormatter { .. })));

        let mut no_params = upper();
        no_params.signature.params.clear();
        assert!(no_params.validate().is_err());

        let mut void = upper();
        void.signature.returns = SignatureType::Void;
        assert!(void.validate().is_err());

        let mut never_param = upper();
        never_param.signature.params = vec![SignatureType::Never];
        assert!(never_param.validate().is_err());
    }

    #[test]
    fn registry_resolution() {
        let mut registry = FormatterRegistry::default();
        registry.register(upper());
        let (_, input, output) = registry.resolve("upper").unwrap();
        assert_eq!((input, output), (Type::string(), Type::string()));
        assert_eq!(
            registry.resolve("lower").unwrap_err(),
            ConfigurationError::UnknownFormatter("lower".into())
        );
    }

    #[test]
    fn references_apply() {
        let mut registry = FormatterRegistry::default();
        registry.register(upper());
        let config = Config::default();
        let out = FormatterRef::Named("upper".into()).apply(Value::from("ab"), &registry, &config).unwrap();
        assert_eq!(out, Value::from("AB"));

        let err = FormatterRef::Named("upper".into()).apply(Value::Int(1), &registry, &config).unwrap_err();
        assert!(matches!(err, Error::Formatter { .. }));
    }

    #[test]
    fn date_times_round_trip() {
        let dt = DateTime::parse_from_rfc3339("2024-05-01T10:30:00+02:00").unwrap();
        let text = format_date_time(&dt, None).unwrap();
        assert_eq!(parse_date_time(&text, None).unwrap(), dt);

        let text = format_date_time(&dt, Some("%Y-%m-%d %H:%M:%S %z")).unwrap();
        assert_eq!(text, "2024-05-01 10:30:00 +0200");
        assert_eq!(parse_date_time(&text, Some("%Y-%m-%d %H:%M:%S %z")).unwrap(), dt);

        let naive = parse_date_time("2024-05-01 08:30", Some("%Y-%m-%d %H:%M")).unwrap();
        assert_eq!(naive.to_rfc3339(), "2024-05-01T08:30:00+00:00");
        assert!(parse_date_time("yesterday", None).is_err());
    }
}
