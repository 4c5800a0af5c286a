//! Per-call options.
//!
//! `Config` deserializes from camelCase JSON (`{"maxDepth": 2, "lazy": true}`)
//! with every key optional. Hooks are code and are attached with the
//! `with_*_hook` setters only.
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::formatter::check_date_time_format;
use crate::hash::Fingerprint;
use crate::hooks::{Hooks, ObjectHook, PropertyHook};

// ————————————————————————————————————————————————————————————————————————————
// JSON FLAGS
// ————————————————————————————————————————————————————————————————————————————

/// Output flags, bit-compatible with the PHP `json_encode` values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonFlags(u32);

impl JsonFlags {
    pub const NONE: JsonFlags = JsonFlags(0);
    pub const UNESCAPED_SLASHES: JsonFlags = JsonFlags(64);
    pub const UNESCAPED_UNICODE: JsonFlags = JsonFlags(256);
    pub const PRESERVE_ZERO_FRACTION: JsonFlags = JsonFlags(1024);

    pub fn from_bits(bits: u32) -> Self { JsonFlags(bits) }

    pub fn bits(self) -> u32 { self.0 }

    pub fn contains(self, other: JsonFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for JsonFlags {
    type Output = JsonFlags;
    fn bitor(self, rhs: JsonFlags) -> JsonFlags { JsonFlags(self.0 | rhs.0) }
}

// ————————————————————————————————————————————————————————————————————————————
// POLICY
// ————————————————————————————————————————————————————————————————————————————

/// How the data model builder treats a class that references itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircularReferencePolicy {
    Reject,
    MaxDepth(usize),
}

// ————————————————————————————————————————————————————————————————————————————
// CONFIG
// ————————————————————————————————————————————————————————————————————————————

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Config {
    pub groups: Vec<String>,
    pub max_depth: Option<usize>,
    pub reject_circular_reference: bool,
    /// chrono `strftime` pattern; `None` is RFC 3339
    pub date_time_format: Option<String>,
    pub lazy: bool,
    pub collect_errors: bool,
    pub format_json_flags: JsonFlags,
    pub max_depth_formatter: Option<String>,
    #[serde(skip)]
    pub hooks: Hooks,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            groups: Vec::new(),
            max_depth: None,
            reject_circular_reference: true,
            date_time_format: None,
            lazy: false,
            collect_errors: false,
            format_json_flags: JsonFlags::NONE,
            max_depth_formatter: None,
            hooks: Hooks::default(),
        }
    }
}

impl Config {
    /// Parse options from JSON, reporting the offending key path on error.
    pub fn from_json_str(src: &str) -> Result<Config, ConfigurationError> {
        let de = &mut serde_json::Deserializer::from_str(src);
        let config: Config = serde_path_to_error::deserialize(de).map_err(|err| {
            let path = err.path().to_string();
            ConfigurationError::InvalidOption { path, message: err.into_inner().to_string() }
        })?;
        config.circular_policy()?;
        if let Some(format) = config.date_time_format.as_deref() {
            check_date_time_format(format)?;
        }
        Ok(config)
    }

    /// `maxDepth` switches to depth limiting; otherwise cycles are rejected.
    /// Turning rejection off without a depth would recurse forever.
    pub fn circular_policy(&self) -> Result<CircularReferencePolicy, ConfigurationError> {
        match self.max_depth {
            Some(0) => Err(ConfigurationError::InvalidOption {
                path: "maxDepth".into(),
                message: "must be at least 1".into(),
            }),
            Some(n) => Ok(CircularReferencePolicy::MaxDepth(n)),
            None if self.reject_circular_reference => Ok(CircularReferencePolicy::Reject),
            None => Err(ConfigurationError::InvalidOption {
                path: "rejectCircularReference".into(),
                message: "disabling rejection requires maxDepth".into(),
            }),
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    pub fn with_max_depth_formatter(mut self, name: impl Into<String>) -> Self {
        self.max_depth_formatter = Some(name.into());
        self
    }

    pub fn with_reject_circular_reference(mut self, reject: bool) -> Self {
        self.reject_circular_reference = reject;
        self
    }

    pub fn with_date_time_format(mut self, format: impl Into<String>) -> Self {
        self.date_time_format = Some(format.into());
        self
    }

    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    pub fn with_collect_errors(mut self, collect: bool) -> Self {
        self.collect_errors = collect;
        self
    }

    pub fn with_json_flags(mut self, flags: JsonFlags) -> Self {
        self.format_json_flags = flags;
        self
    }

    /// `key` is a class name or `"object"` for every class.
    pub fn with_object_hook(mut self, key: impl Into<String>, hook: ObjectHook) -> Self {
        self.hooks.object.insert(key.into(), hook);
        self
    }

    /// `key` is `"Class::property"` or `"property"` for every property.
    pub fn with_property_hook(mut self, key: impl Into<String>, hook: PropertyHook) -> Self {
        self.hooks.property.insert(key.into(), hook);
        self
    }

    /// Feed the options that change compiled artifacts into `fp`.
    /// `lazy` and `collectErrors` only matter at decode time and are keyed
    /// separately by the caller.
    pub fn fingerprint_into(&self, fp: &mut Fingerprint) {
        let mut groups = self.groups.clone();
        groups.sort();
        groups.dedup();
        fp.write_u64(groups.len() as u64);
        for g in &groups {
            fp.write_str(g);
        }
        let depth = match self.circular_policy() {
            Ok(CircularReferencePolicy::MaxDepth(n)) => n as u64 + 1,
            _ => 0,
        };
        fp.write_u64(depth);
        fp.write_str(self.date_time_format.as_deref().unwrap_or(""));
        fp.write_str(self.max_depth_formatter.as_deref().unwrap_or(""));
        fp.write_u64(u64::from(self.format_json_flags.bits()));
        for (key, id) in self.hooks.identities() {
            fp.write_str(&key).write_u64(id);
        }
    }
}

// ------------------------------- Tests ------------------------------------ //
