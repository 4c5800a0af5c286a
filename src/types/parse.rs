//! Type string resolution: `"?list<Foo<int>>|null"` → `Type`.
use once_cell::sync::Lazy;
use regex::Regex;

use super::{split_top_level, extract_generics, ScalarKind, Type, DATE_TIME_CLASSES};
use crate::error::ConfigurationError;

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\\?[A-Za-z_][A-Za-z0-9_]*(?:(?:\\|::)[A-Za-z_][A-Za-z0-9_]*)*$")
        .expect("identifier pattern is valid")
});

/// What a non-builtin name refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassKind {
    Class { templates: usize },
    Enum(ScalarKind),
}

pub trait ClassLookup {
    fn class_kind(&self, name: &str) -> Option<ClassKind>;
}

/// Resolves names against nothing; only builtins and templates.
impl ClassLookup for () {
    fn class_kind(&self, _name: &str) -> Option<ClassKind> { None }
}

pub struct TypeResolver<'a> {
    lookup: &'a dyn ClassLookup,
    templates: &'a [String],
}

impl<'a> TypeResolver<'a> {
    pub fn new(lookup: &'a dyn ClassLookup) -> Self {
        Self { lookup, templates: &[] }
    }

    /// Names in `templates` resolve to `Type::template`.
    pub fn with_templates(mut self, templates: &'a [String]) -> Self {
        self.templates = templates;
        self
    }

    pub fn resolve(&self, input: &str) -> Result<Type, ConfigurationError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(invalid(input, "empty type"));
        }
        let members = split_top_level(input, '|')?;
        if members.len() == 1 {
            return self.resolve_member(members[0]);
        }
        let mut resolved = Vec::with_capacity(members.len());
        for member in members {
            let member = member.trim();
            if member.starts_with('?') {
                return Err(invalid(input, "`?` cannot be combined with a union"));
            }
            resolved.push(self.resolve_member(member)?);
        }
        Type::union(resolved).map_err(|_| invalid(input, "a union needs at least two distinct members"))
    }

    fn resolve_member(&self, member: &str) -> Result<Type, ConfigurationError> {
        let member = member.trim();
        match member.strip_prefix('?') {
            Some(rest) => Ok(self.resolve_atom(rest.trim())?.or_null()),
            None => self.resolve_atom(member),
        }
    }

    fn resolve_atom(&self, atom: &str) -> Result<Type, ConfigurationError> {
        let (base, raw_params) = extract_generics(atom)?;
        if !IDENTIFIER.is_match(&base) {
            return Err(invalid(atom, "invalid identifier"));
        }
        let mut params = Vec::with_capacity(raw_params.len());
        for p in &raw_params {
            params.push(self.resolve(p)?);
        }
        let no_params = |ty: Type| {
            if params.is_empty() { Ok(ty) } else { Err(invalid(atom, "type takes no parameters")) }
        };

        match base.as_str() {
            "int" | "integer" => no_params(Type::int()),
            "float" | "double" => no_params(Type::float()),
            "bool" | "boolean" => no_params(Type::bool()),
            "string" => no_params(Type::string()),
            "null" => no_params(Type::null()),
            "mixed" => no_params(Type::mixed()),
            "list" => match params.len() {
                0 => Ok(Type::list(Type::mixed())),
                1 => Ok(Type::list(params.remove(0))),
                _ => Err(invalid(atom, "list takes one parameter")),
            },
            "array" | "dict" => {
                let is_array = base == "array";
                match params.len() {
                    0 if is_array => Ok(Type::list(Type::mixed())),
                    0 => Ok(Type::dict(Type::string(), Type::mixed())),
                    1 if is_array => Ok(Type::list(params.remove(0))),
                    1 => Ok(Type::dict(Type::string(), params.remove(0))),
                    2 => {
                        let key = params.remove(0);
                        let value = params.remove(0);
                        if key != Type::int() && key != Type::string() {
                            return Err(invalid(atom, "dict keys must be int or string"));
                        }
                        Ok(Type::dict(key, value))
                    }
                    _ => Err(invalid(atom, "dict takes at most two parameters")),
                }
            }
            name => self.resolve_name(atom, name, params),
        }
    }

    fn resolve_name(&self, atom: &str, name: &str, params: Vec<Type>) -> Result<Type, ConfigurationError> {
        if self.templates.iter().any(|t| t == name) {
            if !params.is_empty() {
                return Err(invalid(atom, "template parameters take no parameters"));
            }
            return Ok(Type::template(name));
        }
        if DATE_TIME_CLASSES.contains(&name) {
            if !params.is_empty() {
                return Err(invalid(atom, "type takes no parameters"));
            }
            return Ok(Type::object(name));
        }
        match self.lookup.class_kind(name) {
            Some(ClassKind::Class { templates }) => {
                if templates != params.len() {
                    return Err(ConfigurationError::GenericsMismatch {
                        class: name.to_string(),
                        expected: templates,
                        found: params.len(),
                    });
                }
                Ok(Type::generic(name, params))
            }
            Some(ClassKind::Enum(backing)) => {
                if !params.is_empty() {
                    return Err(invalid(atom, "enums take no parameters"));
                }
                Ok(Type::enumeration(name, backing))
            }
            None => Err(invalid(atom, &format!("unknown class `{name}`"))),
        }
    }
}

fn invalid(input: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidType { input: input.to_string(), reason: reason.to_string() }
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeKind;

    struct Fixture;

    impl ClassLookup for Fixture {
        fn class_kind(&self, name: &str) -> Option<ClassKind> {
            match name {
                "Item" | "App\\Dummy" => Some(ClassKind::Class { templates: 0 }),
                "Page" => Some(ClassKind::Class { templates: 1 }),
                "Pair" => Some(ClassKind::Class { templates: 2 }),
                "Suit" => Some(ClassKind::Enum(ScalarKind::String)),
                _ => None,
            }
        }
    }

    fn resolve(s: &str) -> Result<Type, ConfigurationError> {
        TypeResolver::new(&Fixture).resolve(s)
    }

    #[test]
    fn builtins_and_containers() {
        assert_eq!(resolve("int").unwrap(), Type::int());
        assert_eq!(resolve("?string").unwrap(), Type::string().or_null());
        assert_eq!(resolve("list<float>").unwrap().to_string(), "list<float>");
        assert_eq!(resolve("array<int, bool>").unwrap().to_string(), "dict<int, bool>");
        assert_eq!(resolve("dict<Item>").unwrap().to_string(), "dict<string, Item>");
        assert_eq!(resolve("array").unwrap().to_string(), "list<mixed>");
    }

    #[test]
    fn classes_enums_and_generics() {
        let ty = resolve("Page<Pair<int, Suit>>").unwrap();
        assert_eq!(ty.to_string(), "Page<Pair<int, Suit>>");
        let TypeKind::Object { generics, .. } = ty.kind() else { panic!("object expected") };
        let TypeKind::Object { generics: inner, .. } = generics[0].kind() else { panic!("object expected") };
        assert!(matches!(inner[1].kind(), TypeKind::Enum { backing: ScalarKind::String, .. }));
        assert!(resolve("App\\Dummy").is_ok());
        assert!(resolve("DateTimeImmutable").unwrap().is_date_time());
    }

    #[test]
    fn generics_count_mismatch_is_a_hard_error() {
        let err = resolve("Page<int, int>").unwrap_err();
        assert_eq!(err, ConfigurationError::GenericsMismatch { class: "Page".into(), expected: 1, found: 2 });
        assert!(matches!(resolve("Page").unwrap_err(), ConfigurationError::GenericsMismatch { found: 0, .. }));
    }

    #[test]
    fn unions_keep_source_order() {
        let ty = resolve("string|Item|null").unwrap();
        assert_eq!(ty.to_string(), "string|Item|null");
        assert!(ty.is_nullable());
        assert!(resolve("?int|string").is_err());
        assert!(resolve("int|int").is_err());
    }

    #[test]
    fn templates_resolve_in_scope_only() {
        let scope = vec!["T".to_string()];
        let ty = TypeResolver::new(&Fixture).with_templates(&scope).resolve("list<?T>").unwrap();
        assert!(!ty.is_closed());
        assert!(resolve("list<T>").is_err());
    }

    #[test]
    fn invalid_inputs() {
        for bad in ["", "list<int", "Unknown", "int<string>", "dict<float, int>", "9lives", "Item|"] {
            assert!(resolve(bad).is_err(), "{bad}");
        }
    }
}
