//! Class, enum, formatter and discriminator definitions.
//!
//! Rust has no runtime reflection, so everything the pipeline needs to know
//! about a class is registered up front. The `Registry` answers the
//! `TypeExtractor` and `AttributeSource` questions the metadata stages ask.
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::formatter::{Formatter, FormatterRegistry, SignatureType};
use crate::hash::Fingerprint;
use crate::types::{split_top_level, ClassKind, ClassLookup, ScalarKind, Type, TypeResolver};
use crate::value::Value;

// ------------------------------- Directives ------------------------------- //

/// Declarative annotations on classes and properties.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Directive {
    Rename(String),
    EncodeFormatter(String),
    DecodeFormatter(String),
    Groups(Vec<String>),
    MaxDepth { max: usize, formatter: Option<String> },
    /// Precompile this class on `Serializer::warm_up`.
    Warmable,
}

// ------------------------------ Descriptors ------------------------------- //

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    /// Type string, resolved lazily with the class templates in scope.
    pub ty: String,
    #[serde(default)]
    pub directives: Vec<Directive>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDescriptor {
    pub name: String,
    #[serde(default)]
    pub templates: Vec<String>,
    #[serde(default)]
    pub properties: IndexMap<String, PropertyDescriptor>,
    #[serde(default)]
    pub directives: Vec<Directive>,
}

impl ClassDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), templates: Vec::new(), properties: IndexMap::new(), directives: Vec::new() }
    }

    pub fn template(mut self, name: impl Into<String>) -> Self {
        self.templates.push(name.into());
        self
    }

    pub fn property(self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.property_with(name, ty, Vec::new())
    }

    pub fn property_with(mut self, name: impl Into<String>, ty: impl Into<String>, directives: Vec<Directive>) -> Self {
        self.properties.insert(name.into(), PropertyDescriptor { ty: ty.into(), directives });
        self
    }

    pub fn directive(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDescriptor {
    pub name: String,
    pub backing: ScalarKind,
    /// case name → backing value
    pub cases: IndexMap<String, serde_json::Value>,
}

impl EnumDescriptor {
    pub fn new(name: impl Into<String>, backing: ScalarKind) -> Self {
        Self { name: name.into(), backing, cases: IndexMap::new() }
    }

    pub fn case(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.cases.insert(name.into(), value.into());
        self
    }

    pub fn accepts(&self, backing: &serde_json::Value) -> bool {
        self.cases.is_empty() || self.cases.values().any(|v| v == backing)
    }
}

// ----------------------------- Discriminators ----------------------------- //

/// Picks a union member for a value. Returns the canonical string of the
/// chosen member (`"Cat"`, `"list<int>"`). On decode the value is the raw,
/// untyped member as parsed by `serde_json`.
pub type DiscriminatorFn = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;

#[derive(Clone)]
pub struct Discriminator {
    pub name: String,
    pub select: DiscriminatorFn,
}

impl fmt::Debug for Discriminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Discriminator").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Discriminators keyed by the union they apply to, `null` excluded and
/// member order ignored.
#[derive(Clone, Debug, Default)]
pub struct DiscriminatorRegistry {
    by_union: IndexMap<String, Discriminator>,
}

impl DiscriminatorRegistry {
    pub fn register(&mut self, union: &str, discriminator: Discriminator) -> Result<(), ConfigurationError> {
        let key = normalize_union_key(union)?;
        self.by_union.insert(key, discriminator);
        Ok(())
    }

    pub fn for_union(&self, union: &Type) -> Option<&Discriminator> {
        let key = union_key(union);
        self.by_union.get(&key)
    }

    pub fn by_name(&self, name: &str) -> Option<&Discriminator> {
        self.by_union.values().find(|d| d.name == name)
    }
}

fn normalize_union_key(union: &str) -> Result<String, ConfigurationError> {
    let mut members: Vec<String> = split_top_level(union, '|')?
        .into_iter()
        .map(|m| m.trim().to_string())
        .filter(|m| m != "null")
        .collect();
    members.sort();
    Ok(members.join("|"))
}

fn union_key(union: &Type) -> String {
    let mut members: Vec<String> = union
        .members()
        .iter()
        .filter(|m| !m.is_null())
        .map(|m| m.to_string())
        .collect();
    members.sort();
    members.join("|")
}

// -------------------------------- Registry -------------------------------- //

/// Serialized class and enum definitions. Formatters and discriminators are
/// code and are registered programmatically.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RegistryDocument {
    classes: Vec<ClassDescriptor>,
    enums: Vec<EnumDescriptor>,
}

#[derive(Clone, Debug, Default)]
pub struct Registry {
    classes: IndexMap<String, ClassDescriptor>,
    enums: IndexMap<String, EnumDescriptor>,
    formatters: FormatterRegistry,
    discriminators: DiscriminatorRegistry,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load class and enum definitions from JSON, reporting the offending
    /// path on error.
    pub fn from_json_str(src: &str) -> Result<Self, ConfigurationError> {
        let de = &mut serde_json::Deserializer::from_str(src);
        let document: RegistryDocument = serde_path_to_error::deserialize(de).map_err(|err| {
            let path = err.path().to_string();
            ConfigurationError::InvalidOption { path, message: err.into_inner().to_string() }
        })?;
        let mut registry = Registry::new();
        document.classes.into_iter().for_each(|class| registry.register_class(class));
        document.enums.into_iter().for_each(|descriptor| registry.register_enum(descriptor));
        Ok(registry)
    }

    pub fn with_class(mut self, class: ClassDescriptor) -> Self {
        self.register_class(class);
        self
    }

    pub fn with_enum(mut self, descriptor: EnumDescriptor) -> Self {
        self.register_enum(descriptor);
        self
    }

    pub fn with_formatter(mut self, formatter: Formatter) -> Self {
        self.formatters.register(formatter);
        self
    }

    pub fn register_class(&mut self, class: ClassDescriptor) {
        self.classes.insert(class.name.clone(), class);
    }

    pub fn register_enum(&mut self, descriptor: EnumDescriptor) {
        self.enums.insert(descriptor.name.clone(), descriptor);
    }

    pub fn register_formatter(&mut self, formatter: Formatter) {
        self.formatters.register(formatter);
    }

    pub fn register_discriminator(
        &mut self,
        union: &str,
        name: impl Into<String>,
        select: impl Fn(&Value) -> Option<String> + Send + Sync + 'static,
    ) -> Result<(), ConfigurationError> {
        self.discriminators.register(union, Discriminator { name: name.into(), select: Arc::new(select) })
    }

    pub fn class(&self, name: &str) -> Result<&ClassDescriptor, ConfigurationError> {
        self.classes.get(name).ok_or_else(|| ConfigurationError::UnknownClass(name.to_string()))
    }

    pub fn enumeration(&self, name: &str) -> Option<&EnumDescriptor> {
        self.enums.get(name)
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassDescriptor> {
        self.classes.values()
    }

    pub fn formatters(&self) -> &FormatterRegistry {
        &self.formatters
    }

    pub fn discriminators(&self) -> &DiscriminatorRegistry {
        &self.discriminators
    }

    pub fn resolve_type(&self, input: &str) -> Result<Type, ConfigurationError> {
        TypeResolver::new(self).resolve(input)
    }

    /// Hash of every definition that can change a compiled artifact.
    pub fn fingerprint(&self) -> u64 {
        let mut fp = Fingerprint::new();
        for class in self.classes.values() {
            fp.write_str(&serde_json::to_string(class).unwrap_or_default());
        }
        for descriptor in self.enums.values() {
            fp.write_str(&serde_json::to_string(descriptor).unwrap_or_default());
        }
        for formatter in self.formatters.iter() {
            fp.write_str(&formatter.name);
            fp.write_str(&serde_json::to_string(&formatter.signature).unwrap_or_default());
        }
        for (union, discriminator) in &self.discriminators.by_union {
            fp.write_str(union);
            fp.write_str(&discriminator.name);
        }
        fp.finish()
    }
}

impl ClassLookup for Registry {
    fn class_kind(&self, name: &str) -> Option<ClassKind> {
        if let Some(class) = self.classes.get(name) {
            return Some(ClassKind::Class { templates: class.templates.len() });
        }
        self.enums.get(name).map(|e| ClassKind::Enum(e.backing))
    }
}

// ------------------------------ Capabilities ------------------------------ //

/// Type information about classes and formatters.
pub trait TypeExtractor {
    fn extract_property_names(&self, class: &str) -> Result<Vec<String>, ConfigurationError>;
    fn extract_from_property(&self, class: &str, property: &str) -> Result<Type, ConfigurationError>;
    /// `None` when the parameter is void/never or does not exist.
    fn extract_from_function_parameter(&self, formatter: &str, index: usize) -> Result<Option<Type>, ConfigurationError>;
    /// `None` for void/never.
    fn extract_from_return_type(&self, formatter: &str) -> Result<Option<Type>, ConfigurationError>;
    fn extract_template_from_class(&self, class: &str) -> Result<Vec<String>, ConfigurationError>;
}

/// Directives attached to classes and properties.
pub trait AttributeSource {
    fn class_directives(&self, class: &str) -> &[Directive];
    fn property_directives(&self, class: &str, property: &str) -> &[Directive];
}

impl TypeExtractor for Registry {
    fn extract_property_names(&self, class: &str) -> Result<Vec<String>, ConfigurationError> {
        Ok(self.class(class)?.properties.keys().cloned().collect())
    }

    fn extract_from_property(&self, class: &str, property: &str) -> Result<Type, ConfigurationError> {
        let descriptor = self.class(class)?;
        let unresolved = |reason: String| ConfigurationError::UnresolvedPropertyType {
            class: class.to_string(),
            property: property.to_string(),
            reason,
        };
        let prop = descriptor
            .properties
            .get(property)
            .ok_or_else(|| unresolved("no such property".into()))?;
        TypeResolver::new(self)
            .with_templates(&descriptor.templates)
            .resolve(&prop.ty)
            .map_err(|e| unresolved(e.to_string()))
    }

    fn extract_from_function_parameter(&self, formatter: &str, index: usize) -> Result<Option<Type>, ConfigurationError> {
        let f = self
            .formatters
            .get(formatter)
            .ok_or_else(|| ConfigurationError::UnknownFormatter(formatter.to_string()))?;
        Ok(f.signature.params.get(index).and_then(SignatureType::as_type).cloned())
    }

    fn extract_from_return_type(&self, formatter: &str) -> Result<Option<Type>, ConfigurationError> {
        let f = self
            .formatters
            .get(formatter)
            .ok_or_else(|| ConfigurationError::UnknownFormatter(formatter.to_string()))?;
        Ok(f.signature.returns.as_type().cloned())
    }

    fn extract_template_from_class(&self, class: &str) -> Result<Vec<String>, ConfigurationError> {
        Ok(self.class(class)?.templates.clone())
    }
}

impl AttributeSource for Registry {
    fn class_directives(&self, class: &str) -> &[Directive] {
        self.classes.get(class).map(|c| c.directives.as_slice()).unwrap_or(&[])
    }

    fn property_directives(&self, class: &str, property: &str) -> &[Directive] {
        self.classes
            .get(class)
            .and_then(|c| c.properties.get(property))
            .map(|p| p.directives.as_slice())
            .unwrap_or(&[])
    }
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::Signature;

    fn registry() -> Registry {
        Registry::new()
            .with_class(
                ClassDescriptor::new("Page")
                    .template("T")
                    .property("items", "list<T>")
                    .property_with("total", "int", vec![Directive::Rename("count".into())]),
            )
            .with_class(ClassDescriptor::new("Broken").property("x", "Nope"))
            .with_enum(EnumDescriptor::new("Suit", ScalarKind::String).case("Hearts", "H"))
            .with_formatter(crate::formatter::Formatter::new(
                "to_str",
                Signature::unary(Type::int(), Type::string()),
                |v, _| Ok(v),
            ))
    }

    #[test]
    fn loads_definitions_from_json() {
        let r = Registry::from_json_str(
            r#"{
                "classes": [{"name": "Dummy", "properties": {"id": {"ty": "int", "directives": [{"Rename": "@id"}]}}}],
                "enums": [{"name": "Suit", "backing": "string", "cases": {"Hearts": "H"}}]
            }"#,
        )
        .unwrap();
        assert_eq!(r.property_directives("Dummy", "id"), &[Directive::Rename("@id".into())]);
        assert!(r.enumeration("Suit").is_some());

        let err = Registry::from_json_str(r#"{"classes": [{"name": 1}]}"#).unwrap_err();
        let ConfigurationError::InvalidOption { path, .. } = err else { panic!("invalid option expected") };
        assert_eq!(path, "classes[0].name");
    }

    #[test]
    fn extracts_properties_with_templates_in_scope() {
        let r = registry();
        assert_eq!(r.extract_property_names("Page").unwrap(), vec!["items", "total"]);
        assert_eq!(r.extract_from_property("Page", "items").unwrap(), Type::list(Type::template("T")));
        assert_eq!(r.extract_template_from_class("Page").unwrap(), vec!["T"]);
        assert_eq!(r.property_directives("Page", "total"), &[Directive::Rename("count".into())]);
        assert!(r.property_directives("Page", "nope").is_empty());
    }

    #[test]
    fn unresolvable_property_types() {
        let err = registry().extract_from_property("Broken", "x").unwrap_err();
        assert!(matches!(err, ConfigurationError::UnresolvedPropertyType { .. }));
        assert!(matches!(
            registry().extract_property_names("Ghost").unwrap_err(),
            ConfigurationError::UnknownClass(_)
        ));
    }

    #[test]
    fn formatter_signatures() {
        let r = registry();
        assert_eq!(r.extract_from_function_parameter("to_str", 0).unwrap(), Some(Type::int()));
        assert_eq!(r.extract_from_function_parameter("to_str", 1).unwrap(), None);
        assert_eq!(r.extract_from_return_type("to_str").unwrap(), Some(Type::string()));
    }

    #[test]
    fn resolves_types_against_registered_names() {
        let r = registry();
        assert_eq!(r.resolve_type("Page<Suit>").unwrap().to_string(), "Page<Suit>");
        assert!(r.resolve_type("Page").is_err());
    }

    #[test]
    fn discriminator_lookup_ignores_order_and_null() {
        let mut r = Registry::new()
            .with_class(ClassDescriptor::new("Cat"))
            .with_class(ClassDescriptor::new("Dog"));
        r.register_discriminator("Dog|Cat", "pet", |_| Some("Cat".into())).unwrap();
        let union = r.resolve_type("Cat|Dog|null").unwrap();
        assert_eq!(r.discriminators().for_union(&union).map(|d| d.name.as_str()), Some("pet"));
    }

    #[test]
    fn fingerprint_tracks_definitions() {
        let a = registry();
        let b = registry().with_class(ClassDescriptor::new("Extra"));
        assert_eq!(a.fingerprint(), registry().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
