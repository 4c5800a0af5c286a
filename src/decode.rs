//! Decoding a resource against a decode plan.
//!
//! The decoder walks the data model and the splitter together: containers are
//! split into boundaries, leaves are parsed by `serde_json` from their exact
//! bytes. Every object field becomes a value provider; the `Instantiator`
//! decides whether providers run now or on first read.
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::codec::DecodePlan;
use crate::config::Config;
use crate::error::{ConfigurationError, Error, Result};
use crate::formatter::FormatterRef;
use crate::instantiate::{ErrorCollector, Instantiator, ProviderLoader, Providers, ShapeCache};
use crate::model::{DataModelNode, UnionCandidate};
use crate::registry::Registry;
use crate::resource::{read_range, Resource, ResourceCursor};
use crate::splitter::{split_dict, split_list, Boundary};
use crate::types::ScalarKind;
use crate::value::{DictKey, Value, ValueProvider};

/// A decoded value plus the errors collected under `collectErrors`.
#[derive(Debug)]
pub struct DecodeOutcome {
    pub value: Value,
    pub errors: Vec<Error>,
}

/// One decode call. Shared by every provider it hands out, so the resource
/// stays alive as long as any lazy field is unresolved.
pub struct Decoder {
    resource: Rc<dyn Resource>,
    registry: Arc<Registry>,
    config: Arc<Config>,
    shapes: Arc<ShapeCache>,
    instantiator: Instantiator,
    errors: ErrorCollector,
}

impl Decoder {
    pub fn new(
        resource: Rc<dyn Resource>,
        registry: Arc<Registry>,
        config: Arc<Config>,
        shapes: Arc<ShapeCache>,
    ) -> Rc<Self> {
        Rc::new(Self {
            instantiator: Instantiator::from_config(&config),
            errors: ErrorCollector::new(config.collect_errors),
            resource,
            registry,
            config,
            shapes,
        })
    }

    pub fn decode(self: &Rc<Self>, plan: &DecodePlan) -> Result<DecodeOutcome> {
        let whole = Boundary { offset: 0, length: self.resource.len() };
        let value = self.value(&plan.root, whole, "$")?;
        Ok(DecodeOutcome { value, errors: self.errors.take() })
    }

    fn value(self: &Rc<Self>, node: &Arc<DataModelNode>, at: Boundary, path: &str) -> Result<Value> {
        self.node(node, at, path).map_err(|err| err.at(path))
    }

    fn node(self: &Rc<Self>, node: &Arc<DataModelNode>, at: Boundary, path: &str) -> Result<Value> {
        match &**node {
            DataModelNode::Null => match self.json(at)? {
                serde_json::Value::Null => Ok(Value::Null),
                other => Err(Error::unexpected_value("null", json_kind(&other))),
            },
            DataModelNode::Scalar(kind) => self.scalar(*kind, at),
            DataModelNode::Mixed => self.json(at).map(Value::from_json),
            DataModelNode::Nullable(inner) => match self.first_byte(at)? {
                Some(b'n') => Ok(Value::Null),
                _ => self.value(inner, at, path),
            },
            DataModelNode::List(item) => self.list(item, at, path),
            DataModelNode::Dict { key, item } => self.dict(*key, item, at, path),
            DataModelNode::Object { class, properties } => {
                let decoder = self.clone();
                let object = node.clone();
                let window_path = path.to_string();
                let load: ProviderLoader = Rc::new(move || decoder.providers(&object, at, &window_path));
                self.instantiator
                    .instantiate(class, properties, &self.shapes, load, &self.errors)
                    .map(|object| Value::Object(Rc::new(object)))
            }
            DataModelNode::Union { candidates, discriminator } => {
                let chosen = self.choose(candidates, discriminator.as_deref(), at)?;
                self.value(&chosen.node, at, path)
            }
            DataModelNode::Enum { class, backing } => self.enumeration(class, *backing, at),
            DataModelNode::DateTime { format } => {
                let text = self.scalar(ScalarKind::String, at)?;
                FormatterRef::DateTimeParse(format.clone()).apply(text, self.registry.formatters(), &self.config)
            }
        }
    }

    fn list(self: &Rc<Self>, item: &Arc<DataModelNode>, at: Boundary, path: &str) -> Result<Value> {
        let mut items = Vec::new();
        for (index, entry) in split_list(&*self.resource, at.offset, Some(at.length))?.enumerate() {
            let item_path = format!("{path}[{index}]");
            let decoded = entry.and_then(|boundary| self.value(item, boundary, &item_path));
            match decoded {
                Ok(value) => items.push(value),
                Err(err) => self.errors.record(err.at(&item_path))?,
            }
        }
        Ok(Value::List(items))
    }

    fn dict(self: &Rc<Self>, key: ScalarKind, item: &Arc<DataModelNode>, at: Boundary, path: &str) -> Result<Value> {
        let mut entries = IndexMap::new();
        for entry in split_dict(&*self.resource, at.offset, Some(at.length))? {
            let (raw_key, boundary) = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    self.errors.record(err.at(path))?;
                    continue;
                }
            };
            let entry_path = format!("{path}.{raw_key}");
            let decoded = dict_key(key, raw_key).and_then(|k| Ok((k, self.value(item, boundary, &entry_path)?)));
            match decoded {
                Ok((k, value)) => {
                    entries.insert(k, value);
                }
                Err(err) => self.errors.record(err.at(&entry_path))?,
            }
        }
        Ok(Value::Dict(entries))
    }

    /// Split an object window into one provider per known property.
    fn providers(self: &Rc<Self>, object: &Arc<DataModelNode>, at: Boundary, path: &str) -> Result<Providers> {
        let DataModelNode::Object { properties, .. } = &**object else {
            return Ok(Providers::new());
        };
        let mut raw: HashMap<String, Boundary> = HashMap::new();
        for entry in split_dict(&*self.resource, at.offset, Some(at.length)).map_err(|err| err.at(path))? {
            match entry {
                Ok((key, boundary)) => {
                    raw.insert(key, boundary);
                }
                Err(err) => self.errors.record(err.at(path))?,
            }
        }

        let mut providers = Providers::new();
        for property in properties {
            let provider: ValueProvider = match raw.get(&property.encoded_name) {
                Some(&boundary) => {
                    let decoder = self.clone();
                    let node = property.node.clone();
                    let formatters = property.formatters.clone();
                    let field_path = format!("{path}.{}", property.encoded_name);
                    Rc::new(move || decoder.field(&node, &formatters, boundary, &field_path))
                }
                None if property.node.accepts_null() => Rc::new(|| Ok(Value::Null)),
                None => continue,
            };
            providers.insert(property.source_name.clone(), provider);
        }
        Ok(providers)
    }

    /// Decode a property and run its decode formatters, last attached first.
    fn field(
        self: &Rc<Self>,
        node: &Arc<DataModelNode>,
        formatters: &[FormatterRef],
        at: Boundary,
        path: &str,
    ) -> Result<Value> {
        let mut value = self.value(node, at, path)?;
        if value.is_null() {
            return Ok(value);
        }
        for formatter in formatters.iter().rev() {
            value = formatter
                .apply(value, self.registry.formatters(), &self.config)
                .map_err(|err| err.at(path))?;
        }
        Ok(value)
    }

    fn choose<'n>(
        &self,
        candidates: &'n [UnionCandidate],
        discriminator: Option<&str>,
        at: Boundary,
    ) -> Result<&'n UnionCandidate> {
        let expected = || candidates.iter().map(|c| c.key.as_str()).collect::<Vec<_>>().join("|");
        match discriminator {
            Some(name) => {
                let discriminator = self
                    .registry
                    .discriminators()
                    .by_name(name)
                    .ok_or_else(|| ConfigurationError::UnknownDiscriminator(name.to_string()))?;
                let raw = Value::from_json(self.json(at)?);
                let key = (discriminator.select)(&raw)
                    .ok_or_else(|| Error::unexpected_value(expected(), raw.kind_name()))?;
                candidates.iter().find(|c| c.key == key).ok_or_else(|| Error::unexpected_value(expected(), key))
            }
            None => {
                let shape = self.shape(at)?;
                candidates
                    .iter()
                    .find(|c| c.shape.as_deref() == Some(shape))
                    .or_else(|| match shape {
                        "int" => candidates.iter().find(|c| c.shape.as_deref() == Some("float")),
                        _ => None,
                    })
                    .ok_or_else(|| {
                        let shapes: Vec<&str> = candidates.iter().filter_map(|c| c.shape.as_deref()).collect();
                        Error::unexpected_value(shapes.join("|"), shape)
                    })
            }
        }
    }

    fn enumeration(&self, class: &str, backing: ScalarKind, at: Boundary) -> Result<Value> {
        let descriptor =
            self.registry.enumeration(class).ok_or_else(|| ConfigurationError::UnknownClass(class.to_string()))?;
        let case = self.scalar(backing, at)?;
        let json = match &case {
            Value::Int(i) => serde_json::Value::from(*i),
            Value::String(s) => serde_json::Value::from(s.as_str()),
            other => return Err(Error::unexpected_value(backing.name(), other.kind_name())),
        };
        if !descriptor.accepts(&json) {
            return Err(Error::unexpected_value(format!("case of {class}"), json.to_string()));
        }
        Ok(Value::Enum { class: class.to_string(), case: Box::new(case) })
    }

    fn scalar(&self, kind: ScalarKind, at: Boundary) -> Result<Value> {
        let json = self.json(at)?;
        let value = match (kind, &json) {
            (ScalarKind::Int, serde_json::Value::Number(n)) if n.is_u64() && n.as_i64().is_none() => {
                return Err(Error::unexpected_value("int within 64-bit range", n.to_string()));
            }
            (ScalarKind::Int, serde_json::Value::Number(n)) => n.as_i64().map(Value::Int),
            (ScalarKind::Float, serde_json::Value::Number(n)) => n.as_f64().map(Value::from),
            (ScalarKind::Bool, serde_json::Value::Bool(b)) => Some(Value::Bool(*b)),
            (ScalarKind::String, serde_json::Value::String(s)) => Some(Value::String(s.clone())),
            _ => None,
        };
        value.ok_or_else(|| Error::unexpected_value(kind.name(), json_kind(&json)))
    }

    fn json(&self, at: Boundary) -> Result<serde_json::Value> {
        let raw = read_range(&*self.resource, at.offset, at.length)?;
        // the window is exact, so a literal cut short is a bad token, not a short input
        serde_json::from_slice(&raw).map_err(|_| Error::unexpected_token(at.offset, excerpt(&raw)))
    }

    fn first_byte(&self, at: Boundary) -> Result<Option<u8>> {
        ResourceCursor::new(&*self.resource, at.offset, at.end()).peek_non_ws()
    }

    /// JSON shape of the member at `at`, named like `DataModelNode::shape`.
    fn shape(&self, at: Boundary) -> Result<&'static str> {
        let shape = match self.first_byte(at)? {
            Some(b'n') => "null",
            Some(b't' | b'f') => "bool",
            Some(b'"') => "string",
            Some(b'[') => "array",
            Some(b'{') => "object",
            Some(b'-' | b'0'..=b'9') => {
                let raw = read_range(&*self.resource, at.offset, at.length)?;
                if raw.iter().any(|b| matches!(b, b'.' | b'e' | b'E')) {
                    "float"
                } else {
                    "int"
                }
            }
            Some(b) => return Err(Error::unexpected_token(at.offset, char::from(b).to_string())),
            None => return Err(Error::invalid_resource(at.offset, "empty member")),
        };
        Ok(shape)
    }
}

fn dict_key(kind: ScalarKind, raw: String) -> Result<DictKey> {
    match kind {
        ScalarKind::Int => raw.parse::<i64>().map(DictKey::Int).map_err(|_| Error::unexpected_value("int key", raw)),
        _ => Ok(DictKey::String(raw)),
    }
}

fn json_kind(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(n) if n.is_f64() => "float",
        serde_json::Value::Number(_) => "int",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

fn excerpt(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    match text.char_indices().nth(32) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Direction, MetadataCache, MetadataPipeline};
    use crate::model::DataModelBuilder;
    use crate::registry::{ClassDescriptor, EnumDescriptor};
    use crate::resource::MemoryResource;

    fn registry() -> Registry {
        let mut registry = Registry::new()
            .with_class(
                ClassDescriptor::new("Dummy")
                    .property_with("id", "int", vec![crate::registry::Directive::Rename("@id".into())])
                    .property("name", "string")
                    .property("note", "?string"),
            )
            .with_class(ClassDescriptor::new("Cat").property("lives", "int"))
            .with_class(ClassDescriptor::new("Dog").property("good", "bool"))
            .with_enum(EnumDescriptor::new("Suit", ScalarKind::String).case("Hearts", "H").case("Spades", "S"));
        registry.register_discriminator("Cat|Dog", "pet", |raw| match raw {
            Value::Dict(map) if map.contains_key(&DictKey::from("lives")) => Some("Cat".into()),
            _ => Some("Dog".into()),
        })
        .unwrap();
        registry
    }

    fn decode(ty: &str, input: &str, config: Config) -> (Rc<MemoryResource>, Result<DecodeOutcome>) {
        let registry = Arc::new(registry());
        let ty = registry.resolve_type(ty).unwrap();
        let root = DataModelBuilder::new(
            &registry,
            &config,
            Direction::Decode,
            &MetadataPipeline::standard(),
            &MetadataCache::new(),
        )
        .unwrap()
        .build(&ty)
        .unwrap();
        let resource = Rc::new(MemoryResource::from(input));
        let decoder = Decoder::new(resource.clone(), registry, Arc::new(config), Arc::new(ShapeCache::new()));
        (resource, decoder.decode(&DecodePlan { root }))
    }

    fn ok(ty: &str, input: &str) -> Value {
        decode(ty, input, Config::default()).1.unwrap().value
    }

    #[test]
    fn scalars_and_containers() {
        assert_eq!(ok("int", " 42 "), Value::Int(42));
        assert_eq!(ok("float", "3"), Value::from(3.0));
        assert_eq!(ok("?string", "null"), Value::Null);
        assert_eq!(ok("list<?int>", "[1, null]"), Value::List(vec![Value::Int(1), Value::Null]));
        let Value::Dict(map) = ok("dict<int, bool>", r#"{"7": true}"#) else { panic!("dict expected") };
        assert_eq!(map[&DictKey::Int(7)], Value::Bool(true));
    }

    #[test]
    fn ints_are_strict() {
        let err = decode("int", "1.5", Config::default()).1.unwrap_err();
        assert_eq!(err.to_string(), "unexpected value at $: expected int, found float");
    }

    #[test]
    fn objects_follow_encoded_names() {
        let Value::Object(dummy) = ok("Dummy", r#"{"name":"dummy","@id":1,"extra":[1,2]}"#) else {
            panic!("object expected")
        };
        assert_eq!(dummy.get("id").unwrap(), Some(Value::Int(1)));
        assert_eq!(dummy.get("name").unwrap(), Some(Value::from("dummy")));
        assert_eq!(dummy.get("note").unwrap(), Some(Value::Null));
        assert_eq!(dummy.get("extra").unwrap(), None);
    }

    #[test]
    fn missing_required_properties_stay_absent() {
        let Value::Object(dummy) = ok("Dummy", r#"{"@id":1}"#) else { panic!("object expected") };
        assert_eq!(dummy.field_names(), vec!["id".to_string(), "note".to_string()]);
    }

    #[test]
    fn errors_carry_paths_or_are_collected() {
        let input = r#"[{"@id":1,"name":"a"},{"@id":"x","name":"b"},{"@id":3,"name":"c"}]"#;
        let err = decode("list<Dummy>", input, Config::default()).1.unwrap_err();
        assert_eq!(err.path(), Some("$[1].@id"));

        let outcome = decode("list<Dummy>", input, Config::default().with_collect_errors(true)).1.unwrap();
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].path(), Some("$[1].@id"));
        let Value::List(items) = outcome.value else { panic!("list expected") };
        assert_eq!(items.len(), 3);
        assert_eq!(items[1].as_object().unwrap().get("name").unwrap(), Some(Value::from("b")));
    }

    #[test]
    fn unions_by_shape_and_discriminator() {
        assert_eq!(ok("list<int|string|null>", r#"[1,"a",null]"#), Value::List(vec![Value::Int(1), Value::from("a"), Value::Null]));
        assert_eq!(ok("float|string", "2"), Value::from(2.0));
        let pets = ok("list<Cat|Dog>", r#"[{"lives":9},{"good":true}]"#);
        let classes: Vec<String> =
            pets.as_list().unwrap().iter().map(|p| p.as_object().unwrap().class().to_string()).collect();
        assert_eq!(classes, vec!["Cat", "Dog"]);
        assert!(decode("int|string", "true", Config::default()).1.is_err());
    }

    #[test]
    fn enums_check_their_cases() {
        let Value::Enum { class, case } = ok("Suit", r#""H""#) else { panic!("enum expected") };
        assert_eq!(class, "Suit");
        assert_eq!(*case, Value::from("H"));
        assert!(decode("Suit", r#""X""#, Config::default()).1.is_err());
    }

    #[test]
    fn lazy_objects_read_nothing_until_accessed() {
        let (resource, outcome) = decode("Dummy", r#"{"@id":1,"name":"dummy"}"#, Config::default().with_lazy(true));
        let Value::Object(dummy) = outcome.unwrap().value else { panic!("object expected") };
        assert!(dummy.is_ghost());
        assert_eq!(resource.reads(), 0);
        assert_eq!(dummy.field_names(), vec!["id".to_string(), "name".to_string(), "note".to_string()]);
        assert_eq!(resource.reads(), 0);
        assert_eq!(dummy.get("name").unwrap(), Some(Value::from("dummy")));
        assert!(resource.reads() > 0);
        assert!(!dummy.is_field_initialized("id"));
    }

    #[test]
    fn lazy_field_errors_surface_on_access() {
        let (_, outcome) = decode("Dummy", r#"{"@id":"x","name":"dummy"}"#, Config::default().with_lazy(true));
        let Value::Object(dummy) = outcome.unwrap().value else { panic!("object expected") };
        assert_eq!(dummy.get("name").unwrap(), Some(Value::from("dummy")));
        assert_eq!(dummy.get("id").unwrap_err().path(), Some("$.@id"));
    }

    #[test]
    fn malformed_leaves_are_tokens_truncated_input_is_invalid() {
        let err = decode("list<bool>", "[tru]", Config::default()).1.unwrap_err();
        assert!(matches!(err, Error::UnexpectedToken { .. }));
        let err = decode("list<int>", "[1e, -]", Config::default()).1.unwrap_err();
        assert!(matches!(err, Error::UnexpectedToken { .. }));
        let err = decode("list<int>", "[1,2", Config::default()).1.unwrap_err();
        assert!(matches!(err, Error::InvalidResource { .. }));
    }

    #[test]
    fn integers_past_i64_are_out_of_range() {
        let err = decode("list<int>", "[18446744073709551615]", Config::default()).1.unwrap_err();
        let Error::UnexpectedValue { expected, found, .. } = err else { panic!("unexpected value expected") };
        assert_eq!(expected, "int within 64-bit range");
        assert_eq!(found, "18446744073709551615");
        let err = decode("list<int>", "[1.5]", Config::default()).1.unwrap_err();
        assert!(matches!(err, Error::UnexpectedValue { found, .. } if found == "float"));
    }
}
