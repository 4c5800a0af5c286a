//! Builds decoded objects from field providers.
//!
//! Eager instantiation runs every provider on the spot. Lazy instantiation
//! returns a ghost: the object window is split on first access and each field
//! is decoded on its first read.
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{ConfigurationError, Error, Result};
use crate::hash::Fingerprint;
use crate::model::PropertyNode;
use crate::value::{Initializer, Object, Slot, ValueProvider};

/// Field providers keyed by source name, in declaration order.
pub type Providers = IndexMap<String, ValueProvider>;

/// Produces the providers of one object, splitting its window.
pub type ProviderLoader = Rc<dyn Fn() -> Result<Providers>>;

// ————————————————————————————————————————————————————————————————————————————
// ERRORS
// ————————————————————————————————————————————————————————————————————————————

/// Recoverable decode errors gathered under `collectErrors`. Sealed once the
/// outcome is handed out: later failures (lazy field reads) propagate.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    enabled: bool,
    sealed: Cell<bool>,
    errors: RefCell<Vec<Error>>,
}

impl ErrorCollector {
    pub fn new(enabled: bool) -> Self {
        Self { enabled, ..Self::default() }
    }

    /// Keep `err` if it may be collected, hand it back otherwise.
    pub fn record(&self, err: Error) -> Result<()> {
        if !self.enabled || self.sealed.get() || !err.is_recoverable() {
            return Err(err);
        }
        warn!(error = %err, "decode error collected");
        self.errors.borrow_mut().push(err);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.errors.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn take(&self) -> Vec<Error> {
        self.sealed.set(true);
        self.errors.take()
    }
}

// ————————————————————————————————————————————————————————————————————————————
// SHAPES
// ————————————————————————————————————————————————————————————————————————————

/// What a ghost knows about its class before anything is read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyShape {
    pub class: String,
    /// source names
    pub fields: Arc<[String]>,
    pub encoded: Vec<String>,
}

impl ProxyShape {
    pub fn for_object(class: &str, properties: &[PropertyNode]) -> Result<Self, ConfigurationError> {
        let mut encoded: Vec<String> = Vec::with_capacity(properties.len());
        for property in properties {
            if encoded.contains(&property.encoded_name) {
                return Err(ConfigurationError::UnsupportedShape {
                    class: class.to_string(),
                    reason: format!("`{}` is encoded by more than one property", property.encoded_name),
                });
            }
            encoded.push(property.encoded_name.clone());
        }
        Ok(Self {
            class: class.to_string(),
            fields: properties.iter().map(|p| p.source_name.clone()).collect(),
            encoded,
        })
    }
}

/// Proxy shapes keyed by class and property layout.
#[derive(Debug, Default)]
pub struct ShapeCache {
    shapes: RwLock<HashMap<u64, Arc<ProxyShape>>>,
}

impl ShapeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(&self, class: &str, properties: &[PropertyNode]) -> Result<Arc<ProxyShape>, ConfigurationError> {
        let mut fp = Fingerprint::new();
        fp.write_str(class);
        for property in properties {
            fp.write_str(&property.source_name).write_str(&property.encoded_name);
        }
        let key = fp.finish();
        if let Some(hit) = self.shapes.read().get(&key) {
            return Ok(hit.clone());
        }
        let shape = Arc::new(ProxyShape::for_object(class, properties)?);
        debug!(class, fields = shape.fields.len(), "proxy shape built");
        Ok(self.shapes.write().entry(key).or_insert(shape).clone())
    }

    pub fn len(&self) -> usize {
        self.shapes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.shapes.write().clear();
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INSTANTIATOR
// ————————————————————————————————————————————————————————————————————————————

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Instantiator {
    Eager,
    Lazy,
}

impl Instantiator {
    pub fn from_config(config: &Config) -> Self {
        if config.lazy {
            Instantiator::Lazy
        } else {
            Instantiator::Eager
        }
    }

    pub fn instantiate(
        &self,
        class: &str,
        properties: &[PropertyNode],
        shapes: &ShapeCache,
        load: ProviderLoader,
        errors: &ErrorCollector,
    ) -> Result<Object> {
        match self {
            Instantiator::Eager => {
                let mut slots = IndexMap::new();
                for (name, provider) in load()? {
                    match provider() {
                        Ok(value) => {
                            slots.insert(name, Slot::Initialized(value));
                        }
                        Err(err) => errors.record(err)?,
                    }
                }
                Ok(Object::with_slots(class, slots))
            }
            Instantiator::Lazy => {
                let shape = shapes.get_or_build(class, properties)?;
                let initializer: Initializer = Rc::new(move || {
                    Ok(load()?.into_iter().map(|(name, provider)| (name, Slot::Uninitialized(provider))).collect())
                });
                Ok(Object::ghost(shape.class.clone(), shape.fields.clone(), initializer))
            }
        }
    }
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::PropertyAccessor;
    use crate::model::DataModelNode;
    use crate::types::ScalarKind;
    use crate::value::Value;

    fn property(source: &str, encoded: &str) -> PropertyNode {
        PropertyNode {
            source_name: source.into(),
            encoded_name: encoded.into(),
            accessor: PropertyAccessor::Field(source.into()),
            formatters: Vec::new(),
            node: Arc::new(DataModelNode::Scalar(ScalarKind::Int)),
        }
    }

    fn loader(calls: Rc<Cell<usize>>) -> ProviderLoader {
        Rc::new(move || {
            calls.set(calls.get() + 1);
            let mut providers = Providers::new();
            let ok: ValueProvider = Rc::new(|| Ok(Value::Int(1)));
            let bad: ValueProvider = Rc::new(|| Err(Error::unexpected_value("int", "string").at("$.b")));
            providers.insert("a".into(), ok);
            providers.insert("b".into(), bad);
            Ok(providers)
        })
    }

    #[test]
    fn eager_collects_or_propagates() {
        let props = [property("a", "a"), property("b", "b")];
        let shapes = ShapeCache::new();
        let calls = Rc::new(Cell::new(0));

        let strict = ErrorCollector::new(false);
        let err = Instantiator::Eager.instantiate("T", &props, &shapes, loader(calls.clone()), &strict).unwrap_err();
        assert_eq!(err.path(), Some("$.b"));

        let collecting = ErrorCollector::new(true);
        let object = Instantiator::Eager.instantiate("T", &props, &shapes, loader(calls), &collecting).unwrap();
        assert_eq!(object.get("a").unwrap(), Some(Value::Int(1)));
        assert_eq!(object.get("b").unwrap(), None);
        assert_eq!(collecting.take().len(), 1);
        assert!(collecting.record(Error::unexpected_token(0, "x")).is_err());
    }

    #[test]
    fn lazy_defers_until_first_access() {
        let props = [property("a", "a"), property("b", "b")];
        let shapes = ShapeCache::new();
        let calls = Rc::new(Cell::new(0));
        let errors = ErrorCollector::new(true);
        let object = Instantiator::Lazy.instantiate("T", &props, &shapes, loader(calls.clone()), &errors).unwrap();
        assert!(object.is_ghost());
        assert_eq!(object.field_names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(calls.get(), 0);

        assert_eq!(object.get("a").unwrap(), Some(Value::Int(1)));
        assert_eq!(calls.get(), 1);
        assert!(!object.is_field_initialized("b"));
        assert!(object.get("b").is_err());
        assert_eq!(shapes.len(), 1);
    }

    #[test]
    fn duplicate_encoded_names_cannot_be_proxied() {
        let shapes = ShapeCache::new();
        let err = shapes.get_or_build("T", &[property("a", "x"), property("b", "x")]).unwrap_err();
        assert!(matches!(err, ConfigurationError::UnsupportedShape { .. }));
        assert!(shapes.is_empty());
        shapes.get_or_build("T", &[property("a", "x")]).unwrap();
        shapes.clear();
        assert!(shapes.is_empty());
    }
}
