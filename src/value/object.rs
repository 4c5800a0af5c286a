//! Objects with per-field lazy slots.
//!
//! An object is either a *ghost* (nothing read yet, an initializer produces the
//! slots on first access) or *ready*. Each slot is `Uninitialized(provider)`
//! or `Initialized(value)`; reading a slot resolves it once and caches the
//! value. Borrows are always released before a provider runs, so providers may
//! freely touch other objects.
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;

use super::Value;
use crate::error::Result;

pub type ValueProvider = Rc<dyn Fn() -> Result<Value>>;
pub type Initializer = Rc<dyn Fn() -> Result<IndexMap<String, Slot>>>;

#[derive(Clone)]
pub enum Slot {
    Uninitialized(ValueProvider),
    Initialized(Value),
}

enum State {
    Ghost(Initializer),
    Ready(IndexMap<String, Slot>),
}

pub struct Object {
    class: String,
    declared: Option<Arc<[String]>>,
    state: RefCell<State>,
}

impl Object {
    pub fn new(class: impl Into<String>) -> Self {
        Self::with_slots(class, IndexMap::new())
    }

    pub fn with_slots(class: impl Into<String>, slots: IndexMap<String, Slot>) -> Self {
        Self { class: class.into(), declared: None, state: RefCell::new(State::Ready(slots)) }
    }

    /// Object whose slots are produced by `initializer` on first access.
    /// `declared` lists the field names so they can be reported without
    /// running the initializer.
    pub fn ghost(class: impl Into<String>, declared: Arc<[String]>, initializer: Initializer) -> Self {
        Self { class: class.into(), declared: Some(declared), state: RefCell::new(State::Ghost(initializer)) }
    }

    pub fn builder(class: impl Into<String>) -> ObjectBuilder {
        ObjectBuilder { object: Object::new(class) }
    }

    pub fn class(&self) -> &str { &self.class }

    pub fn is_ghost(&self) -> bool {
        matches!(*self.state.borrow(), State::Ghost(_))
    }

    pub fn field_names(&self) -> Vec<String> {
        match &*self.state.borrow() {
            State::Ready(slots) => slots.keys().cloned().collect(),
            State::Ghost(_) => self.declared.as_deref().map(<[String]>::to_vec).unwrap_or_default(),
        }
    }

    /// Run the ghost initializer if it has not run yet.
    pub fn initialize(&self) -> Result<()> {
        let initializer = match &*self.state.borrow() {
            State::Ghost(init) => init.clone(),
            State::Ready(_) => return Ok(()),
        };
        let slots = initializer()?;
        *self.state.borrow_mut() = State::Ready(slots);
        Ok(())
    }

    pub fn is_field_initialized(&self, name: &str) -> bool {
        match &*self.state.borrow() {
            State::Ready(slots) => matches!(slots.get(name), Some(Slot::Initialized(_))),
            State::Ghost(_) => false,
        }
    }

    /// Field value, resolving the ghost and the slot on first read.
    /// `Ok(None)` means the field was never set.
    pub fn get(&self, name: &str) -> Result<Option<Value>> {
        self.initialize()?;
        let provider = match &*self.state.borrow() {
            State::Ready(slots) => match slots.get(name) {
                None => return Ok(None),
                Some(Slot::Initialized(v)) => return Ok(Some(v.clone())),
                Some(Slot::Uninitialized(p)) => p.clone(),
            },
            State::Ghost(_) => unreachable!("initialized above"),
        };
        let value = provider()?;
        if let State::Ready(slots) = &mut *self.state.borrow_mut() {
            slots.insert(name.to_string(), Slot::Initialized(value.clone()));
        }
        Ok(Some(value))
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        self.set_slot(name.into(), Slot::Initialized(value.into()))
    }

    pub fn set_provider(&self, name: impl Into<String>, provider: ValueProvider) -> Result<()> {
        self.set_slot(name.into(), Slot::Uninitialized(provider))
    }

    fn set_slot(&self, name: String, slot: Slot) -> Result<()> {
        self.initialize()?;
        if let State::Ready(slots) = &mut *self.state.borrow_mut() {
            slots.insert(name, slot);
        }
        Ok(())
    }

    /// Resolve every field.
    pub fn resolve_all(&self) -> Result<IndexMap<String, Value>> {
        let mut out = IndexMap::new();
        for name in self.field_names() {
            if let Some(v) = self.get(&name)? {
                out.insert(name, v);
            }
        }
        Ok(out)
    }
}

pub struct ObjectBuilder {
    object: Object,
}

impl ObjectBuilder {
    pub fn field(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        if let State::Ready(slots) = &mut *self.object.state.borrow_mut() {
            slots.insert(name.into(), Slot::Initialized(value.into()));
        }
        self
    }

    pub fn build(self) -> Value {
        Value::Object(Rc::new(self.object))
    }

    pub fn into_object(self) -> Object {
        self.object
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        if self.class != other.class {
            return false;
        }
        match (self.resolve_all(), other.resolve_all()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        let slots = match &*state {
            State::Ghost(_) => return write!(f, "{} <ghost>", self.class),
            State::Ready(slots) => slots,
        };
        let mut s = f.debug_struct(&self.class);
        for (name, slot) in slots {
            match slot {
                Slot::Initialized(v) => s.field(name, v),
                Slot::Uninitialized(_) => s.field(name, &format_args!("<lazy>")),
            };
        }
        s.finish()
    }
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn slots_resolve_once() {
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let object = Object::new("Dummy");
        object
            .set_provider("id", Rc::new(move || {
                counter.set(counter.get() + 1);
                Ok(Value::Int(7))
            }))
            .unwrap();
        assert!(!object.is_field_initialized("id"));
        assert_eq!(object.get("id").unwrap(), Some(Value::Int(7)));
        assert_eq!(object.get("id").unwrap(), Some(Value::Int(7)));
        assert_eq!(calls.get(), 1);
        assert!(object.is_field_initialized("id"));
        assert_eq!(object.get("missing").unwrap(), None);
    }

    #[test]
    fn ghost_initializes_on_first_access() {
        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();
        let declared: Arc<[String]> = vec!["name".to_string()].into();
        let object = Object::ghost("Dummy", declared, Rc::new(move || {
            counter.set(counter.get() + 1);
            let mut slots = IndexMap::new();
            slots.insert("name".to_string(), Slot::Initialized(Value::from("dummy")));
            Ok(slots)
        }));
        assert!(object.is_ghost());
        assert_eq!(object.field_names(), vec!["name".to_string()]);
        assert_eq!(runs.get(), 0);
        assert_eq!(object.get("name").unwrap(), Some(Value::from("dummy")));
        assert!(!object.is_ghost());
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn equality_forces_resolution() {
        let eager = Object::builder("P").field("x", 1).build();
        let lazy = Object::new("P");
        lazy.set_provider("x", Rc::new(|| Ok(Value::Int(1)))).unwrap();
        assert_eq!(eager, Value::Object(Rc::new(lazy)));
    }
}
