//! Customization points invoked while the data model is built.
//!
//! An object hook sees the full property map of a class and may return a
//! replacement; a property hook may rename a property, drop it, or attach a
//! value formatter. Returning `None` keeps the defaults.
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::ConfigurationError;
use crate::metadata::{Direction, PropertyMap, PropertyMetadata};
use crate::types::Type;

/// Generic object hook key.
pub const ANY_OBJECT: &str = "object";
/// Generic property hook key.
pub const ANY_PROPERTY: &str = "property";

pub type ObjectHookFn =
    dyn Fn(&Type, &PropertyMap, &mut HookContext) -> Result<Option<PropertyMap>, ConfigurationError> + Send + Sync;

pub type PropertyHookFn = dyn Fn(&str, &str, &PropertyMetadata, &mut HookContext) -> Result<Option<PropertyOverride>, ConfigurationError>
    + Send
    + Sync;

pub type ObjectHook = Hook<ObjectHookFn>;
pub type PropertyHook = Hook<PropertyHookFn>;

static NEXT_HOOK_ID: AtomicU64 = AtomicU64::new(1);

/// A hook function plus a process-unique id. Clones share the id; two
/// separately built hooks never do, even when registered under one key.
pub struct Hook<F: ?Sized> {
    id: u64,
    func: Arc<F>,
}

impl<F: ?Sized> Hook<F> {
    pub fn new(func: Arc<F>) -> Self {
        Self { id: NEXT_HOOK_ID.fetch_add(1, Ordering::Relaxed), func }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<F: ?Sized> Clone for Hook<F> {
    fn clone(&self) -> Self {
        Self { id: self.id, func: self.func.clone() }
    }
}

impl<F: ?Sized> Deref for Hook<F> {
    type Target = F;

    fn deref(&self) -> &F {
        &self.func
    }
}

pub fn object_hook<F>(f: F) -> ObjectHook
where
    F: Fn(&Type, &PropertyMap, &mut HookContext) -> Result<Option<PropertyMap>, ConfigurationError>
        + Send
        + Sync
        + 'static,
{
    let func: Arc<ObjectHookFn> = Arc::new(f);
    Hook::new(func)
}

pub fn property_hook<F>(f: F) -> PropertyHook
where
    F: Fn(&str, &str, &PropertyMetadata, &mut HookContext) -> Result<Option<PropertyOverride>, ConfigurationError>
        + Send
        + Sync
        + 'static,
{
    let func: Arc<PropertyHookFn> = Arc::new(f);
    Hook::new(func)
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PropertyOverride {
    pub name: Option<String>,
    /// Registered formatter name. On encode the property is computed from the
    /// owning object; on decode the raw value is passed through it.
    pub value_formatter: Option<String>,
    pub drop: bool,
}

impl PropertyOverride {
    pub fn rename(name: impl Into<String>) -> Self {
        Self { name: Some(name.into()), ..Self::default() }
    }

    pub fn formatted(formatter: impl Into<String>) -> Self {
        Self { value_formatter: Some(formatter.into()), ..Self::default() }
    }

    pub fn dropped() -> Self {
        Self { drop: true, ..Self::default() }
    }
}

/// Scratch state shared by every hook call during one data model build.
#[derive(Clone, Debug)]
pub struct HookContext {
    pub direction: Direction,
    /// Classes currently being built, outermost first.
    pub stack: Vec<String>,
    pub data: IndexMap<String, serde_json::Value>,
}

impl HookContext {
    pub fn new(direction: Direction) -> Self {
        Self { direction, stack: Vec::new(), data: IndexMap::new() }
    }
}

#[derive(Clone, Default)]
pub struct Hooks {
    pub object: IndexMap<String, ObjectHook>,
    pub property: IndexMap<String, PropertyHook>,
}

impl Hooks {
    pub fn is_empty(&self) -> bool {
        self.object.is_empty() && self.property.is_empty()
    }

    /// Exact class first, then the generic `"object"` hook.
    pub fn object_hook_for(&self, class: &str) -> Option<&ObjectHook> {
        self.object.get(class).or_else(|| self.object.get(ANY_OBJECT))
    }

    /// `"Class::property"` first, then the generic `"property"` hook.
    pub fn property_hook_for(&self, class: &str, property: &str) -> Option<&PropertyHook> {
        self.property
            .get(&format!("{class}::{property}"))
            .or_else(|| self.property.get(ANY_PROPERTY))
    }

    /// Registered keys in a stable order.
    pub fn keys(&self) -> Vec<String> {
        self.identities().into_iter().map(|(key, _)| key).collect()
    }

    /// Registered keys with the id of the hook behind each, for cache keys.
    pub fn identities(&self) -> Vec<(String, u64)> {
        let mut out: Vec<(String, u64)> = self
            .object
            .iter()
            .map(|(k, h)| (format!("object:{k}"), h.id()))
            .chain(self.property.iter().map(|(k, h)| (format!("property:{k}"), h.id())))
            .collect();
        out.sort();
        out
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;

    fn tagging(tag: &'static str) -> ObjectHook {
        object_hook(move |_, _, ctx| {
            ctx.data.insert("hit".into(), serde_json::Value::from(tag));
            Ok(None)
        })
    }

    fn renaming(name: &'static str) -> PropertyHook {
        property_hook(move |_, _, _, _| Ok(Some(PropertyOverride::rename(name))))
    }

    #[test]
    fn exact_class_hook_wins() {
        let mut hooks = Hooks::default();
        hooks.object.insert(ANY_OBJECT.into(), tagging("any"));
        hooks.object.insert("Dummy".into(), tagging("exact"));

        let mut ctx = HookContext::new(Direction::Encode);
        let hook = hooks.object_hook_for("Dummy").unwrap();
        hook(&Type::object("Dummy"), &PropertyMap::new(), &mut ctx).unwrap();
        assert_eq!(ctx.data["hit"], "exact");

        let hook = hooks.object_hook_for("Other").unwrap();
        hook(&Type::object("Other"), &PropertyMap::new(), &mut ctx).unwrap();
        assert_eq!(ctx.data["hit"], "any");
    }

    #[test]
    fn class_property_hook_wins() {
        let mut hooks = Hooks::default();
        hooks.property.insert(ANY_PROPERTY.into(), renaming("generic"));
        hooks.property.insert("Dummy::id".into(), renaming("specific"));

        let meta = PropertyMetadata::field("id", Type::int());
        let mut ctx = HookContext::new(Direction::Decode);
        let pick = |class: &str, prop: &str, ctx: &mut HookContext| {
            let hook = hooks.property_hook_for(class, prop).unwrap();
            hook(class, prop, &meta, ctx).unwrap().unwrap().name.unwrap()
        };
        assert_eq!(pick("Dummy", "id", &mut ctx), "specific");
        assert_eq!(pick("Dummy", "name", &mut ctx), "generic");
        assert!(Hooks::default().property_hook_for("Dummy", "id").is_none());
    }

    #[test]
    fn keys_are_sorted() {
        let mut hooks = Hooks::default();
        hooks.property.insert("b".into(), renaming("x"));
        hooks.object.insert("a".into(), tagging("y"));
        assert_eq!(hooks.keys(), vec!["object:a", "property:b"]);
    }

    #[test]
    fn hooks_built_separately_have_distinct_ids() {
        let first = renaming("x");
        let second = renaming("x");
        assert_ne!(first.id(), second.id());
        assert_eq!(first.clone().id(), first.id());

        let mut hooks = Hooks::default();
        hooks.property.insert("Dummy::id".into(), first.clone());
        assert_eq!(hooks.identities(), vec![("property:Dummy::id".to_string(), first.id())]);
    }
}
