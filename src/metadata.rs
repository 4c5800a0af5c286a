//! Property metadata: how each property of a class is named, typed and
//! transformed for one direction.
//!
//! A `MetadataPipeline` is an ordered list of stages. Each stage receives the
//! map built by its predecessors and returns a new one; published maps sit
//! behind `Arc` in the `MetadataCache` and are never mutated.
pub mod stages;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::error::ConfigurationError;
use crate::formatter::FormatterRef;
use crate::hash::Fingerprint;
use crate::registry::Registry;
use crate::types::Type;

pub use stages::{
    BaseStage, DateTimeStage, FormatterStage, GenericsStage, GroupsStage, MaxDepthStage, RenameStage,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Encode,
    Decode,
}

impl Direction {
    pub fn name(self) -> &'static str {
        match self {
            Direction::Encode => "encode",
            Direction::Decode => "decode",
        }
    }
}

/// Where an encoder reads a property from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyAccessor {
    Field(String),
    /// Produced by a formatter from the owning object.
    Computed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PropertyMetadata {
    pub source_name: String,
    pub encoded_name: String,
    pub ty: Type,
    /// In push order. Encoders apply them first to last, decoders last to first.
    pub formatters: Vec<FormatterRef>,
    pub accessor: PropertyAccessor,
}

impl PropertyMetadata {
    pub fn field(name: impl Into<String>, ty: Type) -> Self {
        let name = name.into();
        Self {
            encoded_name: name.clone(),
            accessor: PropertyAccessor::Field(name.clone()),
            source_name: name,
            ty,
            formatters: Vec::new(),
        }
    }
}

/// Properties keyed by source name, in declaration order.
pub type PropertyMap = IndexMap<String, PropertyMetadata>;

/// What the surrounding build knows when metadata for a class is requested.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetadataContext {
    /// Template bindings of the object being built.
    pub generics: IndexMap<String, Type>,
    /// How many times each class is on the build stack.
    pub depths: BTreeMap<String, usize>,
}

impl MetadataContext {
    pub fn depth_of(&self, class: &str) -> usize {
        self.depths.get(class).copied().unwrap_or(0)
    }

    fn fingerprint_into(&self, fp: &mut Fingerprint) {
        for (name, ty) in &self.generics {
            fp.write_str(name);
            fp.write_str(&ty.to_string());
        }
        fp.write_u64(0);
        for (class, depth) in &self.depths {
            fp.write_str(class);
            fp.write_u64(*depth as u64);
        }
    }
}

/// Arguments shared by every stage of one `load` call.
pub struct StageInput<'a> {
    pub class: &'a str,
    pub direction: Direction,
    pub registry: &'a Registry,
    pub config: &'a Config,
    pub context: &'a MetadataContext,
}

pub trait MetadataStage: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, input: &StageInput<'_>, properties: PropertyMap) -> Result<PropertyMap, ConfigurationError>;
}

// ————————————————————————————————————————————————————————————————————————————
// PIPELINE
// ————————————————————————————————————————————————————————————————————————————

pub struct MetadataPipeline {
    stages: Vec<Box<dyn MetadataStage>>,
}

impl Default for MetadataPipeline {
    fn default() -> Self {
        Self::standard()
    }
}

impl MetadataPipeline {
    pub fn standard() -> Self {
        Self::with_stages(vec![
            Box::new(BaseStage),
            Box::new(RenameStage),
            Box::new(FormatterStage),
            Box::new(DateTimeStage),
            Box::new(GenericsStage),
            Box::new(MaxDepthStage),
            Box::new(GroupsStage),
        ])
    }

    pub fn with_stages(stages: Vec<Box<dyn MetadataStage>>) -> Self {
        Self { stages }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn load(
        &self,
        class: &str,
        direction: Direction,
        registry: &Registry,
        config: &Config,
        context: &MetadataContext,
    ) -> Result<PropertyMap, ConfigurationError> {
        let input = StageInput { class, direction, registry, config, context };
        self.stages
            .iter()
            .try_fold(PropertyMap::new(), |properties, stage| stage.apply(&input, properties))
    }
}

// ————————————————————————————————————————————————————————————————————————————
// CACHE
// ————————————————————————————————————————————————————————————————————————————

#[derive(Default)]
pub struct MetadataCache {
    entries: RwLock<HashMap<u64, Arc<PropertyMap>>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load(
        &self,
        pipeline: &MetadataPipeline,
        class: &str,
        direction: Direction,
        registry: &Registry,
        config: &Config,
        context: &MetadataContext,
    ) -> Result<Arc<PropertyMap>, ConfigurationError> {
        let mut fp = Fingerprint::new();
        fp.write_str(class);
        fp.write_str(direction.name());
        config.fingerprint_into(&mut fp);
        context.fingerprint_into(&mut fp);
        let key = fp.finish();

        if let Some(hit) = self.entries.read().get(&key) {
            return Ok(hit.clone());
        }
        let loaded = Arc::new(pipeline.load(class, direction, registry, config, context)?);
        debug!(class, direction = direction.name(), properties = loaded.len(), "metadata loaded");
        Ok(self.entries.write().entry(key).or_insert(loaded).clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ClassDescriptor, Directive};

    fn registry() -> Registry {
        Registry::new().with_class(
            ClassDescriptor::new("Dummy")
                .property_with("id", "int", vec![Directive::Rename("@id".into())])
                .property("name", "string"),
        )
    }

    #[test]
    fn standard_stage_order() {
        assert_eq!(
            MetadataPipeline::standard().stage_names(),
            vec!["base", "rename", "formatter", "date_time", "generics", "max_depth", "groups"]
        );
    }

    #[test]
    fn load_runs_every_stage() {
        let registry = registry();
        let map = MetadataPipeline::standard()
            .load("Dummy", Direction::Encode, &registry, &Config::default(), &MetadataContext::default())
            .unwrap();
        let names: Vec<&str> = map.values().map(|p| p.encoded_name.as_str()).collect();
        assert_eq!(names, vec!["@id", "name"]);
        assert_eq!(map["id"].accessor, PropertyAccessor::Field("id".into()));
    }

    #[test]
    fn cache_publishes_once_and_clears() {
        let registry = registry();
        let cache = MetadataCache::new();
        let pipeline = MetadataPipeline::standard();
        let config = Config::default();
        let ctx = MetadataContext::default();
        let a = cache.get_or_load(&pipeline, "Dummy", Direction::Encode, &registry, &config, &ctx).unwrap();
        let b = cache.get_or_load(&pipeline, "Dummy", Direction::Encode, &registry, &config, &ctx).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        cache.get_or_load(&pipeline, "Dummy", Direction::Decode, &registry, &config, &ctx).unwrap();
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }
}
