//! Data model: the resolved tree an encoder is compiled from and a decoder
//! walks.
//!
//! `DataModelBuilder` turns a `Type` into a `DataModelNode` for one direction,
//! loading property metadata per class, running hooks and enforcing the
//! circular reference policy.
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{CircularReferencePolicy, Config};
use crate::error::{ConfigurationError, Error, Result};
use crate::formatter::FormatterRef;
use crate::hooks::HookContext;
use crate::metadata::{
    Direction, MetadataCache, MetadataContext, MetadataPipeline, PropertyAccessor, PropertyMap,
};
use crate::registry::{Registry, TypeExtractor};
use crate::types::{ScalarKind, Type, TypeKind};

// ————————————————————————————————————————————————————————————————————————————
// NODES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DataModelNode {
    Scalar(ScalarKind),
    Null,
    Mixed,
    Nullable(Arc<DataModelNode>),
    List(Arc<DataModelNode>),
    Dict { key: ScalarKind, item: Arc<DataModelNode> },
    Object { class: String, properties: Vec<PropertyNode> },
    Union { candidates: Vec<UnionCandidate>, discriminator: Option<String> },
    Enum { class: String, backing: ScalarKind },
    DateTime { format: Option<String> },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyNode {
    pub source_name: String,
    pub encoded_name: String,
    pub accessor: PropertyAccessor,
    pub formatters: Vec<FormatterRef>,
    pub node: Arc<DataModelNode>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnionCandidate {
    /// Canonical type string, what discriminators answer with.
    pub key: String,
    /// Shape the candidate is recognized by, see `DataModelNode::shape`.
    pub shape: Option<String>,
    pub node: Arc<DataModelNode>,
}

impl DataModelNode {
    pub fn accepts_null(&self) -> bool {
        matches!(self, DataModelNode::Null | DataModelNode::Mixed | DataModelNode::Nullable(_))
    }

    /// Key a value of this node is recognized by without a discriminator.
    /// Decoding only sees JSON, so objects and dicts look alike; encoding
    /// sees runtime values, so object classes are told apart. `None` matches
    /// anything.
    pub fn shape(&self, direction: Direction) -> Option<String> {
        let decode = direction == Direction::Decode;
        let shape = match self {
            DataModelNode::Scalar(kind) => kind.name().to_string(),
            DataModelNode::Null => "null".to_string(),
            DataModelNode::Mixed => return None,
            DataModelNode::Nullable(inner) => return inner.shape(direction),
            DataModelNode::List(_) if decode => "array".to_string(),
            DataModelNode::List(_) => "list".to_string(),
            DataModelNode::Dict { .. } if decode => "object".to_string(),
            DataModelNode::Dict { .. } => "dict".to_string(),
            DataModelNode::Object { .. } if decode => "object".to_string(),
            DataModelNode::Object { class, .. } => format!("object:{class}"),
            DataModelNode::Enum { backing, .. } if decode => backing.name().to_string(),
            DataModelNode::Enum { class, .. } => format!("enum:{class}"),
            DataModelNode::DateTime { .. } if decode => "string".to_string(),
            DataModelNode::DateTime { .. } => "datetime".to_string(),
            DataModelNode::Union { .. } => return None,
        };
        Some(shape)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// BUILDER
// ————————————————————————————————————————————————————————————————————————————

pub struct DataModelBuilder<'a> {
    registry: &'a Registry,
    config: &'a Config,
    direction: Direction,
    pipeline: &'a MetadataPipeline,
    metadata: &'a MetadataCache,
    policy: CircularReferencePolicy,
    stack: Vec<String>,
    memo: HashMap<String, Arc<DataModelNode>>,
    hooks: HookContext,
}

impl<'a> DataModelBuilder<'a> {
    pub fn new(
        registry: &'a Registry,
        config: &'a Config,
        direction: Direction,
        pipeline: &'a MetadataPipeline,
        metadata: &'a MetadataCache,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self {
            registry,
            config,
            direction,
            pipeline,
            metadata,
            policy: config.circular_policy()?,
            stack: Vec::new(),
            memo: HashMap::new(),
            hooks: HookContext::new(direction),
        })
    }

    pub fn build(&mut self, ty: &Type) -> Result<Arc<DataModelNode>> {
        let node = match ty.kind() {
            TypeKind::Union(_) => return self.build_union(ty),
            TypeKind::Null => DataModelNode::Null,
            TypeKind::Mixed => DataModelNode::Mixed,
            _ => {
                let inner = self.build_non_null(ty)?;
                if ty.is_nullable() {
                    DataModelNode::Nullable(inner)
                } else {
                    return Ok(inner);
                }
            }
        };
        Ok(Arc::new(node))
    }

    fn build_non_null(&mut self, ty: &Type) -> Result<Arc<DataModelNode>> {
        let node = match ty.kind() {
            TypeKind::Scalar(kind) => DataModelNode::Scalar(*kind),
            TypeKind::List(item) => DataModelNode::List(self.build(item)?),
            TypeKind::Dict { key, value } => {
                let key = match key.kind() {
                    TypeKind::Scalar(k @ (ScalarKind::Int | ScalarKind::String)) if !key.is_nullable() => *k,
                    _ => {
                        return Err(ConfigurationError::InvalidType {
                            input: ty.to_string(),
                            reason: "dict keys must be int or string".into(),
                        }
                        .into());
                    }
                };
                DataModelNode::Dict { key, item: self.build(value)? }
            }
            TypeKind::Object { .. } if ty.is_date_time() => {
                DataModelNode::DateTime { format: self.config.date_time_format.clone() }
            }
            TypeKind::Object { class, generics } => return self.build_object(ty, class, generics),
            TypeKind::Enum { class, .. } => {
                let descriptor = self
                    .registry
                    .enumeration(class)
                    .ok_or_else(|| ConfigurationError::UnknownClass(class.clone()))?;
                DataModelNode::Enum { class: class.clone(), backing: descriptor.backing }
            }
            TypeKind::Template(name) => {
                return Err(ConfigurationError::InvalidType {
                    input: name.clone(),
                    reason: "unbound template parameter".into(),
                }
                .into());
            }
            TypeKind::Null => DataModelNode::Null,
            TypeKind::Mixed => DataModelNode::Mixed,
            TypeKind::Union(_) => return self.build_union(ty),
        };
        Ok(Arc::new(node))
    }

    fn build_union(&mut self, ty: &Type) -> Result<Arc<DataModelNode>> {
        let candidates_ty: Vec<&Type> = ty.members().iter().filter(|m| !m.is_null()).collect();
        let inner = if candidates_ty.len() == 1 {
            self.build(candidates_ty[0])?
        } else {
            let mut candidates = Vec::with_capacity(candidates_ty.len());
            for member in candidates_ty {
                let node = self.build(member)?;
                candidates.push(UnionCandidate {
                    key: member.to_string(),
                    shape: node.shape(self.direction),
                    node,
                });
            }
            let discriminator = self.registry.discriminators().for_union(ty).map(|d| d.name.clone());
            if discriminator.is_none() && !shapes_are_distinct(&candidates) {
                return Err(ConfigurationError::AmbiguousUnion(ty.to_string()).into());
            }
            Arc::new(DataModelNode::Union { candidates, discriminator })
        };
        if ty.is_nullable() && !inner.accepts_null() {
            return Ok(Arc::new(DataModelNode::Nullable(inner)));
        }
        Ok(inner)
    }

    fn build_object(&mut self, ty: &Type, class: &str, generics: &[Type]) -> Result<Arc<DataModelNode>> {
        let entered = self.stack.iter().filter(|c| *c == class).count();
        let too_deep = match self.policy {
            CircularReferencePolicy::Reject => entered > 0,
            CircularReferencePolicy::MaxDepth(limit) => entered > limit,
        };
        if too_deep {
            let mut chain = self.stack.clone();
            chain.push(class.to_string());
            return Err(Error::CircularReference { class: class.to_string(), chain: chain.join(" -> ") });
        }

        let depths = self.depths_with(class);
        let memo_key = format!("{}@{:?}", ty.non_null(), depths);
        if let Some(hit) = self.memo.get(&memo_key) {
            return Ok(hit.clone());
        }

        let templates = self.registry.extract_template_from_class(class)?;
        if templates.len() != generics.len() {
            return Err(ConfigurationError::GenericsMismatch {
                class: class.to_string(),
                expected: templates.len(),
                found: generics.len(),
            }
            .into());
        }
        let context = MetadataContext {
            generics: templates.into_iter().zip(generics.iter().cloned()).collect(),
            depths,
        };

        self.stack.push(class.to_string());
        let built = self.build_properties(ty, class, &context);
        self.stack.pop();

        let node = Arc::new(DataModelNode::Object { class: class.to_string(), properties: built? });
        debug!(class, direction = self.direction.name(), "object node built");
        self.memo.insert(memo_key, node.clone());
        Ok(node)
    }

    fn build_properties(&mut self, ty: &Type, class: &str, context: &MetadataContext) -> Result<Vec<PropertyNode>> {
        let loaded =
            self.metadata.get_or_load(self.pipeline, class, self.direction, self.registry, self.config, context)?;
        self.hooks.stack = self.stack.clone();

        let replaced = match self.config.hooks.object_hook_for(class) {
            Some(hook) => hook(ty, &*loaded, &mut self.hooks)?,
            None => None,
        };
        let properties: &PropertyMap = replaced.as_ref().unwrap_or(&*loaded);

        let mut out = Vec::with_capacity(properties.len());
        for (key, meta) in properties {
            let mut meta = meta.clone();
            if let Some(hook) = self.config.hooks.property_hook_for(class, key) {
                if let Some(over) = hook(class, key.as_str(), &meta, &mut self.hooks)? {
                    if over.drop {
                        continue;
                    }
                    if let Some(name) = over.name {
                        meta.encoded_name = name;
                    }
                    if let Some(formatter) = over.value_formatter {
                        let (_, input, output) = self.registry.formatters().resolve(&formatter)?;
                        meta.formatters = vec![FormatterRef::Named(formatter)];
                        match self.direction {
                            Direction::Encode => {
                                meta.accessor = PropertyAccessor::Computed;
                                meta.ty = output;
                            }
                            Direction::Decode => meta.ty = input,
                        }
                    }
                }
            }
            let node = self.build(&meta.ty)?;
            out.push(PropertyNode {
                source_name: meta.source_name,
                encoded_name: meta.encoded_name,
                accessor: meta.accessor,
                formatters: meta.formatters,
                node,
            });
        }
        Ok(out)
    }

    /// Depth counters as they will be once `class` is entered.
    fn depths_with(&self, class: &str) -> BTreeMap<String, usize> {
        let mut depths = BTreeMap::new();
        for c in self.stack.iter().map(String::as_str).chain(std::iter::once(class)) {
            *depths.entry(c.to_string()).or_insert(0) += 1;
        }
        depths
    }
}

fn shapes_are_distinct(candidates: &[UnionCandidate]) -> bool {
    let mut seen = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match &candidate.shape {
            None => return false,
            Some(shape) if seen.contains(&shape) => return false,
            Some(shape) => seen.push(shape),
        }
    }
    true
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::{Formatter, Signature};
    use crate::hooks::{object_hook, property_hook, PropertyOverride};
    use crate::registry::{ClassDescriptor, EnumDescriptor};
    use crate::value::Value;

    fn registry() -> Registry {
        Registry::new()
            .with_class(ClassDescriptor::new("Node").property("name", "string").property("child", "?Node"))
            .with_class(ClassDescriptor::new("Page").template("T").property("items", "list<T>"))
            .with_class(ClassDescriptor::new("Cat").property("lives", "int"))
            .with_class(ClassDescriptor::new("Dog").property("good", "bool"))
            .with_enum(EnumDescriptor::new("Suit", ScalarKind::String))
            .with_formatter(Formatter::new("label", Signature::unary(Type::mixed(), Type::string()), |_, _| {
                Ok(Value::from("x"))
            }))
    }

    fn build(registry: &Registry, config: &Config, direction: Direction, ty: &str) -> Result<Arc<DataModelNode>> {
        let pipeline = MetadataPipeline::standard();
        let cache = MetadataCache::new();
        let ty = registry.resolve_type(ty)?;
        DataModelBuilder::new(registry, config, direction, &pipeline, &cache)?.build(&ty)
    }

    fn depth(node: &DataModelNode) -> usize {
        match node {
            DataModelNode::Nullable(inner) => depth(inner),
            DataModelNode::Object { properties, .. } => {
                1 + properties.iter().map(|p| depth(&p.node)).max().unwrap_or(0)
            }
            _ => 0,
        }
    }

    #[test]
    fn containers_and_nullability() {
        let r = registry();
        let node = build(&r, &Config::default(), Direction::Encode, "?list<dict<int, Suit>>").unwrap();
        let DataModelNode::Nullable(inner) = &*node else { panic!("nullable expected") };
        let DataModelNode::List(item) = &**inner else { panic!("list expected") };
        assert!(matches!(&**item, DataModelNode::Dict { key: ScalarKind::Int, .. }));
    }

    #[test]
    fn generics_bind_per_instantiation() {
        let r = registry();
        let node = build(&r, &Config::default(), Direction::Decode, "Page<int>").unwrap();
        let DataModelNode::Object { properties, .. } = &*node else { panic!("object expected") };
        assert_eq!(*properties[0].node, DataModelNode::List(Arc::new(DataModelNode::Scalar(ScalarKind::Int))));
    }

    #[test]
    fn cycles_are_rejected_by_default() {
        let err = build(&registry(), &Config::default(), Direction::Encode, "Node").unwrap_err();
        let Error::CircularReference { class, chain } = err else { panic!("circular reference expected") };
        assert_eq!(class, "Node");
        assert_eq!(chain, "Node -> Node");
    }

    #[test]
    fn max_depth_terminates() {
        let config = Config::default().with_max_depth(2);
        let node = build(&registry(), &config, Direction::Encode, "Node").unwrap();
        assert_eq!(depth(&node), 2);
    }

    #[test]
    fn unions_need_distinct_shapes_or_a_discriminator() {
        let r = registry();
        // runtime classes differ when encoding
        assert!(build(&r, &Config::default(), Direction::Encode, "Cat|Dog").is_ok());
        let err = build(&r, &Config::default(), Direction::Decode, "Cat|Dog").unwrap_err();
        assert!(matches!(err, Error::Configuration(ConfigurationError::AmbiguousUnion(_))));
        assert!(build(&r, &Config::default(), Direction::Decode, "int|string|Cat|null").is_ok());

        let mut r = registry();
        r.register_discriminator("Cat|Dog", "pet", |_| Some("Cat".into())).unwrap();
        let node = build(&r, &Config::default(), Direction::Decode, "Cat|Dog|null").unwrap();
        let DataModelNode::Nullable(inner) = &*node else { panic!("nullable expected") };
        assert!(matches!(&**inner, DataModelNode::Union { discriminator: Some(d), .. } if d == "pet"));
    }

    #[test]
    fn hooks_rename_drop_and_compute() {
        let config = Config::default()
            .with_object_hook(
                "Cat",
                object_hook(|_, properties, _| {
                    let mut properties = properties.clone();
                    properties.insert(
                        "label".into(),
                        crate::metadata::PropertyMetadata::field("label", Type::mixed()),
                    );
                    Ok(Some(properties))
                }),
            )
            .with_property_hook(
                "Cat::lives",
                property_hook(|_, _, _, _| Ok(Some(PropertyOverride::rename("souls")))),
            )
            .with_property_hook(
                "Cat::label",
                property_hook(|_, _, _, _| Ok(Some(PropertyOverride::formatted("label")))),
            )
            .with_property_hook("Dog::good", property_hook(|_, _, _, _| Ok(Some(PropertyOverride::dropped()))));

        let r = registry();
        let cat = build(&r, &config, Direction::Encode, "Cat").unwrap();
        let DataModelNode::Object { properties, .. } = &*cat else { panic!("object expected") };
        assert_eq!(properties[0].encoded_name, "souls");
        assert_eq!(properties[1].accessor, PropertyAccessor::Computed);
        assert_eq!(*properties[1].node, DataModelNode::Scalar(ScalarKind::String));

        let dog = build(&r, &config, Direction::Encode, "Dog").unwrap();
        let DataModelNode::Object { properties, .. } = &*dog else { panic!("object expected") };
        assert!(properties.is_empty());
    }

    #[test]
    fn unbound_templates_and_unknown_enums_fail() {
        let r = registry();
        let pipeline = MetadataPipeline::standard();
        let cache = MetadataCache::new();
        let config = Config::default();
        let mut builder = DataModelBuilder::new(&r, &config, Direction::Encode, &pipeline, &cache).unwrap();
        assert!(builder.build(&Type::list(Type::template("T"))).is_err());
        assert!(builder.build(&Type::enumeration("Nope", ScalarKind::Int)).is_err());
    }
}
