//! The public facade: resolve a type, compile (or fetch) its artifact, run it.
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{CacheKey, CodecCache, Variant};
use crate::codec::{compile, Artifact, Codec, DecodePlan, EncodeContext};
use crate::config::Config;
use crate::decode::{DecodeOutcome, Decoder};
use crate::error::{Error, Result};
use crate::hash::Fingerprint;
use crate::instantiate::ShapeCache;
use crate::metadata::{Direction, MetadataCache, MetadataPipeline};
use crate::model::{DataModelBuilder, DataModelNode};
use crate::registry::{AttributeSource, Directive, Registry};
use crate::resource::{FileResource, MemoryResource, Resource};
use crate::types::Type;
use crate::value::Value;

/// Owns the registry and every cache. `Send + Sync`; decoded values are not.
pub struct Serializer {
    registry: Arc<Registry>,
    pipeline: MetadataPipeline,
    metadata: MetadataCache,
    codecs: CodecCache,
    shapes: Arc<ShapeCache>,
}

impl Serializer {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: Arc::new(registry),
            pipeline: MetadataPipeline::standard(),
            metadata: MetadataCache::new(),
            codecs: CodecCache::new(),
            shapes: Arc::new(ShapeCache::new()),
        }
    }

    /// Persist compiled artifacts under `dir`.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.codecs = CodecCache::with_dir(dir);
        self
    }

    pub fn with_pipeline(mut self, pipeline: MetadataPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn codecs(&self) -> &CodecCache {
        &self.codecs
    }

    pub fn resolve(&self, ty: &str) -> Result<Type> {
        Ok(self.registry.resolve_type(ty)?)
    }

    // ————————————————————————————————————————————————————————————————————————
    // ENCODE
    // ————————————————————————————————————————————————————————————————————————

    pub fn encode(&self, value: &Value, ty: &Type, config: &Config) -> Result<String> {
        let artifact = self.encoder(ty, config)?;
        let codec = expect_encoder(&artifact)?;
        codec.encode_to_string(value, &EncodeContext { registry: &self.registry, config })
    }

    pub fn encode_to_writer<W: Write + ?Sized>(&self, value: &Value, ty: &Type, config: &Config, out: &mut W) -> Result<()> {
        let artifact = self.encoder(ty, config)?;
        let codec = expect_encoder(&artifact)?;
        codec.encode(value, &EncodeContext { registry: &self.registry, config }, out)
    }

    /// The compiled encoder for `ty`, from cache when possible.
    pub fn encoder(&self, ty: &Type, config: &Config) -> Result<Arc<Artifact>> {
        let key = self.key(ty, Direction::Encode, config);
        self.codecs.get_or_compile(key, || {
            let root = self.data_model(ty, Direction::Encode, config)?;
            let codec = compile(&root, config.format_json_flags);
            debug!(ty = %ty, instructions = codec.instructions.len(), "encoder compiled");
            Ok(Artifact::Encoder(codec))
        })
    }

    // ————————————————————————————————————————————————————————————————————————
    // DECODE
    // ————————————————————————————————————————————————————————————————————————

    /// Decode `resource` as `ty`. Without `collectErrors` the first error is
    /// returned; with it, recoverable errors end up in the outcome.
    pub fn decode(&self, resource: Rc<dyn Resource>, ty: &Type, config: &Config) -> Result<DecodeOutcome> {
        let artifact = self.decoder(ty, config)?;
        let Artifact::Decoder(plan) = &*artifact else {
            return Err(wrong_artifact(Direction::Decode));
        };
        Decoder::new(resource, self.registry.clone(), Arc::new(config.clone()), self.shapes.clone()).decode(plan)
    }

    pub fn decode_slice(&self, bytes: &[u8], ty: &Type, config: &Config) -> Result<DecodeOutcome> {
        self.decode(Rc::new(MemoryResource::new(bytes)), ty, config)
    }

    pub fn decode_file(&self, path: impl AsRef<Path>, ty: &Type, config: &Config) -> Result<DecodeOutcome> {
        self.decode(Rc::new(FileResource::open(path)?), ty, config)
    }

    /// The decode plan for `ty`, from cache when possible.
    pub fn decoder(&self, ty: &Type, config: &Config) -> Result<Arc<Artifact>> {
        let key = self.key(ty, Direction::Decode, config);
        self.codecs.get_or_compile(key, || {
            let root = self.data_model(ty, Direction::Decode, config)?;
            debug!(ty = %ty, "decode plan built");
            Ok(Artifact::Decoder(DecodePlan { root }))
        })
    }

    // ————————————————————————————————————————————————————————————————————————
    // CACHES
    // ————————————————————————————————————————————————————————————————————————

    /// Compile encoders and decode plans for every class marked warmable.
    /// Generic classes cannot be compiled without bindings and are skipped.
    pub fn warm_up(&self, config: &Config) -> Result<usize> {
        let mut warmed = 0;
        for class in self.registry.classes() {
            if !self.registry.class_directives(&class.name).contains(&Directive::Warmable) {
                continue;
            }
            if !class.templates.is_empty() {
                warn!(class = %class.name, "generic class skipped by warm-up");
                continue;
            }
            let ty = self.resolve(&class.name)?;
            self.encoder(&ty, config)?;
            self.decoder(&ty, config)?;
            warmed += 1;
        }
        debug!(warmed, "warm-up done");
        Ok(warmed)
    }

    pub fn clear_caches(&self) {
        self.metadata.clear();
        self.codecs.clear();
        self.shapes.clear();
    }

    pub fn purge_caches(&self) -> io::Result<()> {
        self.clear_caches();
        self.codecs.purge()
    }

    fn data_model(&self, ty: &Type, direction: Direction, config: &Config) -> Result<Arc<DataModelNode>> {
        DataModelBuilder::new(&self.registry, config, direction, &self.pipeline, &self.metadata)?.build(ty)
    }

    fn key(&self, ty: &Type, direction: Direction, config: &Config) -> CacheKey {
        let mut fp = Fingerprint::new();
        fp.write_str(&ty.to_string()).write_str(direction.name());
        config.fingerprint_into(&mut fp);
        fp.write_u64(self.registry.fingerprint());
        for stage in self.pipeline.stage_names() {
            fp.write_str(stage);
        }
        let variant = match direction {
            Direction::Decode if config.lazy => Variant::Lazy,
            _ => Variant::Eager,
        };
        CacheKey { hash: fp.finish(), direction, variant, durable: config.hooks.is_empty() }
    }
}

fn expect_encoder(artifact: &Artifact) -> Result<&Codec> {
    artifact.as_encoder().ok_or_else(|| wrong_artifact(Direction::Encode))
}

fn wrong_artifact(direction: Direction) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::InvalidData, format!("cached artifact is not an {} artifact", direction.name())))
}

// ------------------------------- Tests ------------------------------------ //
