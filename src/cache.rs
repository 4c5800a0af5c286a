//! Compiled artifact cache: an append-only in-memory map, optionally backed
//! by a directory of serialized artifacts.
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::codec::Artifact;
use crate::error::Result;
use crate::metadata::Direction;

const EXTENSION: &str = "codec";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Variant {
    Eager,
    Lazy,
}

impl Variant {
    pub fn name(self) -> &'static str {
        match self {
            Variant::Eager => "eager",
            Variant::Lazy => "lazy",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub hash: u64,
    pub direction: Direction,
    pub variant: Variant,
    /// Keys built from process-local state (hook ids) stay in memory.
    pub durable: bool,
}

impl CacheKey {
    pub fn file_name(&self) -> String {
        format!("{:016x}.{}.json.{}.{EXTENSION}", self.hash, self.direction.name(), self.variant.name())
    }
}

#[derive(Debug, Default)]
pub struct CodecCache {
    memory: RwLock<HashMap<CacheKey, Arc<Artifact>>>,
    dir: Option<PathBuf>,
}

impl CodecCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { memory: RwLock::default(), dir: Some(dir.into()) }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// The artifact for `key`: from memory, then disk, then `compile`.
    pub fn get_or_compile(&self, key: CacheKey, compile: impl FnOnce() -> Result<Artifact>) -> Result<Arc<Artifact>> {
        if let Some(hit) = self.memory.read().get(&key) {
            debug!(file = %key.file_name(), "codec cache hit");
            return Ok(hit.clone());
        }
        if key.durable {
            if let Some(artifact) = self.load(&key) {
                debug!(file = %key.file_name(), "codec loaded from disk");
                return Ok(self.publish(key, artifact));
            }
        }
        debug!(file = %key.file_name(), "codec cache miss");
        let artifact = compile()?;
        if key.durable {
            if let Err(err) = self.persist(&key, &artifact) {
                warn!(file = %key.file_name(), error = %err, "codec not persisted");
            }
        }
        Ok(self.publish(key, artifact))
    }

    fn publish(&self, key: CacheKey, artifact: Artifact) -> Arc<Artifact> {
        self.memory.write().entry(key).or_insert_with(|| Arc::new(artifact)).clone()
    }

    fn path(&self, key: &CacheKey) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(key.file_name()))
    }

    /// Unreadable or corrupt files count as misses and are removed.
    fn load(&self, key: &CacheKey) -> Option<Artifact> {
        let path = self.path(key)?;
        let bytes = fs::read(&path).ok()?;
        match serde_json::from_slice::<Artifact>(&bytes) {
            Ok(artifact) if artifact.direction() == key.direction => Some(artifact),
            Ok(_) => {
                warn!(path = %path.display(), "discarding codec of the wrong direction");
                let _ = fs::remove_file(&path);
                None
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "discarding corrupt codec");
                let _ = fs::remove_file(&path);
                None
            }
        }
    }

    fn persist(&self, key: &CacheKey, artifact: &Artifact) -> io::Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let path = dir.join(key.file_name());
        if path.exists() {
            return Ok(());
        }
        fs::create_dir_all(dir)?;
        // one temp file per writer; the first finished rename wins
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut tmp, artifact)?;
        tmp.as_file().sync_all()?;
        match tmp.persist_noclobber(&path) {
            Ok(_) => debug!(path = %path.display(), "codec persisted"),
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {}
            Err(err) => return Err(err.error),
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.memory.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every in-memory artifact.
    pub fn clear(&self) {
        self.memory.write().clear();
    }

    /// Forget every artifact, on disk too.
    pub fn purge(&self) -> io::Result<()> {
        self.clear();
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err),
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == EXTENSION) {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

// ------------------------------- Tests ------------------------------------ //
