//! Model artifact resolution
//!
//! A [`ModelSource`] materializes named model artifacts into a local cache
//! directory through an [`ObjectStore`]. Artifacts already present in the
//! cache are reused without touching the store, so repeated pipeline runs
//! only pay the download cost once.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::StorageResult;
use crate::store::ObjectStore;

/// Environment variable overriding the Frameflow home directory
pub const HOME_ENV: &str = "FRAMEFLOW_HOME";

/// Default model cache root: `$FRAMEFLOW_HOME/models`, falling back to
/// `~/.frameflow/models`
pub fn default_model_root() -> PathBuf {
    std::env::var_os(HOME_ENV)
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|home| home.join(".frameflow")))
        .unwrap_or_else(|| PathBuf::from(".frameflow"))
        .join("models")
}

/// Resolves named artifacts to cached local paths through a store
pub struct ModelSource {
    store: Arc<dyn ObjectStore>,
    cache_root: PathBuf,
}

impl ModelSource {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            cache_root: default_model_root(),
        }
    }

    pub fn with_cache_root(mut self, cache_root: impl Into<PathBuf>) -> Self {
        self.cache_root = cache_root.into();
        self
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Cache location for an artifact, whether or not it is present yet
    pub fn local_path(&self, artifact: &str) -> PathBuf {
        self.cache_root.join(artifact)
    }

    /// Materialize an artifact into the cache and return its local path
    pub async fn fetch(&self, artifact: &str) -> StorageResult<PathBuf> {
        let local = self.local_path(artifact);
        if local.is_file() {
            log::debug!("model artifact '{artifact}' already cached");
            return Ok(local);
        }
        let fetched = self.store.download(artifact).await?;
        if fetched != local {
            if let Some(parent) = local.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&fetched, &local)?;
        }
        log::info!("model artifact '{artifact}' ready at {}", local.display());
        Ok(local)
    }
}
