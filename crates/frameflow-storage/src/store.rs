//! Object store implementations
//!
//! An [`ObjectStore`] resolves opaque keys to local filesystem paths. Stores
//! are handed to the nodes that need them through a caller-constructed
//! [`StoreRegistry`]; there is no hidden global registry.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;

use crate::error::{StorageError, StorageResult};

/// Opaque key-to-path resolution over some storage backend
#[async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// Resolve a key to a local path, fetching the object if necessary
    async fn download(&self, key: &str) -> StorageResult<PathBuf>;

    /// Store a local file under a key, returning the remote reference
    async fn upload(&self, key: &str, file: &Path) -> StorageResult<String>;
}

/// Filesystem-backed store rooted at a directory
#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn download(&self, key: &str) -> StorageResult<PathBuf> {
        let path = self.root.join(key);
        if !path.is_file() {
            return Err(StorageError::not_found(key));
        }
        Ok(path)
    }

    async fn upload(&self, key: &str, file: &Path) -> StorageResult<String> {
        let dest = self.root.join(key);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(file, &dest)?;
        log::debug!("stored '{key}' at {}", dest.display());
        Ok(dest.display().to_string())
    }
}

/// Store fetching objects over HTTP, caching them on disk.
///
/// Downloads stream the body to a partial file which is renamed into place
/// once complete, so interrupted fetches never leave a truncated object in
/// the cache. Transient failures are retried with exponential backoff; a
/// missing object (404) is terminal and never retried.
#[derive(Debug)]
pub struct HttpStore {
    base_url: String,
    cache_dir: PathBuf,
    client: reqwest::Client,
    max_attempts: u32,
    backoff_base: Duration,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>, cache_dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(StorageError::config("http store needs a base url"));
        }
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            base_url,
            cache_dir,
            client: reqwest::Client::new(),
            max_attempts: 3,
            backoff_base: Duration::from_millis(250),
        })
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }

    // base * 2^attempt, capped at a 2^10 multiplier
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.backoff_base.as_millis() as u64;
        Duration::from_millis(base.saturating_mul(1u64 << attempt.min(10)))
    }

    async fn fetch(&self, key: &str, dest: &Path) -> StorageResult<()> {
        let url = self.url_for(key);
        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::not_found(key));
        }
        if !response.status().is_success() {
            return Err(StorageError::Status {
                key: key.to_string(),
                status: response.status(),
            });
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let partial = PathBuf::from(format!("{}.part", dest.display()));
        let mut file = std::fs::File::create(&partial)?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.try_next().await? {
            file.write_all(&chunk)?;
        }
        file.flush()?;
        drop(file);
        std::fs::rename(&partial, dest)?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for HttpStore {
    async fn download(&self, key: &str) -> StorageResult<PathBuf> {
        let dest = self.cache_dir.join(key);
        if dest.is_file() {
            log::debug!("cache hit for '{key}' at {}", dest.display());
            return Ok(dest);
        }

        let mut attempt = 0;
        loop {
            match self.fetch(key, &dest).await {
                Ok(()) => {
                    log::info!("fetched '{key}' into {}", dest.display());
                    return Ok(dest);
                }
                Err(err) if err.is_not_found() => return Err(err),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(StorageError::RetryExhausted {
                            key: key.to_string(),
                            attempts: attempt,
                            source: Box::new(err),
                        });
                    }
                    let delay = self.backoff_delay(attempt - 1);
                    log::warn!("fetch of '{key}' failed ({err}); retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn upload(&self, key: &str, file: &Path) -> StorageResult<String> {
        let url = self.url_for(key);
        let bytes = std::fs::read(file)?;
        let response = self.client.put(&url).body(bytes).send().await?;
        if !response.status().is_success() {
            return Err(StorageError::Status {
                key: key.to_string(),
                status: response.status(),
            });
        }
        log::debug!("uploaded '{key}' to {url}");
        Ok(url)
    }
}

/// Caller-constructed map of named stores, injected into the nodes that need
/// a storage capability
#[derive(Default, Clone)]
pub struct StoreRegistry {
    stores: HashMap<String, Arc<dyn ObjectStore>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, name: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.register(name, store);
        self
    }

    pub fn register(&mut self, name: impl Into<String>, store: Arc<dyn ObjectStore>) {
        self.stores.insert(name.into(), store);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ObjectStore>> {
        self.stores.get(name).cloned()
    }

    /// Like [`Self::get`] but failing with a configuration error naming the
    /// missing store
    pub fn resolve(&self, name: &str) -> StorageResult<Arc<dyn ObjectStore>> {
        self.get(name)
            .ok_or_else(|| StorageError::config(format!("no store registered under '{name}'")))
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}
