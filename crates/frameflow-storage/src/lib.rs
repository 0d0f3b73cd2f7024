//! Frameflow Storage - object stores and model artifact caching
//!
//! Pipeline nodes that need files from somewhere else (model weights, media
//! objects) resolve them through this crate rather than talking to backends
//! directly. It supports:
//!
//! - Key-to-local-path resolution over a [`ObjectStore`] trait
//! - A filesystem store and a caching, retrying HTTP store
//! - Explicit injection via a caller-built [`StoreRegistry`]
//! - A model artifact cache under `~/.frameflow/models`
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use frameflow_storage::{HttpStore, ModelSource, StoreRegistry};
//!
//! let models = Arc::new(HttpStore::new("https://models.example.com", cache_dir)?);
//! let registry = StoreRegistry::new().with_store("models", models.clone());
//! let weights = ModelSource::new(models).fetch("classifier.onnx").await?;
//! ```

pub mod error;
pub mod model;
pub mod store;

// Re-export key types
pub use error::{StorageError, StorageResult};
pub use model::{default_model_root, ModelSource, HOME_ENV};
pub use store::{HttpStore, LocalStore, ObjectStore, StoreRegistry};
