//! Image folder producer
//!
//! Emits the images found under a directory in deterministic sorted order.
//! Each unit carries the base64-encoded bytes plus the originating file name
//! and path, so downstream processors never touch the filesystem themselves.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flow_engine::{Context, ExecMode, FlowError, FlowResult, Node, NodeCore, Producer};
use futures_util::future::join_all;
use serde_json::json;

/// File extensions recognized as images, matched case-insensitively
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];

/// Producer emitting `{image, filename, filepath}` units from a folder
///
/// `open` scans the folder and fails if no image is found; `close` rewinds so
/// a reopened producer starts from the first file again. Batched reads pull
/// one batch's files concurrently before packing, since per-file latency
/// dominates on networked filesystems.
pub struct ImageFolderProducer {
    core: NodeCore,
    folder: PathBuf,
    limit: Option<usize>,
    files: Vec<PathBuf>,
    cursor: usize,
}

impl ImageFolderProducer {
    /// Unit key holding the base64-encoded image bytes
    pub const KEY_IMAGE: &'static str = "image";
    /// Unit key holding the file name
    pub const KEY_FILENAME: &'static str = "filename";
    /// Unit key holding the full path
    pub const KEY_FILEPATH: &'static str = "filepath";

    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            core: NodeCore::for_type::<Self>(ExecMode::Batch),
            folder: folder.into(),
            limit: None,
            files: Vec::new(),
            cursor: 0,
        }
    }

    /// Cap the number of files produced
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    fn scan(&self) -> FlowResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.folder)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if path.is_file() && is_image {
                files.push(path);
            }
        }
        files.sort();
        if let Some(limit) = self.limit {
            files.truncate(limit);
        }
        Ok(files)
    }

    fn unit_for(path: &Path, bytes: &[u8]) -> Context {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        Context::new()
            .with(Self::KEY_IMAGE, json!(STANDARD.encode(bytes)))
            .with(Self::KEY_FILENAME, json!(filename))
            .with(Self::KEY_FILEPATH, json!(path.display().to_string()))
    }
}

#[async_trait]
impl Node for ImageFolderProducer {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    async fn open(&mut self) -> FlowResult<()> {
        self.files = self.scan()?;
        if self.files.is_empty() {
            return Err(FlowError::config(format!(
                "no images found under {}",
                self.folder.display()
            )));
        }
        self.cursor = 0;
        log::info!(
            "'{}' found {} image(s) under {}",
            self.core.name(),
            self.files.len(),
            self.folder.display()
        );
        Ok(())
    }

    async fn close(&mut self) -> FlowResult<()> {
        self.cursor = 0;
        Ok(())
    }
}

#[async_trait]
impl Producer for ImageFolderProducer {
    async fn next(&mut self) -> FlowResult<Context> {
        let Some(path) = self.files.get(self.cursor) else {
            return Err(FlowError::EndOfStream);
        };
        let bytes = std::fs::read(path)?;
        let unit = Self::unit_for(path, &bytes);
        self.cursor += 1;
        self.core.advance(1);
        Ok(unit)
    }

    async fn next_batch(&mut self) -> FlowResult<Context> {
        let slice: Vec<PathBuf> = self
            .files
            .iter()
            .skip(self.cursor)
            .take(self.core.batch_size())
            .cloned()
            .collect();
        if slice.is_empty() {
            return Err(FlowError::EndOfStream);
        }

        // one blocking read per file, joined before packing
        let reads = slice.into_iter().map(|path| {
            tokio::task::spawn_blocking(move || {
                let bytes = std::fs::read(&path)?;
                Ok::<_, FlowError>((path, bytes))
            })
        });
        let mut batch = Context::new();
        let mut produced = 0u64;
        for joined in join_all(reads).await {
            let (path, bytes) =
                joined.map_err(|err| FlowError::task(format!("image read failed: {err}")))??;
            batch.push_unit(Self::unit_for(&path, &bytes));
            produced += 1;
        }
        self.cursor += produced as usize;
        self.core.advance(produced);
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn seed_folder(dir: &Path, names: &[&str]) {
        for name in names {
            std::fs::write(dir.join(name), name.as_bytes()).unwrap();
        }
    }

    #[tokio::test]
    async fn test_units_come_in_sorted_order_with_payload() {
        let dir = tempfile::tempdir().unwrap();
        seed_folder(dir.path(), &["c.png", "a.jpg", "b.jpeg", "notes.txt"]);

        let mut producer = ImageFolderProducer::new(dir.path());
        producer.open().await.unwrap();

        let unit = producer.next().await.unwrap();
        assert_eq!(
            unit.get(ImageFolderProducer::KEY_FILENAME),
            Some(&json!("a.jpg"))
        );
        let encoded = unit
            .get(ImageFolderProducer::KEY_IMAGE)
            .and_then(|v| v.as_str())
            .unwrap();
        assert_eq!(STANDARD.decode(encoded).unwrap(), b"a.jpg");

        let unit = producer.next().await.unwrap();
        assert_eq!(
            unit.get(ImageFolderProducer::KEY_FILENAME),
            Some(&json!("b.jpeg"))
        );
    }

    #[tokio::test]
    async fn test_limit_caps_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        seed_folder(dir.path(), &["a.jpg", "b.jpg", "c.jpg"]);

        let mut producer = ImageFolderProducer::new(dir.path()).with_limit(2);
        producer.open().await.unwrap();

        producer.next().await.unwrap();
        producer.next().await.unwrap();
        let err = producer.next().await.unwrap_err();
        assert!(err.is_end_of_stream());
        assert_eq!(producer.core().progress(), 2);
    }

    #[tokio::test]
    async fn test_open_fails_on_a_folder_without_images() {
        let dir = tempfile::tempdir().unwrap();
        seed_folder(dir.path(), &["notes.txt"]);

        let mut producer = ImageFolderProducer::new(dir.path());
        let err = producer.open().await.unwrap_err();
        assert!(err.to_string().contains("no images found"));
    }

    #[tokio::test]
    async fn test_batches_read_in_parallel_keep_order() {
        let dir = tempfile::tempdir().unwrap();
        seed_folder(dir.path(), &["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg"]);

        let mut producer = ImageFolderProducer::new(dir.path());
        producer.core_mut().set_batch_size(2);
        producer.open().await.unwrap();

        let batch = producer.next_batch().await.unwrap();
        assert_eq!(batch.unit_count(), 2);
        assert_eq!(
            batch.unit_value(ImageFolderProducer::KEY_FILENAME, 0),
            Some(&json!("a.jpg"))
        );
        assert_eq!(
            batch.unit_value(ImageFolderProducer::KEY_FILENAME, 1),
            Some(&json!("b.jpg"))
        );

        assert_eq!(producer.next_batch().await.unwrap().unit_count(), 2);
        let last = producer.next_batch().await.unwrap();
        assert_eq!(last.unit_count(), 1);
        assert!(producer.next_batch().await.unwrap_err().is_end_of_stream());
    }

    #[tokio::test]
    async fn test_close_rewinds_to_the_first_file() {
        let dir = tempfile::tempdir().unwrap();
        seed_folder(dir.path(), &["a.jpg", "b.jpg"]);

        let mut producer = ImageFolderProducer::new(dir.path());
        producer.open().await.unwrap();
        producer.next().await.unwrap();
        producer.close().await.unwrap();

        producer.open().await.unwrap();
        let unit = producer.next().await.unwrap();
        assert_eq!(
            unit.get(ImageFolderProducer::KEY_FILENAME),
            Some(&json!("a.jpg"))
        );
    }
}
