//! JSON Lines producer
//!
//! Reads one JSON object per line from a file; each object becomes one unit
//! context. Blank lines are skipped, malformed lines fail the run.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flow_engine::{Context, ExecMode, FlowError, FlowResult, Node, NodeCore, Producer};
use serde_json::Value;

/// Producer emitting one unit per JSON line
pub struct JsonLinesProducer {
    core: NodeCore,
    path: PathBuf,
    lines: Option<Lines<BufReader<File>>>,
}

impl JsonLinesProducer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            core: NodeCore::for_type::<Self>(ExecMode::Batch),
            path: path.into(),
            lines: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Node for JsonLinesProducer {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    async fn open(&mut self) -> FlowResult<()> {
        let file = File::open(&self.path)?;
        self.lines = Some(BufReader::new(file).lines());
        log::debug!("'{}' reading {}", self.core.name(), self.path.display());
        Ok(())
    }

    async fn close(&mut self) -> FlowResult<()> {
        self.lines = None;
        Ok(())
    }
}

#[async_trait]
impl Producer for JsonLinesProducer {
    async fn next(&mut self) -> FlowResult<Context> {
        let lines = self
            .lines
            .as_mut()
            .ok_or_else(|| FlowError::config("json lines producer is not open"))?;
        for line in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: HashMap<String, Value> = serde_json::from_str(&line)?;
            self.core.advance(1);
            return Ok(Context::from_map(fields));
        }
        Err(FlowError::EndOfStream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn jsonl_file(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_each_line_is_one_unit() {
        let file = jsonl_file(&[r#"{"frame": 1}"#, "", r#"{"frame": 2}"#]);
        let mut producer = JsonLinesProducer::new(file.path());
        producer.open().await.unwrap();

        assert_eq!(producer.next().await.unwrap().get("frame"), Some(&json!(1)));
        assert_eq!(producer.next().await.unwrap().get("frame"), Some(&json!(2)));
        assert!(producer.next().await.unwrap_err().is_end_of_stream());
        assert_eq!(producer.core().progress(), 2);
    }

    #[tokio::test]
    async fn test_default_batching_packs_lines() {
        let file = jsonl_file(&[r#"{"frame": 1}"#, r#"{"frame": 2}"#, r#"{"frame": 3}"#]);
        let mut producer = JsonLinesProducer::new(file.path());
        producer.core_mut().set_batch_size(2);
        producer.open().await.unwrap();

        assert_eq!(producer.next_batch().await.unwrap().unit_count(), 2);
        assert_eq!(producer.next_batch().await.unwrap().unit_count(), 1);
        assert!(producer.next_batch().await.unwrap_err().is_end_of_stream());
    }

    #[tokio::test]
    async fn test_malformed_lines_fail() {
        let file = jsonl_file(&[r#"{"frame": 1}"#, "not json"]);
        let mut producer = JsonLinesProducer::new(file.path());
        producer.open().await.unwrap();

        producer.next().await.unwrap();
        assert!(producer.next().await.is_err());
    }

    #[tokio::test]
    async fn test_next_before_open_is_a_config_error() {
        let file = jsonl_file(&[r#"{"frame": 1}"#]);
        let mut producer = JsonLinesProducer::new(file.path());
        let err = producer.next().await.unwrap_err();
        assert!(err.to_string().contains("not open"));
    }

    #[tokio::test]
    async fn test_reopen_replays_from_the_start() {
        let file = jsonl_file(&[r#"{"frame": 1}"#, r#"{"frame": 2}"#]);
        let mut producer = JsonLinesProducer::new(file.path());
        producer.open().await.unwrap();
        producer.next().await.unwrap();
        producer.close().await.unwrap();

        producer.open().await.unwrap();
        assert_eq!(producer.next().await.unwrap().get("frame"), Some(&json!(1)));
    }
}
