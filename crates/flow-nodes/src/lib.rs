//! Frameflow Nodes
//!
//! Node implementations for the Frameflow dataflow engine.
//! Each node is a reusable building block that can be wired into flows.
//!
//! # Categories
//!
//! - **Producers**: Nodes that source units (image folders, JSON-lines files)
//! - **Processors**: Nodes that transform units (model inference)
//! - **Consumers**: Nodes that sink units (CSV files, collectors, webhooks)

pub mod consumers;
pub mod processors;
pub mod producers;

// Re-export all nodes for convenience
pub use consumers::*;
pub use processors::*;
pub use producers::*;

#[cfg(test)]
mod tests {
    use super::*;
    use flow_engine::{Device, Flow, FlowResult, FlowStatus, NodeHandle};
    use frameflow_storage::{LocalStore, ModelSource};
    use serde_json::{json, Value};
    use std::io::Write as _;
    use std::path::Path;
    use std::sync::Arc;

    /// Inference fake whose "weights" file holds a tag string
    struct TagModel {
        tag: String,
    }

    impl InferenceModel for TagModel {
        fn load(path: &Path, _device: Device) -> FlowResult<Self> {
            Ok(Self {
                tag: std::fs::read_to_string(path)?.trim().to_string(),
            })
        }

        fn predict(&mut self, input: &Value) -> FlowResult<Value> {
            Ok(json!(format!(
                "{}:{}",
                self.tag,
                input.as_str().unwrap_or_default()
            )))
        }
    }

    fn write_jsonl(path: &Path, lines: &[&str]) {
        let mut file = std::fs::File::create(path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
    }

    fn tag_processor(dir: &Path) -> ModelProcessor<TagModel> {
        let remote = dir.join("remote");
        std::fs::create_dir_all(&remote).unwrap();
        std::fs::write(remote.join("tag.txt"), "v1").unwrap();
        let store = LocalStore::new(&remote).unwrap();
        let source = ModelSource::new(Arc::new(store)).with_cache_root(dir.join("cache"));
        ModelProcessor::new(source, "tag.txt")
    }

    #[tokio::test]
    async fn test_jsonl_to_model_to_collector_flow() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("frames.jsonl");
        write_jsonl(
            &data,
            &[
                r#"{"image": "a"}"#,
                r#"{"image": "b"}"#,
                r#"{"image": "c"}"#,
            ],
        );

        let collector = CollectorConsumer::new();
        let sink = collector.sink();

        let producer = NodeHandle::producer(JsonLinesProducer::new(&data));
        let processor = NodeHandle::processor(tag_processor(dir.path()));
        let consumer = NodeHandle::consumer(collector);
        processor.wire(&[&producer]).unwrap();
        consumer.wire(&[&processor]).unwrap();

        let mut flow = Flow::new(vec![producer], vec![consumer]);
        let status = flow.run().await.unwrap();

        assert_eq!(status, FlowStatus::Complete);
        let collected = sink.lock();
        assert_eq!(collected.len(), 3);
        assert_eq!(collected[0].get("prediction"), Some(&json!("v1:a")));
        assert_eq!(collected[2].get("prediction"), Some(&json!("v1:c")));
    }

    #[tokio::test]
    async fn test_batched_flow_predicts_per_unit() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("frames.jsonl");
        write_jsonl(
            &data,
            &[
                r#"{"image": "a"}"#,
                r#"{"image": "b"}"#,
                r#"{"image": "c"}"#,
                r#"{"image": "d"}"#,
                r#"{"image": "e"}"#,
            ],
        );

        let collector = CollectorConsumer::new();
        let sink = collector.sink();

        let producer = NodeHandle::producer(JsonLinesProducer::new(&data));
        let processor = NodeHandle::processor(tag_processor(dir.path()));
        let consumer = NodeHandle::consumer(collector);
        processor.wire(&[&producer]).unwrap();
        consumer.wire(&[&processor]).unwrap();

        let mut flow = Flow::new(vec![producer], vec![consumer]).with_batch_size(2);
        let status = flow.run().await.unwrap();

        assert_eq!(status, FlowStatus::Complete);
        let collected = sink.lock();
        let sizes: Vec<usize> = collected.iter().map(|batch| batch.unit_count()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(
            collected[2].unit_value("prediction", 0),
            Some(&json!("v1:e"))
        );
    }

    #[tokio::test]
    async fn test_jsonl_straight_to_csv_flow() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("frames.jsonl");
        let out = dir.path().join("out.csv");
        write_jsonl(
            &data,
            &[
                r#"{"frame": 0, "label": "cat"}"#,
                r#"{"frame": 1, "label": "dog"}"#,
            ],
        );

        let producer = NodeHandle::producer(JsonLinesProducer::new(&data));
        let consumer = NodeHandle::consumer(CsvAppenderConsumer::new(&out));
        consumer.wire(&[&producer]).unwrap();

        let mut flow = Flow::new(vec![producer], vec![consumer]);
        assert_eq!(flow.run().await.unwrap(), FlowStatus::Complete);

        let text = std::fs::read_to_string(&out).unwrap();
        assert_eq!(text, "frame,label\n0,cat\n1,dog\n");
    }
}
