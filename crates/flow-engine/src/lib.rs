//! Flow Engine - Graph-based dataflow execution for Frameflow
//!
//! This crate provides the pipeline engine at the heart of Frameflow: typed
//! nodes are wired into a directed acyclic graph, topologically ordered, and
//! driven to completion by a single orchestrator. It supports:
//!
//! - Producer / processor / consumer roles with single-unit and batched loops
//! - Bounded-concurrency async consumption with submission-ordered results
//! - Deterministic topological ordering with cycle detection
//! - Scoped node lifecycle (every opened node is closed exactly once)
//! - Attribute-level state snapshot and replay-based producer restore
//! - Composite node groups with exclusive edge ownership
//!
//! # Architecture
//!
//! Nodes implement one of the role traits and are wrapped in a [`NodeHandle`]
//! which owns identity, edge bookkeeping, and role dispatch:
//!
//! - `GraphEngine`: discovery plus Kahn ordering over the wired graph
//! - `Flow`: role classification, lifecycle, and the run loop state machine
//! - `AsyncConsumerNode`: externally driven gather-and-callback sink
//!
//! # Example
//!
//! ```ignore
//! use flow_engine::{Flow, NodeHandle};
//!
//! let frames = NodeHandle::producer(ImageFolderProducer::new("./frames"));
//! let labels = NodeHandle::processor(Classifier::default());
//! let report = NodeHandle::consumer(CsvAppenderConsumer::new("out.csv"));
//! labels.wire(&[&frames])?;
//! report.wire(&[&labels])?;
//!
//! let mut flow = Flow::new(vec![frames], vec![report]).with_batch_size(8);
//! let status = flow.run().await?;
//! ```

pub mod async_consumer;
pub mod context;
pub mod error;
pub mod flow;
pub mod graph;
pub mod group;
pub mod handle;
pub mod node;

// Re-export key types
pub use async_consumer::{AsyncConsumer, AsyncConsumerNode, GatherCallback};
pub use context::{Context, BATCH_LEN_KEY};
pub use error::{FlowError, FlowResult};
pub use flow::{Flow, FlowStatus, StageSlot};
pub use graph::GraphEngine;
pub use group::NodeGroup;
pub use handle::NodeHandle;
pub use node::{
    Consumer, Device, ExecMode, Node, NodeCore, NodeId, NodeRole, Processor, Producer, StateMap,
};
