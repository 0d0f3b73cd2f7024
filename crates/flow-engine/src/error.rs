//! Error types for the flow engine

use thiserror::Error;

/// Result type alias using FlowError
pub type FlowResult<T> = std::result::Result<T, FlowError>;

/// Errors that can occur while wiring or running a flow
#[derive(Debug, Error)]
pub enum FlowError {
    /// Invalid node configuration or wiring (rebinding, group ownership, bad mode/device)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid graph structure discovered during setup (cycles, role misuse)
    #[error("Graph error: {0}")]
    Graph(String),

    /// A producer has exhausted its source. Drives normal loop termination,
    /// never reported as a run failure.
    #[error("End of stream")]
    EndOfStream,

    /// A role operation was called that the node never implemented
    #[error("Operation '{0}' is not implemented by this node")]
    Unimplemented(&'static str),

    /// A node failed while producing, processing, or consuming
    #[error("Task failed: {0}")]
    Task(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlowError {
    /// Create a configuration error with a message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a graph-structure error with a message
    pub fn graph(msg: impl Into<String>) -> Self {
        Self::Graph(msg.into())
    }

    /// Create a task failure with a message
    pub fn task(msg: impl Into<String>) -> Self {
        Self::Task(msg.into())
    }

    /// True when this is the end-of-stream stop signal
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}
