//! Run orchestration over an ordered node graph
//!
//! [`Flow`] takes the producer and consumer sets for a wired graph, derives
//! the topological order through [`GraphEngine`], partitions it into
//! role-specific stage lists, and drives units through the graph until a
//! producer reports end of stream. Node resources follow a scoped lifecycle:
//! every node opened for a run is closed exactly once when the run ends,
//! whether it completed or failed.

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::{FlowError, FlowResult};
use crate::graph::GraphEngine;
use crate::handle::NodeHandle;
use crate::node::NodeRole;

/// Run-level state machine. Exactly one forward path per run:
/// idle, then running, then complete or fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Idle,
    Running,
    Complete,
    Fail,
}

impl std::fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FlowStatus::Idle => "idle",
            FlowStatus::Running => "running",
            FlowStatus::Complete => "complete",
            FlowStatus::Fail => "fail",
        };
        write!(f, "{label}")
    }
}

/// One node's place in the classified execution order
#[derive(Debug, Clone)]
pub struct StageSlot {
    pub node: NodeHandle,
    /// Position in the full topological order
    pub position: usize,
    /// Position of the immediately preceding node, `None` for producers
    pub upstream: Option<usize>,
    /// Whether this node closes the topological order
    pub is_last: bool,
}

/// Failure captured from inside the run loop, with node attribution
struct LoopFailure {
    message: String,
    error: FlowError,
}

impl LoopFailure {
    fn at(stage: &str, node: &NodeHandle, iteration: u64, error: FlowError) -> Self {
        Self {
            message: format!(
                "{stage} '{}' failed on iteration {}: {error}",
                node.name(),
                iteration + 1
            ),
            error,
        }
    }
}

/// The orchestrator: owns the classified stage lists, the node lifecycle,
/// and the run status triple.
pub struct Flow {
    producers: Vec<NodeHandle>,
    consumers: Vec<NodeHandle>,
    batch_size: usize,
    producer_slots: Vec<StageSlot>,
    processor_slots: Vec<StageSlot>,
    consumer_slots: Vec<StageSlot>,
    ready: bool,
    opened: Vec<NodeHandle>,
    status: FlowStatus,
    message: Option<String>,
    error: Option<FlowError>,
}

impl Flow {
    /// Build a flow over already-wired producer and consumer sets
    pub fn new(producers: Vec<NodeHandle>, consumers: Vec<NodeHandle>) -> Self {
        Self {
            producers,
            consumers,
            batch_size: 1,
            producer_slots: Vec::new(),
            processor_slots: Vec::new(),
            consumer_slots: Vec::new(),
            ready: false,
            opened: Vec::new(),
            status: FlowStatus::Idle,
            message: None,
            error: None,
        }
    }

    /// Set the per-run batch size. One keeps the flow in single-unit mode;
    /// anything above one switches the loop to the batched operations. Zero
    /// is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Derive the topological order and classify it into stage lists.
    ///
    /// Fails on cycles, on an empty producer set, and on async consumer
    /// nodes, which are driven through their submission entry point rather
    /// than by a flow loop.
    pub fn setup(&mut self) -> FlowResult<()> {
        let engine = GraphEngine::new(&self.producers, &self.consumers)?;
        let total = engine.len();
        self.producer_slots.clear();
        self.processor_slots.clear();
        self.consumer_slots.clear();

        for (position, node) in engine.sorted().iter().enumerate() {
            let slot = StageSlot {
                node: node.clone(),
                position,
                upstream: position.checked_sub(1),
                is_last: position + 1 == total,
            };
            match node.role() {
                NodeRole::Producer => {
                    self.producer_slots.push(StageSlot {
                        upstream: None,
                        ..slot
                    });
                }
                NodeRole::Processor => self.processor_slots.push(slot),
                NodeRole::Consumer => self.consumer_slots.push(slot),
                NodeRole::AsyncConsumer => {
                    return Err(FlowError::graph(format!(
                        "'{}' is an async consumer and is driven through submissions, \
                         not a flow loop",
                        node.name()
                    )));
                }
            }
        }

        if self.producer_slots.is_empty() {
            return Err(FlowError::graph("flow has no producers"));
        }
        if self.producer_slots.len() > 1 {
            log::warn!(
                "flow has {} producers; the run stops as soon as any one of them is exhausted",
                self.producer_slots.len()
            );
        }
        self.ready = true;
        Ok(())
    }

    /// Inject the batch size into every node and invoke its open hook, in
    /// the order producers, processors, consumers. If a node fails to open,
    /// the nodes already opened are closed before the error is returned.
    pub async fn open(&mut self) -> FlowResult<()> {
        if !self.ready {
            self.setup()?;
        }
        for node in self.lifecycle_order() {
            node.set_batch_size(self.batch_size).await;
            match node.open().await {
                Ok(()) => self.opened.push(node),
                Err(err) => {
                    log::error!("failed to open '{}': {err}", node.name());
                    if let Err(close_err) = self.close().await {
                        log::error!("cleanup after failed open also failed: {close_err}");
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Close every node opened for this run, in the same order they were
    /// opened. Close errors do not stop the sweep; the first one is
    /// returned after every node has been visited. Idempotent: a second
    /// call finds nothing left to close.
    pub async fn close(&mut self) -> FlowResult<()> {
        let mut first_err = None;
        for node in std::mem::take(&mut self.opened) {
            if let Err(err) = node.close().await {
                log::error!("failed to close '{}': {err}", node.name());
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Run the flow to completion: setup if needed, open, loop until a
    /// producer is exhausted or a stage fails, then close.
    ///
    /// Loop failures do not propagate as errors; they land in the status
    /// triple and the final status is returned. Setup and open failures do
    /// propagate, after closing whatever had already opened.
    pub async fn run(&mut self) -> FlowResult<FlowStatus> {
        if !self.ready {
            self.setup()?;
        }
        self.open().await?;
        self.begin();
        let outcome = self.run_loop().await;
        self.record_outcome(outcome);
        if let Err(err) = self.close().await {
            if self.status == FlowStatus::Complete {
                self.status = FlowStatus::Fail;
                self.message = Some(format!("close failed: {err}"));
                self.error = Some(err);
            }
        }
        Ok(self.status)
    }

    /// Run only the loop, leaving setup, open, and close to the caller.
    /// Useful for repeated runs without re-deriving the graph order.
    pub async fn run_manual(&mut self) -> FlowResult<FlowStatus> {
        if !self.ready || self.opened.is_empty() {
            return Err(FlowError::config(
                "manual runs require setup() and open() to have been called",
            ));
        }
        self.begin();
        let outcome = self.run_loop().await;
        self.record_outcome(outcome);
        Ok(self.status)
    }

    pub fn status(&self) -> FlowStatus {
        self.status
    }

    /// Failure description from the last run, if it failed
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// The captured error from the last run, if it failed
    pub fn error(&self) -> Option<&FlowError> {
        self.error.as_ref()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn producer_slots(&self) -> &[StageSlot] {
        &self.producer_slots
    }

    pub fn processor_slots(&self) -> &[StageSlot] {
        &self.processor_slots
    }

    pub fn consumer_slots(&self) -> &[StageSlot] {
        &self.consumer_slots
    }

    fn lifecycle_order(&self) -> Vec<NodeHandle> {
        self.producer_slots
            .iter()
            .chain(&self.processor_slots)
            .chain(&self.consumer_slots)
            .map(|slot| slot.node.clone())
            .collect()
    }

    fn begin(&mut self) {
        self.status = FlowStatus::Running;
        self.message = None;
        self.error = None;
    }

    fn record_outcome(&mut self, outcome: Result<u64, LoopFailure>) {
        match outcome {
            Ok(iterations) => {
                self.status = FlowStatus::Complete;
                log::info!("flow complete after {iterations} iteration(s)");
            }
            Err(failure) => {
                self.status = FlowStatus::Fail;
                log::error!("{}", failure.message);
                self.message = Some(failure.message);
                self.error = Some(failure.error);
            }
        }
    }

    /// One iteration: pull from every producer and merge with later writes
    /// winning, thread the context through the processors in topological
    /// order, deliver it to every consumer. Ends the moment any producer
    /// reports end of stream; a partially merged iteration is abandoned,
    /// never delivered.
    async fn run_loop(&mut self) -> Result<u64, LoopFailure> {
        let batched = self.batch_size > 1;
        let mut iterations = 0u64;
        loop {
            let mut merged = Context::new();
            let mut exhausted = false;
            for slot in &self.producer_slots {
                let produced = if batched {
                    slot.node.produce_batch().await
                } else {
                    slot.node.produce_next().await
                };
                match produced {
                    Ok(unit) => merged.merge(unit),
                    Err(err) if err.is_end_of_stream() => {
                        exhausted = true;
                        break;
                    }
                    Err(err) => {
                        return Err(LoopFailure::at("producer", &slot.node, iterations, err))
                    }
                }
            }
            if exhausted {
                return Ok(iterations);
            }

            let mut current = merged;
            for slot in &self.processor_slots {
                let step = if batched {
                    slot.node.process_batch(current).await
                } else {
                    slot.node.process(current).await
                };
                current = step
                    .map_err(|err| LoopFailure::at("processor", &slot.node, iterations, err))?;
            }

            for slot in &self.consumer_slots {
                let delivered = if batched {
                    slot.node.consume_batch(&current).await
                } else {
                    slot.node.consume(&current).await
                };
                delivered
                    .map_err(|err| LoopFailure::at("consumer", &slot.node, iterations, err))?;
            }
            iterations += 1;
        }
    }
}
