//! Node building blocks - identity, roles, and the capability traits
//!
//! Every node in a flow embeds a [`NodeCore`] (identity, execution mode,
//! progress, batch size, state-attribute registry) and implements one of the
//! role traits: [`Producer`], [`Processor`], or [`Consumer`]. The async
//! consumer role lives in [`crate::async_consumer`]. Wiring and scheduling
//! operate on [`crate::NodeHandle`]s, never on the bare structs.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::context::Context;
use crate::error::{FlowError, FlowResult};

/// Process-unique, stable node identifier.
///
/// Assigned once at construction and never recomputed; nodes hash and compare
/// by this id alone, so they can serve as graph-map keys regardless of
/// mutable internal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a node expects to be driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    /// Process finite collections, typically in packed batches
    Batch,
    /// Process an unbounded stream unit by unit
    Realtime,
}

impl FromStr for ExecMode {
    type Err = FlowError;

    fn from_str(s: &str) -> FlowResult<Self> {
        match s {
            "batch" => Ok(Self::Batch),
            "realtime" => Ok(Self::Realtime),
            other => Err(FlowError::config(format!(
                "unknown execution mode '{other}' (expected 'batch' or 'realtime')"
            ))),
        }
    }
}

impl fmt::Display for ExecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Batch => write!(f, "batch"),
            Self::Realtime => write!(f, "realtime"),
        }
    }
}

/// Compute device preference for processors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    #[default]
    Cpu,
    Cuda(u32),
}

impl FromStr for Device {
    type Err = FlowError;

    fn from_str(s: &str) -> FlowResult<Self> {
        if s == "cpu" {
            return Ok(Self::Cpu);
        }
        if let Some(index) = s.strip_prefix("cuda:") {
            if let Ok(index) = index.parse() {
                return Ok(Self::Cuda(index));
            }
        }
        Err(FlowError::config(format!(
            "unknown device type '{s}' (expected 'cpu' or 'cuda:<index>')"
        )))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(index) => write!(f, "cuda:{index}"),
        }
    }
}

/// The closed set of node roles the scheduler dispatches on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Producer,
    Processor,
    Consumer,
    AsyncConsumer,
}

impl NodeRole {
    /// Leaf roles are terminal: they never take children
    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Consumer | Self::AsyncConsumer)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Producer => write!(f, "producer"),
            Self::Processor => write!(f, "processor"),
            Self::Consumer => write!(f, "consumer"),
            Self::AsyncConsumer => write!(f, "async consumer"),
        }
    }
}

/// A node's captured resumable state: attribute name to current value
pub type StateMap = HashMap<String, Value>;

/// Base state embedded in every node implementation.
///
/// Deliberately not `Clone`: one core means one identity.
#[derive(Debug)]
pub struct NodeCore {
    id: NodeId,
    name: String,
    mode: ExecMode,
    progress: u64,
    batch_size: usize,
    state_attrs: Vec<String>,
}

impl NodeCore {
    /// Create a core named after the concrete node type
    pub fn for_type<T>(mode: ExecMode) -> Self {
        let full = std::any::type_name::<T>();
        let name = full.rsplit("::").next().unwrap_or(full);
        Self::named(name, mode)
    }

    /// Create a core with an explicit name
    pub fn named(name: impl Into<String>, mode: ExecMode) -> Self {
        Self {
            id: NodeId::new(),
            name: name.into(),
            mode,
            progress: 0,
            batch_size: 1,
            state_attrs: vec!["name".to_string(), "progress".to_string()],
        }
    }

    /// Override the default name, builder style
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    /// Units produced or processed so far
    pub fn progress(&self) -> u64 {
        self.progress
    }

    /// Record `units` more units of completed work
    pub fn advance(&mut self, units: u64) {
        self.progress += units;
    }

    pub(crate) fn reset_progress(&mut self) {
        self.progress = 0;
    }

    /// Batch size for the current run. Injected by the flow before `open`;
    /// defaults to 1.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn set_batch_size(&mut self, batch_size: usize) {
        self.batch_size = batch_size.max(1);
    }

    /// Register an attribute as part of this node's resumable state.
    /// Additive and idempotent: re-registering is a no-op.
    pub fn register_state_attr(&mut self, attr: impl Into<String>) {
        let attr = attr.into();
        if !self.state_attrs.iter().any(|a| *a == attr) {
            self.state_attrs.push(attr);
        }
    }

    /// Attribute names captured by [`Node::snapshot`]
    pub fn state_attrs(&self) -> &[String] {
        &self.state_attrs
    }

    fn builtin_state_value(&self, attr: &str) -> Option<Value> {
        match attr {
            "name" => Some(Value::from(self.name.clone())),
            "progress" => Some(Value::from(self.progress)),
            _ => None,
        }
    }

    fn apply_builtin_state(&mut self, attr: &str, value: &Value) -> FlowResult<()> {
        match attr {
            "name" => {
                self.name = value
                    .as_str()
                    .ok_or_else(|| FlowError::config("state attribute 'name' must be a string"))?
                    .to_string();
                Ok(())
            }
            "progress" => {
                self.progress = value.as_u64().ok_or_else(|| {
                    FlowError::config("state attribute 'progress' must be a non-negative integer")
                })?;
                Ok(())
            }
            other => Err(FlowError::config(format!(
                "node '{}' has no state attribute '{other}'",
                self.name
            ))),
        }
    }
}

/// Behavior shared by every node role
#[async_trait]
pub trait Node: Send {
    fn core(&self) -> &NodeCore;

    fn core_mut(&mut self) -> &mut NodeCore;

    /// Acquire whatever resources the node needs before the run
    async fn open(&mut self) -> FlowResult<()> {
        Ok(())
    }

    /// Release resources after the run
    async fn close(&mut self) -> FlowResult<()> {
        Ok(())
    }

    /// Current value of one registered state attribute. Implementations with
    /// custom attributes answer for those and fall back to the core for
    /// `name` and `progress`.
    fn state_value(&self, attr: &str) -> Option<Value> {
        self.core().builtin_state_value(attr)
    }

    /// Apply one restored attribute value. Must accept every attribute the
    /// node registers; unknown attributes are a configuration error.
    fn apply_state(&mut self, attr: &str, value: &Value) -> FlowResult<()> {
        self.core_mut().apply_builtin_state(attr, value)
    }

    /// Capture the node's resumable state: registered attributes only, never
    /// edges or runtime handles.
    fn snapshot(&self) -> StateMap {
        self.core()
            .state_attrs()
            .iter()
            .filter_map(|attr| self.state_value(attr).map(|value| (attr.clone(), value)))
            .collect()
    }

    /// Replace attribute values from a captured snapshot
    fn restore_state(&mut self, state: &StateMap) -> FlowResult<()> {
        for (attr, value) in state {
            self.apply_state(attr, value)?;
        }
        Ok(())
    }
}

/// A source of unit contexts
#[async_trait]
pub trait Producer: Node {
    /// Produce the next unit, or [`FlowError::EndOfStream`] once exhausted
    async fn next(&mut self) -> FlowResult<Context>;

    /// Produce up to `batch_size` units packed into one batched context.
    /// Returns a partial batch when the stream ends mid-fill and signals
    /// end-of-stream only when zero units were produced.
    async fn next_batch(&mut self) -> FlowResult<Context> {
        let want = self.core().batch_size();
        let mut batch = Context::new();
        for _ in 0..want {
            match self.next().await {
                Ok(unit) => batch.push_unit(unit),
                Err(FlowError::EndOfStream) => break,
                Err(err) => return Err(err),
            }
        }
        if batch.unit_count() == 0 {
            return Err(FlowError::EndOfStream);
        }
        Ok(batch)
    }

    /// Replay the source to the recorded progress position: resets the
    /// progress counter, then calls [`Producer::next`] exactly that many
    /// times. Assumes a deterministic source; that is the caller's
    /// responsibility, not an engine guarantee.
    async fn replay(&mut self) -> FlowResult<()> {
        let target = self.core().progress();
        self.core_mut().reset_progress();
        for _ in 0..target {
            self.next().await?;
        }
        Ok(())
    }

    /// Restore captured state, then replay the source to the restored
    /// progress position.
    async fn restore(&mut self, state: &StateMap) -> FlowResult<()> {
        self.restore_state(state)?;
        self.replay().await
    }
}

/// A one-context-in, one-context-out transform
#[async_trait]
pub trait Processor: Node {
    /// Preferred compute device, declared at construction
    fn device(&self) -> Device;

    /// Change the device preference. Values are validated by
    /// [`Device::from_str`] on the way in, so every reachable value is legal.
    fn set_device(&mut self, device: Device);

    /// Transform one unit context
    async fn process(&mut self, _ctx: Context) -> FlowResult<Context> {
        Err(FlowError::Unimplemented("process"))
    }

    /// Transform one batched context
    async fn process_batch(&mut self, _ctx: Context) -> FlowResult<Context> {
        Err(FlowError::Unimplemented("process_batch"))
    }
}

/// A terminal sink; side effects only, no downstream output
#[async_trait]
pub trait Consumer: Node {
    /// Consume one unit context
    async fn consume(&mut self, ctx: &Context) -> FlowResult<()>;

    /// Consume one batched context
    async fn consume_batch(&mut self, _ctx: &Context) -> FlowResult<()> {
        Err(FlowError::Unimplemented("consume_batch"))
    }
}
