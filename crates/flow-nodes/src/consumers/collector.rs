//! In-memory collecting consumer

use std::sync::Arc;

use async_trait::async_trait;
use flow_engine::{Consumer, Context, ExecMode, FlowResult, Node, NodeCore};
use parking_lot::Mutex;

/// Consumer that stores every delivered context in a shared vector.
///
/// The sink handle stays valid after the node itself has been handed to a
/// flow, which makes this the usual way to observe flow output in tests and
/// small scripted runs.
pub struct CollectorConsumer {
    core: NodeCore,
    sink: Arc<Mutex<Vec<Context>>>,
}

impl CollectorConsumer {
    pub fn new() -> Self {
        Self {
            core: NodeCore::for_type::<Self>(ExecMode::Batch),
            sink: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared handle to the collected contexts
    pub fn sink(&self) -> Arc<Mutex<Vec<Context>>> {
        Arc::clone(&self.sink)
    }
}

impl Default for CollectorConsumer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for CollectorConsumer {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }
}

#[async_trait]
impl Consumer for CollectorConsumer {
    async fn consume(&mut self, unit: &Context) -> FlowResult<()> {
        self.sink.lock().push(unit.clone());
        self.core.advance(1);
        Ok(())
    }

    async fn consume_batch(&mut self, batch: &Context) -> FlowResult<()> {
        let units = batch.unit_count();
        self.sink.lock().push(batch.clone());
        self.core.advance(units as u64);
        Ok(())
    }
}
