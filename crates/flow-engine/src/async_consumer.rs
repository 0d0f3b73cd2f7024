//! Bounded-concurrency async consumption
//!
//! An [`AsyncConsumerNode`] wraps an [`AsyncConsumer`] implementation with a
//! task queue bounded by the concurrency threshold. Units are submitted one
//! at a time; once the pending count reaches the threshold the queue is
//! drained, all pending consume calls run concurrently, and the registered
//! callback receives the results ordered by submission (never completion).
//! This node is terminal and is driven externally through [`Self::submit`];
//! it never takes part in the synchronous run loop.

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::mpsc;

use crate::context::Context;
use crate::error::{FlowError, FlowResult};
use crate::handle::NodeHandle;
use crate::node::{ExecMode, Node, NodeCore};

/// Receives one fully gathered, submission-ordered result batch
pub type GatherCallback = Box<dyn FnMut(Vec<Context>) + Send>;

/// The per-unit consume behavior run concurrently during a gather.
///
/// `consume` takes `&self` because up to `concurrency` calls are in flight at
/// once; implementations keep per-call state in the unit context or behind
/// their own synchronization.
#[async_trait]
pub trait AsyncConsumer: Send {
    /// Consume one unit, returning its result context
    async fn consume(&self, unit: Context) -> FlowResult<Context>;

    /// Acquire resources before the first submission
    async fn open(&mut self) -> FlowResult<()> {
        Ok(())
    }

    /// Release resources once the driver is done
    async fn close(&mut self) -> FlowResult<()> {
        Ok(())
    }
}

/// Object-safe driving surface used by [`NodeHandle`] dispatch
#[async_trait]
pub(crate) trait AsyncSink: Node {
    async fn submit(&mut self, unit: Context) -> FlowResult<()>;
    async fn drain(&mut self) -> FlowResult<()>;
    fn has_pending(&self) -> bool;
}

/// Terminal node gathering submissions in bounded concurrent batches
pub struct AsyncConsumerNode<C: AsyncConsumer> {
    core: NodeCore,
    inner: C,
    threshold: usize,
    pending: usize,
    queue_tx: mpsc::Sender<Context>,
    queue_rx: mpsc::Receiver<Context>,
    callback: Option<GatherCallback>,
}

impl<C: AsyncConsumer> AsyncConsumerNode<C> {
    /// Wrap a consumer with a concurrency threshold. A threshold of zero is
    /// treated as one.
    pub fn new(inner: C, threshold: usize) -> Self {
        let threshold = threshold.max(1);
        let (queue_tx, queue_rx) = mpsc::channel(threshold);
        Self {
            core: NodeCore::for_type::<C>(ExecMode::Batch),
            inner,
            threshold,
            pending: 0,
            queue_tx,
            queue_rx,
            callback: None,
        }
    }

    /// Register the callback invoked once per gather with the full ordered
    /// result sequence
    pub fn with_callback(mut self, callback: impl FnMut(Vec<Context>) + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// The configured concurrency threshold
    pub fn concurrency(&self) -> usize {
        self.threshold
    }

    /// Units submitted but not yet gathered
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Enqueue one unit; runs a gather cycle when the pending count reaches
    /// the threshold.
    pub async fn submit(&mut self, unit: Context) -> FlowResult<()> {
        self.queue_tx
            .send(unit)
            .await
            .map_err(|_| FlowError::task("async consumer queue closed"))?;
        self.pending += 1;
        if self.pending >= self.threshold {
            self.gather().await?;
        }
        Ok(())
    }

    /// Gather whatever is pending, even below the threshold
    pub async fn drain(&mut self) -> FlowResult<()> {
        if self.pending > 0 {
            self.gather().await?;
        }
        Ok(())
    }

    /// Whether submitted units are waiting for a gather
    pub fn has_pending(&self) -> bool {
        self.pending > 0
    }

    /// Convert into a wirable handle. Driving continues through
    /// [`NodeHandle::submit`] / [`NodeHandle::drain`].
    pub fn into_handle(self) -> NodeHandle
    where
        C: 'static,
    {
        NodeHandle::async_sink(Box::new(self))
    }

    async fn gather(&mut self) -> FlowResult<()> {
        let mut units = Vec::with_capacity(self.pending);
        while units.len() < self.pending {
            match self.queue_rx.try_recv() {
                Ok(unit) => units.push(unit),
                Err(_) => break,
            }
        }
        self.pending = 0;

        let tasks: Vec<_> = units
            .into_iter()
            .map(|unit| self.inner.consume(unit))
            .collect();
        let task_count = tasks.len();
        let results = join_all(tasks).await;

        let mut ordered = Vec::with_capacity(task_count);
        for result in results {
            ordered.push(result?);
        }
        self.core.advance(ordered.len() as u64);
        log::debug!(
            "gathered {} task(s) on '{}'",
            ordered.len(),
            self.core.name()
        );
        if let Some(callback) = self.callback.as_mut() {
            callback(ordered);
        }
        Ok(())
    }
}

#[async_trait]
impl<C: AsyncConsumer> Node for AsyncConsumerNode<C> {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    async fn open(&mut self) -> FlowResult<()> {
        self.inner.open().await
    }

    async fn close(&mut self) -> FlowResult<()> {
        self.inner.close().await
    }
}

#[async_trait]
impl<C: AsyncConsumer + 'static> AsyncSink for AsyncConsumerNode<C> {
    async fn submit(&mut self, unit: Context) -> FlowResult<()> {
        AsyncConsumerNode::submit(self, unit).await
    }

    async fn drain(&mut self) -> FlowResult<()> {
        AsyncConsumerNode::drain(self).await
    }

    fn has_pending(&self) -> bool {
        AsyncConsumerNode::has_pending(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Echoes its unit after an optional per-unit delay
    struct SlowEcho;

    #[async_trait]
    impl AsyncConsumer for SlowEcho {
        async fn consume(&self, unit: Context) -> FlowResult<Context> {
            if let Some(ms) = unit.get("delay_ms").and_then(|v| v.as_u64()) {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            Ok(unit)
        }
    }

    /// Fails on any unit carrying a "poison" field
    struct Picky;

    #[async_trait]
    impl AsyncConsumer for Picky {
        async fn consume(&self, unit: Context) -> FlowResult<Context> {
            if unit.contains("poison") {
                return Err(FlowError::task("poisoned unit"));
            }
            Ok(unit)
        }
    }

    fn recording_node<C: AsyncConsumer>(
        inner: C,
        threshold: usize,
    ) -> (AsyncConsumerNode<C>, Arc<Mutex<Vec<Vec<Context>>>>) {
        let batches: Arc<Mutex<Vec<Vec<Context>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = batches.clone();
        let node = AsyncConsumerNode::new(inner, threshold)
            .with_callback(move |results| sink.lock().unwrap().push(results));
        (node, batches)
    }

    fn unit(i: u64, delay_ms: u64) -> Context {
        Context::new()
            .with("i", json!(i))
            .with("delay_ms", json!(delay_ms))
    }

    #[tokio::test]
    async fn test_threshold_triggers_one_ordered_gather() {
        let (mut node, batches) = recording_node(SlowEcho, 3);

        // later submissions finish sooner; order must still match submission
        node.submit(unit(0, 30)).await.unwrap();
        node.submit(unit(1, 10)).await.unwrap();
        assert!(node.has_pending());
        assert!(batches.lock().unwrap().is_empty());

        node.submit(unit(2, 0)).await.unwrap();

        let batches = batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        let order: Vec<u64> = batches[0]
            .iter()
            .map(|ctx| ctx.get("i").and_then(|v| v.as_u64()).unwrap())
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert!(!node.has_pending());
        assert_eq!(node.core().progress(), 3);
    }

    #[tokio::test]
    async fn test_below_threshold_stays_pending() {
        let (mut node, batches) = recording_node(SlowEcho, 3);

        node.submit(unit(0, 0)).await.unwrap();
        node.submit(unit(1, 0)).await.unwrap();

        assert_eq!(node.pending(), 2);
        assert!(batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_drain_flushes_partial_batch() {
        let (mut node, batches) = recording_node(SlowEcho, 4);

        node.submit(unit(0, 0)).await.unwrap();
        node.submit(unit(1, 0)).await.unwrap();
        node.drain().await.unwrap();

        assert!(!node.has_pending());
        assert_eq!(batches.lock().unwrap().len(), 1);
        assert_eq!(batches.lock().unwrap()[0].len(), 2);

        // draining an empty queue is a no-op
        node.drain().await.unwrap();
        assert_eq!(batches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_task_failure_aborts_gather() {
        let (mut node, batches) = recording_node(Picky, 2);

        node.submit(Context::new().with("i", json!(0))).await.unwrap();
        let err = node
            .submit(Context::new().with("poison", json!(true)))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("poisoned unit"));
        assert!(batches.lock().unwrap().is_empty());
        assert!(!node.has_pending());
    }

    #[tokio::test]
    async fn test_driving_through_a_handle() {
        let (node, batches) = recording_node(SlowEcho, 2);
        let handle = node.into_handle();

        handle.submit(unit(0, 0)).await.unwrap();
        assert!(handle.has_pending().await);
        handle.submit(unit(1, 0)).await.unwrap();
        assert!(!handle.has_pending().await);

        handle.submit(unit(2, 0)).await.unwrap();
        handle.drain().await.unwrap();

        let batches = batches.lock().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].len(), 1);
    }

    #[tokio::test]
    async fn test_threshold_zero_behaves_as_one() {
        let (mut node, batches) = recording_node(SlowEcho, 0);
        assert_eq!(node.concurrency(), 1);

        node.submit(unit(0, 0)).await.unwrap();
        assert_eq!(batches.lock().unwrap().len(), 1);
    }
}
