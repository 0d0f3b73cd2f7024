//! Shared node handles and call-style edge wiring
//!
//! A [`NodeHandle`] wraps a role implementation behind an `Arc` so the same
//! node can be referenced by its children, the graph engine, and the flow at
//! once. Parent links are strong, child links weak; wiring state sits behind
//! its own lock so graph construction and traversal never contend with a
//! running node body.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::async_consumer::AsyncSink;
use crate::context::Context;
use crate::error::{FlowError, FlowResult};
use crate::node::{Consumer, Node, NodeId, NodeRole, Producer, Processor, StateMap};

/// Edge bookkeeping for one node
struct Links {
    /// Upstream nodes; `None` until bound exactly once
    parents: Option<Vec<NodeHandle>>,
    /// Downstream nodes; `None` for leaf roles, which never take children
    children: Option<Vec<Weak<NodeCell>>>,
    /// Set once the node is claimed by a group; claimed nodes cannot be
    /// rewired from outside that group
    grouped: bool,
}

/// The role implementation behind a handle
pub(crate) enum NodeBody {
    Producer(Box<dyn Producer>),
    Processor(Box<dyn Processor>),
    Consumer(Box<dyn Consumer>),
    Async(Box<dyn AsyncSink>),
}

impl NodeBody {
    fn as_node(&self) -> &dyn Node {
        match self {
            Self::Producer(n) => n.as_ref(),
            Self::Processor(n) => n.as_ref(),
            Self::Consumer(n) => n.as_ref(),
            Self::Async(n) => n.as_ref(),
        }
    }

    fn as_node_mut(&mut self) -> &mut dyn Node {
        match self {
            Self::Producer(n) => n.as_mut(),
            Self::Processor(n) => n.as_mut(),
            Self::Consumer(n) => n.as_mut(),
            Self::Async(n) => n.as_mut(),
        }
    }
}

pub(crate) struct NodeCell {
    id: NodeId,
    role: NodeRole,
    name: String,
    links: Mutex<Links>,
    body: AsyncMutex<NodeBody>,
}

/// Cheaply clonable reference to a wired node.
///
/// Equality and hashing are identity-based: a handle equals only handles to
/// the same node, never a structurally similar one.
#[derive(Clone)]
pub struct NodeHandle {
    cell: Arc<NodeCell>,
}

impl NodeHandle {
    /// Wrap a producer implementation
    pub fn producer(node: impl Producer + 'static) -> Self {
        Self::wrap(NodeRole::Producer, NodeBody::Producer(Box::new(node)))
    }

    /// Wrap a processor implementation
    pub fn processor(node: impl Processor + 'static) -> Self {
        Self::wrap(NodeRole::Processor, NodeBody::Processor(Box::new(node)))
    }

    /// Wrap a consumer implementation
    pub fn consumer(node: impl Consumer + 'static) -> Self {
        Self::wrap(NodeRole::Consumer, NodeBody::Consumer(Box::new(node)))
    }

    pub(crate) fn async_sink(role_body: Box<dyn AsyncSink>) -> Self {
        Self::wrap(NodeRole::AsyncConsumer, NodeBody::Async(role_body))
    }

    fn wrap(role: NodeRole, body: NodeBody) -> Self {
        let core = body.as_node().core();
        let (id, name) = (core.id(), core.name().to_string());
        let children = if role.is_leaf() { None } else { Some(Vec::new()) };
        Self {
            cell: Arc::new(NodeCell {
                id,
                role,
                name,
                links: Mutex::new(Links {
                    parents: None,
                    children,
                    grouped: false,
                }),
                body: AsyncMutex::new(body),
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.cell.id
    }

    pub fn role(&self) -> NodeRole {
        self.cell.role
    }

    /// Name captured at wrap time
    pub fn name(&self) -> &str {
        &self.cell.name
    }

    /// Bind this node's parents, exactly once.
    ///
    /// Fails when the node already has parents, when it is a producer (no
    /// inputs by definition), when any parent is a leaf role, or when either
    /// end is owned by a group.
    pub fn wire(&self, parents: &[&NodeHandle]) -> FlowResult<()> {
        self.wire_exempt(parents, &[])
    }

    /// Wiring used by group delegation: ids in `exempt` skip the
    /// group-ownership check, everything else is enforced as in [`Self::wire`].
    pub(crate) fn wire_exempt(&self, parents: &[&NodeHandle], exempt: &[NodeId]) -> FlowResult<()> {
        if self.role() == NodeRole::Producer {
            return Err(FlowError::config(format!(
                "producer '{}' cannot take parents",
                self.name()
            )));
        }
        {
            let links = self.cell.links.lock();
            if links.grouped && !exempt.contains(&self.id()) {
                return Err(FlowError::config(format!(
                    "node '{}' is owned by a group and cannot be rewired",
                    self.name()
                )));
            }
            if links.parents.is_some() {
                return Err(FlowError::config(format!(
                    "node '{}' already has parents",
                    self.name()
                )));
            }
        }
        for parent in parents {
            if parent.role().is_leaf() {
                return Err(FlowError::config(format!(
                    "{} '{}' cannot take children",
                    parent.role(),
                    parent.name()
                )));
            }
            let links = parent.cell.links.lock();
            if links.grouped && !exempt.contains(&parent.id()) {
                return Err(FlowError::config(format!(
                    "node '{}' is owned by a group and cannot be rewired",
                    parent.name()
                )));
            }
        }

        self.cell.links.lock().parents = Some(parents.iter().map(|p| (*p).clone()).collect());
        for parent in parents {
            let mut links = parent.cell.links.lock();
            if let Some(children) = links.children.as_mut() {
                children.push(Arc::downgrade(&self.cell));
            }
        }
        log::debug!(
            "wired node '{}' to {} parent(s)",
            self.name(),
            parents.len()
        );
        Ok(())
    }

    /// Ids of this node's parents, in binding order
    pub fn parent_ids(&self) -> Vec<NodeId> {
        self.parents().iter().map(NodeHandle::id).collect()
    }

    /// Number of live children
    pub fn child_count(&self) -> usize {
        self.children().len()
    }

    /// Whether the node has been claimed by a group
    pub fn is_grouped(&self) -> bool {
        self.cell.links.lock().grouped
    }

    pub(crate) fn parents(&self) -> Vec<NodeHandle> {
        self.cell
            .links
            .lock()
            .parents
            .clone()
            .unwrap_or_default()
    }

    pub(crate) fn children(&self) -> Vec<NodeHandle> {
        match &self.cell.links.lock().children {
            Some(children) => children
                .iter()
                .filter_map(Weak::upgrade)
                .map(|cell| NodeHandle { cell })
                .collect(),
            None => Vec::new(),
        }
    }

    pub(crate) fn claim_for_group(&self, group: &str) -> FlowResult<()> {
        let mut links = self.cell.links.lock();
        if links.grouped {
            return Err(FlowError::config(format!(
                "node '{}' is already owned by a group and cannot join '{group}'",
                self.name()
            )));
        }
        links.grouped = true;
        Ok(())
    }

    pub(crate) fn release_from_group(&self) {
        self.cell.links.lock().grouped = false;
    }

    /// Inject the run's batch size before opening
    pub async fn set_batch_size(&self, batch_size: usize) {
        self.cell
            .body
            .lock()
            .await
            .as_node_mut()
            .core_mut()
            .set_batch_size(batch_size);
    }

    /// Open the node's resources
    pub async fn open(&self) -> FlowResult<()> {
        let mut body = self.cell.body.lock().await;
        body.as_node_mut().open().await
    }

    /// Close the node's resources
    pub async fn close(&self) -> FlowResult<()> {
        let mut body = self.cell.body.lock().await;
        body.as_node_mut().close().await
    }

    /// Units produced or processed so far
    pub async fn progress(&self) -> u64 {
        self.cell.body.lock().await.as_node().core().progress()
    }

    /// Capture the node's registered state attributes
    pub async fn snapshot(&self) -> StateMap {
        self.cell.body.lock().await.as_node().snapshot()
    }

    /// Restore captured state; producers then replay their source to the
    /// restored progress position.
    pub async fn restore(&self, state: &StateMap) -> FlowResult<()> {
        let mut body = self.cell.body.lock().await;
        match &mut *body {
            NodeBody::Producer(producer) => producer.restore(state).await,
            other => other.as_node_mut().restore_state(state),
        }
    }

    /// Submit one unit to an async consumer; gathers at the concurrency
    /// threshold. Fails on any other role.
    pub async fn submit(&self, unit: Context) -> FlowResult<()> {
        let mut body = self.cell.body.lock().await;
        match &mut *body {
            NodeBody::Async(sink) => sink.submit(unit).await,
            _ => Err(FlowError::config(format!(
                "node '{}' is not an async consumer",
                self.name()
            ))),
        }
    }

    /// Gather whatever an async consumer still has pending, below threshold
    /// or not. Fails on any other role.
    pub async fn drain(&self) -> FlowResult<()> {
        let mut body = self.cell.body.lock().await;
        match &mut *body {
            NodeBody::Async(sink) => sink.drain().await,
            _ => Err(FlowError::config(format!(
                "node '{}' is not an async consumer",
                self.name()
            ))),
        }
    }

    /// Whether an async consumer holds submitted-but-ungathered units
    pub async fn has_pending(&self) -> bool {
        match &*self.cell.body.lock().await {
            NodeBody::Async(sink) => sink.has_pending(),
            _ => false,
        }
    }

    pub(crate) async fn produce_next(&self) -> FlowResult<Context> {
        let mut body = self.cell.body.lock().await;
        match &mut *body {
            NodeBody::Producer(producer) => producer.next().await,
            _ => Err(FlowError::graph(format!(
                "node '{}' is not a producer",
                self.name()
            ))),
        }
    }

    pub(crate) async fn produce_batch(&self) -> FlowResult<Context> {
        let mut body = self.cell.body.lock().await;
        match &mut *body {
            NodeBody::Producer(producer) => producer.next_batch().await,
            _ => Err(FlowError::graph(format!(
                "node '{}' is not a producer",
                self.name()
            ))),
        }
    }

    pub(crate) async fn process(&self, ctx: Context) -> FlowResult<Context> {
        let mut body = self.cell.body.lock().await;
        match &mut *body {
            NodeBody::Processor(processor) => processor.process(ctx).await,
            _ => Err(FlowError::graph(format!(
                "node '{}' is not a processor",
                self.name()
            ))),
        }
    }

    pub(crate) async fn process_batch(&self, ctx: Context) -> FlowResult<Context> {
        let mut body = self.cell.body.lock().await;
        match &mut *body {
            NodeBody::Processor(processor) => processor.process_batch(ctx).await,
            _ => Err(FlowError::graph(format!(
                "node '{}' is not a processor",
                self.name()
            ))),
        }
    }

    pub(crate) async fn consume(&self, ctx: &Context) -> FlowResult<()> {
        let mut body = self.cell.body.lock().await;
        match &mut *body {
            NodeBody::Consumer(consumer) => consumer.consume(ctx).await,
            _ => Err(FlowError::graph(format!(
                "node '{}' is not a consumer",
                self.name()
            ))),
        }
    }

    pub(crate) async fn consume_batch(&self, ctx: &Context) -> FlowResult<()> {
        let mut body = self.cell.body.lock().await;
        match &mut *body {
            NodeBody::Consumer(consumer) => consumer.consume_batch(ctx).await,
            _ => Err(FlowError::graph(format!(
                "node '{}' is not a consumer",
                self.name()
            ))),
        }
    }
}

impl PartialEq for NodeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.cell.id == other.cell.id
    }
}

impl Eq for NodeHandle {}

impl Hash for NodeHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.cell.id.hash(state);
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("id", &self.cell.id)
            .field("role", &self.cell.role)
            .field("name", &self.cell.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ExecMode, NodeCore};
    use async_trait::async_trait;
    use serde_json::json;

    struct OneShot {
        core: NodeCore,
        done: bool,
    }

    impl OneShot {
        fn handle(name: &str) -> NodeHandle {
            NodeHandle::producer(Self {
                core: NodeCore::named(name, ExecMode::Batch),
                done: false,
            })
        }
    }

    #[async_trait]
    impl Node for OneShot {
        fn core(&self) -> &NodeCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut NodeCore {
            &mut self.core
        }
    }

    #[async_trait]
    impl Producer for OneShot {
        async fn next(&mut self) -> FlowResult<Context> {
            if self.done {
                return Err(FlowError::EndOfStream);
            }
            self.done = true;
            self.core.advance(1);
            Ok(Context::new().with("v", json!(1)))
        }
    }

    struct Rename {
        core: NodeCore,
    }

    impl Rename {
        fn handle(name: &str) -> NodeHandle {
            NodeHandle::processor(Self {
                core: NodeCore::named(name, ExecMode::Batch),
            })
        }
    }

    #[async_trait]
    impl Node for Rename {
        fn core(&self) -> &NodeCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut NodeCore {
            &mut self.core
        }
    }

    #[async_trait]
    impl Processor for Rename {
        fn device(&self) -> crate::node::Device {
            crate::node::Device::Cpu
        }

        fn set_device(&mut self, _device: crate::node::Device) {}

        async fn process(&mut self, ctx: Context) -> FlowResult<Context> {
            Ok(ctx)
        }
    }

    struct Sink {
        core: NodeCore,
    }

    impl Sink {
        fn handle(name: &str) -> NodeHandle {
            NodeHandle::consumer(Self {
                core: NodeCore::named(name, ExecMode::Batch),
            })
        }
    }

    #[async_trait]
    impl Node for Sink {
        fn core(&self) -> &NodeCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut NodeCore {
            &mut self.core
        }
    }

    #[async_trait]
    impl Consumer for Sink {
        async fn consume(&mut self, _ctx: &Context) -> FlowResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_wire_records_both_sides() {
        let source = OneShot::handle("source");
        let stage = Rename::handle("stage");
        let sink = Sink::handle("sink");

        stage.wire(&[&source]).unwrap();
        sink.wire(&[&stage]).unwrap();

        assert_eq!(stage.parent_ids(), vec![source.id()]);
        assert_eq!(source.child_count(), 1);
        assert_eq!(stage.child_count(), 1);
        assert_eq!(sink.parent_ids(), vec![stage.id()]);
    }

    #[test]
    fn test_rebinding_fails() {
        let source = OneShot::handle("source");
        let other = OneShot::handle("other");
        let stage = Rename::handle("stage");

        stage.wire(&[&source]).unwrap();
        let err = stage.wire(&[&other]).unwrap_err();
        assert!(err.to_string().contains("already has parents"));
        // the failed bind must not have touched the parent side
        assert_eq!(other.child_count(), 0);
    }

    #[test]
    fn test_consumer_never_acquires_children() {
        let sink = Sink::handle("sink");
        let stage = Rename::handle("stage");

        let err = stage.wire(&[&sink]).unwrap_err();
        assert!(err.to_string().contains("cannot take children"));
        assert_eq!(sink.child_count(), 0);
    }

    #[test]
    fn test_producer_cannot_take_parents() {
        let a = OneShot::handle("a");
        let b = OneShot::handle("b");
        assert!(a.wire(&[&b]).is_err());
    }

    #[test]
    fn test_identity_equality() {
        let a = OneShot::handle("same-name");
        let b = OneShot::handle("same-name");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());

        let mut set = std::collections::HashSet::new();
        set.insert(a.clone());
        set.insert(b.clone());
        set.insert(a.clone());
        assert_eq!(set.len(), 2);
    }

    #[tokio::test]
    async fn test_role_dispatch_through_handle() {
        let source = OneShot::handle("source");
        let unit = source.produce_next().await.unwrap();
        assert_eq!(unit.get("v"), Some(&json!(1)));
        assert_eq!(source.progress().await, 1);

        // wrong role
        assert!(source.process(Context::new()).await.is_err());
        assert!(source.submit(Context::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_snapshot_and_restore_through_handle() {
        let source = OneShot::handle("source");
        source.produce_next().await.unwrap();

        let state = source.snapshot().await;
        assert_eq!(state["progress"], json!(1));

        let rebuilt = OneShot::handle("source");
        rebuilt.restore(&state).await.unwrap();
        assert_eq!(rebuilt.progress().await, 1);
    }
}
