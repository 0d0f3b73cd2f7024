//! Topological ordering of flow graphs
//!
//! [`GraphEngine`] walks every node reachable from the producer and consumer
//! seed sets, then orders them so that each node appears after all of its
//! parents. Ordering is deterministic: nodes with no mutual dependency keep
//! their discovery order, which itself follows seed order and wiring order.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{FlowError, FlowResult};
use crate::handle::NodeHandle;
use crate::node::{NodeId, NodeRole};

/// Dependency-ordered view over a wired graph
#[derive(Debug)]
pub struct GraphEngine {
    order: Vec<NodeHandle>,
}

impl GraphEngine {
    /// Discover and order the graph spanned by the given seed sets.
    ///
    /// Fails when a producer seed is not a producer node, when a consumer
    /// seed is not a consumer node, when nothing is reachable, or when the
    /// wiring contains a cycle.
    pub fn new(producers: &[NodeHandle], consumers: &[NodeHandle]) -> FlowResult<Self> {
        for handle in producers {
            if handle.role() != NodeRole::Producer {
                return Err(FlowError::graph(format!(
                    "'{}' was seeded as a producer but has role {}",
                    handle.name(),
                    handle.role()
                )));
            }
        }
        for handle in consumers {
            if handle.role() != NodeRole::Consumer {
                return Err(FlowError::graph(format!(
                    "'{}' was seeded as a consumer but has role {}",
                    handle.name(),
                    handle.role()
                )));
            }
        }

        let discovered = discover(producers, consumers);
        if discovered.is_empty() {
            return Err(FlowError::graph("flow graph is empty"));
        }
        let order = topo_sort(&discovered)?;
        log::debug!(
            "ordered {} node(s): {}",
            order.len(),
            order
                .iter()
                .map(NodeHandle::name)
                .collect::<Vec<_>>()
                .join(" -> ")
        );
        Ok(Self { order })
    }

    /// Nodes in dependency order, parents before children
    pub fn sorted(&self) -> &[NodeHandle] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Breadth-first walk over parents and children from both seed sets,
/// deduplicated by node identity
fn discover(producers: &[NodeHandle], consumers: &[NodeHandle]) -> Vec<NodeHandle> {
    let mut seen: HashSet<NodeId> = HashSet::new();
    let mut order: Vec<NodeHandle> = Vec::new();
    let mut queue: VecDeque<NodeHandle> = VecDeque::new();

    for seed in producers.iter().chain(consumers) {
        if seen.insert(seed.id()) {
            order.push(seed.clone());
            queue.push_back(seed.clone());
        }
    }
    while let Some(node) = queue.pop_front() {
        for neighbor in node.parents().into_iter().chain(node.children()) {
            if seen.insert(neighbor.id()) {
                order.push(neighbor.clone());
                queue.push_back(neighbor);
            }
        }
    }
    order
}

/// Kahn's algorithm over the discovered nodes. The ready queue is seeded and
/// drained in discovery order, which keeps the result stable across runs.
fn topo_sort(discovered: &[NodeHandle]) -> FlowResult<Vec<NodeHandle>> {
    let index: HashMap<NodeId, usize> = discovered
        .iter()
        .enumerate()
        .map(|(position, node)| (node.id(), position))
        .collect();

    let mut in_degree = vec![0usize; discovered.len()];
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); discovered.len()];
    for (child_position, node) in discovered.iter().enumerate() {
        for parent in node.parents() {
            if let Some(&parent_position) = index.get(&parent.id()) {
                in_degree[child_position] += 1;
                adjacency[parent_position].push(child_position);
            }
        }
    }

    let mut ready: VecDeque<usize> = (0..discovered.len())
        .filter(|&position| in_degree[position] == 0)
        .collect();
    let mut order = Vec::with_capacity(discovered.len());
    let mut ordered_ids: HashSet<NodeId> = HashSet::new();
    while let Some(position) = ready.pop_front() {
        order.push(discovered[position].clone());
        ordered_ids.insert(discovered[position].id());
        for &child_position in &adjacency[position] {
            in_degree[child_position] -= 1;
            if in_degree[child_position] == 0 {
                ready.push_back(child_position);
            }
        }
    }

    if order.len() != discovered.len() {
        let stuck: Vec<&str> = discovered
            .iter()
            .filter(|node| !ordered_ids.contains(&node.id()))
            .map(NodeHandle::name)
            .collect();
        return Err(FlowError::graph(format!(
            "cycle detected involving: {}",
            stuck.join(", ")
        )));
    }
    Ok(order)
}
