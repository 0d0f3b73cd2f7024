//! Composite ownership over a wired chain of nodes
//!
//! A [`NodeGroup`] claims the nodes between an entry and an exit as one
//! composite. Claimed members keep their wiring but give up the right to be
//! wired individually from outside; upstream edges bind to the group's entry
//! and downstream edges bind from its exit, through the group's own wiring
//! operations.

use std::collections::{HashSet, VecDeque};

use crate::error::{FlowError, FlowResult};
use crate::handle::NodeHandle;
use crate::node::NodeId;

/// Exclusive edge owner for a claimed entry-to-exit chain
#[derive(Debug)]
pub struct NodeGroup {
    name: String,
    entry: NodeHandle,
    exit: NodeHandle,
    members: Vec<NodeHandle>,
}

impl NodeGroup {
    /// Claim every node on the parent paths from `exit` back to `entry`,
    /// both ends included.
    ///
    /// Fails when `entry` is not upstream of `exit` or when any member is
    /// already owned by another group; a failed claim leaves no node
    /// claimed.
    pub fn claim(
        name: impl Into<String>,
        entry: &NodeHandle,
        exit: &NodeHandle,
    ) -> FlowResult<Self> {
        let name = name.into();
        let mut members: Vec<NodeHandle> = Vec::new();
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut queue: VecDeque<NodeHandle> = VecDeque::new();
        let mut found_entry = false;

        seen.insert(exit.id());
        queue.push_back(exit.clone());
        while let Some(node) = queue.pop_front() {
            members.push(node.clone());
            if node.id() == entry.id() {
                // the walk stops at the entry; its own parents stay outside
                found_entry = true;
                continue;
            }
            for parent in node.parents() {
                if seen.insert(parent.id()) {
                    queue.push_back(parent);
                }
            }
        }

        if !found_entry {
            return Err(FlowError::config(format!(
                "'{}' is not upstream of '{}'; nothing to claim for group '{name}'",
                entry.name(),
                exit.name()
            )));
        }
        for member in &members {
            if member.is_grouped() {
                return Err(FlowError::config(format!(
                    "'{}' is already owned by a group and cannot join '{name}'",
                    member.name()
                )));
            }
        }
        for member in &members {
            member.claim_for_group(&name)?;
        }
        log::debug!("group '{name}' claimed {} node(s)", members.len());

        Ok(Self {
            name,
            entry: entry.clone(),
            exit: exit.clone(),
            members,
        })
    }

    /// Bind upstream parents to the group's entry node
    pub fn wire(&self, parents: &[&NodeHandle]) -> FlowResult<()> {
        self.entry.wire_exempt(parents, &[self.entry.id()])
    }

    /// Bind a downstream node to the group's exit node
    pub fn wire_into(&self, child: &NodeHandle) -> FlowResult<()> {
        child.wire_exempt(&[&self.exit], &[self.exit.id()])
    }

    /// Dissolve the group, making its members individually wirable again
    pub fn release(self) {
        for member in &self.members {
            member.release_from_group();
        }
        log::debug!(
            "group '{}' released {} node(s)",
            self.name,
            self.members.len()
        );
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self) -> &NodeHandle {
        &self.entry
    }

    pub fn exit(&self) -> &NodeHandle {
        &self.exit
    }

    pub fn members(&self) -> &[NodeHandle] {
        &self.members
    }
}
