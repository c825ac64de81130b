//! Operational graph: a typed multigraph derived from every other entity.
//!
//! Primarily a query surface for impact analysis (`"what depends on this
//! work item"`, `"what does this agent own"`). The store and signal layers
//! upsert into it after their own mutations; a failed graph sync is logged
//! and never propagated as an error of the originating mutation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Kind of node in the operational graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    WorkItem,
    Agent,
    Skill,
    Capability,
    Ticket,
}

/// Kind of edge in the operational graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    DependsOn,
    Owns,
    DelegatesTo,
    Consumes,
    Emits,
    Uses,
    Requires,
    Mirrors,
}

/// A node in the graph, identified by `(kind, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub kind: NodeKind,
    pub id: String,
}

impl NodeRef {
    pub fn new(kind: NodeKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }
}

/// A directed, typed edge between two nodes. Multiple edges of different
/// kinds (or the same kind from repeated delegation) may connect the same
/// pair of nodes -- hence "multigraph".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeRef,
    pub kind: EdgeKind,
    pub to: NodeRef,
}

/// In-memory operational graph. Persisted as `graph/nodes.json` +
/// `graph/edges.json` by whichever crate owns the workspace root
/// (`squad-store`, via its `persist` helper).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationalGraph {
    nodes: BTreeMap<String, NodeRef>,
    edges: Vec<Edge>,
}

impl OperationalGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(node: &NodeRef) -> String {
        format!("{:?}:{}", node.kind, node.id)
    }

    /// Idempotently inserts a node.
    pub fn upsert_node(&mut self, node: NodeRef) {
        self.nodes.insert(Self::key(&node), node);
    }

    /// Inserts an edge, upserting both endpoints first.
    pub fn upsert_edge(&mut self, from: NodeRef, kind: EdgeKind, to: NodeRef) {
        self.upsert_node(from.clone());
        self.upsert_node(to.clone());
        if !self
            .edges
            .iter()
            .any(|e| e.from == from && e.kind == kind && e.to == to)
        {
            self.edges.push(Edge { from, kind, to });
        }
    }

    /// Removes every edge touching `node` and the node itself.
    pub fn remove_node(&mut self, node: &NodeRef) {
        self.nodes.remove(&Self::key(node));
        self.edges.retain(|e| &e.from != node && &e.to != node);
    }

    /// Nodes reachable from `start` by following `kind` edges forward.
    pub fn successors(&self, start: &NodeRef, kind: EdgeKind) -> Vec<NodeRef> {
        self.edges
            .iter()
            .filter(|e| &e.from == start && e.kind == kind)
            .map(|e| e.to.clone())
            .collect()
    }

    /// Detects a dependency cycle reachable from `start` via `DependsOn`
    /// edges. Used to surface a warning; the store itself never refuses to
    /// add a cyclic dependency.
    pub fn has_cycle_from(&self, start: &NodeRef) -> bool {
        let mut stack = vec![start.clone()];
        let mut visited = std::collections::HashSet::new();
        visited.insert(Self::key(start));

        while let Some(node) = stack.pop() {
            for next in self.successors(&node, EdgeKind::DependsOn) {
                if next == *start {
                    return true;
                }
                if visited.insert(Self::key(&next)) {
                    stack.push(next);
                }
            }
        }
        false
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn to_json(&self) -> Result<(String, String)> {
        let nodes: Vec<&NodeRef> = self.nodes.values().collect();
        Ok((
            serde_json::to_string_pretty(&nodes)?,
            serde_json::to_string_pretty(&self.edges)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_edge_is_idempotent() {
        let mut g = OperationalGraph::new();
        let a = NodeRef::new(NodeKind::WorkItem, "a");
        let b = NodeRef::new(NodeKind::WorkItem, "b");
        g.upsert_edge(a.clone(), EdgeKind::DependsOn, b.clone());
        g.upsert_edge(a.clone(), EdgeKind::DependsOn, b.clone());
        assert_eq!(g.edge_count(), 1);
        assert_eq!(g.node_count(), 2);
    }

    #[test]
    fn detects_a_direct_cycle() {
        let mut g = OperationalGraph::new();
        let a = NodeRef::new(NodeKind::WorkItem, "a");
        let b = NodeRef::new(NodeKind::WorkItem, "b");
        g.upsert_edge(a.clone(), EdgeKind::DependsOn, b.clone());
        g.upsert_edge(b.clone(), EdgeKind::DependsOn, a.clone());
        assert!(g.has_cycle_from(&a));
    }

    #[test]
    fn no_cycle_in_a_simple_chain() {
        let mut g = OperationalGraph::new();
        let a = NodeRef::new(NodeKind::WorkItem, "a");
        let b = NodeRef::new(NodeKind::WorkItem, "b");
        let c = NodeRef::new(NodeKind::WorkItem, "c");
        g.upsert_edge(a.clone(), EdgeKind::DependsOn, b.clone());
        g.upsert_edge(b, EdgeKind::DependsOn, c);
        assert!(!g.has_cycle_from(&a));
    }
}
