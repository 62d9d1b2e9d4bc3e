//! Foreign-key dependency graphs.
//!
//! Nodes are pending rows (by [`RowId`]); a directed edge `from -> to`
//! means *from depends on to*: the `to` row must be flushed first. Each
//! edge carries the foreign key (or relation-id column) that caused the
//! dependency, which is what the cycle resolver inspects to decide where a
//! circular constraint can be broken.

use crate::row_manager::RowId;
use rowplan_core::{Column, ForeignKey};
use std::collections::HashMap;

/// Index of a node within one graph.
pub type NodeId = usize;

/// Index of an edge within one graph.
pub type EdgeId = usize;

/// What caused a dependency edge.
#[derive(Debug, Clone)]
pub enum DepCause {
    /// A foreign-key constraint on the dependent row's table.
    ForeignKey(ForeignKey),
    /// A relation-id column on the dependent row's table.
    RelationId(Column),
    /// A delete-then-insert replacement of the same primary key; the delete
    /// must run before the insert. Not breakable.
    Replacement,
}

impl DepCause {
    /// Whether the underlying constraint can be nulled to break a cycle.
    /// `None` for replacement edges, which have no constraint at all.
    pub fn nullable(&self) -> Option<bool> {
        match self {
            DepCause::ForeignKey(fk) => Some(fk.is_nullable()),
            DepCause::RelationId(col) => Some(!col.not_null),
            DepCause::Replacement => None,
        }
    }
}

/// A directed dependency edge.
#[derive(Debug)]
pub struct Edge {
    /// Dependent node.
    pub from: NodeId,
    /// Depended-on node; flushed first.
    pub to: NodeId,
    /// The constraint behind the dependency.
    pub cause: DepCause,
    removed: bool,
}

impl Edge {
    /// Whether the edge was removed by cycle resolution.
    pub fn is_removed(&self) -> bool {
        self.removed
    }
}

/// A dependency graph over pending rows, built fresh per flush.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<RowId>,
    node_of: HashMap<RowId, NodeId>,
    adjacency: Vec<Vec<EdgeId>>,
    edges: Vec<Edge>,
}

impl Graph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or find) the node for a row.
    pub fn add_node(&mut self, row: RowId) -> NodeId {
        if let Some(&node) = self.node_of.get(&row) {
            return node;
        }
        let node = self.nodes.len();
        self.nodes.push(row);
        self.adjacency.push(Vec::new());
        self.node_of.insert(row, node);
        node
    }

    /// Add an edge `from -> to` (adding the nodes as needed) recording the
    /// causing constraint.
    pub fn link(&mut self, from: RowId, to: RowId, cause: DepCause) -> EdgeId {
        let from = self.add_node(from);
        let to = self.add_node(to);
        let edge = self.edges.len();
        self.edges.push(Edge {
            from,
            to,
            cause,
            removed: false,
        });
        self.adjacency[from].push(edge);
        edge
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The row a node stands for.
    pub fn row_at(&self, node: NodeId) -> RowId {
        self.nodes[node]
    }

    /// Access an edge.
    pub fn edge(&self, edge: EdgeId) -> &Edge {
        &self.edges[edge]
    }

    /// Number of edges ever added (including removed ones).
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Remove an edge from traversal. The edge keeps its id so cycle lists
    /// computed earlier stay meaningful.
    pub fn remove_edge(&mut self, edge: EdgeId) {
        self.edges[edge].removed = true;
    }

    /// Live outgoing edges of a node, in insertion order.
    pub fn out_edges(&self, node: NodeId) -> impl Iterator<Item = EdgeId> + '_ {
        self.adjacency[node]
            .iter()
            .copied()
            .filter(|&e| !self.edges[e].removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_node_dedupes() {
        let mut graph = Graph::new();
        let a = graph.add_node(7);
        let b = graph.add_node(7);
        assert_eq!(a, b);
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.row_at(a), 7);
    }

    #[test]
    fn test_link_and_remove() {
        let mut graph = Graph::new();
        let e = graph.link(1, 2, DepCause::Replacement);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.out_edges(graph.edge(e).from).count(), 1);

        graph.remove_edge(e);
        assert!(graph.edge(e).is_removed());
        assert_eq!(graph.out_edges(graph.edge(e).from).count(), 0);
    }

    #[test]
    fn test_cause_nullability() {
        let fk = ForeignKey::single("fk", "col", "t");
        assert_eq!(DepCause::ForeignKey(fk.clone()).nullable(), Some(true));
        assert_eq!(
            DepCause::ForeignKey(fk.not_null(true)).nullable(),
            Some(false)
        );
        assert_eq!(
            DepCause::RelationId(Column::new("c").not_null(true)).nullable(),
            Some(false)
        );
        assert_eq!(DepCause::Replacement.nullable(), None);
    }
}
