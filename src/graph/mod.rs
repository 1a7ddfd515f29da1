// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The connection arena.
//!
//! Processing objects, their port tables and the edges between ports
//! live in one flat `StableDiGraph`; the public surface hands out
//! plain copyable handles instead of references, so teardown never has
//! to chase object cycles. Edges run from the node owning the source
//! output to the node owning the target input; forward adjacency
//! drives announcement walks, reverse adjacency drives fetch planning.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::errors::ConnectError;
use crate::ports::descriptor::PortTable;
use crate::ports::multi_input_data::DataId;
use crate::value::{Key, Value};

/// Handle to a processing object inside a network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Reference to an input port, optionally narrowed to a keyed virtual
/// single-input view.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InputRef {
    pub(crate) node: NodeId,
    pub(crate) port: usize,
    pub(crate) key: Option<Key>,
}

impl InputRef {
    /// The keyed virtual single-input view of a multi-input port.
    pub fn at(&self, key: impl Into<Key>) -> InputRef {
        InputRef {
            node: self.node,
            port: self.port,
            key: Some(key.into()),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }
}

/// Reference to an output port, optionally narrowed to one key of a
/// multi-output.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OutputRef {
    pub(crate) node: NodeId,
    pub(crate) port: usize,
    pub(crate) key: Option<Key>,
}

impl OutputRef {
    /// The single-output view of one key of a multi-output port.
    pub fn at(&self, key: impl Into<Key>) -> OutputRef {
        OutputRef {
            node: self.node,
            port: self.port,
            key: Some(key.into()),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }
}

/// Shared handle to the user's processing object. Workers lock it for
/// the duration of one getter or setter run; the driver locks it only
/// for short condition checks and inline computations.
pub(crate) type ObjectCell = Arc<Mutex<Box<dyn Any + Send>>>;

/// Locks a processing object, riding over poisoning: a panic in a user
/// closure must not wedge the whole graph.
pub(crate) fn lock_object(
    object: &ObjectCell,
) -> std::sync::MutexGuard<'_, Box<dyn Any + Send>> {
    match object.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) struct NodeCell {
    pub id: NodeId,
    pub name: String,
    pub object: ObjectCell,
    pub table: PortTable,
    /// Bumped whenever any setter runs on the object; cache slots
    /// remember the version they were computed against.
    pub version: u64,
}

impl NodeCell {
    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, Box<dyn Any + Send>> {
        lock_object(&self.object)
    }

    pub(crate) fn port_label(&self, output: usize) -> String {
        format!("{}.{}", self.name, self.outputs_name(output))
    }

    fn outputs_name(&self, output: usize) -> &'static str {
        self.table
            .outputs
            .get(output)
            .map(|port| port.name)
            .unwrap_or("?")
    }
}

/// How the engine tracks what a delivery through the edge means for
/// the target port.
pub(crate) enum EdgeBinding {
    /// Plain single input; nothing to track.
    None,
    /// Multi-input target; one element, bound at first delivery.
    Data(Option<DataId>),
    /// Multi-output fanned into a multi-input; one element per
    /// currently exposed key.
    Fan(HashMap<Key, DataId>),
}

pub(crate) struct EdgeCell {
    pub source_port: usize,
    pub source_key: Option<Key>,
    pub target_port: usize,
    pub target_key: Option<Key>,
    /// An upstream change has been announced through this edge and not
    /// delivered yet.
    pub pending: bool,
    /// Value fetched but withheld by a notify-condition; delivered
    /// once the condition flips.
    pub parked: Option<Value>,
    pub binding: EdgeBinding,
}

impl EdgeCell {
    pub(crate) fn same_wiring(
        &self,
        source_port: usize,
        source_key: &Option<Key>,
        target_port: usize,
        target_key: &Option<Key>,
    ) -> bool {
        self.source_port == source_port
            && self.source_key == *source_key
            && self.target_port == target_port
            && self.target_key == *target_key
    }
}

/// The arena: a stable directed graph plus the id maps that keep
/// handles valid across removals.
pub(crate) struct ConnectionGraph {
    graph: StableDiGraph<NodeCell, EdgeCell>,
    indices: HashMap<NodeId, NodeIndex>,
    next_id: u64,
}

impl ConnectionGraph {
    pub(crate) fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            indices: HashMap::new(),
            next_id: 0,
        }
    }

    pub(crate) fn insert(
        &mut self,
        name: String,
        object: ObjectCell,
        table: PortTable,
    ) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        let index = self.graph.add_node(NodeCell {
            id,
            name,
            object,
            table,
            version: 0,
        });
        self.indices.insert(id, index);
        id
    }

    pub(crate) fn remove(&mut self, id: NodeId) -> Option<NodeCell> {
        let index = self.indices.remove(&id)?;
        self.graph.remove_node(index)
    }

    pub(crate) fn index(&self, id: NodeId) -> Result<NodeIndex, ConnectError> {
        self.indices
            .get(&id)
            .copied()
            .ok_or(ConnectError::NodeGone(id.0))
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&NodeCell, ConnectError> {
        let index = self.index(id)?;
        self.graph
            .node_weight(index)
            .ok_or(ConnectError::NodeGone(id.0))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeCell, ConnectError> {
        let index = self.index(id)?;
        self.graph
            .node_weight_mut(index)
            .ok_or(ConnectError::NodeGone(id.0))
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.indices.contains_key(&id)
    }

    pub(crate) fn edge(&self, edge: EdgeIndex) -> Option<&EdgeCell> {
        self.graph.edge_weight(edge)
    }

    pub(crate) fn edge_mut(&mut self, edge: EdgeIndex) -> Option<&mut EdgeCell> {
        self.graph.edge_weight_mut(edge)
    }

    /// Source and target node ids of an edge.
    pub(crate) fn endpoints(&self, edge: EdgeIndex) -> Option<(NodeId, NodeId)> {
        let (source, target) = self.graph.edge_endpoints(edge)?;
        Some((
            self.graph.node_weight(source)?.id,
            self.graph.node_weight(target)?.id,
        ))
    }

    pub(crate) fn add_edge(
        &mut self,
        source: NodeId,
        target: NodeId,
        cell: EdgeCell,
    ) -> Result<EdgeIndex, ConnectError> {
        let source_index = self.index(source)?;
        let target_index = self.index(target)?;
        Ok(self.graph.add_edge(source_index, target_index, cell))
    }

    pub(crate) fn remove_edge(&mut self, edge: EdgeIndex) -> Option<EdgeCell> {
        self.graph.remove_edge(edge)
    }

    /// Edges leaving `node`, in insertion order.
    pub(crate) fn edges_out(&self, node: NodeId) -> Vec<EdgeIndex> {
        self.directed_edges(node, Direction::Outgoing)
    }

    /// Edges arriving at `node`, in insertion order.
    pub(crate) fn edges_in(&self, node: NodeId) -> Vec<EdgeIndex> {
        self.directed_edges(node, Direction::Incoming)
    }

    fn directed_edges(&self, node: NodeId, direction: Direction) -> Vec<EdgeIndex> {
        let Some(index) = self.indices.get(&node) else {
            return Vec::new();
        };
        let mut edges: Vec<EdgeIndex> = self
            .graph
            .edges_directed(*index, direction)
            .map(|edge| edge.id())
            .collect();
        // petgraph iterates adjacency newest-first; planning and
        // announcement order must follow connect order.
        edges.sort_by_key(|edge| edge.index());
        edges
    }

    /// Looks up an existing edge with the same wiring, for the
    /// unique-pair rule and for disconnects.
    pub(crate) fn find_edge(
        &self,
        source: NodeId,
        source_port: usize,
        source_key: &Option<Key>,
        target: NodeId,
        target_port: usize,
        target_key: &Option<Key>,
    ) -> Option<EdgeIndex> {
        let target_index = *self.indices.get(&target)?;
        self.edges_out(source).into_iter().find(|edge| {
            let Some(cell) = self.graph.edge_weight(*edge) else {
                return false;
            };
            let Some((_, edge_target)) = self.graph.edge_endpoints(*edge) else {
                return false;
            };
            edge_target == target_index
                && cell.same_wiring(source_port, source_key, target_port, target_key)
        })
    }
}
