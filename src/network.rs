// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The public surface of the engine.
//!
//! A [`Network`] owns the connection arena, the default executor and
//! the epoch counter. Processing objects go in with their port
//! declarations; what comes back are plain handles. Calling a
//! connector through the network behaves as the plain method would:
//! the user closure runs, side effects intact. In addition the call
//! participates in the dataflow protocol, so setters start an epoch
//! and getters return the freshly settled value.
//!
//! # Update Protocol
//!
//! Every mutating entry point follows the same shape: run the user
//! closure (if the call carries one), announce the change across the
//! graph, collect the non-lazy sinks, and run one wave to settle
//! them. Fetches skip the announcement and demand a single output.
//! All of it happens on the caller's task; the network is therefore
//! externally synchronized by `&mut self`, and no method observes a
//! half-applied epoch.
//!
//! # Handles
//!
//! Nodes and ports are addressed by value handles ([`NodeId`],
//! [`InputRef`], [`OutputRef`]) rather than references, so user code
//! never borrows into the arena. A handle to a removed node keeps
//! failing with `NodeGone` instead of dangling. Keyed views are plain
//! handle transforms via `at`.
//!
//! # Examples
//!
//! ```
//! use patchbay::{Network, Ports, Value};
//!
//! struct Hold {
//!     value: f64,
//! }
//!
//! fn hold_ports() -> Ports<Hold> {
//!     let mut ports = Ports::<Hold>::new();
//!     ports.input("set_value", &["get_value"], |h, v| {
//!         h.value = v.extract::<f64>()?;
//!         Ok(())
//!     });
//!     ports.output("get_value", |h| Ok(Value::new(h.value)));
//!     ports
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> patchbay::Result<()> {
//! let mut net = Network::new();
//! let a = net.add_node("a", Hold { value: 0.0 }, hold_ports())?;
//! let b = net.add_node("b", Hold { value: 0.0 }, hold_ports())?;
//! net.connect(&net.output(a, "get_value")?, &net.input(b, "set_value")?)
//!     .await?;
//! net.set(&net.input(a, "set_value")?, Value::new(1.5)).await?;
//! let out = net.get(&net.output(b, "get_value")?).await?;
//! assert_eq!(out.extract::<f64>().unwrap(), 1.5);
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex};

use crate::config::EngineConfig;
use crate::engine::executor::{Executor, Parallelization, WorkExecutor};
use crate::engine::announce::NonLazySinks;
use crate::engine::wave::Demand;
use crate::errors::{ConnectError, Error, ExecutionError, Result};
use crate::graph::{
    lock_object, ConnectionGraph, EdgeBinding, EdgeCell, InputRef, NodeId, OutputRef,
};
use crate::ports::descriptor::{InputKind, OutputKind, PortTable};
use crate::ports::multi_input_data::DataId;
use crate::ports::{Laziness, Ports};
use crate::value::{Key, Value};

/// A directed acyclic processing network of connected objects.
///
/// The network is the single owner of all graph state. Methods take
/// `&mut self`, which serializes epochs without any internal locking;
/// parallelism lives entirely in the worker pools running the port
/// computations. Dropping the network drops every processing object
/// it still owns.
pub struct Network {
    pub(crate) graph: ConnectionGraph,
    pub(crate) executor: Arc<dyn WorkExecutor>,
    pub(crate) epoch: u64,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    /// A network with the default worker pool (one thread per core).
    pub fn new() -> Self {
        Self::with_executor(Arc::new(Executor::default_pool()))
    }

    pub fn with_executor(executor: Arc<dyn WorkExecutor>) -> Self {
        Self {
            graph: ConnectionGraph::new(),
            executor,
            epoch: 0,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::with_executor(Arc::new(config.executor()))
    }

    fn next_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    // === nodes and port lookup ===

    /// Adds a processing object with its port declarations and returns
    /// its handle.
    pub fn add_node<T: Send + 'static>(
        &mut self,
        name: impl Into<String>,
        object: T,
        ports: Ports<T>,
    ) -> std::result::Result<NodeId, ConnectError> {
        let table = PortTable::build(ports.inputs, ports.outputs)?;
        let object = Arc::new(Mutex::new(Box::new(object) as Box<dyn std::any::Any + Send>));
        let id = self.graph.insert(name.into(), object, table);
        tracing::debug!(node = %id, "added processing object");
        Ok(id)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.graph.contains(node)
    }

    pub fn input(
        &self,
        node: NodeId,
        name: &str,
    ) -> std::result::Result<InputRef, ConnectError> {
        let cell = self.graph.node(node)?;
        let port = cell
            .table
            .input_index(name)
            .ok_or_else(|| ConnectError::UnknownPort {
                node: cell.name.clone(),
                kind: "input",
                name: name.to_string(),
            })?;
        Ok(InputRef {
            node,
            port,
            key: None,
        })
    }

    pub fn output(
        &self,
        node: NodeId,
        name: &str,
    ) -> std::result::Result<OutputRef, ConnectError> {
        let cell = self.graph.node(node)?;
        let port = cell
            .table
            .output_index(name)
            .ok_or_else(|| ConnectError::UnknownPort {
                node: cell.name.clone(),
                kind: "output",
                name: name.to_string(),
            })?;
        Ok(OutputRef {
            node,
            port,
            key: None,
        })
    }

    // === wiring ===

    /// Connects an output to an input. Macro ports fan out; duplicate
    /// edges are a no-op. A non-lazy target (`OnConnect`) pulls the
    /// current upstream value right away.
    pub async fn connect(&mut self, output: &OutputRef, input: &InputRef) -> Result<()> {
        let source = self.resolve_output(output)?;
        let targets = self.resolve_inputs(input)?;
        for target in targets {
            self.connect_single(&source, &target).await?;
        }
        Ok(())
    }

    async fn connect_single(&mut self, source: &OutputRef, target: &InputRef) -> Result<()> {
        let binding = {
            let source_cell = self.graph.node(source.node).map_err(Error::from)?;
            let output = &source_cell.table.outputs[source.port];
            let source_label = format!("{}.{}", source_cell.name, output.name);
            let target_cell = self.graph.node(target.node).map_err(Error::from)?;
            let input = &target_cell.table.inputs[target.port];
            let target_label = format!("{}.{}", target_cell.name, input.name);

            if !output.is_multi() && source.key.is_some() {
                return Err(ConnectError::KindMismatch {
                    source_port: source_label,
                    target_port: target_label,
                    reason: "key designator on a plain output".to_string(),
                }
                .into());
            }
            if !input.is_multi() && target.key.is_some() {
                return Err(ConnectError::KindMismatch {
                    source_port: source_label,
                    target_port: target_label,
                    reason: "key designator on a plain input".to_string(),
                }
                .into());
            }
            if output.is_multi() && source.key.is_none() && !input.is_multi() {
                return Err(ConnectError::MissingKey { port: source_label }.into());
            }
            if output.is_multi() && source.key.is_none() && target.key.is_some() {
                return Err(ConnectError::MissingKey { port: source_label }.into());
            }

            if input.is_multi() {
                if output.is_multi() && source.key.is_none() {
                    EdgeBinding::Fan(Default::default())
                } else {
                    EdgeBinding::Data(None)
                }
            } else {
                EdgeBinding::None
            }
        };

        if self
            .graph
            .find_edge(
                source.node,
                source.port,
                &source.key,
                target.node,
                target.port,
                &target.key,
            )
            .is_some()
        {
            return Ok(());
        }

        let edge = self
            .graph
            .add_edge(
                source.node,
                target.node,
                EdgeCell {
                    source_port: source.port,
                    source_key: source.key.clone(),
                    target_port: target.port,
                    target_key: target.key.clone(),
                    pending: true,
                    parked: None,
                    binding,
                },
            )
            .map_err(Error::from)?;
        tracing::debug!(edge = ?edge, "connected");

        // the new edge is an announcement to its target
        let epoch = self.next_epoch();
        let mut sinks = NonLazySinks::new(Laziness::OnConnect);
        let (passes, laziness) = {
            let cell = self.graph.node(target.node).map_err(Error::from)?;
            let input = &cell.table.inputs[target.port];
            let passes = match &input.announce_condition {
                None => true,
                Some(condition) => {
                    let bound = None;
                    let guard = lock_object(&cell.object);
                    condition(&**guard, bound)
                }
            };
            (passes, input.laziness)
        };
        if passes {
            sinks.add(target.node, target.port, laziness);
            self.announce_input_downstream(target.node, target.port, epoch, &mut sinks)
                .map_err(Error::from)?;
        }
        self.realize_sinks(sinks, epoch).await
    }

    /// Removes the edge between an output and an input. An announced
    /// but undelivered upstream value is delivered exactly once before
    /// the edge goes away; disconnecting an absent edge is a no-op.
    pub async fn disconnect(&mut self, output: &OutputRef, input: &InputRef) -> Result<()> {
        let source = self.resolve_output(output)?;
        let targets = self.resolve_inputs(input)?;
        for target in targets {
            self.disconnect_single(&source, &target).await?;
        }
        Ok(())
    }

    async fn disconnect_single(&mut self, source: &OutputRef, target: &InputRef) -> Result<()> {
        let Some(edge) = self.graph.find_edge(
            source.node,
            source.port,
            &source.key,
            target.node,
            target.port,
            &target.key,
        ) else {
            return Ok(());
        };
        self.detach_edge(edge).await
    }

    /// Delivers a pending announcement, removes the edge, and lets the
    /// target multi-input drop the elements the edge had contributed.
    async fn detach_edge(&mut self, edge: petgraph::stable_graph::EdgeIndex) -> Result<()> {
        let flush = self
            .graph
            .edge(edge)
            .map(|cell| cell.pending || cell.parked.is_some())
            .unwrap_or(false);
        if flush {
            let epoch = self.next_epoch();
            self.run_wave(vec![Demand::Edge(edge)], epoch).await?;
        }

        let Some((_, target_node)) = self.graph.endpoints(edge) else {
            self.graph.remove_edge(edge);
            return Ok(());
        };
        let (target_port, removals) = {
            let Some(cell) = self.graph.edge(edge) else {
                return Ok(());
            };
            let removals: Vec<DataId> = match &cell.binding {
                EdgeBinding::Data(Some(id)) => vec![*id],
                EdgeBinding::Fan(map) => map.values().copied().collect(),
                _ => Vec::new(),
            };
            (cell.target_port, removals)
        };
        self.graph.remove_edge(edge);
        tracing::debug!(edge = ?edge, "disconnected");

        if !removals.is_empty() {
            self.run_multi_removals(target_node, target_port, &removals)
                .map_err(Error::from)?;
            let epoch = self.next_epoch();
            let mut sinks = NonLazySinks::new(Laziness::OnAnnounce);
            self.announce_input_downstream(target_node, target_port, epoch, &mut sinks)
                .map_err(Error::from)?;
            self.realize_sinks(sinks, epoch).await?;
        }
        Ok(())
    }

    /// Removes a processing object. Pending announcements on its
    /// outgoing edges are delivered first, then all incident edges are
    /// detached and the object is dropped.
    pub async fn remove_node(&mut self, node: NodeId) -> Result<()> {
        if !self.graph.contains(node) {
            return Ok(());
        }
        for edge in self.graph.edges_out(node) {
            self.detach_edge(edge).await?;
        }
        for edge in self.graph.edges_in(node) {
            self.graph.remove_edge(edge);
        }
        self.graph.remove(node);
        tracing::debug!(node = %node, "removed processing object");
        Ok(())
    }

    // === invocation ===

    /// Calls an input connector. For plain inputs this runs the setter
    /// and starts an epoch; for keyed views of a multi-input the value
    /// is added on first call and replaced afterwards. Macro inputs
    /// dispatch to every inner input in declaration order.
    pub async fn set(&mut self, input: &InputRef, value: Value) -> Result<()> {
        let targets = self.resolve_inputs(input)?;
        for target in targets {
            if target.key.is_some() {
                self.set_keyed(&target, value.clone()).await?;
            } else {
                self.set_single(&target, value.clone()).await?;
            }
        }
        Ok(())
    }

    async fn set_single(&mut self, target: &InputRef, value: Value) -> Result<()> {
        {
            let cell = self.graph.node_mut(target.node).map_err(Error::from)?;
            let input = &cell.table.inputs[target.port];
            let label = format!("{}.{}", cell.name, input.name);
            let InputKind::Single { setter } = &input.kind else {
                return Err(ConnectError::KindMismatch {
                    source_port: "<call>".to_string(),
                    target_port: label,
                    reason: "direct call on a multi-input; use add() or a keyed view"
                        .to_string(),
                }
                .into());
            };
            let setter = setter.clone();
            {
                let mut guard = lock_object(&cell.object);
                setter(&mut **guard, value).map_err(|source| {
                    ExecutionError::ComputationFailed {
                        port: label,
                        source,
                    }
                })?;
            }
            cell.version += 1;
        }
        self.after_state_change(target.node, target.port).await
    }

    async fn set_keyed(&mut self, target: &InputRef, value: Value) -> Result<()> {
        let Some(key) = target.key.clone() else {
            return Err(ExecutionError::Internal {
                message: "keyed setter without key".to_string(),
            }
            .into());
        };
        {
            let cell = self.graph.node_mut(target.node).map_err(Error::from)?;
            let input = &cell.table.inputs[target.port];
            let label = format!("{}.{}", cell.name, input.name);
            let InputKind::Multi {
                add,
                remove,
                replace,
            } = &input.kind
            else {
                return Err(ConnectError::KindMismatch {
                    source_port: "<call>".to_string(),
                    target_port: label,
                    reason: "keyed views exist only on multi-inputs".to_string(),
                }
                .into());
            };
            let add = add.clone();
            let remove = remove.clone();
            let replace = replace.clone();
            let bound = input.virtual_bindings.get(&key).copied();
            let new_id = {
                let mut guard = lock_object(&cell.object);
                let object = &mut **guard;
                let outcome = match bound {
                    Some(id) => match &replace {
                        Some(replace) => replace(object, id, value),
                        None => remove(object, id).and_then(|_| add(object, value)),
                    },
                    None => add(object, value),
                };
                outcome.map_err(|source| ExecutionError::ComputationFailed {
                    port: label,
                    source,
                })?
            };
            cell.table.inputs[target.port]
                .virtual_bindings
                .insert(key, new_id);
            cell.version += 1;
        }
        self.after_state_change(target.node, target.port).await
    }

    /// Calls a multi-input connector directly: collects a new element
    /// and returns its data id.
    pub async fn add(&mut self, input: &InputRef, value: Value) -> Result<DataId> {
        let target = self.single_multi_target(input)?;
        let id = {
            let cell = self.graph.node_mut(target.node).map_err(Error::from)?;
            let input_port = &cell.table.inputs[target.port];
            let label = format!("{}.{}", cell.name, input_port.name);
            let InputKind::Multi { add, .. } = &input_port.kind else {
                return Err(kind_mismatch_call(label, "add on a plain input").into());
            };
            let add = add.clone();
            let id = {
                let mut guard = lock_object(&cell.object);
                add(&mut **guard, value).map_err(|source| {
                    ExecutionError::ComputationFailed {
                        port: label,
                        source,
                    }
                })?
            };
            cell.version += 1;
            id
        };
        self.after_state_change(target.node, target.port).await?;
        Ok(id)
    }

    /// Replaces an element previously added to a multi-input.
    pub async fn replace(
        &mut self,
        input: &InputRef,
        id: DataId,
        value: Value,
    ) -> Result<DataId> {
        let target = self.single_multi_target(input)?;
        let new_id = {
            let cell = self.graph.node_mut(target.node).map_err(Error::from)?;
            let input_port = &cell.table.inputs[target.port];
            let label = format!("{}.{}", cell.name, input_port.name);
            let InputKind::Multi {
                replace: Some(replace),
                ..
            } = &input_port.kind
            else {
                return Err(
                    kind_mismatch_call(label, "no replace helper declared on this input").into(),
                );
            };
            let replace = replace.clone();
            let new_id = {
                let mut guard = lock_object(&cell.object);
                replace(&mut **guard, id, value).map_err(|source| {
                    ExecutionError::ComputationFailed {
                        port: label,
                        source,
                    }
                })?
            };
            cell.version += 1;
            new_id
        };
        self.after_state_change(target.node, target.port).await?;
        Ok(new_id)
    }

    /// Removes an element previously added to a multi-input.
    pub async fn remove_value(&mut self, input: &InputRef, id: DataId) -> Result<()> {
        let target = self.single_multi_target(input)?;
        self.run_multi_removals(target.node, target.port, &[id])
            .map_err(Error::from)?;
        self.after_state_change(target.node, target.port).await
    }

    /// Fetches an output connector's value, recomputing only what the
    /// announcements since the last fetch actually touched.
    pub async fn get(&mut self, output: &OutputRef) -> Result<Value> {
        let source = self.resolve_output(output)?;
        {
            let cell = self.graph.node(source.node).map_err(Error::from)?;
            let port = &cell.table.outputs[source.port];
            let label = format!("{}.{}", cell.name, port.name);
            if port.is_multi() && source.key.is_none() {
                return Err(ConnectError::MissingKey { port: label }.into());
            }
            if !port.is_multi() && source.key.is_some() {
                return Err(ConnectError::KindMismatch {
                    source_port: label,
                    target_port: "<call>".to_string(),
                    reason: "key designator on a plain output".to_string(),
                }
                .into());
            }
        }
        let epoch = self.next_epoch();
        let results = self
            .run_wave(
                vec![Demand::Output {
                    node: source.node,
                    port: source.port,
                    key: source.key.clone(),
                }],
                epoch,
            )
            .await?;
        if let Some(value) = results.get(&(source.node, source.port, source.key.clone())) {
            return Ok(value.clone());
        }
        self.slot_value(source.node, source.port, &source.key)
            .ok_or_else(|| {
                ExecutionError::Internal {
                    message: "settled wave left no value behind".to_string(),
                }
                .into()
            })
    }

    /// The current key set of a multi-output, as its producer reports
    /// it. Empty when no producer was declared.
    pub fn keys(&self, output: &OutputRef) -> Result<Vec<Key>> {
        let source = self.resolve_output(output)?;
        let cell = self.graph.node(source.node).map_err(Error::from)?;
        let port = &cell.table.outputs[source.port];
        let label = format!("{}.{}", cell.name, port.name);
        match &port.kind {
            OutputKind::Multi {
                keys: Some(producer),
                ..
            } => {
                let guard = lock_object(&cell.object);
                producer(&**guard).map_err(|source| {
                    Error::from(ExecutionError::ComputationFailed {
                        port: label,
                        source,
                    })
                })
            }
            OutputKind::Multi { .. } => Ok(Vec::new()),
            _ => Err(ConnectError::KindMismatch {
                source_port: label,
                target_port: "<call>".to_string(),
                reason: "keys() on a plain output".to_string(),
            }
            .into()),
        }
    }

    // === configuration ===

    /// Changes an input's laziness. Raising it while an upstream
    /// announcement is pending realizes the change immediately.
    pub async fn set_laziness(&mut self, input: &InputRef, laziness: Laziness) -> Result<()> {
        let targets = self.resolve_inputs(input)?;
        for target in targets {
            let previous = {
                let cell = self.graph.node_mut(target.node).map_err(Error::from)?;
                let port = &mut cell.table.inputs[target.port];
                let previous = port.laziness;
                port.laziness = laziness;
                previous
            };
            let raised = laziness > previous && laziness >= Laziness::OnAnnounce;
            if raised && self.has_pending_edge(&target) {
                let epoch = self.next_epoch();
                self.run_wave(
                    vec![Demand::Input {
                        node: target.node,
                        port: target.port,
                    }],
                    epoch,
                )
                .await?;
            }
        }
        Ok(())
    }

    pub fn set_caching(
        &mut self,
        output: &OutputRef,
        caching: bool,
    ) -> std::result::Result<(), ConnectError> {
        let source = self.resolve_output(output)?;
        let cell = self.graph.node_mut(source.node)?;
        cell.table.outputs[source.port].caching = caching;
        Ok(())
    }

    pub fn set_input_parallelization(
        &mut self,
        input: &InputRef,
        parallelization: Parallelization,
    ) -> std::result::Result<(), ConnectError> {
        for target in self.resolve_inputs(input)? {
            let cell = self.graph.node_mut(target.node)?;
            cell.table.inputs[target.port].parallelization = parallelization;
        }
        Ok(())
    }

    pub fn set_output_parallelization(
        &mut self,
        output: &OutputRef,
        parallelization: Parallelization,
    ) -> std::result::Result<(), ConnectError> {
        let source = self.resolve_output(output)?;
        let cell = self.graph.node_mut(source.node)?;
        cell.table.outputs[source.port].parallelization = parallelization;
        Ok(())
    }

    pub fn set_input_executor(
        &mut self,
        input: &InputRef,
        executor: Arc<dyn WorkExecutor>,
    ) -> std::result::Result<(), ConnectError> {
        for target in self.resolve_inputs(input)? {
            let cell = self.graph.node_mut(target.node)?;
            cell.table.inputs[target.port].executor = Some(executor.clone());
        }
        Ok(())
    }

    pub fn set_output_executor(
        &mut self,
        output: &OutputRef,
        executor: Arc<dyn WorkExecutor>,
    ) -> std::result::Result<(), ConnectError> {
        let source = self.resolve_output(output)?;
        let cell = self.graph.node_mut(source.node)?;
        cell.table.outputs[source.port].executor = Some(executor);
        Ok(())
    }

    // === shared plumbing ===

    async fn after_state_change(&mut self, node: NodeId, input_port: usize) -> Result<()> {
        let epoch = self.next_epoch();
        let mut sinks = NonLazySinks::new(Laziness::OnAnnounce);
        self.announce_input_downstream(node, input_port, epoch, &mut sinks)
            .map_err(Error::from)?;
        self.realize_sinks(sinks, epoch).await
    }

    async fn realize_sinks(&mut self, sinks: NonLazySinks, epoch: u64) -> Result<()> {
        if sinks.is_empty() {
            return Ok(());
        }
        let demands = sinks
            .inputs
            .into_iter()
            .map(|(node, port)| Demand::Input { node, port })
            .collect();
        self.run_wave(demands, epoch).await?;
        Ok(())
    }

    fn single_multi_target(&self, input: &InputRef) -> Result<InputRef> {
        let mut targets = self.resolve_inputs(input)?;
        if targets.len() != 1 {
            return Err(ConnectError::KindMismatch {
                source_port: "<call>".to_string(),
                target_port: "<macro>".to_string(),
                reason: "element calls cannot fan out through a macro input".to_string(),
            }
            .into());
        }
        let target = targets.remove(0);
        if target.key.is_some() {
            return Err(ConnectError::KindMismatch {
                source_port: "<call>".to_string(),
                target_port: "<keyed view>".to_string(),
                reason: "element calls address the whole multi-input".to_string(),
            }
            .into());
        }
        Ok(target)
    }

    fn has_pending_edge(&self, target: &InputRef) -> bool {
        self.graph.edges_in(target.node).into_iter().any(|edge| {
            self.graph
                .edge(edge)
                .map(|cell| cell.target_port == target.port && (cell.pending || cell.parked.is_some()))
                .unwrap_or(false)
        })
    }
}

fn kind_mismatch_call(target_port: String, reason: &str) -> ConnectError {
    ConnectError::KindMismatch {
        source_port: "<call>".to_string(),
        target_port,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Hold {
        value: i64,
    }

    fn hold_ports() -> Ports<Hold> {
        let mut ports = Ports::<Hold>::new();
        ports.input("set_value", &["get_value"], |h, v| {
            h.value = v.extract::<i64>()?;
            Ok(())
        });
        ports.output("get_value", |h| Ok(Value::new(h.value)));
        ports
    }

    #[tokio::test]
    async fn unknown_ports_are_reported() {
        let mut net = Network::new();
        let a = net.add_node("a", Hold { value: 0 }, hold_ports()).unwrap();
        assert!(matches!(
            net.input(a, "set_nothing"),
            Err(ConnectError::UnknownPort { .. })
        ));
        assert!(matches!(
            net.output(a, "get_nothing"),
            Err(ConnectError::UnknownPort { .. })
        ));
    }

    #[tokio::test]
    async fn handles_go_stale_after_removal() {
        let mut net = Network::new();
        let a = net.add_node("a", Hold { value: 0 }, hold_ports()).unwrap();
        net.remove_node(a).await.unwrap();
        assert!(!net.contains(a));
        assert!(matches!(
            net.input(a, "set_value"),
            Err(ConnectError::NodeGone(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_connect_is_a_no_op() {
        let mut net = Network::new();
        let a = net.add_node("a", Hold { value: 0 }, hold_ports()).unwrap();
        let b = net.add_node("b", Hold { value: 0 }, hold_ports()).unwrap();
        let out = net.output(a, "get_value").unwrap();
        let inp = net.input(b, "set_value").unwrap();
        net.connect(&out, &inp).await.unwrap();
        net.connect(&out, &inp).await.unwrap();
        net.set(&net.input(a, "set_value").unwrap(), Value::new(4i64))
            .await
            .unwrap();
        let got = net.get(&net.output(b, "get_value").unwrap()).await.unwrap();
        assert_eq!(got.extract::<i64>().unwrap(), 4);
    }

    #[tokio::test]
    async fn keyed_view_on_plain_input_is_rejected() {
        let mut net = Network::new();
        let a = net.add_node("a", Hold { value: 0 }, hold_ports()).unwrap();
        let b = net.add_node("b", Hold { value: 0 }, hold_ports()).unwrap();
        let out = net.output(a, "get_value").unwrap();
        let inp = net.input(b, "set_value").unwrap().at(3);
        let result = net.connect(&out, &inp).await;
        assert!(matches!(
            result,
            Err(Error::Connect(ConnectError::KindMismatch { .. }))
        ));
    }
}
