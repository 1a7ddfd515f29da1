// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Wave scheduler with dependency counting and cooperative dispatch.
//!
//! This module implements the fetch phase of the update protocol: it
//! takes a set of demands and settles them by running the fewest user
//! computations that the announcements since the last wave actually
//! require. Everything else is answered from cache slots.
//!
//! # Architecture Overview
//!
//! A wave turns its demands (outputs to fetch, non-lazy inputs to
//! satisfy, single edges to flush) into a dependency-counted unit
//! graph and drains it on a single driver loop:
//!
//! * `Get` runs one output getter, once per output and key per wave
//! * `Deliver` pulls a value through one edge into the target setter
//! * `Expand` refreshes the key set of a fanned multi-output edge and
//!   plans the per-key gets and deliveries dynamically
//!
//! ```text
//! demands -> plan units -> ready queue -> dispatch -> completion
//!                ^                                        |
//!                +------- dependents decremented <--------+
//! ```
//!
//! Units whose dependency counts reach zero sit in the ready queue.
//! The driver pops them, runs sequential ones inline, ships the rest
//! to the executor, and then suspends on a completion channel. Each
//! completion decrements its dependents' counts and refills the
//! queue. The driver owns all graph state; workers only ever see an
//! object handle, a closure and a value, so no locking guards the
//! graph itself.
//!
//! # Key Features
//!
//! * **Dependency counting**: O(1) readiness resolution per completed
//!   unit, in the classic topological-drain shape
//! * **Deduplication**: unit identity makes a second demand for a
//!   running output join the in-flight computation instead of
//!   starting another getter (the fan-out "compute once" contract)
//! * **Notify pushes**: when an output settles, pending edges toward
//!   notify-eager inputs are delivered within the same wave, gated by
//!   the target's announce condition like any other realization
//! * **Stall detection**: if the queue and the workers both run dry
//!   while units remain, the wave fails with `CycleOrDeadlock` naming
//!   the stuck outputs instead of hanging
//!
//! # Failure Handling
//!
//! A failed computation aborts the wave. In-flight workers are
//! awaited and their results discarded, computing slots fall back to
//! their announced state, and the failed output's slot is emptied so
//! a later retry reruns the getter. Condition rejections are ordinary
//! control flow and never abort anything.
//!
//! # Performance Characteristics
//!
//! * **Planning**: O(V + E) over the announced region, not the graph
//! * **Completion handling**: O(1) per unit plus its dependent list
//! * **Memory**: O(V) unit table per wave, dropped when it settles
//! * **Concurrency**: bounded by the executor pools; independent
//!   branches overlap, causally ordered pairs never do

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use petgraph::stable_graph::EdgeIndex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::engine::executor::{Job, JobOutput, Parallelization, WorkExecutor, WorkItem};
use crate::engine::slot::{CacheSlot, SlotState};
use crate::errors::{ConnectError, ExecutionError};
use crate::graph::{lock_object, EdgeBinding, NodeId};
use crate::network::Network;
use crate::ports::descriptor::{InputKind, OutputKind};
use crate::ports::multi_input_data::DataId;
use crate::ports::Laziness;
use crate::value::{Key, Value};

/// One schedulable computation inside a wave.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum UnitId {
    /// Run the getter of an output (one key of it, for multi-outputs).
    Get {
        node: NodeId,
        port: usize,
        key: Option<Key>,
    },
    /// Pull the upstream value through an edge into the target setter.
    /// `key` names the fan key for expanded multi-output edges.
    Deliver {
        edge: EdgeIndex,
        key: Option<Key>,
    },
    /// Refresh the key set of a fanned edge and plan per-key work.
    Expand { edge: EdgeIndex },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    /// The getter ran and produced a new value.
    Computed,
    /// The announcement never materialized; the cached value stands.
    Unchanged,
    /// The setter ran with the delivered value.
    Delivered,
    /// Nothing to deliver, or a notify condition withheld the value.
    Skipped,
    /// Fan expansion finished planning its per-key units.
    Expanded,
}

struct UnitEntry {
    deps_remaining: usize,
    dependents: Vec<UnitId>,
    done: bool,
    outcome: Option<Outcome>,
    /// A direct fetch of an uncached output must run the getter even
    /// when the cached value is current.
    force_run: bool,
}

impl UnitEntry {
    fn new() -> Self {
        Self {
            deps_remaining: 0,
            dependents: Vec::new(),
            done: false,
            outcome: None,
            force_run: false,
        }
    }
}

/// What a wave is asked to settle.
pub(crate) enum Demand {
    Output {
        node: NodeId,
        port: usize,
        key: Option<Key>,
    },
    /// Realize all pending edges into one input (non-lazy pull).
    Input { node: NodeId, port: usize },
    /// Flush one edge (disconnect with a pending announcement).
    Edge(EdgeIndex),
}

enum Planned {
    /// The slot is valid; no unit required.
    Fresh,
    Unit(UnitId),
}

type CompletionMsg = (UnitId, Result<JobOutput, ExecutionError>);

pub(crate) type WaveResults = HashMap<(NodeId, usize, Option<Key>), Value>;

pub(crate) struct WaveState {
    units: HashMap<UnitId, UnitEntry>,
    ready: VecDeque<UnitId>,
    active: usize,
    tx: mpsc::UnboundedSender<CompletionMsg>,
    rx: mpsc::UnboundedReceiver<CompletionMsg>,
    cancel: CancellationToken,
    results: WaveResults,
}

impl WaveState {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            units: HashMap::new(),
            ready: VecDeque::new(),
            active: 0,
            tx,
            rx,
            cancel: CancellationToken::new(),
            results: HashMap::new(),
        }
    }

    /// Registers a unit; false when it already exists.
    fn insert_unit(&mut self, unit: UnitId) -> bool {
        use std::collections::hash_map::Entry;
        match self.units.entry(unit) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(UnitEntry::new());
                true
            }
        }
    }

    /// Makes `dependent` wait for `dep`, unless `dep` is already done.
    fn link(&mut self, dep: &UnitId, dependent: &UnitId) {
        match self.units.get_mut(dep) {
            Some(entry) if !entry.done => entry.dependents.push(dependent.clone()),
            _ => return,
        }
        if let Some(entry) = self.units.get_mut(dependent) {
            entry.deps_remaining += 1;
        }
    }

    fn enqueue_if_ready(&mut self, unit: &UnitId) {
        if let Some(entry) = self.units.get(unit) {
            if !entry.done && entry.deps_remaining == 0 {
                self.ready.push_back(unit.clone());
            }
        }
    }

    /// Marks a unit done and releases its dependents.
    fn complete(&mut self, unit: &UnitId, outcome: Outcome) {
        let dependents = {
            let Some(entry) = self.units.get_mut(unit) else {
                return;
            };
            entry.done = true;
            entry.outcome = Some(outcome);
            std::mem::take(&mut entry.dependents)
        };
        for dependent in dependents {
            if let Some(entry) = self.units.get_mut(&dependent) {
                entry.deps_remaining = entry.deps_remaining.saturating_sub(1);
                if entry.deps_remaining == 0 && !entry.done {
                    self.ready.push_back(dependent);
                }
            }
        }
    }

    fn outcome(&self, unit: &UnitId) -> Option<Outcome> {
        self.units.get(unit).and_then(|entry| entry.outcome)
    }
}

fn internal(message: &str) -> ExecutionError {
    ExecutionError::Internal {
        message: message.to_string(),
    }
}

fn gone(error: ConnectError) -> ExecutionError {
    ExecutionError::Internal {
        message: error.to_string(),
    }
}

impl Network {
    /// Runs one wave to settle the given demands. Returns the values
    /// computed along the way, keyed by output.
    pub(crate) async fn run_wave(
        &mut self,
        demands: Vec<Demand>,
        epoch: u64,
    ) -> Result<WaveResults, ExecutionError> {
        let mut ws = WaveState::new();
        tracing::debug!(epoch, demands = demands.len(), "starting wave");
        let planned: Result<(), ExecutionError> = demands
            .into_iter()
            .try_for_each(|demand| self.plan_demand(demand, &mut ws));
        let driven = match planned {
            Ok(()) => self.drive(&mut ws).await,
            Err(error) => Err(error),
        };
        match driven {
            Ok(()) => {
                tracing::debug!(epoch, computed = ws.results.len(), "wave settled");
                Ok(std::mem::take(&mut ws.results))
            }
            Err(error) => {
                tracing::warn!(epoch, %error, "wave failed");
                self.abort_wave(&mut ws).await;
                Err(error)
            }
        }
    }

    async fn drive(&mut self, ws: &mut WaveState) -> Result<(), ExecutionError> {
        loop {
            while let Some(unit) = ws.ready.pop_front() {
                self.start_unit(unit, ws).await?;
            }
            if ws.units.values().all(|entry| entry.done) {
                return Ok(());
            }
            if ws.active == 0 {
                return Err(ExecutionError::CycleOrDeadlock {
                    outputs: self.stuck_outputs(ws),
                });
            }
            let Some((unit, result)) = ws.rx.recv().await else {
                return Err(internal("completion channel closed mid-wave"));
            };
            ws.active -= 1;
            match result {
                Ok(output) => self.apply_completion(unit, output, ws)?,
                Err(error) => {
                    self.note_failure(&unit);
                    return Err(error);
                }
            }
        }
    }

    // === planning ===

    fn plan_demand(&mut self, demand: Demand, ws: &mut WaveState) -> Result<(), ExecutionError> {
        match demand {
            Demand::Output { node, port, key } => {
                self.plan_get(node, port, key, true, ws)?;
            }
            Demand::Input { node, port } => {
                self.plan_input(node, port, ws)?;
            }
            Demand::Edge(edge) => {
                self.plan_edge(edge, ws)?;
            }
        }
        Ok(())
    }

    fn plan_get(
        &mut self,
        node: NodeId,
        port: usize,
        key: Option<Key>,
        direct: bool,
        ws: &mut WaveState,
    ) -> Result<Planned, ExecutionError> {
        let alias = {
            let cell = self.graph.node(node).map_err(gone)?;
            match &cell.table.outputs[port].kind {
                OutputKind::Macro { target } => Some((
                    target.node,
                    target.port,
                    key.clone().or_else(|| target.key.clone()),
                )),
                _ => None,
            }
        };
        if let Some((inner_node, inner_port, inner_key)) = alias {
            return self.plan_get(inner_node, inner_port, inner_key, direct, ws);
        }

        // a direct fetch of an uncached output always reruns the
        // getter; dependency-driven demand reuses the epoch's value
        let caching = self.graph.node(node).map_err(gone)?.table.outputs[port].caching;
        let force = direct && !caching;

        let unit = UnitId::Get {
            node,
            port,
            key: key.clone(),
        };
        if ws.units.contains_key(&unit) {
            if force {
                if let Some(entry) = ws.units.get_mut(&unit) {
                    if !entry.done {
                        entry.force_run = true;
                    }
                }
            }
            return Ok(Planned::Unit(unit));
        }
        if !force && self.slot_state(node, port, &key) == Some(SlotState::Valid) {
            return Ok(Planned::Fresh);
        }

        ws.insert_unit(unit.clone());
        if force {
            if let Some(entry) = ws.units.get_mut(&unit) {
                entry.force_run = true;
            }
        }
        let depends = self.graph.node(node).map_err(gone)?.table.outputs[port]
            .depends
            .clone();
        for input_port in depends {
            for dep in self.plan_input(node, input_port, ws)? {
                ws.link(&dep, &unit);
            }
        }
        ws.enqueue_if_ready(&unit);
        Ok(Planned::Unit(unit))
    }

    fn plan_input(
        &mut self,
        node: NodeId,
        input_port: usize,
        ws: &mut WaveState,
    ) -> Result<Vec<UnitId>, ExecutionError> {
        let mut units = Vec::new();
        for edge_index in self.graph.edges_in(node) {
            let relevant = self
                .graph
                .edge(edge_index)
                .map(|edge| edge.target_port == input_port)
                .unwrap_or(false);
            if !relevant {
                continue;
            }
            if let Some(unit) = self.plan_edge(edge_index, ws)? {
                units.push(unit);
            }
        }
        Ok(units)
    }

    fn plan_edge(
        &mut self,
        edge_index: EdgeIndex,
        ws: &mut WaveState,
    ) -> Result<Option<UnitId>, ExecutionError> {
        let Some((source_node, target_node)) = self.graph.endpoints(edge_index) else {
            return Ok(None);
        };
        let (source_port, source_key, target_port, pending, parked, is_fan, bound_id) = {
            let Some(edge) = self.graph.edge(edge_index) else {
                return Ok(None);
            };
            (
                edge.source_port,
                edge.source_key.clone(),
                edge.target_port,
                edge.pending,
                edge.parked.is_some(),
                matches!(edge.binding, EdgeBinding::Fan(_)),
                match &edge.binding {
                    EdgeBinding::Data(id) => *id,
                    _ => None,
                },
            )
        };
        if !pending && !parked {
            return Ok(None);
        }

        // the gate is re-evaluated on every realization attempt, so a
        // flipped condition releases a previously suppressed change
        let passes = {
            let cell = self.graph.node(target_node).map_err(gone)?;
            match &cell.table.inputs[target_port].announce_condition {
                None => true,
                Some(condition) => {
                    let guard = lock_object(&cell.object);
                    condition(&**guard, bound_id)
                }
            }
        };
        if !passes {
            return Ok(None);
        }

        if is_fan {
            let unit = UnitId::Expand { edge: edge_index };
            if !ws.insert_unit(unit.clone()) {
                return Ok(Some(unit));
            }
            let depends = self
                .graph
                .node(source_node)
                .map_err(gone)?
                .table
                .outputs[source_port]
                .depends
                .clone();
            for input_port in depends {
                for dep in self.plan_input(source_node, input_port, ws)? {
                    ws.link(&dep, &unit);
                }
            }
            ws.enqueue_if_ready(&unit);
            return Ok(Some(unit));
        }

        let unit = UnitId::Deliver {
            edge: edge_index,
            key: None,
        };
        if !ws.insert_unit(unit.clone()) {
            return Ok(Some(unit));
        }
        if pending {
            if let Planned::Unit(dep) =
                self.plan_get(source_node, source_port, source_key, false, ws)?
            {
                ws.link(&dep, &unit);
            }
        }
        ws.enqueue_if_ready(&unit);
        Ok(Some(unit))
    }

    /// Schedules deliveries to notify-eager inputs behind a freshly
    /// computed output.
    fn plan_notify_deliveries(
        &mut self,
        node: NodeId,
        port: usize,
        key: &Option<Key>,
        ws: &mut WaveState,
    ) -> Result<(), ExecutionError> {
        for edge_index in self.graph.edges_out(node) {
            let (target_port, bound_id) = {
                let Some(edge) = self.graph.edge(edge_index) else {
                    continue;
                };
                if edge.source_port != port
                    || !edge.pending
                    || edge.source_key != *key
                    || matches!(edge.binding, EdgeBinding::Fan(_))
                {
                    continue;
                }
                let bound_id = match &edge.binding {
                    EdgeBinding::Data(id) => *id,
                    _ => None,
                };
                (edge.target_port, bound_id)
            };
            let Some((_, target_node)) = self.graph.endpoints(edge_index) else {
                continue;
            };
            let wanted = {
                let cell = self.graph.node(target_node).map_err(gone)?;
                let input = &cell.table.inputs[target_port];
                if input.laziness < Laziness::OnNotify {
                    false
                } else {
                    // the suppression gate applies to pushed deliveries
                    // exactly as it does to demand pulls
                    match &input.announce_condition {
                        None => true,
                        Some(condition) => {
                            let guard = cell.lock();
                            condition(&**guard, bound_id)
                        }
                    }
                }
            };
            if !wanted {
                continue;
            }
            let unit = UnitId::Deliver {
                edge: edge_index,
                key: None,
            };
            if ws.insert_unit(unit.clone()) {
                tracing::trace!(edge = ?edge_index, "notify-eager delivery scheduled");
                ws.enqueue_if_ready(&unit);
            }
        }
        Ok(())
    }

    // === execution ===

    async fn start_unit(&mut self, unit: UnitId, ws: &mut WaveState) -> Result<(), ExecutionError> {
        match unit.clone() {
            UnitId::Get { node, port, key } => self.start_get(unit, node, port, key, ws).await,
            UnitId::Deliver { edge, key } => self.start_deliver(unit, edge, key, ws).await,
            UnitId::Expand { edge } => self.start_expand(unit, edge, ws),
        }
    }

    async fn start_get(
        &mut self,
        unit: UnitId,
        node: NodeId,
        port: usize,
        key: Option<Key>,
        ws: &mut WaveState,
    ) -> Result<(), ExecutionError> {
        let force = ws
            .units
            .get(&unit)
            .map(|entry| entry.force_run)
            .unwrap_or(false);
        let prepared = {
            let default_executor = self.executor.clone();
            let cell = self.graph.node_mut(node).map_err(gone)?;
            let version = cell.version;
            let object = cell.object.clone();
            let name = cell.name.clone();
            let output = &mut cell.table.outputs[port];
            let label = format!("{}.{}", name, output.name);
            let class = output.parallelization;
            let executor = output.executor.clone().unwrap_or(default_executor);
            match &mut output.kind {
                OutputKind::Single { getter, slot } => {
                    if !force && slot.value.is_some() && slot.version == version {
                        slot.revalidate();
                        None
                    } else {
                        slot.state = SlotState::Computing;
                        let getter = getter.clone();
                        let job: Job = Box::new(move || {
                            let guard = lock_object(&object);
                            getter(&**guard).map(JobOutput::Value)
                        });
                        Some((WorkItem { label, class, job }, executor, class))
                    }
                }
                OutputKind::Multi { getter, slots, .. } => {
                    let Some(slot_key) = key.clone() else {
                        return Err(internal("multi-output computation without a key"));
                    };
                    let slot = slots.entry(slot_key.clone()).or_insert_with(CacheSlot::new);
                    if !force && slot.value.is_some() && slot.version == version {
                        slot.revalidate();
                        None
                    } else {
                        slot.state = SlotState::Computing;
                        let getter = getter.clone();
                        let job: Job = Box::new(move || {
                            let guard = lock_object(&object);
                            getter(&**guard, &slot_key).map(JobOutput::Value)
                        });
                        Some((WorkItem { label, class, job }, executor, class))
                    }
                }
                OutputKind::Macro { .. } => {
                    return Err(internal("macro output reached the scheduler"))
                }
            }
        };
        match prepared {
            None => {
                tracing::trace!(?unit, "inputs unchanged; cached value stands");
                ws.complete(&unit, Outcome::Unchanged);
                Ok(())
            }
            Some((item, executor, class)) => self.dispatch(unit, item, executor, class, ws).await,
        }
    }

    async fn start_deliver(
        &mut self,
        unit: UnitId,
        edge_index: EdgeIndex,
        fan_key: Option<Key>,
        ws: &mut WaveState,
    ) -> Result<(), ExecutionError> {
        let Some((source_node, target_node)) = self.graph.endpoints(edge_index) else {
            ws.complete(&unit, Outcome::Skipped);
            return Ok(());
        };
        let (source_port, source_key, target_port, pending, parked, bound_id) = {
            let Some(edge) = self.graph.edge(edge_index) else {
                ws.complete(&unit, Outcome::Skipped);
                return Ok(());
            };
            let bound_id = match (&edge.binding, &fan_key) {
                (EdgeBinding::Fan(map), Some(k)) => map.get(k).copied(),
                (EdgeBinding::Data(id), _) => *id,
                _ => None,
            };
            (
                edge.source_port,
                edge.source_key.clone(),
                edge.target_port,
                edge.pending,
                edge.parked.clone(),
                bound_id,
            )
        };

        let get_key = fan_key.clone().or_else(|| source_key.clone());
        let upstream_unit = UnitId::Get {
            node: source_node,
            port: source_port,
            key: get_key.clone(),
        };
        let upstream_fresh = match ws.outcome(&upstream_unit) {
            Some(Outcome::Computed) => true,
            Some(_) => false,
            None => {
                pending && self.slot_state(source_node, source_port, &get_key)
                    == Some(SlotState::Valid)
            }
        };
        let candidate = if upstream_fresh {
            self.slot_value(source_node, source_port, &get_key)
        } else {
            parked
        };
        let Some(value) = candidate else {
            // the announcement never became a value; un-announce
            if fan_key.is_none() {
                if let Some(edge) = self.graph.edge_mut(edge_index) {
                    edge.pending = false;
                }
            }
            ws.complete(&unit, Outcome::Skipped);
            return Ok(());
        };

        let passes = {
            let cell = self.graph.node(target_node).map_err(gone)?;
            match &cell.table.inputs[target_port].notify_condition {
                None => true,
                Some(condition) => {
                    let guard = lock_object(&cell.object);
                    condition(&**guard, bound_id, &value)
                }
            }
        };
        if !passes {
            tracing::debug!(edge = ?edge_index, "delivery withheld by notify condition");
            if let Some(edge) = self.graph.edge_mut(edge_index) {
                edge.parked = Some(value);
                if fan_key.is_none() {
                    edge.pending = false;
                }
            }
            ws.complete(&unit, Outcome::Skipped);
            return Ok(());
        }

        let (item, executor, class) = {
            let default_executor = self.executor.clone();
            let cell = self.graph.node(target_node).map_err(gone)?;
            let object = cell.object.clone();
            let input = &cell.table.inputs[target_port];
            let label = format!("{}.{}", cell.name, input.name);
            let class = input.parallelization;
            let executor = input.executor.clone().unwrap_or(default_executor);
            let job: Job = match &input.kind {
                InputKind::Single { setter } => {
                    let setter = setter.clone();
                    Box::new(move || {
                        let mut guard = lock_object(&object);
                        setter(&mut **guard, value)?;
                        Ok(JobOutput::Done)
                    })
                }
                InputKind::Multi {
                    add,
                    remove,
                    replace,
                } => {
                    let add = add.clone();
                    let remove = remove.clone();
                    let replace = replace.clone();
                    Box::new(move || {
                        let mut guard = lock_object(&object);
                        let target = &mut **guard;
                        let id = match bound_id {
                            Some(id) => match &replace {
                                Some(replace) => replace(target, id, value)?,
                                None => {
                                    remove(target, id)?;
                                    add(target, value)?
                                }
                            },
                            None => add(target, value)?,
                        };
                        Ok(JobOutput::Data(id))
                    })
                }
                InputKind::Macro { .. } => {
                    return Err(internal("macro input reached the scheduler"))
                }
            };
            (WorkItem { label, class, job }, executor, class)
        };
        self.dispatch(unit, item, executor, class, ws).await
    }

    /// Runs the keys producer of a fanned multi-output, removes
    /// departed elements downstream and plans per-key work. Runs
    /// inline on the driver; key producers are bookkeeping, not
    /// computations.
    fn start_expand(
        &mut self,
        unit: UnitId,
        edge_index: EdgeIndex,
        ws: &mut WaveState,
    ) -> Result<(), ExecutionError> {
        let Some((source_node, target_node)) = self.graph.endpoints(edge_index) else {
            ws.complete(&unit, Outcome::Skipped);
            return Ok(());
        };
        let (source_port, target_port, bound) = {
            let Some(edge) = self.graph.edge(edge_index) else {
                ws.complete(&unit, Outcome::Skipped);
                return Ok(());
            };
            let bound = match &edge.binding {
                EdgeBinding::Fan(map) => map.clone(),
                _ => HashMap::new(),
            };
            (edge.source_port, edge.target_port, bound)
        };

        let keys = {
            let cell = self.graph.node(source_node).map_err(gone)?;
            let label = cell.port_label(source_port);
            match &cell.table.outputs[source_port].kind {
                OutputKind::Multi {
                    keys: Some(producer),
                    ..
                } => {
                    let guard = lock_object(&cell.object);
                    producer(&**guard).map_err(|source| ExecutionError::ComputationFailed {
                        port: label,
                        source,
                    })?
                }
                _ => Vec::new(),
            }
        };
        tracing::debug!(edge = ?edge_index, key_count = keys.len(), "expanding keyed fan-out");

        let mut retained = HashMap::new();
        let mut departed = Vec::new();
        for (key, id) in bound {
            if keys.contains(&key) {
                retained.insert(key, id);
            } else {
                departed.push(id);
            }
        }
        if !departed.is_empty() {
            self.run_multi_removals(target_node, target_port, &departed)?;
        }
        if let Some(edge) = self.graph.edge_mut(edge_index) {
            edge.binding = EdgeBinding::Fan(retained);
            edge.pending = false;
            edge.parked = None;
        }

        let dependents = ws
            .units
            .get(&unit)
            .map(|entry| entry.dependents.clone())
            .unwrap_or_default();
        for key in keys {
            let deliver = UnitId::Deliver {
                edge: edge_index,
                key: Some(key.clone()),
            };
            if !ws.insert_unit(deliver.clone()) {
                continue;
            }
            // whoever waited for the fan now waits for each delivery
            for dependent in &dependents {
                if let Some(entry) = ws.units.get_mut(dependent) {
                    entry.deps_remaining += 1;
                }
                if let Some(entry) = ws.units.get_mut(&deliver) {
                    entry.dependents.push(dependent.clone());
                }
            }
            if let Planned::Unit(dep) =
                self.plan_get(source_node, source_port, Some(key), false, ws)?
            {
                ws.link(&dep, &deliver);
            }
            ws.enqueue_if_ready(&deliver);
        }
        ws.complete(&unit, Outcome::Expanded);
        Ok(())
    }

    async fn dispatch(
        &mut self,
        unit: UnitId,
        item: WorkItem,
        executor: Arc<dyn WorkExecutor>,
        class: Parallelization,
        ws: &mut WaveState,
    ) -> Result<(), ExecutionError> {
        if class == Parallelization::Sequential {
            match executor.run(item).await {
                Ok(output) => self.apply_completion(unit, output, ws),
                Err(error) => {
                    self.note_failure(&unit);
                    Err(error)
                }
            }
        } else {
            ws.active += 1;
            let tx = ws.tx.clone();
            let cancel = ws.cancel.clone();
            tokio::spawn(async move {
                let result = if cancel.is_cancelled() {
                    Err(ExecutionError::Internal {
                        message: "wave aborted before dispatch".into(),
                    })
                } else {
                    executor.run(item).await
                };
                let _ = tx.send((unit, result));
            });
            Ok(())
        }
    }

    fn apply_completion(
        &mut self,
        unit: UnitId,
        output: JobOutput,
        ws: &mut WaveState,
    ) -> Result<(), ExecutionError> {
        match &unit {
            UnitId::Get { node, port, key } => {
                let JobOutput::Value(value) = output else {
                    return Err(internal("getter completed without a value"));
                };
                {
                    let cell = self.graph.node_mut(*node).map_err(gone)?;
                    let version = cell.version;
                    let output_port = &mut cell.table.outputs[*port];
                    match &mut output_port.kind {
                        OutputKind::Single { slot, .. } => slot.store(value.clone(), version),
                        OutputKind::Multi { slots, .. } => {
                            if let Some(k) = key {
                                slots
                                    .entry(k.clone())
                                    .or_insert_with(CacheSlot::new)
                                    .store(value.clone(), version);
                            }
                        }
                        OutputKind::Macro { .. } => {}
                    }
                }
                ws.results.insert((*node, *port, key.clone()), value);
                self.plan_notify_deliveries(*node, *port, key, ws)?;
                ws.complete(&unit, Outcome::Computed);
            }
            UnitId::Deliver { edge, key } => {
                if let JobOutput::Data(id) = output {
                    if let Some(cell) = self.graph.edge_mut(*edge) {
                        match (&mut cell.binding, key) {
                            (EdgeBinding::Fan(map), Some(k)) => {
                                map.insert(k.clone(), id);
                            }
                            (EdgeBinding::Data(slot), _) => {
                                *slot = Some(id);
                            }
                            _ => {}
                        }
                    }
                }
                if let Some(cell) = self.graph.edge_mut(*edge) {
                    if key.is_none() {
                        cell.pending = false;
                    }
                    cell.parked = None;
                }
                // the setter ran: downstream caches are stale now
                if let Some((_, target_node)) = self.graph.endpoints(*edge) {
                    if let Ok(cell) = self.graph.node_mut(target_node) {
                        cell.version += 1;
                    }
                }
                ws.complete(&unit, Outcome::Delivered);
            }
            UnitId::Expand { .. } => {
                return Err(internal("expand units complete inline"));
            }
        }
        Ok(())
    }

    // === cleanup and diagnostics ===

    /// Runs the remove helper of a multi-input for each id, inline.
    pub(crate) fn run_multi_removals(
        &mut self,
        node: NodeId,
        input_port: usize,
        ids: &[DataId],
    ) -> Result<(), ExecutionError> {
        let (remove, object, label) = {
            let cell = self.graph.node(node).map_err(gone)?;
            let input = &cell.table.inputs[input_port];
            let InputKind::Multi { remove, .. } = &input.kind else {
                return Err(internal("element removal on a non-collecting input"));
            };
            (
                remove.clone(),
                cell.object.clone(),
                format!("{}.{}", cell.name, input.name),
            )
        };
        {
            let mut guard = lock_object(&object);
            for id in ids {
                remove(&mut **guard, *id).map_err(|source| {
                    ExecutionError::ComputationFailed {
                        port: label.clone(),
                        source,
                    }
                })?;
            }
        }
        if let Ok(cell) = self.graph.node_mut(node) {
            cell.version += 1;
        }
        Ok(())
    }

    pub(crate) fn slot_state(
        &self,
        node: NodeId,
        port: usize,
        key: &Option<Key>,
    ) -> Option<SlotState> {
        let cell = self.graph.node(node).ok()?;
        match &cell.table.outputs[port].kind {
            OutputKind::Single { slot, .. } => Some(slot.state),
            OutputKind::Multi { slots, .. } => {
                key.as_ref().and_then(|k| slots.get(k)).map(|slot| slot.state)
            }
            OutputKind::Macro { .. } => None,
        }
    }

    pub(crate) fn slot_value(
        &self,
        node: NodeId,
        port: usize,
        key: &Option<Key>,
    ) -> Option<Value> {
        let cell = self.graph.node(node).ok()?;
        match &cell.table.outputs[port].kind {
            OutputKind::Single { slot, .. } => slot.value.clone(),
            OutputKind::Multi { slots, .. } => {
                key.as_ref().and_then(|k| slots.get(k)).and_then(|slot| slot.value.clone())
            }
            OutputKind::Macro { .. } => None,
        }
    }

    fn note_failure(&mut self, unit: &UnitId) {
        if let UnitId::Get { node, port, key } = unit {
            if let Ok(cell) = self.graph.node_mut(*node) {
                match &mut cell.table.outputs[*port].kind {
                    OutputKind::Single { slot, .. } => slot.invalidate(),
                    OutputKind::Multi { slots, .. } => {
                        if let Some(k) = key {
                            if let Some(slot) = slots.get_mut(k) {
                                slot.invalidate();
                            }
                        }
                    }
                    OutputKind::Macro { .. } => {}
                }
            }
        }
    }

    /// Awaits in-flight workers and discards their results, then drops
    /// computing slots back to their announced state.
    async fn abort_wave(&mut self, ws: &mut WaveState) {
        ws.cancel.cancel();
        while ws.active > 0 {
            match ws.rx.recv().await {
                Some((unit, result)) => {
                    ws.active -= 1;
                    if result.is_err() {
                        self.note_failure(&unit);
                    }
                }
                None => break,
            }
        }
        for (unit, entry) in &ws.units {
            if entry.done {
                continue;
            }
            let UnitId::Get { node, port, key } = unit else {
                continue;
            };
            let Ok(cell) = self.graph.node_mut(*node) else {
                continue;
            };
            let slot = match &mut cell.table.outputs[*port].kind {
                OutputKind::Single { slot, .. } => Some(slot),
                OutputKind::Multi { slots, .. } => {
                    key.as_ref().and_then(|k| slots.get_mut(k))
                }
                OutputKind::Macro { .. } => None,
            };
            if let Some(slot) = slot {
                if slot.state == SlotState::Computing {
                    if slot.value.is_some() {
                        slot.state = SlotState::Announced;
                    } else {
                        slot.state = SlotState::Empty;
                    }
                }
            }
        }
    }

    fn stuck_outputs(&self, ws: &WaveState) -> Vec<String> {
        let mut stuck = Vec::new();
        for (unit, entry) in &ws.units {
            if entry.done {
                continue;
            }
            if let UnitId::Get { node, port, key } = unit {
                let label = self
                    .graph
                    .node(*node)
                    .map(|cell| cell.port_label(*port))
                    .unwrap_or_else(|_| format!("{}#{}", node, port));
                stuck.push(match key {
                    Some(k) => format!("{}[{}]", label, k),
                    None => label,
                });
            }
        }
        stuck.sort();
        stuck
    }
}
