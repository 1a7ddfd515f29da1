// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The announcement phase of the update protocol.
//!
//! A setter call, a new edge or an edge removal starts an epoch. The
//! affected outputs are tagged announced, the change is propagated
//! top-down across the connection graph, and every edge the walk
//! crosses is marked pending so later waves know what is stale.
//!
//! # Walk Structure
//!
//! ```text
//! setter runs -> affected outputs tagged -> out-edges marked pending
//!                                                |
//!                     condition gate per edge <--+
//!                                |
//!              target's affected outputs, recursively
//! ```
//!
//! Announcements deduplicate by output identity: fan-in re-announcing
//! an output within one epoch is a no-op, which also terminates the
//! walk on graphs that turn out to be cyclic. An edge whose target
//! declares an announce condition is still marked pending when the
//! condition rejects, but nothing downstream of it is tagged; the
//! branch stays dormant until a later wave re-evaluates the gate.
//!
//! # Non-Lazy Collection
//!
//! While walking, the inputs that must realize the change right away
//! are collected into [`NonLazySinks`]. An input joins when its
//! laziness is at least as eager as the situation that started the
//! epoch: a plain announcement collects `OnAnnounce` and `OnConnect`
//! inputs, while edge creation collects only `OnConnect` ones. The
//! caller hands the collected sinks to the wave scheduler as demands
//! once the walk has settled.

use std::collections::HashSet;

use crate::errors::ConnectError;
use crate::graph::{EdgeBinding, NodeId};
use crate::network::Network;
use crate::ports::descriptor::OutputKind;
use crate::ports::Laziness;

/// The inputs that demand immediate realization of the running epoch.
pub(crate) struct NonLazySinks {
    situation: Laziness,
    seen: HashSet<(NodeId, usize)>,
    pub inputs: Vec<(NodeId, usize)>,
}

impl NonLazySinks {
    pub(crate) fn new(situation: Laziness) -> Self {
        Self {
            situation,
            seen: HashSet::new(),
            inputs: Vec::new(),
        }
    }

    /// Adds an input if its laziness is eager enough for the epoch's
    /// situation.
    pub(crate) fn add(&mut self, node: NodeId, port: usize, laziness: Laziness) {
        if laziness >= self.situation && self.seen.insert((node, port)) {
            self.inputs.push((node, port));
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

impl Network {
    /// Announces a state change on an input: tags every output it
    /// affects and walks downstream from each.
    pub(crate) fn announce_input_downstream(
        &mut self,
        node: NodeId,
        input_port: usize,
        epoch: u64,
        sinks: &mut NonLazySinks,
    ) -> Result<(), ConnectError> {
        let affected = self.graph.node(node)?.table.inputs[input_port]
            .affected
            .clone();
        for output_port in affected {
            self.announce_output(node, output_port, epoch, sinks)?;
        }
        Ok(())
    }

    /// Tags one output as announced and propagates through its edges.
    pub(crate) fn announce_output(
        &mut self,
        node: NodeId,
        output_port: usize,
        epoch: u64,
        sinks: &mut NonLazySinks,
    ) -> Result<(), ConnectError> {
        {
            let cell = self.graph.node_mut(node)?;
            let output = &mut cell.table.outputs[output_port];
            if let OutputKind::Macro { target } = &output.kind {
                let target = target.clone();
                return self.announce_output(target.node, target.port, epoch, sinks);
            }
            if output.last_announce_epoch == epoch {
                return Ok(());
            }
            output.last_announce_epoch = epoch;
            match &mut output.kind {
                OutputKind::Single { slot, .. } => slot.announce(),
                OutputKind::Multi { slots, .. } => {
                    for slot in slots.values_mut() {
                        slot.announce();
                    }
                }
                OutputKind::Macro { .. } => {}
            }
            tracing::debug!(
                output = %cell.port_label(output_port),
                epoch,
                "announced output"
            );
        }

        for edge_index in self.graph.edges_out(node) {
            let Some(edge) = self.graph.edge(edge_index) else {
                continue;
            };
            if edge.source_port != output_port {
                continue;
            }
            let target_port = edge.target_port;
            let bound_id = match &edge.binding {
                EdgeBinding::Data(id) => *id,
                _ => None,
            };
            let Some((_, target_node)) = self.graph.endpoints(edge_index) else {
                continue;
            };
            if let Some(edge) = self.graph.edge_mut(edge_index) {
                edge.pending = true;
            }

            let (passes, laziness, affected) = {
                let target_cell = self.graph.node(target_node)?;
                let input = &target_cell.table.inputs[target_port];
                let passes = match &input.announce_condition {
                    None => true,
                    Some(condition) => {
                        let guard = target_cell.lock();
                        condition(&**guard, bound_id)
                    }
                };
                (passes, input.laziness, input.affected.clone())
            };
            if !passes {
                tracing::debug!(edge = ?edge_index, "announcement suppressed by condition");
                continue;
            }
            sinks.add(target_node, target_port, laziness);
            for downstream_output in affected {
                self.announce_output(target_node, downstream_output, epoch, sinks)?;
            }
        }
        Ok(())
    }
}
