// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Type-erased port descriptors.
//!
//! The [`super::Ports`] builder erases the user's typed closures into
//! the function types here; the resulting [`PortTable`] is the
//! per-instance record the engine walks: which setter belongs to which
//! input, which outputs an input affects (and the inverse), laziness,
//! caching, parallelization and the condition predicates.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::executor::{Parallelization, WorkExecutor};
use crate::engine::slot::CacheSlot;
use crate::errors::ConnectError;
use crate::graph::{InputRef, OutputRef};
use crate::ports::multi_input_data::DataId;
use crate::ports::Laziness;
use crate::value::{Key, Value};

pub(crate) type SetterFn =
    Arc<dyn Fn(&mut dyn Any, Value) -> anyhow::Result<()> + Send + Sync>;
pub(crate) type GetterFn =
    Arc<dyn Fn(&dyn Any) -> anyhow::Result<Value> + Send + Sync>;
pub(crate) type MultiAddFn =
    Arc<dyn Fn(&mut dyn Any, Value) -> anyhow::Result<DataId> + Send + Sync>;
pub(crate) type MultiRemoveFn =
    Arc<dyn Fn(&mut dyn Any, DataId) -> anyhow::Result<()> + Send + Sync>;
pub(crate) type MultiReplaceFn =
    Arc<dyn Fn(&mut dyn Any, DataId, Value) -> anyhow::Result<DataId> + Send + Sync>;
pub(crate) type KeyedGetterFn =
    Arc<dyn Fn(&dyn Any, &Key) -> anyhow::Result<Value> + Send + Sync>;
pub(crate) type KeysFn =
    Arc<dyn Fn(&dyn Any) -> anyhow::Result<Vec<Key>> + Send + Sync>;
pub(crate) type AnnounceConditionFn =
    Arc<dyn Fn(&dyn Any, Option<DataId>) -> bool + Send + Sync>;
pub(crate) type NotifyConditionFn =
    Arc<dyn Fn(&dyn Any, Option<DataId>, &Value) -> bool + Send + Sync>;

/// What an input port does when a value arrives.
pub(crate) enum InputKind {
    /// Plain setter.
    Single { setter: SetterFn },
    /// Collecting setter: add / remove and optionally replace, all
    /// speaking [`DataId`].
    Multi {
        add: MultiAddFn,
        remove: MultiRemoveFn,
        replace: Option<MultiReplaceFn>,
    },
    /// Macro port re-exporting inner inputs of a sub-graph; a call or
    /// connection fans out to each target in declaration order.
    Macro { targets: Vec<InputRef> },
}

pub(crate) struct InputPort {
    pub name: &'static str,
    /// Output names this input affects, as declared.
    pub affects: Vec<&'static str>,
    /// Same, resolved to output indices at table construction.
    pub affected: Vec<usize>,
    pub laziness: Laziness,
    pub parallelization: Parallelization,
    pub executor: Option<Arc<dyn WorkExecutor>>,
    pub announce_condition: Option<AnnounceConditionFn>,
    pub notify_condition: Option<NotifyConditionFn>,
    pub kind: InputKind,
    /// Data ids bound by direct calls through keyed virtual
    /// single-input views (`input.at(key)`), per key.
    pub virtual_bindings: HashMap<Key, DataId>,
}

impl InputPort {
    pub(crate) fn is_multi(&self) -> bool {
        matches!(self.kind, InputKind::Multi { .. })
    }
}

/// What an output port produces.
pub(crate) enum OutputKind {
    Single {
        getter: GetterFn,
        slot: CacheSlot,
    },
    /// Keyed getter with an optional producer for the current key set;
    /// one cache slot per key.
    Multi {
        getter: KeyedGetterFn,
        keys: Option<KeysFn>,
        slots: HashMap<Key, CacheSlot>,
    },
    /// Macro port aliasing one inner output of a sub-graph.
    Macro { target: OutputRef },
}

pub(crate) struct OutputPort {
    pub name: &'static str,
    pub caching: bool,
    pub parallelization: Parallelization,
    pub executor: Option<Arc<dyn WorkExecutor>>,
    /// Input indices this output depends on (inverse of `affects`).
    pub depends: Vec<usize>,
    /// Epoch of the last announcement, for per-epoch deduplication.
    pub last_announce_epoch: u64,
    pub kind: OutputKind,
}

impl OutputPort {
    pub(crate) fn is_multi(&self) -> bool {
        matches!(self.kind, OutputKind::Multi { .. })
    }
}

/// The per-instance port record: all declared ports plus the
/// input/output cross-reference maps.
pub(crate) struct PortTable {
    pub inputs: Vec<InputPort>,
    pub outputs: Vec<OutputPort>,
    pub input_names: HashMap<&'static str, usize>,
    pub output_names: HashMap<&'static str, usize>,
}

impl PortTable {
    /// Resolves declared `affects` names to indices and builds the
    /// inverse output -> inputs map.
    pub(crate) fn build(
        mut inputs: Vec<InputPort>,
        mut outputs: Vec<OutputPort>,
    ) -> Result<Self, ConnectError> {
        let mut input_names = HashMap::new();
        for (index, input) in inputs.iter().enumerate() {
            input_names.insert(input.name, index);
        }
        let mut output_names = HashMap::new();
        for (index, output) in outputs.iter().enumerate() {
            output_names.insert(output.name, index);
        }
        for (input_index, input) in inputs.iter_mut().enumerate() {
            for affected_name in &input.affects {
                let output_index = *output_names.get(affected_name).ok_or_else(|| {
                    ConnectError::UnknownAffectedOutput {
                        input: input.name.to_string(),
                        output: affected_name.to_string(),
                    }
                })?;
                input.affected.push(output_index);
                outputs[output_index].depends.push(input_index);
            }
        }
        Ok(Self {
            inputs,
            outputs,
            input_names,
            output_names,
        })
    }

    pub(crate) fn input_index(&self, name: &str) -> Option<usize> {
        self.input_names.get(name).copied()
    }

    pub(crate) fn output_index(&self, name: &str) -> Option<usize> {
        self.output_names.get(name).copied()
    }
}
