// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Typed port declaration builder.
//!
//! [`Ports`] plays the role the original decorator surface plays in a
//! dynamic language: it names the methods of a processing object that
//! become connectors. Closures are typed against the concrete object
//! and erased immediately, so the finished declaration carries no
//! generics into the graph.
//!
//! ```
//! use patchbay::{Ports, Value};
//!
//! struct Doubler {
//!     value: f64,
//! }
//!
//! let mut ports = Ports::<Doubler>::new();
//! ports.input("set_value", &["get_value"], |d, v| {
//!     d.value = v.extract::<f64>()?;
//!     Ok(())
//! });
//! ports.output("get_value", |d| Ok(Value::new(d.value * 2.0)));
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::anyhow;

use crate::engine::executor::Parallelization;
use crate::engine::slot::CacheSlot;
use crate::graph::{InputRef, OutputRef};
use crate::ports::descriptor::{InputKind, InputPort, OutputKind, OutputPort};
use crate::ports::multi_input_data::DataId;
use crate::ports::Laziness;
use crate::value::{Key, Value};

fn typed<T: Send + 'static>(object: &dyn Any) -> anyhow::Result<&T> {
    object
        .downcast_ref::<T>()
        .ok_or_else(|| anyhow!("processing object has unexpected type"))
}

fn typed_mut<T: Send + 'static>(object: &mut dyn Any) -> anyhow::Result<&mut T> {
    object
        .downcast_mut::<T>()
        .ok_or_else(|| anyhow!("processing object has unexpected type"))
}

/// Port declarations for a processing object of type `T`.
pub struct Ports<T> {
    pub(crate) inputs: Vec<InputPort>,
    pub(crate) outputs: Vec<OutputPort>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Send + 'static> Default for Ports<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Ports<T> {
    pub fn new() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Declares an input port with its setter and the names of the
    /// output ports whose values it affects.
    pub fn input<F>(
        &mut self,
        name: &'static str,
        affects: &[&'static str],
        setter: F,
    ) -> InputBuilder<'_, T>
    where
        F: Fn(&mut T, Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.push_input(
            name,
            affects,
            InputKind::Single {
                setter: Arc::new(move |object, value| setter(typed_mut::<T>(object)?, value)),
            },
        )
    }

    /// Declares a multi-input port: `add` collects a new element and
    /// returns its data id, `remove` drops one. A `replace` helper can
    /// be added on the returned builder.
    pub fn multi_input<A, R>(
        &mut self,
        name: &'static str,
        affects: &[&'static str],
        add: A,
        remove: R,
    ) -> MultiInputBuilder<'_, T>
    where
        A: Fn(&mut T, Value) -> anyhow::Result<DataId> + Send + Sync + 'static,
        R: Fn(&mut T, DataId) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let builder = self.push_input(
            name,
            affects,
            InputKind::Multi {
                add: Arc::new(move |object, value| add(typed_mut::<T>(object)?, value)),
                remove: Arc::new(move |object, id| remove(typed_mut::<T>(object)?, id)),
                replace: None,
            },
        );
        MultiInputBuilder { inner: builder }
    }

    /// Declares a macro input that re-exports the given inner inputs;
    /// calls and connections fan out to each target in order.
    pub fn macro_input(&mut self, name: &'static str, targets: Vec<InputRef>) {
        self.push_input(name, &[], InputKind::Macro { targets });
    }

    /// Declares an output port with its getter.
    pub fn output<F>(&mut self, name: &'static str, getter: F) -> OutputBuilder<'_>
    where
        F: Fn(&T) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.push_output(
            name,
            OutputKind::Single {
                getter: Arc::new(move |object| getter(typed::<T>(object)?)),
                slot: CacheSlot::new(),
            },
        )
    }

    /// Declares a multi-output port with its keyed getter. A `keys`
    /// producer can be added on the returned builder.
    pub fn multi_output<G>(&mut self, name: &'static str, getter: G) -> MultiOutputBuilder<'_, T>
    where
        G: Fn(&T, &Key) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let builder = self.push_output(
            name,
            OutputKind::Multi {
                getter: Arc::new(move |object, key| getter(typed::<T>(object)?, key)),
                keys: None,
                slots: HashMap::new(),
            },
        );
        MultiOutputBuilder {
            inner: builder,
            _marker: PhantomData,
        }
    }

    /// Declares a macro output aliasing one inner output.
    pub fn macro_output(&mut self, name: &'static str, target: OutputRef) {
        self.push_output(name, OutputKind::Macro { target });
    }

    fn push_input(
        &mut self,
        name: &'static str,
        affects: &[&'static str],
        kind: InputKind,
    ) -> InputBuilder<'_, T> {
        self.inputs.push(InputPort {
            name,
            affects: affects.to_vec(),
            affected: Vec::new(),
            laziness: Laziness::OnRequest,
            parallelization: Parallelization::Sequential,
            executor: None,
            announce_condition: None,
            notify_condition: None,
            kind,
            virtual_bindings: HashMap::new(),
        });
        InputBuilder {
            port: self.inputs.last_mut().unwrap(),
            _marker: PhantomData,
        }
    }

    fn push_output(&mut self, name: &'static str, kind: OutputKind) -> OutputBuilder<'_> {
        self.outputs.push(OutputPort {
            name,
            caching: true,
            parallelization: Parallelization::Sequential,
            executor: None,
            depends: Vec::new(),
            last_announce_epoch: 0,
            kind,
        });
        OutputBuilder {
            port: self.outputs.last_mut().unwrap(),
        }
    }
}

/// Configuration of a freshly declared input port.
pub struct InputBuilder<'a, T> {
    port: &'a mut InputPort,
    _marker: PhantomData<fn(T)>,
}

impl<'a, T: Send + 'static> InputBuilder<'a, T> {
    pub fn laziness(self, laziness: Laziness) -> Self {
        self.port.laziness = laziness;
        self
    }

    pub fn parallelization(self, parallelization: Parallelization) -> Self {
        self.port.parallelization = parallelization;
        self
    }

    /// Gate for announcements: when the predicate returns false, a
    /// value change upstream of this input is not announced past it.
    pub fn announce_condition<F>(self, condition: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.port.announce_condition = Some(Arc::new(move |object, _id| {
            typed::<T>(object).map(|t| condition(t)).unwrap_or(true)
        }));
        self
    }

    /// Gate for deliveries: when the predicate returns false, the
    /// fetched value is parked instead of handed to the setter.
    pub fn notify_condition<F>(self, condition: F) -> Self
    where
        F: Fn(&T, &Value) -> bool + Send + Sync + 'static,
    {
        self.port.notify_condition = Some(Arc::new(move |object, _id, value| {
            typed::<T>(object).map(|t| condition(t, value)).unwrap_or(true)
        }));
        self
    }
}

/// Configuration of a freshly declared multi-input port.
pub struct MultiInputBuilder<'a, T> {
    inner: InputBuilder<'a, T>,
}

impl<'a, T: Send + 'static> MultiInputBuilder<'a, T> {
    /// Adds a replace helper. With one declared, an upstream
    /// re-emission replaces the bound element in place instead of
    /// removing it and adding the new value at the tail.
    pub fn replace<F>(self, replace: F) -> Self
    where
        F: Fn(&mut T, DataId, Value) -> anyhow::Result<DataId> + Send + Sync + 'static,
    {
        if let InputKind::Multi {
            replace: replace_slot,
            ..
        } = &mut self.inner.port.kind
        {
            *replace_slot = Some(Arc::new(move |object, id, value| {
                replace(typed_mut::<T>(object)?, id, value)
            }));
        }
        self
    }

    pub fn laziness(mut self, laziness: Laziness) -> Self {
        self.inner = self.inner.laziness(laziness);
        self
    }

    pub fn parallelization(mut self, parallelization: Parallelization) -> Self {
        self.inner = self.inner.parallelization(parallelization);
        self
    }

    /// As [`InputBuilder::announce_condition`]; the predicate also
    /// receives the data id bound to the announcing edge, when one
    /// has been bound already.
    pub fn announce_condition<F>(self, condition: F) -> Self
    where
        F: Fn(&T, Option<DataId>) -> bool + Send + Sync + 'static,
    {
        self.inner.port.announce_condition = Some(Arc::new(move |object, id| {
            typed::<T>(object).map(|t| condition(t, id)).unwrap_or(true)
        }));
        self
    }

    /// As [`InputBuilder::notify_condition`], with the bound data id.
    pub fn notify_condition<F>(self, condition: F) -> Self
    where
        F: Fn(&T, Option<DataId>, &Value) -> bool + Send + Sync + 'static,
    {
        self.inner.port.notify_condition = Some(Arc::new(move |object, id, value| {
            typed::<T>(object)
                .map(|t| condition(t, id, value))
                .unwrap_or(true)
        }));
        self
    }
}

/// Configuration of a freshly declared output port.
pub struct OutputBuilder<'a> {
    port: &'a mut OutputPort,
}

impl<'a> OutputBuilder<'a> {
    pub fn caching(self, caching: bool) -> Self {
        self.port.caching = caching;
        self
    }

    pub fn parallelization(self, parallelization: Parallelization) -> Self {
        self.port.parallelization = parallelization;
        self
    }
}

/// Configuration of a freshly declared multi-output port.
pub struct MultiOutputBuilder<'a, T> {
    inner: OutputBuilder<'a>,
    _marker: PhantomData<fn(T)>,
}

impl<'a, T: Send + 'static> MultiOutputBuilder<'a, T> {
    /// Adds the producer for the current key set. Without one, a
    /// connection to a multi-input expands to no edges until keys are
    /// supplied by other means (keyed views).
    pub fn keys<F>(self, keys: F) -> Self
    where
        F: Fn(&T) -> anyhow::Result<Vec<Key>> + Send + Sync + 'static,
    {
        if let OutputKind::Multi { keys: keys_slot, .. } = &mut self.inner.port.kind {
            *keys_slot = Some(Arc::new(move |object| keys(typed::<T>(object)?)));
        }
        self
    }

    pub fn caching(mut self, caching: bool) -> Self {
        self.inner = self.inner.caching(caching);
        self
    }

    pub fn parallelization(mut self, parallelization: Parallelization) -> Self {
        self.inner = self.inner.parallelization(parallelization);
        self
    }
}
