// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Per-output memoization cells.
//!
//! Every output port (and every key of a multi-output) owns one
//! [`CacheSlot`]. The slot's tag drives the update protocol: a valid
//! slot answers fetches from cache, an announced slot forces a
//! recomputation check, a computing slot lets concurrent demand join
//! the in-flight run instead of starting a second one.

use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SlotState {
    /// Nothing computed yet, or invalidated by a failed computation.
    Empty,
    /// The cached value equals a recomputation against the current
    /// values of all declared input dependencies.
    Valid,
    /// An announcement marked the cached value as possibly stale.
    Announced,
    /// A getter run is in flight for this slot in the current wave.
    Computing,
}

pub(crate) struct CacheSlot {
    pub state: SlotState,
    pub value: Option<Value>,
    /// Node state version the value was computed against; a getter is
    /// skipped when the version still matches (the announcement never
    /// materialized into a state change).
    pub version: u64,
}

impl CacheSlot {
    pub(crate) fn new() -> Self {
        Self {
            state: SlotState::Empty,
            value: None,
            version: 0,
        }
    }

    /// Marks the slot for the current announcement wave. An empty slot
    /// stays empty; it already forces a computation.
    pub(crate) fn announce(&mut self) {
        if self.state == SlotState::Valid {
            self.state = SlotState::Announced;
        }
    }

    /// Stores a freshly computed value.
    pub(crate) fn store(&mut self, value: Value, version: u64) {
        self.state = SlotState::Valid;
        self.value = Some(value);
        self.version = version;
    }

    /// Resets after a failed computation; announced dependents stay
    /// announced so a retry re-runs the getter.
    pub(crate) fn invalidate(&mut self) {
        self.state = SlotState::Empty;
        self.value = None;
    }

    /// Confirms that the announcement did not change anything and the
    /// cached value is still good.
    pub(crate) fn revalidate(&mut self) {
        if self.value.is_some() {
            self.state = SlotState::Valid;
        } else {
            self.state = SlotState::Empty;
        }
    }
}
