// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Port declarations: how methods of a processing object become
//! connectors.
//!
//! A processing object is any `Send` value. Its ports are declared
//! with a [`Ports`] builder and handed to `Network::add_node` together
//! with the object; the builder erases the typed closures into a
//! [`descriptor::PortTable`] that the engine can walk without knowing
//! the object's type.
//!
//! # Port Kinds
//!
//! * **Input**: a setter closure plus the names of the outputs it
//!   affects; the name list is the local dependency declaration the
//!   announce walk follows
//! * **Output**: a getter closure with a cache slot, caching on by
//!   default
//! * **Multi-input**: an add closure returning a [`DataId`], a
//!   required remove helper, and an optional replace helper that lets
//!   upstream re-emissions keep their position
//! * **Multi-output**: a keyed getter with an optional producer for
//!   the current key set
//! * **Macro input / macro output**: re-exports of inner ports of a
//!   sub-graph, resolved away before the engine sees them
//!
//! # Per-Port Configuration
//!
//! Each builder returns a small configuration handle for laziness,
//! caching, parallelization and the announce/notify condition
//! predicates. Everything configurable at declaration time can also
//! be changed later through the network's setters, which is what the
//! macro layer fans out.

pub mod builder;
pub mod descriptor;
pub mod multi_input_data;

pub use builder::Ports;
pub use multi_input_data::{DataId, MultiInputData};

/// When an input port pulls a value on its own, without anybody
/// fetching a downstream output.
///
/// The variants are ordered from laziest to most eager; an input pulls
/// whenever its laziness is at least as eager as the situation at
/// hand (an announcement, a notification, a new connection).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Laziness {
    /// Never pulls; the value materializes only when a downstream
    /// output is fetched.
    OnRequest,
    /// Pulls as soon as an upstream output has been computed in the
    /// current wave because of somebody else's demand.
    OnNotify,
    /// Pulls as soon as an upstream announcement reaches it, fetching
    /// the branch without any external request.
    OnAnnounce,
    /// Like `OnAnnounce`, and additionally pulls the current upstream
    /// value immediately when an edge to it is created.
    OnConnect,
}

#[cfg(test)]
mod tests {
    use super::Laziness;

    #[test]
    fn laziness_orders_from_lazy_to_eager() {
        assert!(Laziness::OnRequest < Laziness::OnNotify);
        assert!(Laziness::OnNotify < Laziness::OnAnnounce);
        assert!(Laziness::OnAnnounce < Laziness::OnConnect);
    }

    #[test]
    fn pull_threshold_is_at_least() {
        // An announcement wave collects every input whose laziness is
        // at least OnAnnounce.
        let situation = Laziness::OnAnnounce;
        assert!(Laziness::OnConnect >= situation);
        assert!(Laziness::OnAnnounce >= situation);
        assert!(Laziness::OnNotify < situation);
    }
}
