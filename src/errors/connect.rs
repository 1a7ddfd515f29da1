// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Errors raised while looking up ports or mutating the connection
//! graph. The graph is left unchanged when any of these is returned.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectError {
    /// The port kinds at the two endpoints cannot be wired together,
    /// e.g. a key designator on a plain output.
    #[error("cannot connect '{source_port}' to '{target_port}': {reason}")]
    KindMismatch {
        source_port: String,
        target_port: String,
        reason: String,
    },

    /// A multi-output needs a key designator for this connection, or a
    /// keyed view was requested where none exists.
    #[error("'{port}' requires a key designator here")]
    MissingKey { port: String },

    /// No port with that name is declared on the processing object.
    #[error("no {kind} port named '{name}' on node '{node}'")]
    UnknownPort {
        node: String,
        kind: &'static str,
        name: String,
    },

    /// The node handle refers to a processing object that has been
    /// removed from the network.
    #[error("node handle {0} no longer refers to a live processing object")]
    NodeGone(u64),

    /// An input port declared that it affects an output that does not
    /// exist on the same object.
    #[error("input '{input}' affects undeclared output '{output}'")]
    UnknownAffectedOutput { input: String, output: String },

    /// Macro ports that re-export each other form a cycle.
    #[error("macro port '{port}' expands into itself")]
    MacroCycle { port: String },
}
