// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Errors surfaced by the update engine while running a wave.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A user-supplied getter or setter returned an error. The cache
    /// slot of the failed output is reset to empty; announced
    /// dependents stay announced, so a retry re-runs the computation.
    #[error("computation of '{port}' failed: {source}")]
    ComputationFailed {
        port: String,
        source: anyhow::Error,
    },

    /// The wave stopped making progress: no computation is ready, none
    /// is running, and demanded outputs remain unsettled. Either the
    /// graph has a cycle or a dependency was never produced.
    #[error("cycle or missing dependency; stuck outputs: {}", .outputs.join(", "))]
    CycleOrDeadlock { outputs: Vec<String> },

    /// A port was dispatched to an executor that has been shut down.
    #[error("executor has been shut down")]
    ExecutorShutdown,

    /// An engine invariant was violated.
    #[error("internal error: {message}")]
    Internal { message: String },
}
