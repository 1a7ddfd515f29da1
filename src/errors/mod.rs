// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod config;
mod connect;
mod execution;

pub use config::ConfigError;
pub use connect::ConnectError;
pub use execution::ExecutionError;

/// Umbrella error for the public `Network` surface.
///
/// Graph-mutation problems and wave failures keep their own enums;
/// methods that can both rewire the graph and trigger a wave (connect,
/// disconnect, setter calls) return this.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

pub type Result<T> = std::result::Result<T, Error>;
