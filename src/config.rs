// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Engine configuration.
//!
//! Deployments that want to size the worker pools from a file instead
//! of code can load an [`EngineConfig`] from YAML and build the
//! network with `Network::from_config`:
//!
//! ```yaml
//! # patchbay.yaml
//! worker_threads: 8
//! worker_processes: 2
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::executor::Executor;
use crate::errors::ConfigError;

/// Worker pool sizing for a network's default executor.
///
/// A width of zero disables that pool; its computations run inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Width of the shared worker-thread pool.
    pub worker_threads: usize,
    /// Width of the bulkhead pool for heavyweight ports.
    pub worker_processes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            worker_processes: 0,
        }
    }
}

impl EngineConfig {
    pub fn executor(&self) -> Executor {
        Executor::new(self.worker_threads, self.worker_processes)
    }
}

/// Loads an [`EngineConfig`] from a YAML file.
pub fn load_config(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&text)?)
}
