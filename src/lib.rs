// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! # patchbay
//!
//! A reactive dataflow engine. Methods of plain processing objects
//! are declared as *connectors*, typed input and output ports, and
//! wired into a directed acyclic processing network. When a
//! downstream value is requested, only the nodes whose inputs
//! actually changed are recomputed; results are cached per output,
//! independent branches run in parallel on worker pools, and
//! non-lazy inputs receive changes without anybody asking.
//!
//! The moving parts:
//!
//! * [`Ports`] declares the connectors of a processing object
//! * [`Network`] owns the objects, the edges and the update engine
//! * [`Executor`] runs parallel port computations
//! * [`MultiInputData`] backs collecting (multi-input) ports
//! * [`Laziness`] picks when an input pulls on its own
//!
//! See the [`network`] module for a worked end-to-end example.

pub mod config;   // executor sizing from files
pub mod engine;   // announce walk, wave scheduler, worker pools
pub mod errors;   // error handling
pub mod graph;    // connection arena and handles
pub mod macros;   // macro port resolution
pub mod network;  // public facade
pub mod ports;    // port declarations
pub mod value;    // dynamic values and keys

pub use config::{load_config, EngineConfig};
pub use engine::executor::{Executor, Parallelization, WorkExecutor};
pub use errors::{ConfigError, ConnectError, Error, ExecutionError, Result};
pub use graph::{InputRef, NodeId, OutputRef};
pub use network::Network;
pub use ports::{DataId, Laziness, MultiInputData, Ports};
pub use value::{Key, Value};
