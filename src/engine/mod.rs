// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod announce;
pub mod executor;
pub mod slot;
pub mod wave;


pub use executor::{Executor, Parallelization, WorkExecutor};
