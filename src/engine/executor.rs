// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Execution of user computations on bounded worker pools.
//!
//! The wave driver is a single-threaded cooperative loop; everything
//! that touches graph state happens there. The only work that leaves
//! the driver is the user's own getters and setters, packaged as
//! [`WorkItem`]s and dispatched here according to the port's
//! [`Parallelization`] class.
//!
//! # Architecture Overview
//!
//! ```text
//! driver loop --- Sequential item ---> runs inline, blocks the wave
//!            \
//!             +- Thread item  -> permit -> blocking worker -> result
//!             +- Process item -> permit -> bulkhead worker -> result
//! ```
//!
//! * `Sequential` runs inline on the driver thread; the wave makes no
//!   progress while it does, which is exactly the point
//! * `Thread` runs on the shared blocking pool, bounded by the
//!   executor's thread semaphore
//! * `Process` runs on a second, separately bounded pool, so that
//!   heavyweight ports cannot starve the thread class (see DESIGN.md
//!   for why no address-space isolation is provided)
//!
//! # Pool Sizing and Shutdown
//!
//! A pool width of zero means "no pool of that kind": items of that
//! class run inline on the caller. [`Executor::shutdown`] closes the
//! semaphores; pending permits are flushed, later dispatches fail
//! with `ExecutorShutdown`, and nothing is retried automatically.
//!
//! # Custom Executors
//!
//! [`WorkExecutor`] is the dispatch seam. The default implementation
//! is [`Executor`]; `set_executor` on the network accepts any other
//! implementation, per port, which is how tests and embedders swap in
//! instrumented or differently bounded runners.
//!
//! # Examples
//!
//! ```rust
//! use patchbay::Executor;
//!
//! // four worker threads, two bulkhead workers
//! let executor = Executor::new(4, 2);
//!
//! // refuse further dispatches
//! executor.shutdown();
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::errors::ExecutionError;
use crate::ports::multi_input_data::DataId;
use crate::value::Value;

/// How a port's computation is allowed to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parallelization {
    /// Inline on the fetch driver; blocks the wave while it runs.
    Sequential,
    /// On the shared worker-thread pool.
    Thread,
    /// On the bulkhead pool for heavyweight computations.
    Process,
}

/// What a finished computation hands back to the driver.
pub enum JobOutput {
    /// A getter produced a value.
    Value(Value),
    /// A multi-input add or replace produced the element's data id.
    Data(DataId),
    /// A plain setter finished.
    Done,
}

pub type Job = Box<dyn FnOnce() -> anyhow::Result<JobOutput> + Send + 'static>;

/// One user computation ready for dispatch.
pub struct WorkItem {
    /// "node.port", used in error reports and logs.
    pub label: String,
    pub class: Parallelization,
    pub job: Job,
}

/// The dispatch seam between the wave driver and the worker pools.
///
/// The default implementation is [`Executor`]; `set_executor` accepts
/// any implementation, per port.
#[async_trait]
pub trait WorkExecutor: Send + Sync {
    async fn run(&self, item: WorkItem) -> Result<JobOutput, ExecutionError>;
}

/// Worker pools for parallel port computations.
///
/// Holds one semaphore-bounded pool per pooled parallelization
/// class. A single executor is shared by every port of a network
/// that does not carry an override, and can serve several networks
/// at once since it is handed around in an `Arc`.
pub struct Executor {
    threads: Option<Arc<Semaphore>>,
    processes: Option<Arc<Semaphore>>,
}

impl Executor {
    /// Creates an executor with the given pool widths.
    ///
    /// # Arguments
    ///
    /// * `threads` - width of the shared worker pool for the `Thread`
    ///   class; zero disables the pool and runs those items inline
    /// * `processes` - width of the bulkhead pool for the `Process`
    ///   class, with the same zero-means-inline rule
    ///
    /// # Examples
    ///
    /// ```rust
    /// use patchbay::Executor;
    ///
    /// // a dedicated pool per class
    /// let executor = Executor::new(8, 2);
    ///
    /// // everything inline, useful for deterministic tests
    /// let executor = Executor::new(0, 0);
    /// ```
    pub fn new(threads: usize, processes: usize) -> Self {
        Self {
            threads: (threads > 0).then(|| Arc::new(Semaphore::new(threads))),
            processes: (processes > 0).then(|| Arc::new(Semaphore::new(processes))),
        }
    }

    /// Thread pool sized to the available CPU cores, no bulkhead
    /// pool. Falls back to four workers when the parallelism of the
    /// host cannot be determined.
    ///
    /// ```rust
    /// use patchbay::Executor;
    ///
    /// let executor = Executor::default_pool();
    /// ```
    pub fn default_pool() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::new(threads, 0)
    }

    /// Closes both pools. Pending permits are flushed; any later
    /// dispatch to a pooled class fails with `ExecutorShutdown`.
    pub fn shutdown(&self) {
        if let Some(threads) = &self.threads {
            threads.close();
        }
        if let Some(processes) = &self.processes {
            processes.close();
        }
    }

    fn pool_for(&self, class: Parallelization) -> Option<Arc<Semaphore>> {
        match class {
            Parallelization::Sequential => None,
            Parallelization::Thread => self.threads.clone(),
            Parallelization::Process => self.processes.clone(),
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::default_pool()
    }
}

#[async_trait]
impl WorkExecutor for Executor {
    async fn run(&self, item: WorkItem) -> Result<JobOutput, ExecutionError> {
        let label = item.label;
        let job = item.job;
        match self.pool_for(item.class) {
            None => {
                tracing::trace!(port = %label, "running computation inline");
                job().map_err(|source| ExecutionError::ComputationFailed { port: label, source })
            }
            Some(pool) => {
                let permit = pool
                    .acquire_owned()
                    .await
                    .map_err(|_| ExecutionError::ExecutorShutdown)?;
                tracing::trace!(port = %label, "dispatching computation to worker pool");
                let outcome = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    job()
                })
                .await
                .map_err(|join_error| ExecutionError::Internal {
                    message: format!("worker for '{}' did not finish: {}", label, join_error),
                })?;
                outcome.map_err(|source| ExecutionError::ComputationFailed { port: label, source })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn value_job(value: i64) -> Job {
        Box::new(move || Ok(JobOutput::Value(Value::new(value))))
    }

    fn sleepy_job(millis: u64) -> Job {
        Box::new(move || {
            std::thread::sleep(Duration::from_millis(millis));
            Ok(JobOutput::Done)
        })
    }

    #[tokio::test]
    async fn sequential_runs_without_pools() {
        let executor = Executor::new(0, 0);
        let item = WorkItem {
            label: "t.get_value".into(),
            class: Parallelization::Sequential,
            job: value_job(7),
        };
        match executor.run(item).await.unwrap() {
            JobOutput::Value(v) => assert_eq!(v.extract::<i64>().unwrap(), 7),
            _ => panic!("expected a value"),
        }
    }

    #[tokio::test]
    async fn thread_class_falls_back_inline_when_pool_disabled() {
        let executor = Executor::new(0, 0);
        let item = WorkItem {
            label: "t.get_value".into(),
            class: Parallelization::Thread,
            job: value_job(3),
        };
        assert!(executor.run(item).await.is_ok());
    }

    #[tokio::test]
    async fn pooled_jobs_run_concurrently() {
        let executor = Arc::new(Executor::new(4, 0));
        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let executor = executor.clone();
            handles.push(tokio::spawn(async move {
                executor
                    .run(WorkItem {
                        label: "t.sleep".into(),
                        class: Parallelization::Thread,
                        job: sleepy_job(200),
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(700));
    }

    #[tokio::test]
    async fn shutdown_rejects_pooled_dispatch() {
        let executor = Executor::new(2, 0);
        executor.shutdown();
        let item = WorkItem {
            label: "t.get_value".into(),
            class: Parallelization::Thread,
            job: value_job(1),
        };
        assert!(matches!(
            executor.run(item).await,
            Err(ExecutionError::ExecutorShutdown)
        ));
    }

    #[tokio::test]
    async fn user_errors_surface_as_computation_failed() {
        let executor = Executor::new(1, 0);
        let item = WorkItem {
            label: "t.get_value".into(),
            class: Parallelization::Thread,
            job: Box::new(|| Err(anyhow::anyhow!("boom"))),
        };
        match executor.run(item).await {
            Err(ExecutionError::ComputationFailed { port, .. }) => {
                assert_eq!(port, "t.get_value");
            }
            other => panic!("unexpected outcome: {:?}", other.err()),
        }
    }
}
