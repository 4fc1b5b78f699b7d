//! src/error.rs
//!
//! Error types for queues and pipelines.
//!
//! Transform functions report failures with `anyhow::Error`; those end up
//! inside [`PipelineError::WorkerFault`] once the coordinator has joined the
//! faulting worker.

use std::time::Duration;
use thiserror::Error;

/// Misuse or failure of a [`StoppingQueue`](crate::queue::StoppingQueue).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The queue reached its terminal state; nothing may be read or written.
    #[error("queue '{0}' has been discarded")]
    Discarded(String),

    /// Every end-marker has been observed; a drain cannot be restarted.
    #[error("queue '{0}' is already drained and cannot be iterated again")]
    AlreadyDrained(String),

    /// More acknowledgements than enqueued items.
    #[error("queue '{0}' acknowledged more items than were enqueued")]
    UnbalancedAck(String),

    #[error("timed out after {timeout:?} waiting on queue '{name}'")]
    Timeout { name: String, timeout: Duration },
}

/// Failure reported by the pipeline coordinator.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn worker {worker_id} of stage '{stage}'")]
    Spawn {
        stage: String,
        worker_id: usize,
        #[source]
        source: std::io::Error,
    },

    /// A transform failed while the pipeline ran in fail-fast mode.
    ///
    /// Carries the earliest fault. Workers already inside a transform when
    /// the abort spread may fail too; those are only counted in `others`.
    #[error("worker {worker_id} of stage '{stage}' failed ({others} other faults)")]
    WorkerFault {
        stage: String,
        worker_id: usize,
        others: usize,
        #[source]
        source: anyhow::Error,
    },

    /// A completion wait exceeded the configured shutdown timeout.
    #[error("stage '{stage}' did not shut down within {timeout:?} ({outstanding} items unacknowledged)")]
    ShutdownTimeout {
        stage: String,
        timeout: Duration,
        outstanding: usize,
    },

    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
