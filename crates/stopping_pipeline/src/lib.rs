//! Multi-stage worker-pool pipelines over stopping queues.
//!
//! Queues signal end-of-stream with explicit end-markers, one per consumer,
//! and the coordinator shuts stages down in order so every pipeline
//! terminates deterministically.

pub mod error;
pub mod pipeline;
pub mod queue;
pub mod transform;
pub mod workload;

pub use error::{PipelineError, QueueError};
pub use pipeline::{
    FaultPolicy, Pipeline, PipelineBuilder, PipelineConfig, PipelineOutput, RunningPipeline,
    StageStats, WorkerFault,
};
pub use queue::{Drain, Message, QueueState, StoppingQueue};
pub use transform::{from_fn, Transform};
