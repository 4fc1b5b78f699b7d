//! src/pipeline/mod.rs
//!
//! This module implements multi-stage worker-pool pipelines.
//!
//! A pipeline is a chain of stages. Each stage is a fixed pool of worker
//! threads reading from one `StoppingQueue` and writing to the next, and all
//! pools run at the same time, so stage `i + 1` consumes while stage `i`
//! still produces.
//!
//! # Architecture Overview
//!
//! ```text
//!   feed() ──▶ [token-input] ──▶ token workers (10) ──▶ [result-input]
//!                                                            │
//!                                                            ▼
//!   finish() ◀── [results] ◀──────────────────── result workers (5)
//! ```
//!
//! # Module Structure
//!
//! ```text
//! src/pipeline/
//! ├── mod.rs          # Public API exports + module-level docs
//! ├── config.rs       # PipelineConfig, builder, FaultPolicy
//! ├── coordinator.rs  # Pipeline builder, RunningPipeline, shutdown protocol
//! ├── worker.rs       # Worker loop, WorkerPool, fault reports
//! └── thread.rs       # Thread-local worker identity and RNG
//! ```
//!
//! # Example Usage
//!
//! ```ignore
//! let output = Pipeline::builder(PipelineConfig::default())
//!     .stage("token", 10, from_fn(|i: u64| Ok(format!("token_{}", i))))
//!     .stage("result", 5, from_fn(|t: String| Ok(t.replace("token", "result"))))
//!     .start()?
//!     .run(0..1000)?;
//!
//! assert_eq!(output.results.len(), 1000);
//! ```
//!
//! # Ordering
//! With one worker per stage, results come out in input order. With more,
//! they come out in completion order.

mod config;
mod coordinator;
mod thread;
mod worker;

pub use config::{FaultPolicy, PipelineConfig, PipelineConfigBuilder};
pub use coordinator::{Pipeline, PipelineBuilder, PipelineOutput, RunningPipeline, StageStats};
pub use thread::{
    current_stage_index, current_worker_id, init_worker_rng, worker_gen_range, STAGE_INDEX,
    WORKER_ID, WORKER_RNG,
};
pub use worker::{WorkerFault, WorkerReport};
