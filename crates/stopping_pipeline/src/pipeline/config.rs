//! src/pipeline/config.rs
//!
//! Configuration for pipeline behaviour.
//!
//! Per-stage worker counts are given when stages are added; everything that
//! applies to the pipeline as a whole lives in `PipelineConfig`.
//!
//! Example:
//! ```ignore
//! let config = PipelineConfig::builder()
//!     .queue_capacity(256)
//!     .fault_policy(FaultPolicy::ContinueDegraded)
//!     .shutdown_timeout(Duration::from_secs(30))
//!     .seed(7)
//!     .build();
//! ```
//!
//! # Performance considerations:
//! - Worker counts affect throughput only; give slower stages more workers.
//! - `queue_capacity`: bounded queues apply backpressure to producers and cap
//!                     memory, unbounded queues never block a `put`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::PipelineError;

/// What happens to the pipeline when a transform fails or panics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FaultPolicy {
    /// Stop transforming everywhere, drain every stage, and report the fault
    /// from `finish()`.
    #[default]
    FailFast,
    /// Let the faulting worker exit and carry on with the remaining workers.
    /// Faults are listed in the pipeline output.
    ContinueDegraded,
}

impl fmt::Display for FaultPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultPolicy::FailFast => write!(f, "fail-fast"),
            FaultPolicy::ContinueDegraded => write!(f, "continue-degraded"),
        }
    }
}

impl FromStr for FaultPolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fail-fast" | "failfast" => Ok(FaultPolicy::FailFast),
            "continue-degraded" | "degraded" => Ok(FaultPolicy::ContinueDegraded),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown fault policy '{}' (expected 'fail-fast' or 'continue-degraded')",
                other
            ))),
        }
    }
}

/// Configuration for a pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Capacity of the head and intermediate queues (None = unbounded).
    /// The results queue is always unbounded: it is only drained after
    /// shutdown.
    pub queue_capacity: Option<usize>,
    /// Behaviour when a transform fails. Default: fail-fast
    pub fault_policy: FaultPolicy,
    /// Upper bound for each stage's completion wait during shutdown.
    /// None waits forever.
    pub shutdown_timeout: Option<Duration>,
    /// How often the coordinator re-checks worker liveness while waiting for
    /// a stage to complete. Not an error timeout. Default: 50ms.
    pub poll_interval: Duration,
    /// Base seed for the per-worker RNGs
    pub seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: None,
            fault_policy: FaultPolicy::FailFast,
            shutdown_timeout: None,
            poll_interval: Duration::from_millis(50),
            seed: None,
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    pub(crate) fn validate(&self) -> Result<(), PipelineError> {
        if self.queue_capacity == Some(0) {
            return Err(PipelineError::InvalidConfig(
                "queue_capacity must be > 0; use None for unbounded queues".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "poll_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for PipelineConfig with method chaining
#[derive(Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Bound the head and intermediate queues (must be > 0)
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = Some(capacity);
        self
    }

    /// Make every queue unbounded
    pub fn unbounded(mut self) -> Self {
        self.config.queue_capacity = None;
        self
    }

    pub fn fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.config.fault_policy = policy;
        self
    }

    /// Fail shutdown instead of hanging when a stage does not complete in time.
    ///
    /// - Too low: aborts pipelines whose transforms are merely slow.
    /// - Too high: delays detection of stuck workers.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = Some(timeout);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the seed for reproducible per-worker randomness.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> PipelineConfig {
        self.config
    }
}
