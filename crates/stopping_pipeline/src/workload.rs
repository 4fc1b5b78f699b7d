//! src/workload.rs
//!
//! The two-stage token/result workload used by the `token-demo` binary,
//! the benchmarks and the tests.
//!
//! Fetching a token is the slow step (up to 10 ms by default), turning a
//! token into a result is faster (up to 5 ms). Both simulate a remote call by
//! sleeping for a random time drawn from the worker RNG, so a seeded pipeline
//! sleeps the same amounts on every run.

use anyhow::{ensure, Result};
use std::thread;
use std::time::Duration;

use crate::pipeline::worker_gen_range;
use crate::transform::Transform;

pub const DEFAULT_MAX_TOKEN_TIME: Duration = Duration::from_millis(10);
pub const DEFAULT_MAX_RESULT_TIME: Duration = Duration::from_millis(5);

/// Sleeps for a random duration in `[0, max)`.
fn simulate_latency(max: Duration) {
    let micros = worker_gen_range(0..max.as_micros() as u64);
    if micros > 0 {
        thread::sleep(Duration::from_micros(micros));
    }
}

/// `i -> "token_i"`
#[derive(Debug, Clone)]
pub struct GetToken {
    pub max_latency: Duration,
}

impl Default for GetToken {
    fn default() -> Self {
        Self {
            max_latency: DEFAULT_MAX_TOKEN_TIME,
        }
    }
}

impl Transform<u64, String> for GetToken {
    fn apply(&self, input: u64) -> Result<String> {
        simulate_latency(self.max_latency);
        Ok(format!("token_{}", input))
    }
}

/// `"token_i" -> "result_i"`
#[derive(Debug, Clone)]
pub struct GetResult {
    pub max_latency: Duration,
}

impl Default for GetResult {
    fn default() -> Self {
        Self {
            max_latency: DEFAULT_MAX_RESULT_TIME,
        }
    }
}

impl Transform<String, String> for GetResult {
    fn apply(&self, token: String) -> Result<String> {
        ensure!(token.starts_with("token_"), "not a token: {:?}", token);
        simulate_latency(self.max_latency);
        Ok(token.replacen("token", "result", 1))
    }
}

/// The results a fault-free run over `0..n` must produce, in input order.
pub fn expected_results(n: u64) -> Vec<String> {
    (0..n).map(|i| format!("result_{}", i)).collect()
}
