#![allow(dead_code)]

use anyhow::{anyhow, Result};
use crossbeam_channel::bounded;
use std::thread;
use std::time::Duration;

use stopping_pipeline::transform::Transform;

/// `i -> "token_i"` without any latency.
pub struct ToToken;
impl Transform<u64, String> for ToToken {
    fn apply(&self, input: u64) -> Result<String> {
        Ok(format!("token_{}", input))
    }
}

/// `"token_i" -> "result_i"` without any latency.
pub struct ToResult;
impl Transform<String, String> for ToResult {
    fn apply(&self, token: String) -> Result<String> {
        Ok(token.replacen("token", "result", 1))
    }
}

/// Identity transform that sleeps longer for smaller items, so later items
/// overtake earlier ones when several workers run.
pub struct InverseDelay {
    pub items: u64,
    pub step: Duration,
}

impl Transform<u64, u64> for InverseDelay {
    fn apply(&self, input: u64) -> Result<u64> {
        let remaining = self.items.saturating_sub(input) as u32;
        thread::sleep(self.step * remaining);
        Ok(input)
    }
}

/// Runs `f` on a helper thread and fails if it does not return in `limit`.
pub fn within<T, F>(limit: Duration, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = bounded(1);
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(limit)
        .map_err(|_| anyhow!("did not finish within {:?} (possible deadlock)", limit))
}
