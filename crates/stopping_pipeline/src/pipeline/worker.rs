//! src/pipeline/worker.rs
//!
//! Worker threads and the fixed-size pool that runs one stage.
//!
//! Every worker of a stage pulls from the same input queue and pushes to the
//! same output queue:
//!
//! ```text
//!              ┌── worker 0 ──┐
//!   input ─────┼── worker 1 ──┼────▶ output
//!   (shared)   └── worker N ──┘      (shared)
//! ```
//!
//! A worker stops the moment it reads an end-marker and never forwards it.
//! Sending one marker per worker is the coordinator's job.
//!
//! # Faults
//! A transform returning `Err` or panicking is a fault. What happens next
//! depends on [`FaultPolicy`]:
//! - `FailFast`: the shared abort flag is raised and every worker in every
//!   stage keeps draining its input without transforming, so shutdown still
//!   completes through the normal marker protocol.
//! - `ContinueDegraded`: the faulting worker exits and its marker is left for
//!   the coordinator to clear. The last live worker of a stage never exits
//!   early; it keeps draining so upstream producers cannot block forever.
//!
//! A worker whose output queue was discarded (the pipeline was dropped before
//! `finish`) just stops; that is not a fault.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::anyhow;

use super::config::FaultPolicy;
use super::thread::{enter_worker, init_worker_rng};
use crate::error::{PipelineError, QueueError};
use crate::queue::StoppingQueue;
use crate::transform::Transform;

/// A transform failure observed by a worker.
#[derive(Debug)]
pub struct WorkerFault {
    pub stage: String,
    pub worker_id: usize,
    pub error: anyhow::Error,
    /// When the worker observed the failure.
    pub at: Instant,
}

/// What a worker thread returns when it exits.
#[derive(Debug)]
pub struct WorkerReport {
    pub worker_id: usize,
    /// Items transformed and forwarded.
    pub processed: usize,
    /// Items acknowledged without transforming (after an abort).
    pub discarded: usize,
    pub fault: Option<WorkerFault>,
}

impl WorkerReport {
    fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            processed: 0,
            discarded: 0,
            fault: None,
        }
    }
}

/// Identity and shared switches handed to each worker of a stage.
#[derive(Clone)]
pub(crate) struct WorkerSpec {
    pub(crate) stage: String,
    pub(crate) stage_index: usize,
    pub(crate) policy: FaultPolicy,
    pub(crate) seed: Option<u64>,
    /// Raised by the first fault under `FailFast`; shared by all stages.
    pub(crate) abort: Arc<AtomicBool>,
}

/// Fixed-size pool of homogeneous workers for one stage.
pub(crate) struct WorkerPool {
    stage: String,
    handles: Vec<thread::JoinHandle<WorkerReport>>,
}

impl WorkerPool {
    /// Spawns `worker_count` workers sharing `transform`, `input` and `output`.
    ///
    /// If a spawn fails, the input queue is discarded so the workers already
    /// started exit, and they are joined before the error is returned.
    pub(crate) fn spawn<I, O, T>(
        spec: WorkerSpec,
        worker_count: usize,
        transform: Arc<T>,
        input: Arc<StoppingQueue<I>>,
        output: Arc<StoppingQueue<O>>,
    ) -> Result<Self, PipelineError>
    where
        I: Send + 'static,
        O: Send + 'static,
        T: Transform<I, O> + 'static,
    {
        let live = Arc::new(AtomicUsize::new(worker_count));
        let mut handles = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let worker = Worker {
                spec: spec.clone(),
                worker_id,
                transform: transform.clone(),
                input: input.clone(),
                output: output.clone(),
                live: live.clone(),
            };

            let spawned = thread::Builder::new()
                .name(format!("{}-worker-{}", spec.stage, worker_id))
                .spawn(move || worker.run());

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    input.discard();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(PipelineError::Spawn {
                        stage: spec.stage,
                        worker_id,
                        source,
                    });
                }
            }
        }

        Ok(Self {
            stage: spec.stage,
            handles,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    /// True once every worker thread has returned.
    pub(crate) fn all_finished(&self) -> bool {
        self.handles.iter().all(|handle| handle.is_finished())
    }

    /// Waits for every worker thread and collects their reports.
    pub(crate) fn join(self) -> Vec<WorkerReport> {
        let stage = self.stage;
        self.handles
            .into_iter()
            .enumerate()
            .map(|(worker_id, handle)| {
                handle.join().unwrap_or_else(|payload| {
                    let mut report = WorkerReport::new(worker_id);
                    report.fault = Some(WorkerFault {
                        stage: stage.clone(),
                        worker_id,
                        error: anyhow!("worker thread panicked: {}", panic_message(&*payload)),
                        at: Instant::now(),
                    });
                    report
                })
            })
            .collect()
    }
}

struct Worker<I, O, T> {
    spec: WorkerSpec,
    worker_id: usize,
    transform: Arc<T>,
    input: Arc<StoppingQueue<I>>,
    output: Arc<StoppingQueue<O>>,
    /// Workers of this stage that have not exited because of a fault.
    live: Arc<AtomicUsize>,
}

impl<I, O, T> Worker<I, O, T>
where
    T: Transform<I, O>,
{
    fn run(self) -> WorkerReport {
        enter_worker(self.spec.stage_index, self.worker_id);
        if let Some(seed) = self.spec.seed {
            init_worker_rng(self.spec.stage_index, self.worker_id, seed);
        }

        let mut report = WorkerReport::new(self.worker_id);
        let items = match self.input.drain() {
            Ok(items) => items,
            Err(e) => {
                report.fault = Some(self.fault(anyhow::Error::new(e)));
                return report;
            }
        };

        // Set when this worker must keep consuming without transforming.
        let mut draining = false;

        for item in items {
            if draining || self.spec.abort.load(Ordering::Acquire) {
                report.discarded += 1;
                continue;
            }

            let error = match apply_catching(&*self.transform, item) {
                Ok(result) => match self.output.put(result) {
                    Ok(()) => {
                        report.processed += 1;
                        continue;
                    }
                    // The pipeline is being torn down; nobody reads this output.
                    Err(QueueError::Discarded(queue)) => {
                        tracing::debug!(
                            stage = %self.spec.stage,
                            worker = self.worker_id,
                            queue = %queue,
                            "output discarded, worker stopping"
                        );
                        break;
                    }
                    Err(e) => anyhow::Error::new(e).context("failed to forward result"),
                },
                Err(e) => e,
            };

            tracing::warn!(
                stage = %self.spec.stage,
                worker = self.worker_id,
                policy = %self.spec.policy,
                "worker fault: {:#}",
                error
            );
            if report.fault.is_none() {
                report.fault = Some(self.fault(error));
            }

            match self.spec.policy {
                FaultPolicy::FailFast => {
                    self.spec.abort.store(true, Ordering::Release);
                }
                FaultPolicy::ContinueDegraded => {
                    if self.live.fetch_sub(1, Ordering::AcqRel) > 1 {
                        break;
                    }
                    tracing::warn!(
                        stage = %self.spec.stage,
                        "last worker faulted, discarding remaining items"
                    );
                    draining = true;
                }
            }
        }

        tracing::debug!(
            stage = %self.spec.stage,
            worker = self.worker_id,
            processed = report.processed,
            discarded = report.discarded,
            "worker exiting"
        );
        report
    }

    fn fault(&self, error: anyhow::Error) -> WorkerFault {
        WorkerFault {
            stage: self.spec.stage.clone(),
            worker_id: self.worker_id,
            error,
            at: Instant::now(),
        }
    }
}

/// Runs the transform, turning a panic into an error.
fn apply_catching<I, O, T>(transform: &T, item: I) -> anyhow::Result<O>
where
    T: Transform<I, O> + ?Sized,
{
    panic::catch_unwind(AssertUnwindSafe(|| transform.apply(item))).unwrap_or_else(|payload| {
        Err(anyhow!(
            "transform panicked: {}",
            panic_message(&*payload)
        ))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::from_fn;

    fn spec(policy: FaultPolicy) -> WorkerSpec {
        WorkerSpec {
            stage: "test".to_string(),
            stage_index: 0,
            policy,
            seed: None,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    #[test]
    fn test_workers_stop_on_markers_without_forwarding() -> anyhow::Result<()> {
        let input = Arc::new(StoppingQueue::unbounded("in"));
        let output = Arc::new(StoppingQueue::unbounded("out"));
        let double = Arc::new(from_fn(|i: u32| Ok(i * 2)));

        let pool = WorkerPool::spawn(
            spec(FaultPolicy::FailFast),
            3,
            double,
            input.clone(),
            output.clone(),
        )?;
        for i in 0..30 {
            input.put(i)?;
        }
        input.close_n(pool.len())?;
        input.wait_completion()?;

        let reports = pool.join();
        assert_eq!(reports.iter().map(|r| r.processed).sum::<usize>(), 30);
        assert_eq!(output.len(), 30);
        assert!(reports.iter().all(|r| r.fault.is_none()));
        Ok(())
    }

    #[test]
    fn test_discarded_output_is_not_a_fault() -> anyhow::Result<()> {
        let input = Arc::new(StoppingQueue::unbounded("in"));
        let output = Arc::new(StoppingQueue::<u32>::unbounded("out"));
        output.discard();

        let worker_spec = spec(FaultPolicy::FailFast);
        let abort = worker_spec.abort.clone();
        let pool = WorkerPool::spawn(
            worker_spec,
            1,
            Arc::new(from_fn(|i: u32| Ok(i))),
            input.clone(),
            output,
        )?;
        input.put(1)?;
        input.put(2)?;
        input.close()?;

        while !pool.all_finished() {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let reports = pool.join();
        assert!(reports.iter().all(|r| r.fault.is_none()));
        assert_eq!(reports[0].processed, 0);
        assert!(!abort.load(Ordering::Acquire));
        Ok(())
    }

    #[test]
    fn test_panic_becomes_fault() {
        let err = apply_catching(&from_fn(|_: u8| -> anyhow::Result<u8> { panic!("boom") }), 1)
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_degraded_worker_exits_on_fault() -> anyhow::Result<()> {
        let input = Arc::new(StoppingQueue::unbounded("in"));
        let output = Arc::new(StoppingQueue::unbounded("out"));
        let fail_on_zero = Arc::new(from_fn(|i: u32| {
            if i == 0 {
                anyhow::bail!("zero");
            }
            Ok(i)
        }));

        let pool = WorkerPool::spawn(
            spec(FaultPolicy::ContinueDegraded),
            2,
            fail_on_zero,
            input.clone(),
            output.clone(),
        )?;
        input.put(0)?;
        input.put(1)?;
        input.put(2)?;
        input.close_n(2)?;

        while !pool.all_finished() {
            if input.wait_completion_timeout(std::time::Duration::from_millis(10)) {
                break;
            }
        }
        let reports = pool.join();
        input.discard_pending();

        let faults: Vec<_> = reports.iter().filter_map(|r| r.fault.as_ref()).collect();
        assert_eq!(faults.len(), 1);
        assert_eq!(output.len(), 2);
        Ok(())
    }
}
