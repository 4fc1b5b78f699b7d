//! src/pipeline/coordinator.rs
//!
//! Builds the chain of stages, feeds it and runs the shutdown protocol.
//!
//! # Shutdown protocol
//!
//! For each stage, in pipeline order:
//! 1. close the stage's input queue once per worker of that stage,
//! 2. wait until every item and marker on it is acknowledged,
//! 3. join the stage's worker threads.
//!
//! The results queue is then closed with a single marker and drained. It is
//! never completion-waited first: nothing acknowledges its items until the
//! coordinator itself iterates it, so waiting would deadlock.
//!
//! Stage `i` is joined only after stage `i - 1`, which guarantees that no
//! more items can reach stage `i`'s input once its markers are enqueued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::config::{FaultPolicy, PipelineConfig};
use super::worker::{WorkerFault, WorkerPool, WorkerSpec};
use crate::error::{PipelineError, QueueError, Result};
use crate::queue::{DiscardedCounts, StoppingQueue};
use crate::transform::Transform;

/// Entry point for building pipelines.
///
/// ```ignore
/// let output = Pipeline::builder(PipelineConfig::default())
///     .stage("token", 10, GetToken)
///     .stage("result", 5, GetResult)
///     .start()?
///     .run(0..1000)?;
/// ```
pub struct Pipeline;

impl Pipeline {
    /// Starts a builder whose first queue carries items of type `I`.
    pub fn builder<I>(config: PipelineConfig) -> PipelineBuilder<I, I>
    where
        I: Send + 'static,
    {
        PipelineBuilder {
            config,
            connect: Box::new(
                |output: Arc<StoppingQueue<I>>,
                 _: &mut Vec<Stage>,
                 _: &StageContext|
                 -> Result<Arc<StoppingQueue<I>>> { Ok(output) },
            ),
            stage_count: 0,
            invalid: None,
        }
    }
}

/// Per-stage summary returned with the results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageStats {
    pub name: String,
    pub workers: usize,
    pub processed: usize,
    pub discarded: usize,
    pub faults: usize,
}

/// Everything `finish` hands back.
#[derive(Debug)]
pub struct PipelineOutput<T> {
    /// Final items, in completion order.
    pub results: Vec<T>,
    pub stages: Vec<StageStats>,
    /// Faults tolerated under `ContinueDegraded`. Always empty under `FailFast`.
    pub faults: Vec<WorkerFault>,
    pub elapsed: Duration,
}

/// Type-erased view of a stage's input queue used during shutdown.
pub(crate) trait StageInput: Send + Sync {
    fn name(&self) -> &str;
    fn close_n(&self, consumers: usize) -> std::result::Result<(), QueueError>;
    fn wait_completion_timeout(&self, timeout: Duration) -> bool;
    fn outstanding(&self) -> usize;
    fn discard_pending(&self) -> DiscardedCounts;
    fn discard(&self);
}

impl<T: Send> StageInput for StoppingQueue<T> {
    fn name(&self) -> &str {
        StoppingQueue::name(self)
    }

    fn close_n(&self, consumers: usize) -> std::result::Result<(), QueueError> {
        StoppingQueue::close_n(self, consumers)
    }

    fn wait_completion_timeout(&self, timeout: Duration) -> bool {
        StoppingQueue::wait_completion_timeout(self, timeout)
    }

    fn outstanding(&self) -> usize {
        StoppingQueue::outstanding(self)
    }

    fn discard_pending(&self) -> DiscardedCounts {
        StoppingQueue::discard_pending(self)
    }

    fn discard(&self) {
        StoppingQueue::discard(self)
    }
}

pub(crate) struct Stage {
    name: String,
    input: Arc<dyn StageInput>,
    pool: WorkerPool,
}

pub(crate) struct StageContext {
    config: PipelineConfig,
    abort: Arc<AtomicBool>,
}

/// Given the queue a chain of stages should write to, creates the chain's
/// queues, spawns its workers and returns the chain's input queue.
type Connect<I, O> = Box<
    dyn FnOnce(Arc<StoppingQueue<O>>, &mut Vec<Stage>, &StageContext) -> Result<Arc<StoppingQueue<I>>>,
>;

/// Typed pipeline under construction: items of type `I` go in, items of type
/// `O` come out. Nothing runs until [`start`](Self::start).
pub struct PipelineBuilder<I, O> {
    config: PipelineConfig,
    connect: Connect<I, O>,
    stage_count: usize,
    invalid: Option<PipelineError>,
}

impl<I, O> PipelineBuilder<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Appends a stage of `worker_count` workers applying `transform`.
    ///
    /// Slower stages should get proportionally more workers. A worker count
    /// of zero is reported by `start`.
    pub fn stage<P, T>(
        self,
        name: impl Into<String>,
        worker_count: usize,
        transform: T,
    ) -> PipelineBuilder<I, P>
    where
        P: Send + 'static,
        T: Transform<O, P> + 'static,
    {
        let name = name.into();
        let invalid = self.invalid.or_else(|| {
            (worker_count == 0).then(|| {
                PipelineError::InvalidConfig(format!(
                    "stage '{}' needs at least one worker",
                    name
                ))
            })
        });

        let stage_index = self.stage_count;
        let upstream = self.connect;
        let transform = Arc::new(transform);

        let connect: Connect<I, P> = Box::new(
            move |output: Arc<StoppingQueue<P>>,
                  stages: &mut Vec<Stage>,
                  ctx: &StageContext|
                  -> Result<Arc<StoppingQueue<I>>> {
                let input = Arc::new(StoppingQueue::with_capacity(
                    format!("{}-input", name),
                    ctx.config.queue_capacity,
                ));
                let head = upstream(input.clone(), &mut *stages, ctx)?;

                let spec = WorkerSpec {
                    stage: name.clone(),
                    stage_index,
                    policy: ctx.config.fault_policy,
                    seed: ctx.config.seed,
                    abort: ctx.abort.clone(),
                };
                let pool = WorkerPool::spawn(spec, worker_count, transform, input.clone(), output)?;
                tracing::debug!(stage = %name, workers = worker_count, "stage started");

                stages.push(Stage { name, input, pool });
                Ok(head)
            },
        );

        PipelineBuilder {
            config: self.config,
            connect,
            stage_count: stage_index + 1,
            invalid,
        }
    }

    /// Creates every queue and spawns every worker pool.
    pub fn start(self) -> Result<RunningPipeline<I, O>> {
        if let Some(err) = self.invalid {
            return Err(err);
        }
        self.config.validate()?;

        let ctx = StageContext {
            config: self.config,
            abort: Arc::new(AtomicBool::new(false)),
        };
        let results = Arc::new(StoppingQueue::unbounded("results"));
        let mut stages = Vec::with_capacity(self.stage_count);

        tracing::info!(stages = self.stage_count, "Start threads");
        let head = match (self.connect)(results.clone(), &mut stages, &ctx) {
            Ok(head) => head,
            Err(e) => {
                ctx.abort.store(true, Ordering::Release);
                for stage in &stages {
                    stage.input.discard();
                }
                results.discard();
                for stage in stages {
                    stage.pool.join();
                }
                return Err(e);
            }
        };

        Ok(RunningPipeline {
            head,
            results,
            stages,
            abort: ctx.abort,
            config: ctx.config,
            started: Instant::now(),
        })
    }
}

/// A pipeline whose workers are running. Feed it, then call
/// [`finish`](Self::finish). Dropping it without finishing discards every
/// queue and joins the workers.
pub struct RunningPipeline<I, O> {
    head: Arc<StoppingQueue<I>>,
    results: Arc<StoppingQueue<O>>,
    stages: Vec<Stage>,
    abort: Arc<AtomicBool>,
    config: PipelineConfig,
    started: Instant,
}

impl<I, O> RunningPipeline<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Enqueues one item on the first queue. Blocks while a bounded first
    /// queue is full.
    pub fn put(&self, item: I) -> Result<()> {
        self.head.put(item)?;
        Ok(())
    }

    /// Enqueues every item, returning how many were fed.
    pub fn feed<It>(&self, items: It) -> Result<usize>
    where
        It: IntoIterator<Item = I>,
    {
        let mut fed = 0;
        for item in items {
            self.head.put(item)?;
            fed += 1;
        }
        tracing::debug!(queue = self.head.name(), items = fed, "fed pipeline");
        Ok(fed)
    }

    /// Feeds `items` and shuts the pipeline down.
    pub fn run<It>(self, items: It) -> Result<PipelineOutput<O>>
    where
        It: IntoIterator<Item = I>,
    {
        self.feed(items)?;
        self.finish()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name.as_str()).collect()
    }

    /// Has any worker raised the fail-fast abort flag.
    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    /// Runs the shutdown protocol and collects the results.
    pub fn finish(mut self) -> Result<PipelineOutput<O>> {
        let mut stages = std::mem::take(&mut self.stages).into_iter();
        let mut stats = Vec::with_capacity(stages.len());
        let mut faults = Vec::new();

        while let Some(stage) = stages.next() {
            match self.shutdown_stage(stage) {
                Ok((stage_stats, stage_faults)) => {
                    stats.push(stage_stats);
                    faults.extend(stage_faults);
                }
                Err(e) => {
                    // Workers stuck in a transform cannot be joined; discard the
                    // remaining queues so everyone else unblocks, then detach.
                    self.abort.store(true, Ordering::Release);
                    for rest in stages {
                        rest.input.discard();
                    }
                    self.results.discard();
                    return Err(e);
                }
            }
        }

        self.results.close()?;
        tracing::info!("Getting out results");
        let results: Vec<O> = self.results.drain()?.collect();
        self.results.discard();

        let elapsed = self.started.elapsed();
        tracing::info!(
            results = results.len(),
            faults = faults.len(),
            "Pipeline finished in {:.2?}",
            elapsed
        );

        if self.config.fault_policy == FaultPolicy::FailFast {
            let earliest = faults
                .iter()
                .enumerate()
                .min_by_key(|(_, fault)| fault.at)
                .map(|(idx, _)| idx);
            if let Some(idx) = earliest {
                let first: WorkerFault = faults.swap_remove(idx);
                return Err(PipelineError::WorkerFault {
                    stage: first.stage,
                    worker_id: first.worker_id,
                    others: faults.len(),
                    source: first.error,
                });
            }
        }

        Ok(PipelineOutput {
            results,
            stages: stats,
            faults,
            elapsed,
        })
    }

    fn shutdown_stage(&self, stage: Stage) -> Result<(StageStats, Vec<WorkerFault>)> {
        let workers = stage.pool.len();
        tracing::info!(stage = %stage.name, workers, "Closing stage input");
        stage.input.close_n(workers)?;

        if let Err(e) = self.wait_stage(&stage) {
            stage.input.discard();
            return Err(e);
        }

        let reports = stage.pool.join();
        stage.input.discard();
        tracing::info!(stage = %stage.name, "Stage joined");

        let mut stats = StageStats {
            name: stage.name,
            workers,
            processed: 0,
            discarded: 0,
            faults: 0,
        };
        let mut faults = Vec::new();
        for report in reports {
            stats.processed += report.processed;
            stats.discarded += report.discarded;
            if let Some(fault) = report.fault {
                stats.faults += 1;
                faults.push(fault);
            }
        }
        Ok((stats, faults))
    }

    /// Completion wait for one stage's input.
    ///
    /// Workers that exited on a fault leave their markers unread, which would
    /// keep the wait from ever returning. Once every worker of the stage has
    /// exited, whatever is left on the queue is discarded.
    fn wait_stage(&self, stage: &Stage) -> Result<()> {
        let deadline = self
            .config
            .shutdown_timeout
            .map(|timeout| Instant::now() + timeout);

        loop {
            if stage.input.wait_completion_timeout(self.config.poll_interval) {
                return Ok(());
            }

            if stage.pool.all_finished() {
                let dropped = stage.input.discard_pending();
                if dropped.items > 0 || dropped.markers > 0 {
                    tracing::warn!(
                        stage = %stage.name,
                        queue = stage.input.name(),
                        items = dropped.items,
                        markers = dropped.markers,
                        "workers exited early, discarded leftovers"
                    );
                }
                return Ok(());
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(PipelineError::ShutdownTimeout {
                        stage: stage.name.clone(),
                        timeout: self.config.shutdown_timeout.unwrap_or_default(),
                        outstanding: stage.input.outstanding(),
                    });
                }
            }
        }
    }
}

impl<I, O> Drop for RunningPipeline<I, O> {
    fn drop(&mut self) {
        if self.stages.is_empty() {
            return;
        }
        tracing::debug!("pipeline dropped before finish, discarding queues");
        self.abort.store(true, Ordering::Release);
        self.head.discard();
        for stage in &self.stages {
            stage.input.discard();
        }
        self.results.discard();
        for stage in self.stages.drain(..) {
            stage.pool.join();
        }
    }
}
