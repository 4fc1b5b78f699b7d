//! Token pipeline demo.
//!
//! Pushes `--items` ids through a token stage and a result stage, then checks
//! that every result came back and whether they arrived in input order.

use anyhow::{Context, Result};
use clap::Parser;
use std::time::{Duration, Instant};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stopping_pipeline::workload::{expected_results, GetResult, GetToken};
use stopping_pipeline::{FaultPolicy, Pipeline, PipelineConfig};

#[derive(Parser)]
#[command(name = "token-demo")]
#[command(about = "Run the two-stage token/result worker pipeline", long_about = None)]
struct Cli {
    /// Number of work items to feed
    #[arg(short = 'n', long, default_value_t = 1000)]
    items: u64,

    /// Workers for the slower token stage
    #[arg(long, default_value_t = 10)]
    token_workers: usize,

    /// Workers for the result stage
    #[arg(long, default_value_t = 5)]
    result_workers: usize,

    /// Upper bound of the simulated token latency, in milliseconds
    #[arg(long, default_value_t = 10)]
    max_token_ms: u64,

    /// Upper bound of the simulated result latency, in milliseconds
    #[arg(long, default_value_t = 5)]
    max_result_ms: u64,

    /// Bound the intermediate queues (unbounded when omitted)
    #[arg(long)]
    capacity: Option<usize>,

    /// Seed for reproducible simulated latencies
    #[arg(long)]
    seed: Option<u64>,

    /// fail-fast or continue-degraded
    #[arg(long, default_value_t = FaultPolicy::FailFast)]
    fault_policy: FaultPolicy,

    /// Give up on a stage that does not shut down within this many seconds
    #[arg(long)]
    shutdown_timeout_secs: Option<u64>,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    let mut config = PipelineConfig::builder().fault_policy(cli.fault_policy);
    if let Some(capacity) = cli.capacity {
        config = config.queue_capacity(capacity);
    }
    if let Some(seed) = cli.seed {
        config = config.seed(seed);
    }
    if let Some(secs) = cli.shutdown_timeout_secs {
        config = config.shutdown_timeout(Duration::from_secs(secs));
    }

    let pipeline = Pipeline::builder(config.build())
        .stage(
            "token",
            cli.token_workers,
            GetToken {
                max_latency: Duration::from_millis(cli.max_token_ms),
            },
        )
        .stage(
            "result",
            cli.result_workers,
            GetResult {
                max_latency: Duration::from_millis(cli.max_result_ms),
            },
        )
        .start()
        .context("Failed to start pipeline")?;

    tracing::info!("Load todo queue");
    let t0 = Instant::now();
    pipeline.feed(0..cli.items)?;
    let output = pipeline.finish().context("Pipeline shutdown failed")?;

    let expected = expected_results(cli.items);
    tracing::info!(
        "Results: length {}, Order okay: {}",
        output.results.len(),
        output.results == expected
    );
    for stage in &output.stages {
        tracing::info!(
            stage = %stage.name,
            workers = stage.workers,
            processed = stage.processed,
            faults = stage.faults,
            "stage summary"
        );
    }
    for fault in &output.faults {
        tracing::warn!(stage = %fault.stage, worker = fault.worker_id, "tolerated fault: {:#}", fault.error);
    }
    tracing::info!("Processing took {:.2} seconds", t0.elapsed().as_secs_f64());

    Ok(())
}
