//! Basic tests for Pipeline construction and result collection.
//!
//! Tests cover:
//! - The token/result scenario with one worker per stage
//! - Item conservation with several workers per stage
//! - Ordering with one vs. several workers
//! - Configuration validation
//! - Bounded queues and single-stage / stage-less pipelines

mod common;
use common::{InverseDelay, ToResult, ToToken};

use anyhow::Result;
use std::collections::HashSet;
use std::time::Duration;
use stopping_pipeline::{
    from_fn,
    workload::{expected_results, GetResult, GetToken},
    Pipeline, PipelineConfig, PipelineError, Transform,
};

// ================================================================================================
// 1. Scenario and conservation
// ================================================================================================

#[test]
fn test_pipeline_token_result_scenario() -> Result<()> {
    let output = Pipeline::builder(PipelineConfig::default())
        .stage("token", 1, ToToken)
        .stage("result", 1, ToResult)
        .start()?
        .run(vec![0, 1, 2])?;

    assert_eq!(output.results, vec!["result_0", "result_1", "result_2"]);
    assert!(output.faults.is_empty());
    Ok(())
}

#[test]
fn test_pipeline_all_items_come_out() -> Result<()> {
    let n = 1000;
    let pipeline = Pipeline::builder(PipelineConfig::default())
        .stage("token", 10, ToToken)
        .stage("result", 5, ToResult)
        .start()?;

    assert_eq!(pipeline.feed(0..n)?, n as usize);
    let output = pipeline.finish()?;

    assert_eq!(output.results.len(), n as usize);
    let got: HashSet<_> = output.results.into_iter().collect();
    let want: HashSet<_> = expected_results(n).into_iter().collect();
    assert_eq!(got, want);
    Ok(())
}

#[test]
fn test_pipeline_stage_stats() -> Result<()> {
    let output = Pipeline::builder(PipelineConfig::default())
        .stage("token", 4, ToToken)
        .stage("result", 2, ToResult)
        .start()?
        .run(0..50)?;

    assert_eq!(output.stages.len(), 2);
    assert_eq!(output.stages[0].name, "token");
    assert_eq!(output.stages[0].workers, 4);
    assert_eq!(output.stages[0].processed, 50);
    assert_eq!(output.stages[1].name, "result");
    assert_eq!(output.stages[1].workers, 2);
    assert_eq!(output.stages[1].processed, 50);
    assert!(output.stages.iter().all(|s| s.faults == 0 && s.discarded == 0));
    Ok(())
}

// ================================================================================================
// 2. Ordering
// ================================================================================================

#[test]
fn test_pipeline_single_worker_preserves_order() -> Result<()> {
    let n = 200;
    let config = PipelineConfig::builder().seed(11).build();
    let output = Pipeline::builder(config)
        .stage(
            "token",
            1,
            GetToken {
                max_latency: Duration::from_micros(200),
            },
        )
        .stage(
            "result",
            1,
            GetResult {
                max_latency: Duration::from_micros(100),
            },
        )
        .start()?
        .run(0..n)?;

    assert_eq!(output.results, expected_results(n));
    Ok(())
}

#[test]
fn test_pipeline_multiple_workers_reorder_but_keep_set() -> Result<()> {
    let n = 8;
    let output = Pipeline::builder(PipelineConfig::default())
        .stage(
            "delay",
            n as usize,
            InverseDelay {
                items: n,
                step: Duration::from_millis(15),
            },
        )
        .start()?
        .run(0..n)?;

    let input: Vec<u64> = (0..n).collect();
    assert_ne!(output.results, input, "later items should overtake earlier ones");

    let mut sorted = output.results.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, input);
    Ok(())
}

// ================================================================================================
// 3. Configuration
// ================================================================================================

#[test]
fn test_pipeline_rejects_zero_workers() {
    let result = Pipeline::builder(PipelineConfig::default())
        .stage("token", 0, ToToken)
        .start();

    assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
}

#[test]
fn test_pipeline_rejects_zero_capacity() {
    let config = PipelineConfig::builder().queue_capacity(0).build();
    let result = Pipeline::builder(config).stage("token", 1, ToToken).start();

    assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
}

#[test]
fn test_pipeline_bounded_queues_apply_backpressure() -> Result<()> {
    let config = PipelineConfig::builder().queue_capacity(2).build();
    let output = Pipeline::builder(config)
        .stage("token", 3, ToToken)
        .stage("result", 1, ToResult)
        .start()?
        .run(0..500)?;

    // The results queue stays unbounded, so 500 results fit even though
    // every other queue holds at most two messages.
    assert_eq!(output.results.len(), 500);
    Ok(())
}

// ================================================================================================
// 4. Shapes
// ================================================================================================

#[test]
fn test_pipeline_without_stages_passes_items_through() -> Result<()> {
    let output = Pipeline::builder::<u32>(PipelineConfig::default())
        .start()?
        .run(vec![3, 1, 2])?;

    assert_eq!(output.results, vec![3, 1, 2]);
    assert!(output.stages.is_empty());
    Ok(())
}

#[test]
fn test_pipeline_three_stages_with_closures_and_chain() -> Result<()> {
    let output = Pipeline::builder(PipelineConfig::default())
        .stage("token", 3, ToToken.then(ToResult))
        .stage("length", 2, from_fn(|s: String| Ok(s.len())))
        .stage("double", 2, from_fn(|n: usize| Ok(n * 2)))
        .start()?
        .run(0..10)?;

    let mut results = output.results;
    results.sort_unstable();
    // "result_0".."result_9" are all 8 bytes long.
    assert_eq!(results, vec![16; 10]);
    Ok(())
}

#[test]
fn test_pipeline_put_one_by_one() -> Result<()> {
    let pipeline = Pipeline::builder(PipelineConfig::default())
        .stage("token", 2, ToToken)
        .start()?;

    assert_eq!(pipeline.stage_names(), vec!["token"]);
    for i in 0..5 {
        pipeline.put(i)?;
    }
    let mut results = pipeline.finish()?.results;
    results.sort();
    assert_eq!(
        results,
        vec!["token_0", "token_1", "token_2", "token_3", "token_4"]
    );
    Ok(())
}
