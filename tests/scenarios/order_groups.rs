//! Test: Order groups - stages sharing an order finish before the next order starts

use crate::helpers::*;
use prober::core::{CompiledConfiguration, DataMap, StageDescriptor};
use prober::execution::{SchedulingStrategy, StageRegistry};

fn experiment(stages: &[(&str, u32)]) -> CompiledConfiguration {
    stages
        .iter()
        .fold(CompiledConfiguration::new("groups"), |config, (name, order)| {
            config.with_stage(StageDescriptor::builtin(name, *order))
        })
}

/// Orders [1, 1, 2] run in parallel: both order-1 stages end before order 2 starts
#[tokio::test]
async fn test_parallel_group_barrier() {
    let log = StageLog::new();
    let stages = StageRegistry::new();
    let stages = with_scripted(stages, &log, "slow", 60, false);
    let stages = with_scripted(stages, &log, "fast", 5, false);
    let stages = with_scripted(stages, &log, "after", 0, false);
    let config = experiment(&[("slow", 1), ("fast", 1), ("after", 2)]);

    let outcome = Bench::new()
        .run_with(&config, stages, SchedulingStrategy::Parallel, DataMap::new())
        .await;

    assert_completed(&outcome);
    let after = log.position("start:after").unwrap();
    assert!(log.position("end:slow").unwrap() < after);
    assert!(log.position("end:fast").unwrap() < after);
    assert_eq!(log.peak(), 2);
    assert_eq!(outcome.state.completed_stages, 3);
}

/// Sequential strategy keeps declaration order inside a group
#[tokio::test]
async fn test_sequential_declaration_order() {
    let log = StageLog::new();
    let stages = StageRegistry::new();
    let stages = with_scripted(stages, &log, "b", 10, false);
    let stages = with_scripted(stages, &log, "a", 0, false);
    let stages = with_scripted(stages, &log, "c", 0, false);
    // declared out of order; order values decide the groups
    let config = experiment(&[("c", 2), ("b", 1), ("a", 1)]);

    let outcome = Bench::new().run(&config, stages).await;

    assert_completed(&outcome);
    assert_eq!(
        log.entries(),
        vec!["start:b", "end:b", "start:a", "end:a", "start:c", "end:c"]
    );
    assert_eq!(log.peak(), 1);
}

/// Limited parallelism never exceeds its bound
#[tokio::test]
async fn test_limited_parallel_bound() {
    let log = StageLog::new();
    let mut stages = StageRegistry::new();
    let mut declared = Vec::new();
    for name in ["s1", "s2", "s3", "s4", "s5"] {
        stages = with_scripted(stages, &log, name, 20, false);
        declared.push((name, 1));
    }
    let config = experiment(&declared);

    let outcome = Bench::new()
        .run_with(&config, stages, SchedulingStrategy::LimitedParallel(2), DataMap::new())
        .await;

    assert_completed(&outcome);
    assert!(log.peak() <= 2);
    for name in ["s1", "s2", "s3", "s4", "s5"] {
        assert_data(&outcome, &format!("{}.ran", name), "yes");
    }
}

/// A stage that appears in two groups runs once per appearance
#[tokio::test]
async fn test_repeated_stage_runs_per_descriptor() {
    let log = StageLog::new();
    let stages = with_scripted(StageRegistry::new(), &log, "tick", 0, false);
    let config = experiment(&[("tick", 1), ("tick", 2)]);

    let outcome = Bench::new().run(&config, stages).await;

    assert_completed(&outcome);
    assert_eq!(log.entries(), vec!["start:tick", "end:tick", "start:tick", "end:tick"]);
}
