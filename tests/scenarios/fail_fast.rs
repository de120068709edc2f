//! Test: Fail fast - the first failing stage stops the remaining groups

use crate::helpers::*;
use prober::core::{CompiledConfiguration, DataMap, ParsedProcedure, StageDescriptor};
use prober::execution::{ExecutionEvent, RunError, SchedulingStrategy, StageError, StageRegistry};

/// A failing order-1 stage keeps order 2 from starting
#[tokio::test]
async fn test_failure_skips_later_groups() {
    let log = StageLog::new();
    let stages = with_scripted(StageRegistry::new(), &log, "broken", 0, true);
    let stages = with_scripted(stages, &log, "never", 0, false);
    let config = CompiledConfiguration::new("fail-fast")
        .with_stage(StageDescriptor::builtin("broken", 1))
        .with_stage(StageDescriptor::builtin("never", 2));

    let outcome = Bench::new().run(&config, stages).await;

    assert_failed_at(&outcome, "broken");
    assert!(log.position("start:never").is_none());
    assert!(!outcome.data.contains("never.ran"));
    assert!(outcome.result.ended_at().is_some());
    assert_eq!(outcome.state.failed_stages, 1);
}

/// Sequential groups stop at the failing member
#[tokio::test]
async fn test_sequential_stops_inside_group() {
    let log = StageLog::new();
    let stages = with_scripted(StageRegistry::new(), &log, "first", 0, true);
    let stages = with_scripted(stages, &log, "second", 0, false);
    let config = CompiledConfiguration::new("fail-fast")
        .with_stage(StageDescriptor::builtin("first", 1))
        .with_stage(StageDescriptor::builtin("second", 1));

    let outcome = Bench::new().run(&config, stages).await;

    assert_failed_at(&outcome, "first");
    assert_eq!(log.entries(), vec!["start:first", "end:first"]);
}

/// Parallel members of the failing group are joined before the run aborts
#[tokio::test]
async fn test_parallel_group_is_joined_before_abort() {
    let log = StageLog::new();
    let stages = with_scripted(StageRegistry::new(), &log, "broken", 0, true);
    let stages = with_scripted(stages, &log, "sibling", 50, false);
    let stages = with_scripted(stages, &log, "never", 0, false);
    let config = CompiledConfiguration::new("fail-fast")
        .with_stage(StageDescriptor::builtin("broken", 1))
        .with_stage(StageDescriptor::builtin("sibling", 1))
        .with_stage(StageDescriptor::builtin("never", 2));

    let outcome = Bench::new()
        .run_with(&config, stages, SchedulingStrategy::Parallel, DataMap::new())
        .await;

    assert_failed_at(&outcome, "broken");
    assert!(log.position("end:sibling").is_some());
    assert_data(&outcome, "sibling.ran", "yes");
    assert!(log.position("start:never").is_none());
}

/// A device error fails the stage and still releases the device
#[tokio::test]
async fn test_device_error_releases_devices() {
    let bench = Bench::new()
        .with_driver(scope_driver().with_failure("run_stop_acquisition"))
        .with_device("SCOPE1", "Scope", "sim");
    let procedure = ParsedProcedure::new("stop")
        .with_step(call("SCOPE1", "run_stop_acquisition"))
        .with_step(call("SCOPE1", "run_measure_vpp"));
    let (config, generated) = bench.compile(&procedure, "stop").unwrap();

    let outcome = bench.run(&config, StageRegistry::new().with_procedure(generated)).await;

    assert_failed_at(&outcome, "stop");
    assert!(matches!(
        outcome.failure,
        Some(RunError::StageFailed {
            source: StageError::Device { .. },
            ..
        })
    ));
    assert_eq!(bench.stats("Scope").calls(), vec!["SCOPE1.run_stop_acquisition"]);
    assert_eq!(bench.stats("Scope").disconnects(), 1);
}

/// Observers see the failure and the failed run
#[tokio::test]
async fn test_failure_events() {
    let log = StageLog::new();
    let stages = with_scripted(StageRegistry::new(), &log, "broken", 0, true);
    let config = CompiledConfiguration::new("fail-fast").with_stage(StageDescriptor::builtin("broken", 1));

    let events = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = events.clone();
    let bench = Bench::new();
    let mut engine = prober::ExecutionEngine::new(bench.lifecycle(), stages, SchedulingStrategy::Sequential);
    engine.add_event_handler(move |event| sink.lock().unwrap().push(event));

    let outcome = engine
        .run(
            &config,
            bench.hardware(),
            DataMap::new(),
            prober::ExperimentResult::new(temp_dir("events")),
        )
        .await
        .unwrap();

    assert_failed_at(&outcome, "broken");
    let events = events.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::StageFailed { stage, .. } if stage == "broken")));
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::RunCompleted {
            status: prober::RunStatus::Failed,
            ..
        })
    ));
}
