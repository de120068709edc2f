//! Test: End to end - compile a procedure, run it, read the data map

use crate::helpers::*;
use prober::core::{CompiledConfiguration, DataMap, ParsedProcedure};
use prober::execution::{RunError, SchedulingStrategy, StageError, StageRegistry, CONFIG_FILE};

fn bench() -> Bench {
    Bench::new()
        .with_driver(scope_driver().with_response("run_measure_vpp", "2.5V"))
        .with_device("SCOPE1", "Scope", "sim")
}

/// A single measurement lands under its default data key
#[tokio::test]
async fn test_measurement_is_recorded() {
    let bench = bench();
    let procedure = ParsedProcedure::new("vpp").with_step(call("SCOPE1", "run_measure_vpp"));
    let (config, generated) = bench.compile(&procedure, "vpp").unwrap();

    let outcome = bench.run(&config, StageRegistry::new().with_procedure(generated)).await;

    assert_completed(&outcome);
    assert_data(&outcome, "SCOPE1.run_measure_vpp", "2.5V");
    assert!(outcome.result.artifacts().is_empty());
    assert!(outcome.result.ended_at().is_some());
    assert_eq!(outcome.state.completed_stages, 1);
    assert_eq!(bench.stats("Scope").disconnects(), 1);
}

/// The configuration a run executed is kept next to its results
#[tokio::test]
async fn test_configuration_is_recorded() {
    let bench = bench();
    let procedure = ParsedProcedure::new("vpp").with_step(call("SCOPE1", "run_measure_vpp"));
    let (config, generated) = bench.compile(&procedure, "vpp").unwrap();

    let outcome = bench.run(&config, StageRegistry::new().with_procedure(generated)).await;

    assert_completed(&outcome);
    let directory = outcome.result.directory().to_path_buf();
    let recorded = outcome.result.config_file().unwrap().to_path_buf();
    assert_eq!(recorded, directory.join(CONFIG_FILE));
    assert_eq!(outcome.result.export().config, Some(recorded.clone()));

    let written: CompiledConfiguration =
        serde_json::from_str(&std::fs::read_to_string(&recorded).unwrap()).unwrap();
    assert_eq!(written, config);
    assert_eq!(written.devices, vec!["SCOPE1"]);

    std::fs::remove_dir_all(directory).ok();
}

/// A blank expected value is filled in at run time
#[tokio::test]
async fn test_pending_input_supplied_at_run_time() {
    let bench = bench();
    let procedure =
        ParsedProcedure::new("vpp").with_step(call_and_check("SCOPE1", "run_measure_vpp", ">=", "???"));
    let (config, generated) = bench.compile(&procedure, "vpp").unwrap();
    assert_eq!(config.missing_data(), vec!["vpp.step1.arg6"]);

    let mut overrides = DataMap::new();
    overrides.insert_text("vpp.step1.arg6", "2.0");
    let outcome = bench
        .run_with(
            &config,
            StageRegistry::new().with_procedure(generated),
            SchedulingStrategy::Sequential,
            overrides,
        )
        .await;

    assert_completed(&outcome);
    assert_data(&outcome, "vpp.step1.arg6", "2.0");
}

/// Running without the pending input fails the stage before the device is called
#[tokio::test]
async fn test_missing_input_fails_stage() {
    let bench = bench();
    let procedure =
        ParsedProcedure::new("vpp").with_step(call_and_check("SCOPE1", "run_measure_vpp", ">=", "???"));
    let (config, generated) = bench.compile(&procedure, "vpp").unwrap();

    let outcome = bench.run(&config, StageRegistry::new().with_procedure(generated)).await;

    assert_failed_at(&outcome, "vpp");
    assert!(matches!(
        outcome.failure,
        Some(RunError::StageFailed {
            source: StageError::MissingData { .. },
            ..
        })
    ));
    assert!(bench.stats("Scope").calls().is_empty());
    assert_eq!(bench.stats("Scope").disconnects(), 1);
}

/// A failed check fails the run after storing the reply
#[tokio::test]
async fn test_failed_check_fails_run() {
    let bench = bench();
    let procedure =
        ParsedProcedure::new("vpp").with_step(call_and_check("SCOPE1", "run_measure_vpp", "==", "3.3"));
    let (config, generated) = bench.compile(&procedure, "vpp").unwrap();

    let outcome = bench.run(&config, StageRegistry::new().with_procedure(generated)).await;

    assert_failed_at(&outcome, "vpp");
    assert!(matches!(
        outcome.failure,
        Some(RunError::StageFailed {
            source: StageError::CheckFailed { step: 1, .. },
            ..
        })
    ));
    assert_data(&outcome, "SCOPE1.run_measure_vpp", "2.5V");
    assert!(outcome.result.ended_at().is_some());
}

/// Steps run in authored order, later steps reading earlier results
#[tokio::test]
async fn test_steps_share_the_data_map() {
    let bench = bench();
    let procedure = ParsedProcedure::new("vpp")
        .with_step(step(&[
            ("Run", "Run"),
            ("SCOPE1", "[DEV]"),
            (".", "."),
            ("run_measure_vpp 1", "[FNC]"),
            ("as", "as"),
            ("vpp_ch1", "[STR]"),
        ]))
        .with_step(step(&[
            ("Check", "Check"),
            ("vpp_ch1", "[STR]"),
            ("<", "[OP]"),
            ("5", "[STR]"),
        ]));
    let (config, generated) = bench.compile(&procedure, "vpp").unwrap();

    let outcome = bench.run(&config, StageRegistry::new().with_procedure(generated)).await;

    assert_completed(&outcome);
    assert_data(&outcome, "vpp_ch1", "2.5V");
    assert_eq!(bench.stats("Scope").calls(), vec!["SCOPE1.run_measure_vpp"]);
}
