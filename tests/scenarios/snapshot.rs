//! Test: Data snapshot - the built-in stage records an artifact

use crate::helpers::*;
use prober::core::{ExperimentManifest, ParsedProcedure, StageDescriptor};
use prober::execution::{StageRegistry, CONFIG_FILE, DATA_SNAPSHOT, DATA_SNAPSHOT_FILE};
use prober::persistence::{save_run_output, DATA_MAP_FILE, MANIFEST_FILE};

fn bench() -> Bench {
    Bench::new()
        .with_driver(scope_driver().with_response("run_measure_vpp", "2.5V"))
        .with_device("SCOPE1", "Scope", "sim")
}

#[tokio::test]
async fn test_snapshot_after_measurement() {
    let bench = bench();
    let procedure = ParsedProcedure::new("vpp").with_step(call("SCOPE1", "run_measure_vpp"));
    let (config, generated) = bench.compile(&procedure, "vpp").unwrap();
    let config = config.with_stage(StageDescriptor::builtin(DATA_SNAPSHOT, 2));

    let outcome = bench.run(&config, StageRegistry::new().with_procedure(generated)).await;

    assert_completed(&outcome);
    let directory = outcome.result.directory().to_path_buf();
    let snapshot = directory.join(DATA_SNAPSHOT_FILE);
    assert_eq!(outcome.result.artifacts(), &[snapshot.clone()]);

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&snapshot).unwrap()).unwrap();
    assert_eq!(written["SCOPE1.run_measure_vpp"], "2.5V");

    std::fs::remove_dir_all(directory).ok();
}

/// The manifest lists the artifacts and the data map is written on request
#[tokio::test]
async fn test_run_output_files() {
    let bench = bench();
    let procedure = ParsedProcedure::new("vpp").with_step(call("SCOPE1", "run_measure_vpp"));
    let (config, generated) = bench.compile(&procedure, "vpp").unwrap();
    let config = config.with_stage(StageDescriptor::builtin(DATA_SNAPSHOT, 2));
    let outcome = bench.run(&config, StageRegistry::new().with_procedure(generated)).await;

    let manifest_path = save_run_output(&outcome, true).unwrap();
    let directory = outcome.result.directory();
    assert_eq!(manifest_path, directory.join(MANIFEST_FILE));

    let manifest: ExperimentManifest =
        serde_json::from_str(&std::fs::read_to_string(&manifest_path).unwrap()).unwrap();
    assert_eq!(manifest, outcome.result.export());
    assert_eq!(manifest.artifacts.len(), 1);
    assert!(manifest.ended_at.is_some());
    assert!(directory.join(DATA_MAP_FILE).exists());

    std::fs::remove_dir_all(directory).ok();
}

/// Without a snapshot stage the run writes only its configuration
#[tokio::test]
async fn test_no_snapshot_only_configuration() {
    let bench = bench();
    let procedure = ParsedProcedure::new("vpp").with_step(call("SCOPE1", "run_measure_vpp"));
    let (config, generated) = bench.compile(&procedure, "vpp").unwrap();

    let outcome = bench.run(&config, StageRegistry::new().with_procedure(generated)).await;

    assert_completed(&outcome);
    assert!(outcome.result.artifacts().is_empty());
    let written: Vec<_> = std::fs::read_dir(outcome.result.directory())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(written, vec![CONFIG_FILE]);

    let manifest_path = save_run_output(&outcome, false).unwrap();
    assert!(manifest_path.exists());
    assert!(!outcome.result.directory().join(DATA_MAP_FILE).exists());

    std::fs::remove_dir_all(outcome.result.directory()).ok();
}
