//! Test: Connections - one driver per type, all-or-nothing device opening

use crate::helpers::*;
use prober::core::{ConnectionType, DataMap, DeviceDescriptor, ParsedProcedure};
use prober::device::ConnectionError;
use prober::execution::{ExecutionEngine, RunError, SchedulingStrategy, StageRegistry};
use prober::ExperimentResult;
use std::sync::Arc;

fn three_device_procedure() -> ParsedProcedure {
    ParsedProcedure::new("bench")
        .with_step(call("SCOPE1", "run_measure_vpp"))
        .with_step(call("SCOPE2", "run_measure_vpp"))
        .with_step(call("LASER1", "run_check_status"))
}

/// Two devices on one driver type share a single driver instance
#[tokio::test]
async fn test_shared_driver_instantiated_once() {
    let bench = Bench::new()
        .with_driver(scope_driver())
        .with_driver(laser_driver())
        .with_device("SCOPE1", "Scope", "10.0.0.5:5025")
        .with_device("SCOPE2", "Scope", "10.0.0.6:5025")
        .with_device("LASER1", "Laser", "10.0.0.9:5025");
    let (config, generated) = bench.compile(&three_device_procedure(), "bench").unwrap();
    assert_eq!(config.devices, vec!["SCOPE1", "SCOPE2", "LASER1"]);

    let outcome = bench.run(&config, StageRegistry::new().with_procedure(generated)).await;

    assert_completed(&outcome);
    assert_eq!(bench.instantiations("Scope"), 1);
    assert_eq!(bench.instantiations("Laser"), 1);
    assert_eq!(bench.stats("Scope").opened(), 2);
    assert_eq!(bench.stats("Scope").disconnects(), 2);
    assert_eq!(bench.stats("Laser").disconnects(), 1);
}

/// The k-th device failing releases the k-1 already opened, exactly once each
#[tokio::test]
async fn test_connection_failure_releases_opened_devices() {
    let bench = Bench::new()
        .with_driver(scope_driver())
        .with_driver(laser_driver().with_unreachable("10.0.0.9:5025"))
        .with_device("SCOPE1", "Scope", "10.0.0.5:5025")
        .with_device("SCOPE2", "Scope", "10.0.0.6:5025")
        .with_device("LASER1", "Laser", "10.0.0.9:5025");
    let (config, generated) = bench.compile(&three_device_procedure(), "bench").unwrap();

    let outcome = bench.run(&config, StageRegistry::new().with_procedure(generated)).await;

    assert_eq!(outcome.status(), prober::RunStatus::Failed);
    match &outcome.failure {
        Some(RunError::Connection(e)) => {
            assert!(matches!(e, ConnectionError::DeviceUnreachable { .. }));
            assert_eq!(e.device(), "LASER1");
        }
        other => panic!("Expected an unreachable device, got {:?}", other),
    }
    assert_eq!(bench.stats("Scope").opened(), 2);
    assert_eq!(bench.stats("Scope").disconnects(), 2);
    assert!(bench.stats("Scope").calls().is_empty());
    assert_eq!(outcome.state.completed_stages, 0);
    assert!(outcome.result.ended_at().is_some());
}

/// A device whose connection type has no automatic address needs a resolver
#[tokio::test]
async fn test_address_resolver() {
    let bench = Bench::new().with_driver(scope_driver()).with_descriptor(
        "SCOPE1",
        DeviceDescriptor::new(ConnectionType::Other("GPIB".to_string()), None, "Scope"),
    );
    let procedure = ParsedProcedure::new("vpp").with_step(call("SCOPE1", "run_measure_vpp"));
    let (config, generated) = bench.compile(&procedure, "vpp").unwrap();

    let outcome = bench
        .run(&config, StageRegistry::new().with_procedure(generated.clone()))
        .await;
    assert!(matches!(
        outcome.failure,
        Some(RunError::Connection(ConnectionError::NoAddressProvided { .. }))
    ));
    assert_eq!(bench.stats("Scope").opened(), 0);

    let lifecycle = bench
        .lifecycle()
        .with_resolver(Arc::new(|_: &str, _: &DeviceDescriptor| Some("sim".to_string())));
    let engine = ExecutionEngine::new(
        lifecycle,
        StageRegistry::new().with_procedure(generated),
        SchedulingStrategy::Sequential,
    );
    let outcome = engine
        .run(
            &config,
            bench.hardware(),
            DataMap::new(),
            ExperimentResult::new(temp_dir("resolver")),
        )
        .await
        .unwrap();
    assert_completed(&outcome);
}

/// An instrument that moved is found through the resolver after its default
/// address fails
#[tokio::test]
async fn test_resolver_used_when_default_unreachable() {
    let bench = Bench::new()
        .with_driver(scope_driver())
        .with_driver(laser_driver().with_unreachable("10.0.0.9:5025"))
        .with_device("SCOPE1", "Scope", "10.0.0.5:5025")
        .with_device("LASER1", "Laser", "10.0.0.9:5025");
    let procedure = ParsedProcedure::new("bench")
        .with_step(call("SCOPE1", "run_measure_vpp"))
        .with_step(call("LASER1", "run_check_status"));
    let (config, generated) = bench.compile(&procedure, "bench").unwrap();

    let asked = Arc::new(std::sync::Mutex::new(Vec::new()));
    let log = asked.clone();
    let resolver = move |device: &str, _: &DeviceDescriptor| {
        log.lock().unwrap().push(device.to_string());
        Some("10.0.0.19:5025".to_string())
    };
    let engine = ExecutionEngine::new(
        bench.lifecycle().with_resolver(Arc::new(resolver)),
        StageRegistry::new().with_procedure(generated),
        SchedulingStrategy::Sequential,
    );
    let outcome = engine
        .run(
            &config,
            bench.hardware(),
            DataMap::new(),
            ExperimentResult::new(temp_dir("moved")),
        )
        .await
        .unwrap();

    assert_completed(&outcome);
    assert_eq!(*asked.lock().unwrap(), vec!["LASER1"]);
    assert_eq!(bench.stats("Laser").opened(), 1);
    assert_eq!(bench.stats("Laser").disconnects(), 1);
}

/// A device missing from the hardware registry fails the run before any stage
#[tokio::test]
async fn test_unknown_device_at_run_time() {
    let bench = Bench::new()
        .with_driver(scope_driver())
        .with_device("SCOPE1", "Scope", "sim");
    let procedure = ParsedProcedure::new("vpp").with_step(call("SCOPE1", "run_measure_vpp"));
    let (mut config, generated) = bench.compile(&procedure, "vpp").unwrap();
    config.devices.push("SCOPE9".to_string());

    let outcome = bench.run(&config, StageRegistry::new().with_procedure(generated)).await;

    assert!(matches!(
        outcome.failure,
        Some(RunError::Connection(ConnectionError::UnknownDevice { .. }))
    ));
    assert_eq!(bench.stats("Scope").disconnects(), 1);
}
