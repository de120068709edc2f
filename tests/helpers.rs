//! Test utility functions for prober

#![allow(dead_code)]

use async_trait::async_trait;
use prober::compiler::{CompileError, PatternCompiler};
use prober::core::{
    CapabilityDescriptor, CapabilityRegistry, CompiledConfiguration, ConnectionType, DataMap, DeviceDescriptor,
    ExperimentResult, GeneratedProcedure, HardwareRegistry, ParsedProcedure, RunStatus, StepDefinition, TokenKind,
};
use prober::device::{DeviceLifecycleManager, Driver, DriverRegistry, SimulatedDriver, SimulationStats};
use prober::execution::{ExecutionEngine, RunOutcome, SchedulingStrategy, Stage, StageContext, StageError, StageRegistry};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Oscilloscope-like simulated driver
pub fn scope_driver() -> SimulatedDriver {
    SimulatedDriver::new(
        "Scope",
        CapabilityDescriptor::new()
            .with_operation("run_measure", &[])
            .with_operation("run_measure_vpp", &["channel_num"])
            .with_operation("run_stop_acquisition", &[]),
    )
}

/// Laser-like simulated driver
pub fn laser_driver() -> SimulatedDriver {
    SimulatedDriver::new(
        "Laser",
        CapabilityDescriptor::new()
            .with_operation("run_set_wavelength", &["wavelength"])
            .with_operation("run_check_status", &[]),
    )
}

/// Simulated drivers plus the devices wired to them
pub struct Bench {
    drivers: BTreeMap<String, SimulatedDriver>,
    instantiations: BTreeMap<String, Arc<AtomicUsize>>,
    hardware: HardwareRegistry,
}

impl Bench {
    pub fn new() -> Self {
        Self {
            drivers: BTreeMap::new(),
            instantiations: BTreeMap::new(),
            hardware: HardwareRegistry::new(),
        }
    }

    pub fn with_driver(mut self, driver: SimulatedDriver) -> Self {
        let driver_type = driver.driver_type().to_string();
        self.instantiations
            .insert(driver_type.clone(), Arc::new(AtomicUsize::new(0)));
        self.drivers.insert(driver_type, driver);
        self
    }

    /// Add a VISA device reachable at `address`
    pub fn with_device(self, name: &str, driver_type: &str, address: &str) -> Self {
        self.with_descriptor(
            name,
            DeviceDescriptor::new(ConnectionType::Visa, Some(address), driver_type),
        )
    }

    pub fn with_descriptor(mut self, name: &str, descriptor: DeviceDescriptor) -> Self {
        self.hardware = self.hardware.with_device(name, descriptor);
        self
    }

    pub fn hardware(&self) -> &HardwareRegistry {
        &self.hardware
    }

    pub fn capabilities(&self) -> CapabilityRegistry {
        let mut registry = CapabilityRegistry::new();
        for (driver_type, driver) in &self.drivers {
            registry
                .register(driver_type, driver.capabilities())
                .expect("driver types are unique");
        }
        registry
    }

    /// Driver registry whose factories count their calls
    pub fn driver_registry(&self) -> DriverRegistry {
        let mut registry = DriverRegistry::new();
        for (driver_type, driver) in &self.drivers {
            let counter = self.instantiations[driver_type].clone();
            let driver = driver.clone();
            registry.register(driver_type, driver.capabilities(), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Arc::new(driver.clone()) as Arc<dyn Driver>
            });
        }
        registry
    }

    pub fn lifecycle(&self) -> DeviceLifecycleManager {
        DeviceLifecycleManager::new(Arc::new(self.driver_registry()))
    }

    pub fn stats(&self, driver_type: &str) -> Arc<SimulationStats> {
        self.drivers[driver_type].stats()
    }

    /// How many times the driver type's factory ran
    pub fn instantiations(&self, driver_type: &str) -> usize {
        self.instantiations[driver_type].load(Ordering::SeqCst)
    }

    pub fn compile(
        &self,
        procedure: &ParsedProcedure,
        name: &str,
    ) -> Result<(CompiledConfiguration, GeneratedProcedure), CompileError> {
        let capabilities = self.capabilities();
        PatternCompiler::new(&capabilities, &self.hardware).compile(procedure, name)
    }

    pub async fn run(&self, config: &CompiledConfiguration, stages: StageRegistry) -> RunOutcome {
        self.run_with(config, stages, SchedulingStrategy::Sequential, DataMap::new())
            .await
    }

    pub async fn run_with(
        &self,
        config: &CompiledConfiguration,
        stages: StageRegistry,
        strategy: SchedulingStrategy,
        overrides: DataMap,
    ) -> RunOutcome {
        let engine = ExecutionEngine::new(self.lifecycle(), stages, strategy);
        let result = ExperimentResult::new(temp_dir(&config.name));
        engine
            .run(config, &self.hardware, overrides, result)
            .await
            .expect("fresh result is never finalized")
    }
}

/// A step from `(value, kind)` pairs
pub fn step(pairs: &[(&str, &str)]) -> StepDefinition {
    StepDefinition::new(
        pairs.iter().map(|(value, _)| value.to_string()).collect(),
        pairs
            .iter()
            .map(|(_, kind)| TokenKind::from(kind.to_string()))
            .collect(),
    )
}

/// `Run <device>.<function>`
pub fn call(device: &str, function: &str) -> StepDefinition {
    step(&[("Run", "Run"), (device, "[DEV]"), (".", "."), (function, "[FNC]")])
}

/// `Run <device>.<function> <op> <expected>`
pub fn call_and_check(device: &str, function: &str, op: &str, expected: &str) -> StepDefinition {
    step(&[
        ("Run", "Run"),
        (device, "[DEV]"),
        (".", "."),
        (function, "[FNC]"),
        (op, "[OP]"),
        (expected, "[STR]"),
    ])
}

/// Fresh directory path under the system temp dir; not created
pub fn temp_dir(prefix: &str) -> PathBuf {
    let prefix: String = prefix
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    std::env::temp_dir().join(format!("prober-{}-{}", prefix, uuid::Uuid::new_v4()))
}

/// Shared log of stage start and end markers
#[derive(Clone, Default)]
pub struct StageLog {
    entries: Arc<Mutex<Vec<String>>>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl StageLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn enter(&self, name: &str) {
        self.entries.lock().unwrap().push(format!("start:{}", name));
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self, name: &str) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.entries.lock().unwrap().push(format!("end:{}", name));
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    /// Most stages ever running at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Built-in stage that logs itself, waits, then succeeds or fails
pub struct ScriptedStage {
    name: String,
    log: StageLog,
    delay: Duration,
    fail: bool,
}

#[async_trait]
impl Stage for ScriptedStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &StageContext) -> Result<(), StageError> {
        self.log.enter(&self.name);
        tokio::time::sleep(self.delay).await;
        ctx.data.lock().await.insert_text(format!("{}.ran", self.name), "yes");
        self.log.leave(&self.name);
        if self.fail {
            Err(StageError::Other(format!("{} failed on purpose", self.name)))
        } else {
            Ok(())
        }
    }
}

/// Register a scripted stage under `name`
pub fn with_scripted(stages: StageRegistry, log: &StageLog, name: &str, delay_ms: u64, fail: bool) -> StageRegistry {
    let log = log.clone();
    let stage_name = name.to_string();
    stages.with_builtin(name, move || {
        Arc::new(ScriptedStage {
            name: stage_name.clone(),
            log: log.clone(),
            delay: Duration::from_millis(delay_ms),
            fail,
        }) as Arc<dyn Stage>
    })
}

/// Assert the run completed
pub fn assert_completed(outcome: &RunOutcome) {
    assert_eq!(
        outcome.status(),
        RunStatus::Completed,
        "Run should have completed, failure: {:?}",
        outcome.failure
    );
    assert!(outcome.failure.is_none());
}

/// Assert the run failed in the named stage
pub fn assert_failed_at(outcome: &RunOutcome, stage: &str) {
    assert_eq!(outcome.status(), RunStatus::Failed, "Run should have failed");
    assert_eq!(
        outcome.failed_stage(),
        Some(stage),
        "Run failed with {:?}",
        outcome.failure
    );
}

/// Assert a data key holds the expected text
pub fn assert_data(outcome: &RunOutcome, key: &str, expected: &str) {
    let actual = outcome.data.get_text(key);
    assert_eq!(
        actual.as_deref(),
        Some(expected),
        "Data key '{}' should be '{}'",
        key,
        expected
    );
}
