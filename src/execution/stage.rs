//! Stages - the units of work a run executes
//!
//! Every stage is invoked through [`Stage::run`] with a [`StageContext`]
//! giving it the run's data map, experiment result and connected devices.
//! Returning an error is the only way for a stage to signal failure.

use crate::core::{
    Action, Argument, Comparison, DataMap, ExperimentResult, GeneratedProcedure, StageDescriptor,
    StageKind,
};
use crate::device::{Device, DeviceError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Built-in stage that writes the data map to the results directory
pub const DATA_SNAPSHOT: &str = "DATA_SNAPSHOT";

/// File written by [`DATA_SNAPSHOT`]
pub const DATA_SNAPSHOT_FILE: &str = "data.json";

pub type SharedData = Arc<Mutex<DataMap>>;
pub type SharedResult = Arc<Mutex<ExperimentResult>>;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("Device '{device}' is not connected")]
    DeviceNotConnected { device: String },

    #[error("{device}.{operation} failed: {source}")]
    Device {
        device: String,
        operation: String,
        #[source]
        source: DeviceError,
    },

    #[error("Data key '{key}' has no value")]
    MissingData { key: String },

    #[error("Check failed at step {step}: {lhs} {op} {rhs}")]
    CheckFailed {
        step: usize,
        lhs: String,
        op: Comparison,
        rhs: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Everything a stage can reach during a run
#[derive(Clone)]
pub struct StageContext {
    pub data: SharedData,
    pub result: SharedResult,
    devices: Arc<HashMap<String, Arc<dyn Device>>>,
}

impl StageContext {
    pub fn new(data: DataMap, result: ExperimentResult, devices: HashMap<String, Arc<dyn Device>>) -> Self {
        Self {
            data: Arc::new(Mutex::new(data)),
            result: Arc::new(Mutex::new(result)),
            devices: Arc::new(devices),
        }
    }

    pub fn device(&self, device: &str) -> Result<Arc<dyn Device>, StageError> {
        self.devices
            .get(device)
            .cloned()
            .ok_or_else(|| StageError::DeviceNotConnected {
                device: device.to_string(),
            })
    }

    /// Copy of the data map as it is now
    pub async fn data_snapshot(&self) -> DataMap {
        self.data.lock().await.clone()
    }

    /// Copy of the experiment result as it is now
    pub async fn result_snapshot(&self) -> ExperimentResult {
        self.result.lock().await.clone()
    }
}

/// Entry contract of every stage
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &StageContext) -> Result<(), StageError>;
}

/// Interprets a generated procedure statement by statement
pub struct ProcedureStage {
    procedure: GeneratedProcedure,
}

impl ProcedureStage {
    pub fn new(procedure: GeneratedProcedure) -> Self {
        Self { procedure }
    }

    /// Value of an argument; a pending argument reads its data key
    fn resolve(data: &DataMap, argument: &Argument) -> Result<String, StageError> {
        match argument {
            Argument::Literal { value } => Ok(value.clone()),
            Argument::Pending { key } => data
                .get_text(key)
                .ok_or_else(|| StageError::MissingData { key: key.clone() }),
        }
    }

    /// Comparison operand; a literal naming a data key stands for its value
    fn operand(data: &DataMap, argument: &Argument) -> Result<String, StageError> {
        let value = Self::resolve(data, argument)?;
        Ok(data.get_text(&value).unwrap_or(value))
    }

    fn check(step: usize, lhs: String, op: Comparison, rhs: String) -> Result<(), StageError> {
        if op.evaluate(&lhs, &rhs) {
            debug!("Step {}: {} {} {} holds", step, lhs, op, rhs);
            Ok(())
        } else {
            Err(StageError::CheckFailed { step, lhs, op, rhs })
        }
    }
}

#[async_trait]
impl Stage for ProcedureStage {
    fn name(&self) -> &str {
        &self.procedure.name
    }

    async fn run(&self, ctx: &StageContext) -> Result<(), StageError> {
        for statement in &self.procedure.statements {
            let step = statement.step;
            match &statement.action {
                Action::Invoke {
                    device,
                    operation,
                    args,
                    store_as,
                    check,
                } => {
                    let (values, expected) = {
                        let data = ctx.data.lock().await;
                        let values = args
                            .iter()
                            .map(|arg| Self::resolve(&data, arg))
                            .collect::<Result<Vec<_>, _>>()?;
                        let expected = match check {
                            Some(check) => Some((check.op, Self::operand(&data, &check.expected)?)),
                            None => None,
                        };
                        (values, expected)
                    };

                    let handle = ctx.device(device)?;
                    debug!("Step {}: {}.{}({})", step, device, operation, values.join(", "));
                    let reply = handle
                        .invoke(operation, &values)
                        .await
                        .map_err(|source| StageError::Device {
                            device: device.clone(),
                            operation: operation.clone(),
                            source,
                        })?;

                    if let Some(reply) = &reply {
                        ctx.data.lock().await.insert_text(store_as.clone(), reply.clone());
                    }
                    if let Some((op, expected)) = expected {
                        Self::check(step, reply.unwrap_or_default(), op, expected)?;
                    }
                }
                Action::Compare { lhs, op, rhs } => {
                    let (lhs, rhs) = {
                        let data = ctx.data.lock().await;
                        (Self::operand(&data, lhs)?, Self::operand(&data, rhs)?)
                    };
                    Self::check(step, lhs, *op, rhs)?;
                }
                Action::Assign { key, value } => {
                    let mut data = ctx.data.lock().await;
                    let key = Self::resolve(&data, key)?;
                    let value = Self::resolve(&data, value)?;
                    debug!("Step {}: {} = {}", step, key, value);
                    data.insert_text(key, value);
                }
                Action::Note { text } => info!("[{}] {}", self.procedure.name, text),
            }
        }
        Ok(())
    }
}

/// Writes the data map as JSON into the results directory
pub struct DataSnapshotStage;

#[async_trait]
impl Stage for DataSnapshotStage {
    fn name(&self) -> &str {
        DATA_SNAPSHOT
    }

    async fn run(&self, ctx: &StageContext) -> Result<(), StageError> {
        let json = serde_json::to_string_pretty(&*ctx.data.lock().await)?;
        let mut result = ctx.result.lock().await;
        let path = result.directory().join(DATA_SNAPSHOT_FILE);
        tokio::fs::create_dir_all(result.directory()).await?;
        tokio::fs::write(&path, json).await?;
        info!("Wrote data snapshot to {}", path.display());
        result.record_artifact(path);
        Ok(())
    }
}

pub type StageFactory = Arc<dyn Fn() -> Arc<dyn Stage> + Send + Sync>;

/// Resolves stage descriptors to runnable stages
#[derive(Clone)]
pub struct StageRegistry {
    procedures: HashMap<String, GeneratedProcedure>,
    builtins: BTreeMap<String, StageFactory>,
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StageRegistry {
    /// Registry with the built-in stages
    pub fn new() -> Self {
        let registry = Self {
            procedures: HashMap::new(),
            builtins: BTreeMap::new(),
        };
        registry.with_builtin(DATA_SNAPSHOT, || Arc::new(DataSnapshotStage) as Arc<dyn Stage>)
    }

    pub fn with_procedure(mut self, procedure: GeneratedProcedure) -> Self {
        self.procedures.insert(procedure.name.clone(), procedure);
        self
    }

    pub fn with_builtin<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn Stage> + Send + Sync + 'static,
    {
        self.builtins.insert(name.to_string(), Arc::new(factory));
        self
    }

    pub fn builtin_names(&self) -> impl Iterator<Item = &str> {
        self.builtins.keys().map(String::as_str)
    }

    /// Create the stage a descriptor names
    pub fn load(&self, descriptor: &StageDescriptor) -> Option<Arc<dyn Stage>> {
        match &descriptor.kind {
            StageKind::Procedure => self
                .procedures
                .get(&descriptor.source)
                .map(|procedure| Arc::new(ProcedureStage::new(procedure.clone())) as Arc<dyn Stage>),
            StageKind::Builtin | StageKind::Other(_) => {
                self.builtins.get(&descriptor.source).map(|factory| factory())
            }
        }
    }
}
