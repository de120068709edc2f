//! Main execution engine - orchestrates one experiment run
//!
//! A run connects every device the configuration lists, schedules its
//! stages, then releases the devices and finalizes the experiment result on
//! every exit path.

use super::scheduler::{ExecutionScheduler, RunError, SchedulingStrategy};
use super::stage::{StageContext, StageRegistry};
use crate::core::{CompiledConfiguration, DataMap, ExperimentResult, HardwareRegistry, RunState, RunStatus};
use crate::device::{DeviceError, DeviceLifecycleManager};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Copy of the configuration written into every run directory
pub const CONFIG_FILE: &str = "Config.json";

/// Events that can occur during a run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        experiment: String,
        total_stages: usize,
    },
    DevicesConnected {
        devices: Vec<String>,
    },
    GroupStarted {
        order: u32,
        stages: usize,
    },
    StageStarted {
        stage: String,
        order: u32,
    },
    StageCompleted {
        stage: String,
        order: u32,
    },
    StageFailed {
        stage: String,
        order: u32,
        error: String,
    },
    RunCompleted {
        run_id: Uuid,
        status: RunStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Emit an event to all handlers
pub(crate) fn emit_event(handlers: &[EventHandler], event: ExecutionEvent) {
    for handler in handlers {
        handler(event.clone());
    }
}

/// Everything a finished run leaves behind
#[derive(Debug)]
pub struct RunOutcome {
    pub experiment: String,
    pub state: RunState,

    /// Data map as the last stage left it
    pub data: DataMap,

    /// Finalized experiment result
    pub result: ExperimentResult,

    /// Why the run failed, if it did
    pub failure: Option<RunError>,

    /// Devices whose disconnect reported an error
    pub release_errors: Vec<(String, DeviceError)>,
}

impl RunOutcome {
    pub fn run_id(&self) -> Uuid {
        self.state.run_id
    }

    pub fn status(&self) -> RunStatus {
        self.state.status
    }

    pub fn is_success(&self) -> bool {
        self.state.status == RunStatus::Completed
    }

    /// Source of the stage that failed the run
    pub fn failed_stage(&self) -> Option<&str> {
        match &self.failure {
            Some(RunError::StageFailed { stage, .. }) => Some(stage),
            _ => None,
        }
    }
}

/// Main experiment execution engine
pub struct ExecutionEngine {
    lifecycle: DeviceLifecycleManager,
    stages: StageRegistry,
    scheduler: ExecutionScheduler,
    event_handlers: Vec<EventHandler>,
}

impl ExecutionEngine {
    pub fn new(lifecycle: DeviceLifecycleManager, stages: StageRegistry, strategy: SchedulingStrategy) -> Self {
        Self {
            lifecycle,
            stages,
            scheduler: ExecutionScheduler::new(strategy),
            event_handlers: Vec::new(),
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    /// Run an experiment.
    ///
    /// `overrides` are layered over the configuration's data parameters.
    /// Connection and stage failures are reported in the returned outcome;
    /// the only error is being handed an already finalized result.
    pub async fn run(
        &self,
        config: &CompiledConfiguration,
        hardware: &HardwareRegistry,
        overrides: DataMap,
        mut result: ExperimentResult,
    ) -> Result<RunOutcome, RunError> {
        if result.is_finalized() {
            return Err(RunError::DoubleFinalize);
        }

        let handlers = Arc::new(self.event_handlers.clone());
        let mut state = RunState::new();
        let run_id = state.run_id;

        info!("Starting experiment: {} ({})", config.name, run_id);
        state.start(config.experiment.len());
        result.start();
        emit_event(
            &handlers,
            ExecutionEvent::RunStarted {
                run_id,
                experiment: config.name.clone(),
                total_stages: config.experiment.len(),
            },
        );

        let mut data = DataMap::from_parameters(&config.data);
        for (key, value) in overrides.into_inner() {
            data.insert(key, value);
        }
        for key in data.keys().filter(|key| data.get_text(key).is_none()) {
            warn!("Data parameter '{}' has no value", key);
        }

        let groups = match ExecutionScheduler::plan(&config.experiment, &self.stages) {
            Ok(groups) => groups,
            Err(e) => return Ok(self.abort(config, state, data, result, e, &handlers)),
        };

        let devices = match self.lifecycle.connect(&config.devices, hardware).await {
            Ok(devices) => devices,
            Err(e) => {
                error!("Could not connect devices for {}: {}", config.name, e);
                return Ok(self.abort(config, state, data, result, e.into(), &handlers));
            }
        };
        emit_event(
            &handlers,
            ExecutionEvent::DevicesConnected {
                devices: devices.devices().iter().map(|d| d.to_string()).collect(),
            },
        );

        if let Err(e) = record_config(config, &mut result).await {
            error!("{}", e);
            for (device, e) in devices.release().await {
                warn!("Releasing {} reported: {}", device, e);
            }
            return Ok(self.abort(config, state, data, result, e, &handlers));
        }

        let ctx = StageContext::new(data, result, devices.handles());
        let scheduled = self.scheduler.run(&groups, &ctx, &handlers, &mut state).await;

        let release_errors = devices.release().await;
        for (device, e) in &release_errors {
            warn!("Releasing {} reported: {}", device, e);
        }

        let data = ctx.data_snapshot().await;
        let mut result = ctx.result_snapshot().await;
        drop(ctx);

        let mut failure = scheduled.err();
        if result.end().is_err() {
            failure.get_or_insert(RunError::DoubleFinalize);
        }

        match &failure {
            None => state.complete(),
            Some(_) => state.fail(),
        }
        info!("Experiment finished: {} - {}", config.name, state.status);
        emit_event(
            &handlers,
            ExecutionEvent::RunCompleted {
                run_id,
                status: state.status,
            },
        );

        Ok(RunOutcome {
            experiment: config.name.clone(),
            state,
            data,
            result,
            failure,
            release_errors,
        })
    }

    /// Finish a run that failed before any stage executed
    fn abort(
        &self,
        config: &CompiledConfiguration,
        mut state: RunState,
        data: DataMap,
        mut result: ExperimentResult,
        failure: RunError,
        handlers: &[EventHandler],
    ) -> RunOutcome {
        result.end().ok();
        state.fail();
        emit_event(
            handlers,
            ExecutionEvent::RunCompleted {
                run_id: state.run_id,
                status: state.status,
            },
        );

        RunOutcome {
            experiment: config.name.clone(),
            state,
            data,
            result,
            failure: Some(failure),
            release_errors: Vec::new(),
        }
    }
}

/// Write the configuration into the run directory and note it in the result
async fn record_config(config: &CompiledConfiguration, result: &mut ExperimentResult) -> Result<(), RunError> {
    let path = result.directory().join(CONFIG_FILE);
    let failed = |source: std::io::Error| RunError::Record {
        path: path.clone(),
        source,
    };

    let json = serde_json::to_string_pretty(config).map_err(|e| failed(e.into()))?;
    tokio::fs::create_dir_all(result.directory()).await.map_err(failed)?;
    tokio::fs::write(&path, json).await.map_err(failed)?;

    debug!("Recorded configuration at {}", path.display());
    result.record_config(path);
    Ok(())
}
