//! Experiment execution engine

pub mod engine;
pub mod scheduler;
pub mod stage;

pub use engine::{EventHandler, ExecutionEngine, ExecutionEvent, RunOutcome, CONFIG_FILE};
pub use scheduler::{ExecutionScheduler, LoadedStage, RunError, SchedulingStrategy, StageGroup};
pub use stage::{
    DataSnapshotStage, ProcedureStage, Stage, StageContext, StageError, StageFactory, StageRegistry,
    DATA_SNAPSHOT, DATA_SNAPSHOT_FILE,
};
