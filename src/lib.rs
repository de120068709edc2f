//! prober - compiles symbolic hardware test procedures and runs them against
//! bench instruments

pub mod cli;
pub mod compiler;
pub mod core;
pub mod device;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use compiler::{CompileError, PatternCompiler};
pub use core::{
    CapabilityRegistry, CompiledConfiguration, DataMap, ExperimentResult, GeneratedProcedure,
    HardwareRegistry, ParsedProcedure, RunStatus, Settings,
};
pub use device::{DeviceLifecycleManager, DriverRegistry};
pub use execution::{ExecutionEngine, ExecutionEvent, RunOutcome, SchedulingStrategy, StageRegistry};
