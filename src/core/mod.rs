//! Core domain models
//!
//! Authoring-time types (tokens, steps, capabilities), the durable compiled
//! artifacts, and the run-scoped data map and experiment result.

pub mod capability;
pub mod config;
pub mod data;
pub mod hardware;
pub mod procedure;
pub mod result;
pub mod settings;
pub mod state;
pub mod token;

pub use capability::{CapabilityDescriptor, CapabilityError, CapabilityRegistry, Parameter};
pub use config::{CompiledConfiguration, StageDescriptor, StageKind};
pub use data::DataMap;
pub use hardware::{ConnectionType, DeviceDescriptor, HardwareRegistry};
pub use procedure::{Action, Argument, Check, Comparison, GeneratedProcedure, Statement};
pub use result::{ExperimentManifest, ExperimentResult, RecorderError};
pub use settings::Settings;
pub use state::{RunState, RunStatus};
pub use token::{ParsedProcedure, StepDefinition, Token, TokenKind};
