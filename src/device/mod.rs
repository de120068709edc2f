//! Instrument access - device and driver traits, the driver registry and the
//! per-run device lifecycle

pub mod instruments;
pub mod lifecycle;
pub mod registry;
pub mod scpi;
pub mod simulated;

use crate::core::CapabilityDescriptor;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub use lifecycle::{AddressResolver, ConnectionError, DeviceLifecycleManager, ScopedHandleSet};
pub use registry::{DriverFactory, DriverRegistry};
pub use scpi::ScpiDriver;
pub use simulated::{SimulatedDriver, SimulationStats};

/// Errors reported by the instrument layer
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Device is disconnected")]
    Disconnected,

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
}

/// A live connection to one instrument
#[async_trait]
pub trait Device: Send + Sync {
    /// Device identifier from the hardware registry
    fn identity(&self) -> &str;

    /// Send a raw command without reading a reply
    async fn write(&self, command: &str) -> Result<(), DeviceError>;

    /// Send a raw command and read one reply line
    async fn query(&self, command: &str) -> Result<String, DeviceError>;

    /// Run a named driver operation.
    ///
    /// Returns the instrument's reply for operations that produce one.
    async fn invoke(&self, operation: &str, args: &[String]) -> Result<Option<String>, DeviceError>;

    async fn is_alive(&self) -> bool;

    async fn disconnect(&self) -> Result<(), DeviceError>;
}

/// Opens devices of one driver type
#[async_trait]
pub trait Driver: Send + Sync {
    fn driver_type(&self) -> &str;

    /// Operations this driver's devices accept
    fn capabilities(&self) -> CapabilityDescriptor;

    async fn open(&self, device: &str, address: &str) -> Result<Arc<dyn Device>, DeviceError>;
}
