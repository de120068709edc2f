//! Simulated driver - answers every declared operation without hardware

use super::{Device, DeviceError, Driver};
use crate::core::CapabilityDescriptor;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Counters shared by a simulated driver and every device it opened
#[derive(Debug, Default)]
pub struct SimulationStats {
    opened: AtomicUsize,
    disconnects: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl SimulationStats {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// `<device>.<operation>` for every invocation, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
struct Script {
    responses: HashMap<String, String>,
    failures: HashSet<String>,
    unreachable: HashSet<String>,
}

/// Driver whose devices reply from a script
#[derive(Clone)]
pub struct SimulatedDriver {
    driver_type: String,
    capabilities: CapabilityDescriptor,
    script: Arc<Script>,
    stats: Arc<SimulationStats>,
}

impl SimulatedDriver {
    pub fn new(driver_type: &str, capabilities: CapabilityDescriptor) -> Self {
        Self {
            driver_type: driver_type.to_string(),
            capabilities,
            script: Arc::new(Script::default()),
            stats: Arc::new(SimulationStats::default()),
        }
    }

    fn script_mut(&mut self) -> &mut Script {
        Arc::make_mut(&mut self.script)
    }

    /// Reply `response` to `operation`
    pub fn with_response(mut self, operation: &str, response: &str) -> Self {
        self.script_mut()
            .responses
            .insert(operation.to_string(), response.to_string());
        self
    }

    /// Make `operation` fail
    pub fn with_failure(mut self, operation: &str) -> Self {
        self.script_mut().failures.insert(operation.to_string());
        self
    }

    /// Refuse connections to `address`
    pub fn with_unreachable(mut self, address: &str) -> Self {
        self.script_mut().unreachable.insert(address.to_string());
        self
    }

    pub fn stats(&self) -> Arc<SimulationStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl Driver for SimulatedDriver {
    fn driver_type(&self) -> &str {
        &self.driver_type
    }

    fn capabilities(&self) -> CapabilityDescriptor {
        self.capabilities.clone()
    }

    async fn open(&self, device: &str, address: &str) -> Result<Arc<dyn Device>, DeviceError> {
        if self.script.unreachable.contains(address) {
            return Err(DeviceError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("{} refused the connection", address),
            )));
        }
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        debug!("Opened simulated {} ({}) at {}", device, self.driver_type, address);
        Ok(Arc::new(SimulatedDevice {
            name: device.to_string(),
            driver: self.clone(),
            alive: AtomicBool::new(true),
        }))
    }
}

struct SimulatedDevice {
    name: String,
    driver: SimulatedDriver,
    alive: AtomicBool,
}

impl SimulatedDevice {
    fn ensure_alive(&self) -> Result<(), DeviceError> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DeviceError::Disconnected)
        }
    }

    fn default_reply(&self, operation: &str) -> Option<String> {
        if operation == "run_identify" {
            return Some(format!("SIMULATED,{},{}", self.driver.driver_type, self.name));
        }
        let reads = ["measure", "get", "query", "check"];
        reads
            .iter()
            .any(|word| operation.contains(word))
            .then(|| "0".to_string())
    }
}

#[async_trait]
impl Device for SimulatedDevice {
    fn identity(&self) -> &str {
        &self.name
    }

    async fn write(&self, _command: &str) -> Result<(), DeviceError> {
        self.ensure_alive()
    }

    async fn query(&self, _command: &str) -> Result<String, DeviceError> {
        self.ensure_alive()?;
        Ok("0".to_string())
    }

    async fn invoke(&self, operation: &str, args: &[String]) -> Result<Option<String>, DeviceError> {
        self.ensure_alive()?;
        let parameters = self
            .driver
            .capabilities
            .parameters(operation)
            .ok_or_else(|| DeviceError::Unsupported(operation.to_string()))?;
        if args.len() > parameters.len() {
            return Err(DeviceError::InvalidArgument(format!(
                "{} takes {} arguments, got {}",
                operation,
                parameters.len(),
                args.len()
            )));
        }

        if let Ok(mut calls) = self.driver.stats.calls.lock() {
            calls.push(format!("{}.{}", self.name, operation));
        }

        let script = &self.driver.script;
        if script.failures.contains(operation) {
            return Err(DeviceError::Io(std::io::Error::other(format!(
                "{} failed on {}",
                operation, self.name
            ))));
        }
        Ok(script
            .responses
            .get(operation)
            .cloned()
            .or_else(|| self.default_reply(operation)))
    }

    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        self.driver.stats.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.alive.swap(false, Ordering::SeqCst) {
            debug!("Disconnected simulated {}", self.name);
            Ok(())
        } else {
            Err(DeviceError::Disconnected)
        }
    }
}
