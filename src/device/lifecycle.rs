//! Device lifecycle - open every device a run needs, release them together
//!
//! Each driver type is instantiated at most once per [`DeviceLifecycleManager::connect`]
//! call, and each device identifier is opened at most once. The returned
//! [`ScopedHandleSet`] must be released by calling [`ScopedHandleSet::release`],
//! which consumes it; a set dropped without release disconnects its devices in
//! the background and logs a warning.

use super::{Device, DeviceError, Driver, DriverRegistry};
use crate::core::{DeviceDescriptor, HardwareRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Device '{device}' is not in the hardware registry")]
    UnknownDevice { device: String },

    #[error("No address provided for device '{device}' ({connection})")]
    NoAddressProvided { device: String, connection: String },

    #[error("No driver '{driver}' registered (needed by device '{device}')")]
    DriverNotFound { device: String, driver: String },

    #[error("Device '{device}' at {address} is unreachable: {source}")]
    DeviceUnreachable {
        device: String,
        address: String,
        #[source]
        source: DeviceError,
    },
}

impl ConnectionError {
    pub fn device(&self) -> &str {
        match self {
            ConnectionError::UnknownDevice { device }
            | ConnectionError::NoAddressProvided { device, .. }
            | ConnectionError::DriverNotFound { device, .. }
            | ConnectionError::DeviceUnreachable { device, .. } => device,
        }
    }
}

/// Supplies an address for a device whose descriptor has none usable
pub trait AddressResolver: Send + Sync {
    fn resolve(&self, device: &str, descriptor: &DeviceDescriptor) -> Option<String>;
}

impl<F> AddressResolver for F
where
    F: Fn(&str, &DeviceDescriptor) -> Option<String> + Send + Sync,
{
    fn resolve(&self, device: &str, descriptor: &DeviceDescriptor) -> Option<String> {
        self(device, descriptor)
    }
}

/// Live handles opened for one run, in open order
pub struct ScopedHandleSet {
    handles: Vec<(String, Arc<dyn Device>)>,
    released: bool,
}

impl ScopedHandleSet {
    fn new() -> Self {
        Self {
            handles: Vec::new(),
            released: false,
        }
    }

    fn insert(&mut self, device: &str, handle: Arc<dyn Device>) {
        self.handles.push((device.to_string(), handle));
    }

    pub fn get(&self, device: &str) -> Option<Arc<dyn Device>> {
        self.handles
            .iter()
            .find(|(name, _)| name == device)
            .map(|(_, handle)| handle.clone())
    }

    pub fn contains(&self, device: &str) -> bool {
        self.handles.iter().any(|(name, _)| name == device)
    }

    /// Device identifiers in open order
    pub fn devices(&self) -> Vec<&str> {
        self.handles.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Shared handles keyed by device identifier
    pub fn handles(&self) -> HashMap<String, Arc<dyn Device>> {
        self.handles
            .iter()
            .map(|(name, handle)| (name.clone(), handle.clone()))
            .collect()
    }

    /// Disconnect every handle, most recently opened first.
    ///
    /// Every handle is attempted even if an earlier one fails; the failures
    /// are returned.
    pub async fn release(mut self) -> Vec<(String, DeviceError)> {
        self.released = true;
        let handles = std::mem::take(&mut self.handles);
        let mut failures = Vec::new();

        for (name, handle) in handles.into_iter().rev() {
            match handle.disconnect().await {
                Ok(()) => debug!("Released {}", name),
                Err(e) => {
                    warn!("Failed to release {}: {}", name, e);
                    failures.push((name, e));
                }
            }
        }
        failures
    }
}

impl Drop for ScopedHandleSet {
    fn drop(&mut self) {
        if self.released || self.handles.is_empty() {
            return;
        }
        let handles = std::mem::take(&mut self.handles);
        warn!("{} device handles dropped without release", handles.len());
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                for (name, handle) in handles.into_iter().rev() {
                    if let Err(e) = handle.disconnect().await {
                        warn!("Failed to release {}: {}", name, e);
                    }
                }
            });
        }
    }
}

/// Maps device identifiers to live handles for one run
pub struct DeviceLifecycleManager {
    drivers: Arc<DriverRegistry>,
    resolver: Option<Arc<dyn AddressResolver>>,
    overrides: HashMap<String, String>,
}

impl DeviceLifecycleManager {
    pub fn new(drivers: Arc<DriverRegistry>) -> Self {
        Self {
            drivers,
            resolver: None,
            overrides: HashMap::new(),
        }
    }

    /// Ask `resolver` for addresses the registry cannot supply, and once
    /// more when a device does not answer at its automatic address
    pub fn with_resolver(mut self, resolver: Arc<dyn AddressResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Use `address` for `device` regardless of its descriptor
    pub fn with_address(mut self, device: &str, address: &str) -> Self {
        self.overrides.insert(device.to_string(), address.to_string());
        self
    }

    fn resolve(&self, device: &str, descriptor: &DeviceDescriptor) -> Option<String> {
        self.resolver
            .as_ref()
            .and_then(|resolver| resolver.resolve(device, descriptor))
            .filter(|address| !address.trim().is_empty())
    }

    fn address_for(&self, device: &str, descriptor: &DeviceDescriptor) -> Result<String, ConnectionError> {
        if let Some(address) = self.overrides.get(device) {
            return Ok(address.clone());
        }
        if let Some(address) = descriptor.automatic_address() {
            return Ok(address.to_string());
        }
        self.resolve(device, descriptor)
            .ok_or_else(|| ConnectionError::NoAddressProvided {
                device: device.to_string(),
                connection: String::from(descriptor.connection.clone()),
            })
    }

    /// Address to try once more after the automatic address failed to open
    fn fallback_for(&self, device: &str, descriptor: &DeviceDescriptor, failed: &str) -> Option<String> {
        if self.overrides.contains_key(device) || descriptor.automatic_address().is_none() {
            return None;
        }
        self.resolve(device, descriptor).filter(|address| address != failed)
    }

    /// Open every listed device.
    ///
    /// On failure, the devices opened so far are released before the error
    /// is returned.
    pub async fn connect(
        &self,
        devices: &[String],
        hardware: &HardwareRegistry,
    ) -> Result<ScopedHandleSet, ConnectionError> {
        let mut set = ScopedHandleSet::new();
        let mut drivers: HashMap<String, Arc<dyn Driver>> = HashMap::new();

        for device in devices {
            if set.contains(device) {
                continue;
            }
            match self.open_one(device, hardware, &mut drivers).await {
                Ok(handle) => {
                    info!("Connected {}", device);
                    set.insert(device, handle);
                }
                Err(e) => {
                    warn!("Connecting {} failed, releasing {} opened devices", device, set.len());
                    set.release().await;
                    return Err(e);
                }
            }
        }

        Ok(set)
    }

    async fn open_one(
        &self,
        device: &str,
        hardware: &HardwareRegistry,
        drivers: &mut HashMap<String, Arc<dyn Driver>>,
    ) -> Result<Arc<dyn Device>, ConnectionError> {
        let descriptor = hardware
            .get(device)
            .ok_or_else(|| ConnectionError::UnknownDevice {
                device: device.to_string(),
            })?;

        let driver = match drivers.get(&descriptor.driver) {
            Some(driver) => driver.clone(),
            None => {
                let driver = self.drivers.instantiate(&descriptor.driver).ok_or_else(|| {
                    ConnectionError::DriverNotFound {
                        device: device.to_string(),
                        driver: descriptor.driver.clone(),
                    }
                })?;
                debug!("Instantiated driver {}", descriptor.driver);
                drivers.insert(descriptor.driver.clone(), driver.clone());
                driver
            }
        };

        let address = self.address_for(device, descriptor)?;
        let source = match driver.open(device, &address).await {
            Ok(handle) => return Ok(handle),
            Err(source) => source,
        };

        let Some(resolved) = self.fallback_for(device, descriptor, &address) else {
            return Err(ConnectionError::DeviceUnreachable {
                device: device.to_string(),
                address,
                source,
            });
        };
        warn!("{} unreachable at {} ({}), trying {}", device, address, source, resolved);
        driver
            .open(device, &resolved)
            .await
            .map_err(|source| ConnectionError::DeviceUnreachable {
                device: device.to_string(),
                address: resolved,
                source,
            })
    }
}
