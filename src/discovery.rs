//! Device enumeration and opening.
//!
//! Transports are plugged in through [`DeviceProvider`]. A [`DeviceDiscovery`]
//! aggregates any number of providers, remembers the result of the last scan
//! so devices can be looked up by index, and routes `open` to the provider
//! that reported the id.
//!
//! # Example
//!
//! ```
//! use laser_frame_dac::discovery::DeviceDiscovery;
//! use laser_frame_dac::protocols::simulated::SimulatedProvider;
//!
//! let mut discovery = DeviceDiscovery::new();
//! discovery.register(Box::new(SimulatedProvider::with_devices(["dev-1", "dev-2"])));
//!
//! let count = discovery.scan();
//! assert_eq!(count, 2);
//! assert_eq!(discovery.device_id(1).unwrap(), "dev-2");
//! ```

use crate::error::{Error, Result};
use crate::transport::DeviceLink;

// =============================================================================
// Provider Trait
// =============================================================================

/// A source of devices: one per transport family (USB, network, simulated...).
pub trait DeviceProvider: Send {
    /// Short name used in log output.
    fn name(&self) -> &str;

    /// List the ids of all reachable devices.
    fn enumerate(&mut self) -> Result<Vec<String>>;

    /// Open a device previously reported by `enumerate`.
    ///
    /// Return `Error::Io` if the device is no longer reachable.
    fn open(&mut self, device_id: &str) -> Result<DeviceLink>;
}

// =============================================================================
// DeviceDiscovery
// =============================================================================

/// A device reported by the last scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Device id string, unique across providers.
    pub id: String,
    /// Name of the provider that reported it.
    pub provider: String,
    provider_index: usize,
}

/// Discovery coordinator over all registered providers.
#[derive(Default)]
pub struct DeviceDiscovery {
    providers: Vec<Box<dyn DeviceProvider>>,
    /// `None` until the first scan.
    devices: Option<Vec<DiscoveredDevice>>,
}

impl DeviceDiscovery {
    /// Create a discovery with no providers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. Takes effect on the next scan.
    pub fn register(&mut self, provider: Box<dyn DeviceProvider>) {
        self.providers.push(provider);
    }

    /// Register a provider (builder pattern).
    pub fn with_provider(mut self, provider: Box<dyn DeviceProvider>) -> Self {
        self.register(provider);
        self
    }

    /// Scan every provider and replace the device list. Returns the device count.
    ///
    /// A provider that fails to enumerate is skipped so the others still
    /// contribute. When two providers report the same id, the first wins.
    pub fn scan(&mut self) -> usize {
        let mut devices: Vec<DiscoveredDevice> = Vec::new();

        for (index, provider) in self.providers.iter_mut().enumerate() {
            let ids = match provider.enumerate() {
                Ok(ids) => ids,
                Err(e) => {
                    log::warn!("{} enumeration failed: {}", provider.name(), e);
                    continue;
                }
            };

            for id in ids {
                if devices.iter().any(|d| d.id == id) {
                    log::debug!("{} reported duplicate device id {}", provider.name(), id);
                    continue;
                }
                devices.push(DiscoveredDevice {
                    id,
                    provider: provider.name().to_string(),
                    provider_index: index,
                });
            }
        }

        log::debug!("enumerated {} device(s)", devices.len());
        let count = devices.len();
        self.devices = Some(devices);
        count
    }

    /// Returns true once `scan` has run at least once.
    pub fn is_enumerated(&self) -> bool {
        self.devices.is_some()
    }

    /// Devices found by the last scan.
    pub fn devices(&self) -> Result<&[DiscoveredDevice]> {
        self.devices.as_deref().ok_or(Error::NotEnumerated)
    }

    /// The id of the device at `index` in the last scan.
    pub fn device_id(&self, index: usize) -> Result<String> {
        let devices = self.devices()?;
        devices.get(index).map(|d| d.id.clone()).ok_or_else(|| {
            Error::out_of_range(format!(
                "device index {} (found {} devices)",
                index,
                devices.len()
            ))
        })
    }

    /// Open a device by id.
    ///
    /// If the id is not in the last scan (or no scan has run yet) the
    /// providers are scanned once more before giving up with `Error::Io`.
    pub fn open(&mut self, device_id: &str) -> Result<DeviceLink> {
        if device_id.is_empty() {
            return Err(Error::invalid("device id is empty"));
        }

        let provider_index = match self.lookup(device_id) {
            Some(index) => index,
            None => {
                self.scan();
                self.lookup(device_id)
                    .ok_or_else(|| Error::io(format!("device not reachable: {}", device_id)))?
            }
        };

        let provider = self
            .providers
            .get_mut(provider_index)
            .ok_or_else(|| Error::io(format!("provider for {} went away", device_id)))?;
        provider.open(device_id)
    }

    fn lookup(&self, device_id: &str) -> Option<usize> {
        self.devices
            .as_ref()?
            .iter()
            .find(|d| d.id == device_id)
            .map(|d| d.provider_index)
    }
}
