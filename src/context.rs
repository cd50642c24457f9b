//! Library context: device discovery and the handle table.
//!
//! A [`DacContext`] is created once per application. It owns the registered
//! device providers, hands out [`DeviceHandle`]s for opened devices, and stops
//! and closes every device still open when it is dropped.
//!
//! # Example
//!
//! ```
//! use laser_frame_dac::protocols::simulated::SimulatedProvider;
//! use laser_frame_dac::DacContext;
//!
//! let ctx = DacContext::new(SimulatedProvider::with_devices(["dev-1"]));
//! assert_eq!(ctx.enumerate_devices(), 1);
//!
//! let id = ctx.device_id(0).unwrap();
//! let handle = ctx.open_device(&id).unwrap();
//! println!("{} supports {} Hz", id, ctx.max_sample_rate(handle).unwrap());
//! ctx.close_device(handle).unwrap();
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::discovery::{DeviceDiscovery, DeviceProvider};
use crate::error::{Error, Result};
use crate::session::Session;
use crate::types::{DeviceHandle, SessionConfig, UniverseInfo, API_VERSION};

/// Entry point of the library.
pub struct DacContext {
    discovery: Mutex<DeviceDiscovery>,
    config: SessionConfig,
    sessions: Mutex<HashMap<DeviceHandle, Arc<Session>>>,
    next_handle: AtomicU32,
}

impl DacContext {
    /// Create a context over a single device provider.
    pub fn new(provider: impl DeviceProvider + 'static) -> Self {
        Self::with_discovery(DeviceDiscovery::new().with_provider(Box::new(provider)))
    }

    /// Create a context over a discovery with any number of providers.
    pub fn with_discovery(discovery: DeviceDiscovery) -> Self {
        log::debug!("device context created");
        Self {
            discovery: Mutex::new(discovery),
            config: SessionConfig::default(),
            sessions: Mutex::new(HashMap::new()),
            next_handle: AtomicU32::new(1),
        }
    }

    /// Set the configuration used for sessions opened from now on.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Version of the device API, major in the high byte.
    pub fn api_version(&self) -> u32 {
        API_VERSION
    }

    /// Stop and close every open device, then release the context.
    pub fn exit(self) {
        drop(self);
    }

    fn discovery(&self) -> MutexGuard<'_, DeviceDiscovery> {
        self.discovery
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<DeviceHandle, Arc<Session>>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // =========================================================================
    // Enumeration
    // =========================================================================

    /// Scan all providers. Returns the number of devices found.
    pub fn enumerate_devices(&self) -> usize {
        self.discovery().scan()
    }

    /// Id of the device at `index` in the last enumeration.
    pub fn device_id(&self, index: usize) -> Result<String> {
        self.discovery().device_id(index)
    }

    // =========================================================================
    // Open and Close
    // =========================================================================

    /// Open a device by id and return its handle.
    pub fn open_device(&self, device_id: &str) -> Result<DeviceHandle> {
        let link = self.discovery().open(device_id)?;

        let handle = DeviceHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let session = Session::open(handle, link, self.config.clone())?;
        self.sessions().insert(handle, Arc::new(session));
        Ok(handle)
    }

    /// Close a device. Output must be stopped first.
    ///
    /// The handle is invalid afterwards; closing it again returns
    /// `InvalidHandle`.
    pub fn close_device(&self, handle: DeviceHandle) -> Result<()> {
        let session = self.session(handle)?;
        session.close()?;
        self.sessions().remove(&handle);
        Ok(())
    }

    /// The session behind an open handle.
    pub fn session(&self, handle: DeviceHandle) -> Result<Arc<Session>> {
        self.sessions()
            .get(&handle)
            .cloned()
            .ok_or_else(|| Error::invalid_handle(format!("{} is not open", handle)))
    }

    /// Handles of all open devices, in allocation order.
    pub fn open_handles(&self) -> Vec<DeviceHandle> {
        let mut handles: Vec<_> = self.sessions().keys().copied().collect();
        handles.sort();
        handles
    }

    // =========================================================================
    // Device Properties
    // =========================================================================

    /// Maximum sample rate of an open device in Hz.
    pub fn max_sample_rate(&self, handle: DeviceHandle) -> Result<u32> {
        self.session(handle)?.max_sample_rate()
    }

    pub fn device_label(&self, handle: DeviceHandle) -> Result<String> {
        self.session(handle)?.label()
    }

    pub fn set_device_label(&self, handle: DeviceHandle, label: &str) -> Result<()> {
        self.session(handle)?.set_label(label)
    }

    // =========================================================================
    // DMX Universes
    // =========================================================================

    pub fn universe_count(&self, handle: DeviceHandle) -> Result<usize> {
        self.session(handle)?.universe_count()
    }

    pub fn universe_query(&self, handle: DeviceHandle, index: usize) -> Result<UniverseInfo> {
        self.session(handle)?.universe_info(index)
    }

    pub fn universe_write(
        &self,
        handle: DeviceHandle,
        index: usize,
        start_channel: usize,
        data: &[u8],
    ) -> Result<()> {
        self.session(handle)?.write_universe(index, start_channel, data)
    }

    pub fn universe_read(
        &self,
        handle: DeviceHandle,
        index: usize,
        start_channel: usize,
        buf: &mut [u8],
    ) -> Result<()> {
        self.session(handle)?.read_universe(index, start_channel, buf)
    }

    pub fn universe_update(&self, handle: DeviceHandle, index: usize) -> Result<()> {
        self.session(handle)?.update_universe(index)
    }
}

impl Drop for DacContext {
    fn drop(&mut self) {
        let sessions: Vec<_> = self.sessions().drain().map(|(_, s)| s).collect();
        if !sessions.is_empty() {
            log::info!("closing {} device(s) left open", sessions.len());
        }
        for session in sessions {
            session.shutdown();
        }
    }
}
