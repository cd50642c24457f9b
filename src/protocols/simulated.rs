//! In-process simulated DAC.
//!
//! Each simulated device models a point FIFO that drains in real time at the
//! sample rate of the last write. `try_write_points` reports `WouldBlock`
//! while the FIFO has no room, which paces the output worker the same way a
//! real device would.
//!
//! A [`DeviceMonitor`] observes what the device received (every chunk, the
//! shutter line, DMX data) and injects faults (unreachable device, failing
//! write, failing shutter).
//!
//! # Example
//!
//! ```
//! use laser_frame_dac::protocols::simulated::{SimulatedDevice, SimulatedProvider};
//!
//! let device = SimulatedDevice::new("dev-1");
//! let monitor = device.monitor();
//! let provider = SimulatedProvider::new().with_device(device);
//!
//! assert!(!monitor.shutter_open());
//! # drop(provider);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::discovery::DeviceProvider;
use crate::error::{Error, Result};
use crate::transport::{DeviceAccess, DeviceLink, Transport, WriteOutcome};
use crate::types::{DeviceCapabilities, Point, UniverseDirection, UniverseInfo};

/// Default FIFO size of a simulated device, in points.
pub const DEFAULT_FIFO_POINTS: usize = 4096;

/// Number of DMX channels per simulated universe.
pub const UNIVERSE_CHANNELS: usize = 512;

/// Oldest write records are discarded beyond this many.
const MAX_WRITE_RECORDS: usize = 8192;

/// One chunk as the simulated device received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub sample_rate: u32,
    pub points: Vec<Point>,
}

struct SimUniverse {
    info: UniverseInfo,
    data: Vec<u8>,
    updates: u64,
}

struct SimState {
    reachable: bool,
    connected: bool,
    shutter_open: bool,
    label: String,
    universes: Vec<SimUniverse>,
    writes: VecDeque<WriteRecord>,
    points_written: u64,
    stops: u64,
    fifo_level: f64,
    last_drain: Option<Instant>,
    last_rate: u32,
    fail_next_write: bool,
    fail_shutter: bool,
}

impl SimState {
    fn new(label: String) -> Self {
        let universe = |name: &str, direction| SimUniverse {
            info: UniverseInfo::new(name, direction, UNIVERSE_CHANNELS),
            data: vec![0; UNIVERSE_CHANNELS],
            updates: 0,
        };

        Self {
            reachable: true,
            connected: false,
            shutter_open: false,
            label,
            universes: vec![
                universe("DMX Out", UniverseDirection::Output),
                universe("DMX In", UniverseDirection::Input),
            ],
            writes: VecDeque::new(),
            points_written: 0,
            stops: 0,
            fifo_level: 0.0,
            last_drain: None,
            last_rate: 0,
            fail_next_write: false,
            fail_shutter: false,
        }
    }

    /// Play out the FIFO for the time elapsed since the last drain.
    fn drain(&mut self, now: Instant) {
        if let Some(last) = self.last_drain {
            let played = now.duration_since(last).as_secs_f64() * self.last_rate as f64;
            self.fifo_level = (self.fifo_level - played).max(0.0);
        }
        self.last_drain = Some(now);
    }
}

type SharedState = Arc<Mutex<SimState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// SimulatedDevice
// =============================================================================

/// Configuration and shared state of one simulated device.
#[derive(Clone)]
pub struct SimulatedDevice {
    id: String,
    caps: DeviceCapabilities,
    fifo_points: usize,
    state: SharedState,
}

impl SimulatedDevice {
    /// Create a device with default capabilities and FIFO size.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let label = format!("Simulated {}", id);
        Self {
            id,
            caps: DeviceCapabilities::default(),
            fifo_points: DEFAULT_FIFO_POINTS,
            state: Arc::new(Mutex::new(SimState::new(label))),
        }
    }

    /// Override the advertised capabilities (builder pattern).
    pub fn with_caps(mut self, caps: DeviceCapabilities) -> Self {
        self.caps = caps;
        self
    }

    /// Override the FIFO size in points (builder pattern).
    pub fn with_fifo_points(mut self, points: usize) -> Self {
        self.fifo_points = points.max(1);
        self
    }

    /// Returns the device id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns a handle for observing the device and injecting faults.
    pub fn monitor(&self) -> DeviceMonitor {
        DeviceMonitor {
            state: Arc::clone(&self.state),
        }
    }

    fn link(&self) -> DeviceLink {
        DeviceLink::new(
            Box::new(SimulatedTransport {
                id: self.id.clone(),
                caps: self.caps.clone(),
                fifo_points: self.fifo_points,
                state: Arc::clone(&self.state),
            }),
            Box::new(SimulatedAccess {
                state: Arc::clone(&self.state),
            }),
        )
    }
}

// =============================================================================
// DeviceMonitor
// =============================================================================

/// Observation and fault-injection handle for a simulated device.
#[derive(Clone)]
pub struct DeviceMonitor {
    state: SharedState,
}

impl DeviceMonitor {
    /// Whether the shutter line is currently open.
    pub fn shutter_open(&self) -> bool {
        lock(&self.state).shutter_open
    }

    /// Whether a transport is currently connected.
    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    /// Total points accepted since the device was created.
    pub fn points_written(&self) -> u64 {
        lock(&self.state).points_written
    }

    /// Number of times output was stopped.
    pub fn stop_count(&self) -> u64 {
        lock(&self.state).stops
    }

    /// Snapshot of the chunks received, oldest first.
    pub fn writes(&self) -> Vec<WriteRecord> {
        lock(&self.state).writes.iter().cloned().collect()
    }

    /// Forget all recorded chunks.
    pub fn clear_writes(&self) {
        lock(&self.state).writes.clear();
    }

    /// Current device label.
    pub fn label(&self) -> String {
        lock(&self.state).label.clone()
    }

    /// Current channel values of a universe.
    pub fn universe_data(&self, index: usize) -> Option<Vec<u8>> {
        lock(&self.state).universes.get(index).map(|u| u.data.clone())
    }

    /// Number of flushes issued for a universe.
    pub fn universe_updates(&self, index: usize) -> Option<u64> {
        lock(&self.state).universes.get(index).map(|u| u.updates)
    }

    /// Feed values into a universe as if they had arrived on the wire.
    pub fn inject_universe_input(&self, index: usize, start_channel: usize, data: &[u8]) {
        let mut state = lock(&self.state);
        if let Some(universe) = state.universes.get_mut(index) {
            let end = (start_channel + data.len()).min(universe.data.len());
            if start_channel < end {
                universe.data[start_channel..end].copy_from_slice(&data[..end - start_channel]);
            }
        }
    }

    /// Make the device (un)reachable for new opens and writes.
    pub fn set_reachable(&self, reachable: bool) {
        lock(&self.state).reachable = reachable;
    }

    /// Make the next point write fail with an I/O error.
    pub fn fail_next_write(&self) {
        lock(&self.state).fail_next_write = true;
    }

    /// Make shutter changes fail with an I/O error.
    pub fn set_fail_shutter(&self, fail: bool) {
        lock(&self.state).fail_shutter = fail;
    }

    /// Poll until `predicate` holds or `timeout` elapses. Returns the last result.
    pub fn wait_until<F>(&self, timeout: Duration, mut predicate: F) -> bool
    where
        F: FnMut(&DeviceMonitor) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if predicate(self) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

// =============================================================================
// Transport and Accessors
// =============================================================================

struct SimulatedTransport {
    id: String,
    caps: DeviceCapabilities,
    fifo_points: usize,
    state: SharedState,
}

impl Transport for SimulatedTransport {
    fn device_id(&self) -> &str {
        &self.id
    }

    fn caps(&self) -> &DeviceCapabilities {
        &self.caps
    }

    fn connect(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.reachable {
            return Err(Error::io(format!("{} is not reachable", self.id)));
        }
        state.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.connected = false;
        state.shutter_open = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    fn try_write_points(&mut self, sample_rate: u32, points: &[Point]) -> Result<WriteOutcome> {
        let mut state = lock(&self.state);
        if !state.connected || !state.reachable {
            return Err(Error::io(format!("{} is not connected", self.id)));
        }
        if state.fail_next_write {
            state.fail_next_write = false;
            return Err(Error::io(format!("{}: write failed", self.id)));
        }

        state.drain(Instant::now());

        // An oversized chunk is still accepted into an empty FIFO.
        let room = self.fifo_points as f64 - state.fifo_level;
        if state.fifo_level > 0.0 && (points.len() as f64) > room {
            return Ok(WriteOutcome::WouldBlock);
        }

        state.fifo_level += points.len() as f64;
        state.last_rate = sample_rate;
        state.points_written += points.len() as u64;
        if state.writes.len() == MAX_WRITE_RECORDS {
            state.writes.pop_front();
        }
        state.writes.push_back(WriteRecord {
            sample_rate,
            points: points.to_vec(),
        });
        Ok(WriteOutcome::Written)
    }

    fn stop(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.fifo_level = 0.0;
        state.last_drain = None;
        state.stops += 1;
        Ok(())
    }

    fn set_shutter(&mut self, open: bool) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_shutter {
            return Err(Error::io(format!("{}: shutter did not respond", self.id)));
        }
        state.shutter_open = open;
        Ok(())
    }

    fn queued_points(&self) -> Option<u64> {
        let mut state = lock(&self.state);
        state.drain(Instant::now());
        Some(state.fifo_level.ceil() as u64)
    }
}

struct SimulatedAccess {
    state: SharedState,
}

impl DeviceAccess for SimulatedAccess {
    fn label(&mut self) -> Result<String> {
        Ok(lock(&self.state).label.clone())
    }

    fn set_label(&mut self, label: &str) -> Result<()> {
        lock(&self.state).label = label.to_string();
        Ok(())
    }

    fn universes(&mut self) -> Result<Vec<UniverseInfo>> {
        Ok(lock(&self.state)
            .universes
            .iter()
            .map(|u| u.info.clone())
            .collect())
    }

    fn write_universe(&mut self, index: usize, start_channel: usize, data: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        let universe = state
            .universes
            .get_mut(index)
            .ok_or_else(|| Error::out_of_range(format!("universe {}", index)))?;
        universe.data[start_channel..start_channel + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_universe(
        &mut self,
        index: usize,
        start_channel: usize,
        buf: &mut [u8],
    ) -> Result<()> {
        let state = lock(&self.state);
        let universe = state
            .universes
            .get(index)
            .ok_or_else(|| Error::out_of_range(format!("universe {}", index)))?;
        buf.copy_from_slice(&universe.data[start_channel..start_channel + buf.len()]);
        Ok(())
    }

    fn update_universe(&mut self, index: usize) -> Result<()> {
        let mut state = lock(&self.state);
        let universe = state
            .universes
            .get_mut(index)
            .ok_or_else(|| Error::out_of_range(format!("universe {}", index)))?;
        universe.updates += 1;
        Ok(())
    }
}

// =============================================================================
// SimulatedProvider
// =============================================================================

/// Device provider over a fixed set of simulated devices.
#[derive(Default)]
pub struct SimulatedProvider {
    devices: Vec<SimulatedDevice>,
}

impl SimulatedProvider {
    /// Create a provider with no devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider with default devices for each id.
    pub fn with_devices<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            devices: ids.into_iter().map(SimulatedDevice::new).collect(),
        }
    }

    /// Add a device (builder pattern).
    pub fn with_device(mut self, device: SimulatedDevice) -> Self {
        self.add_device(device);
        self
    }

    /// Add a device.
    pub fn add_device(&mut self, device: SimulatedDevice) {
        self.devices.push(device);
    }

    /// Returns the monitor of the device with the given id.
    pub fn monitor(&self, device_id: &str) -> Option<DeviceMonitor> {
        self.devices
            .iter()
            .find(|d| d.id == device_id)
            .map(SimulatedDevice::monitor)
    }
}

impl DeviceProvider for SimulatedProvider {
    fn name(&self) -> &str {
        "simulated"
    }

    fn enumerate(&mut self) -> Result<Vec<String>> {
        Ok(self
            .devices
            .iter()
            .filter(|d| lock(&d.state).reachable)
            .map(|d| d.id.clone())
            .collect())
    }

    fn open(&mut self, device_id: &str) -> Result<DeviceLink> {
        let device = self
            .devices
            .iter()
            .find(|d| d.id == device_id)
            .ok_or_else(|| Error::io(format!("device not reachable: {}", device_id)))?;

        if !lock(&device.state).reachable {
            return Err(Error::io(format!("device not reachable: {}", device_id)));
        }
        Ok(device.link())
    }
}
