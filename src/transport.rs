//! Transport traits: the boundary to DAC hardware.
//!
//! A device link is split in two halves:
//!
//! - [`Transport`] streams points and drives the shutter. While output is
//!   started it is owned exclusively by the session's output worker.
//! - [`DeviceAccess`] covers the simple accessors (device label, DMX
//!   universes). It stays with the session and is called under its lock.
//!
//! Providers (see [`crate::discovery::DeviceProvider`]) hand out both halves
//! together as a [`DeviceLink`].

use crate::error::Result;
use crate::types::{DeviceCapabilities, Point, UniverseInfo};

// =============================================================================
// Transport Trait
// =============================================================================

/// Write result from a transport chunk submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The chunk was accepted and written.
    Written,
    /// The device cannot accept more data right now.
    WouldBlock,
}

/// Point-streaming half of a device link.
///
/// The key contract is uniform backpressure: `try_write_points` must return
/// `WriteOutcome::WouldBlock` when the device cannot accept more data, which
/// is how the output worker is paced to the device's sample clock.
pub trait Transport: Send + 'static {
    /// Returns the device id this transport is connected to.
    fn device_id(&self) -> &str;

    /// Returns the device capabilities.
    fn caps(&self) -> &DeviceCapabilities;

    /// Connect to the device.
    fn connect(&mut self) -> Result<()>;

    /// Disconnect from the device.
    fn disconnect(&mut self) -> Result<()>;

    /// Returns whether the device is connected.
    fn is_connected(&self) -> bool;

    /// Attempt to write a chunk of points at the given sample rate.
    ///
    /// # Contract
    ///
    /// 1. Return `WriteOutcome::WouldBlock` when the device cannot accept more
    ///    data (buffer full, not ready, etc.).
    /// 2. Return `WriteOutcome::Written` when the chunk was accepted.
    /// 3. Return `Err(...)` only for actual failures; they are surfaced to the
    ///    caller as I/O errors and never retried.
    fn try_write_points(&mut self, sample_rate: u32, points: &[Point]) -> Result<WriteOutcome>;

    /// Stop output and discard anything the device still has queued.
    fn stop(&mut self) -> Result<()>;

    /// Open/close the shutter (hardware enable line).
    fn set_shutter(&mut self, open: bool) -> Result<()>;

    /// Best-effort estimate of points currently queued in the device.
    fn queued_points(&self) -> Option<u64> {
        None
    }
}

// =============================================================================
// Device Accessors
// =============================================================================

/// Label and DMX accessors of a device link.
///
/// Arguments are validated by the session before any of these are called, so
/// implementations may assume indices and channel ranges are in bounds.
pub trait DeviceAccess: Send + 'static {
    /// Read the user-assigned device label.
    fn label(&mut self) -> Result<String>;

    /// Store a new device label.
    fn set_label(&mut self, label: &str) -> Result<()>;

    /// Describe every DMX universe the device exposes, in index order.
    fn universes(&mut self) -> Result<Vec<UniverseInfo>>;

    /// Write channel values into an output universe, starting at `start_channel`.
    fn write_universe(&mut self, index: usize, start_channel: usize, data: &[u8]) -> Result<()>;

    /// Read channel values from an input universe, starting at `start_channel`.
    fn read_universe(&mut self, index: usize, start_channel: usize, buf: &mut [u8])
        -> Result<()>;

    /// Flush pending writes of a universe to the wire.
    fn update_universe(&mut self, index: usize) -> Result<()>;
}

/// Both halves of an opened device.
pub struct DeviceLink {
    pub transport: Box<dyn Transport>,
    pub access: Box<dyn DeviceAccess>,
}

impl DeviceLink {
    pub fn new(transport: Box<dyn Transport>, access: Box<dyn DeviceAccess>) -> Self {
        Self { transport, access }
    }
}
