//! Core types for laser frame output.
//!
//! Provides the device-native point and frame types, device handles and
//! capabilities, DMX universe descriptors, and session configuration.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Version of the device API this crate implements (major in the high byte).
pub const API_VERSION: u32 = 0x0106;

// =============================================================================
// Points and Frames
// =============================================================================

/// One output sample in the device's native ILDA signal ranges.
///
/// - x, y: -32768..32767, mapped to -10V..+10V on the ILDA connector
/// - colors, intensity, user channels: 0..65535, mapped to 0V..+5V
///
/// `user1` and `user2` drive the cyan and magenta outputs on devices that
/// expose them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point {
    /// Horizontal position.
    pub x: i16,
    /// Vertical position.
    pub y: i16,
    /// Red channel.
    pub red: u16,
    /// Green channel.
    pub green: u16,
    /// Blue channel.
    pub blue: u16,
    /// Intensity channel.
    pub intensity: u16,
    /// User channel 1 (cyan).
    pub user1: u16,
    /// User channel 2 (magenta).
    pub user2: u16,
}

impl Point {
    /// Creates a point with the given position, color and intensity.
    ///
    /// User channels are left at zero.
    pub fn new(x: i16, y: i16, red: u16, green: u16, blue: u16, intensity: u16) -> Self {
        Self {
            x,
            y,
            red,
            green,
            blue,
            intensity,
            user1: 0,
            user2: 0,
        }
    }

    /// Sets both user channels (builder pattern).
    pub fn with_user(mut self, user1: u16, user2: u16) -> Self {
        self.user1 = user1;
        self.user2 = user2;
        self
    }

    /// Creates a blanked point (laser off) at the given position.
    pub fn blanked(x: i16, y: i16) -> Self {
        Self {
            x,
            y,
            ..Default::default()
        }
    }

    /// Returns true if every color, intensity and user channel is zero.
    pub fn is_blank(&self) -> bool {
        self.red == 0
            && self.green == 0
            && self.blue == 0
            && self.intensity == 0
            && self.user1 == 0
            && self.user2 == 0
    }
}

/// A sequence of points played at a fixed sample rate.
///
/// `repeat == 0` plays the frame continuously until a newer frame is written;
/// `repeat == n` plays exactly `n` passes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Frame {
    /// Points of one pass, in output order.
    pub points: Vec<Point>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of passes, or 0 for "until replaced".
    pub repeat: u32,
}

impl Frame {
    /// Creates a frame that repeats until a newer frame replaces it.
    pub fn new(points: Vec<Point>, sample_rate: u32) -> Self {
        Self {
            points,
            sample_rate,
            repeat: 0,
        }
    }

    /// Sets the number of passes (builder pattern).
    pub fn with_repeat(mut self, repeat: u32) -> Self {
        self.repeat = repeat;
        self
    }

    /// Returns the number of points in one pass.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns true if the frame has no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Returns true if the frame repeats until replaced.
    pub fn repeats_forever(&self) -> bool {
        self.repeat == 0
    }

    /// Duration of one pass at the frame's sample rate.
    pub fn period(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.points.len() as f64 / self.sample_rate as f64)
    }
}

// =============================================================================
// Devices
// =============================================================================

/// Handle to an open device session.
///
/// Handles are allocated from an increasing counter and never reused, so a
/// handle kept after `close` stays invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceHandle(pub u32);

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Device limits the frame buffer validates against.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceCapabilities {
    /// Maximum sample rate in Hz.
    pub max_sample_rate: u32,
    /// Maximum number of points in one frame.
    pub max_points_per_frame: usize,
    /// Largest number of points handed to the transport in one write.
    pub max_points_per_write: usize,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            max_sample_rate: 100_000,
            max_points_per_frame: 65_535,
            max_points_per_write: 1_000,
        }
    }
}

/// Lifecycle state of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SessionState {
    /// Connected, output never started.
    Opened,
    /// Output running, frames accepted.
    Started,
    /// Output stopped, may be started again or closed.
    Stopped,
    /// Closed; the handle is no longer valid.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Opened => "opened",
            SessionState::Started => "started",
            SessionState::Stopped => "stopped",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

// =============================================================================
// DMX Universes
// =============================================================================

/// Whether a DMX universe is written to or read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum UniverseDirection {
    /// The device transmits this universe.
    Output,
    /// The device receives this universe.
    Input,
}

/// Description of one DMX universe on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UniverseInfo {
    pub name: String,
    pub direction: UniverseDirection,
    pub channel_count: usize,
}

impl UniverseInfo {
    pub fn new(name: impl Into<String>, direction: UniverseDirection, channel_count: usize) -> Self {
        Self {
            name: name.into(),
            direction,
            channel_count,
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Per-session output configuration.
///
/// - `buffer_depth`: number of frames that may wait behind the streaming one
///   (default: 2, i.e. double-buffered)
/// - `write_retry_interval`: how long the worker sleeps when the transport
///   reports it cannot take more points yet (default: 500µs)
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SessionConfig {
    /// Frame queue capacity.
    pub buffer_depth: usize,

    /// Backpressure retry interval for the output worker.
    #[cfg_attr(feature = "serde", serde(with = "duration_micros"))]
    pub write_retry_interval: Duration,
}

#[cfg(feature = "serde")]
mod duration_micros {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let micros = duration.as_micros().min(u64::MAX as u128) as u64;
        micros.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let micros = u64::deserialize(deserializer)?;
        Ok(Duration::from_micros(micros))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer_depth: 2,
            write_retry_interval: Duration::from_micros(500),
        }
    }
}

impl SessionConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the frame queue capacity (builder pattern).
    pub fn with_buffer_depth(mut self, depth: usize) -> Self {
        self.buffer_depth = depth;
        self
    }

    /// Set the backpressure retry interval (builder pattern).
    pub fn with_write_retry_interval(mut self, interval: Duration) -> Self {
        self.write_retry_interval = interval;
        self
    }

    /// Check the configuration before it is used to open sessions.
    pub fn validate(&self) -> crate::Result<()> {
        if self.buffer_depth == 0 {
            return Err(crate::Error::out_of_range("buffer_depth must be at least 1"));
        }
        Ok(())
    }
}

// =============================================================================
// Waiting and Statistics
// =============================================================================

/// How long `wait_for_free` may suspend the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTimeout {
    /// Return the current free count immediately.
    Poll,
    /// Wait until at least one slot is free.
    Forever,
    /// Wait at most this long; the count may be zero when it elapses.
    For(Duration),
}

impl WaitTimeout {
    /// Interpret a vendor-style millisecond timeout: 0 polls, negative waits
    /// forever, positive waits up to that many milliseconds.
    pub fn from_millis(timeout_ms: i32) -> Self {
        match timeout_ms {
            0 => WaitTimeout::Poll,
            ms if ms < 0 => WaitTimeout::Forever,
            ms => WaitTimeout::For(Duration::from_millis(ms as u64)),
        }
    }
}

impl From<i32> for WaitTimeout {
    fn from(timeout_ms: i32) -> Self {
        Self::from_millis(timeout_ms)
    }
}

impl From<Duration> for WaitTimeout {
    fn from(duration: Duration) -> Self {
        if duration.is_zero() {
            WaitTimeout::Poll
        } else {
            WaitTimeout::For(duration)
        }
    }
}

/// Why `DacContext::run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// The producer returned `None`.
    ProducerEnded,
    /// Output was stopped from another thread.
    Stopped,
}

/// Output statistics for diagnostics and debugging.
///
/// Counters are cumulative over the session's lifetime, across restarts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StreamStats {
    /// Frames accepted by `submit`.
    pub frames_submitted: u64,
    /// Frames the worker dequeued and began streaming.
    pub frames_started: u64,
    /// Finite frames that played all their passes.
    pub frames_completed: u64,
    /// Repeating frames abandoned for a newer frame.
    pub frames_superseded: u64,
    /// Queued or streaming frames discarded by a stop.
    pub frames_dropped: u64,
    /// Total chunks written to the transport.
    pub chunks_written: u64,
    /// Total points written to the transport.
    pub points_written: u64,
    /// Times the transport reported it could not accept a chunk yet.
    pub would_block_retries: u64,
}
