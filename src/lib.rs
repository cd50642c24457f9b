//! Frame-streaming client for laser projector DACs.
//!
//! This crate drives laser DACs frame by frame: the caller builds a frame
//! (a list of points plus a sample rate and a repeat count), queues it on an
//! open device, and a per-device worker thread streams queued frames to the
//! hardware at each frame's sample rate.
//!
//! # Getting Started
//!
//! ```
//! use laser_frame_dac::protocols::simulated::SimulatedProvider;
//! use laser_frame_dac::{DacContext, Point};
//!
//! let ctx = DacContext::new(SimulatedProvider::with_devices(["dev-1"]));
//!
//! // Discover and open the first device
//! let count = ctx.enumerate_devices();
//! assert_eq!(count, 1);
//! let handle = ctx.open_device(&ctx.device_id(0).unwrap()).unwrap();
//!
//! // Opens the shutter and starts the output worker
//! ctx.start_output(handle).unwrap();
//!
//! let points: Vec<Point> = (0..200)
//!     .map(|i| {
//!         let angle = i as f32 / 200.0 * std::f32::consts::TAU;
//!         let x = (angle.cos() * 16000.0) as i16;
//!         let y = (angle.sin() * 16000.0) as i16;
//!         Point::new(x, y, 65535, 0, 0, 65535)
//!     })
//!     .collect();
//!
//! // Wait for a free slot, then queue the frame (repeat until replaced)
//! ctx.wait_for_ready(handle, -1).unwrap();
//! ctx.write_frame(handle, &points, 20_000, 0).unwrap();
//!
//! ctx.stop_output(handle).unwrap();
//! ctx.close_device(handle).unwrap();
//! ```
//!
//! # Frame Buffering
//!
//! Each device has a small queue of frames (two by default, see
//! [`SessionConfig`]). `wait_for_ready` blocks until a slot is free,
//! `write_frame` never blocks and fails with `ParameterOutOfRange` when no
//! slot is free. A frame with `repeat == 0` plays until the next frame is
//! queued, which then takes over at the next chunk boundary.
//!
//! # Transports
//!
//! Hardware access goes through the [`Transport`] and [`DeviceAccess`]
//! traits, opened by a [`DeviceProvider`]. The crate ships
//! [`protocols::simulated`], an in-process device used by the tests and
//! the `circle` demo.
//!
//! # Coordinate System
//!
//! Points are in the device's native ranges:
//! - X, Y: -32768..32767 (full deflection)
//! - Colors, intensity, user channels: 0..65535
//!
//! # Features
//!
//! - `serde`: `Serialize`/`Deserialize` for points, frames, configuration
//!   and statistics.

pub mod context;
pub mod discovery;
mod error;
pub mod frame_buffer;
mod output;
pub mod protocols;
pub mod session;
mod stream;
pub mod transport;
pub mod types;

// Crate-level error types
pub use error::{Error, Result};

// Entry point
pub use context::DacContext;
pub use session::Session;

// Transport traits
pub use discovery::{DeviceDiscovery, DeviceProvider, DiscoveredDevice};
pub use transport::{DeviceAccess, DeviceLink, Transport, WriteOutcome};

// Core types
pub use types::{
    DeviceCapabilities, DeviceHandle, Frame, Point, RunExit, SessionConfig, SessionState,
    StreamStats, UniverseDirection, UniverseInfo, WaitTimeout, API_VERSION,
};
