//! Handle-keyed output control on [`DacContext`].
//!
//! ```no_run
//! use laser_frame_dac::protocols::simulated::SimulatedProvider;
//! use laser_frame_dac::{DacContext, Point};
//!
//! let ctx = DacContext::new(SimulatedProvider::with_devices(["dev-1"]));
//! let handle = ctx.open_device("dev-1").unwrap();
//! ctx.start_output(handle).unwrap();
//!
//! let square = [
//!     Point::new(-8000, -8000, 65535, 0, 0, 65535),
//!     Point::new(8000, -8000, 65535, 0, 0, 65535),
//!     Point::new(8000, 8000, 65535, 0, 0, 65535),
//!     Point::new(-8000, 8000, 65535, 0, 0, 65535),
//! ];
//! for _ in 0..100 {
//!     ctx.wait_for_ready(handle, -1).unwrap();
//!     ctx.write_frame(handle, &square, 20_000, 1).unwrap();
//! }
//!
//! ctx.stop_output(handle).unwrap();
//! ctx.close_device(handle).unwrap();
//! ```

use crate::context::DacContext;
use crate::error::{Error, Result};
use crate::types::{DeviceHandle, Frame, Point, RunExit, WaitTimeout};

impl DacContext {
    /// Open the shutter and start streaming queued frames.
    pub fn start_output(&self, handle: DeviceHandle) -> Result<()> {
        self.session(handle)?.start_output()
    }

    /// Stop streaming, drop queued frames and close the shutter.
    pub fn stop_output(&self, handle: DeviceHandle) -> Result<()> {
        self.session(handle)?.stop_output()
    }

    /// Wait for a free frame slot and return the number of free slots.
    ///
    /// Accepts a vendor-style millisecond count (0 polls, negative waits
    /// indefinitely) or a [`WaitTimeout`] / `Duration`. A timed wait may
    /// return 0.
    pub fn wait_for_ready(
        &self,
        handle: DeviceHandle,
        timeout: impl Into<WaitTimeout>,
    ) -> Result<usize> {
        self.session(handle)?.wait_for_free(timeout)
    }

    /// Queue `points` for output at `sample_rate`, played `repeat` times
    /// (0 repeats until a newer frame is written). Never blocks.
    pub fn write_frame(
        &self,
        handle: DeviceHandle,
        points: &[Point],
        sample_rate: u32,
        repeat: u32,
    ) -> Result<()> {
        let frame = Frame::new(points.to_vec(), sample_rate).with_repeat(repeat);
        self.submit_frame(handle, frame)
    }

    /// Queue an already built frame. Never blocks.
    pub fn submit_frame(&self, handle: DeviceHandle, frame: Frame) -> Result<()> {
        self.session(handle)?.write_frame(frame)
    }

    /// Start output and feed it from `producer` until it returns `None`.
    ///
    /// The producer is called with the index of the frame it should build,
    /// each time a slot is free. Output is always stopped before returning.
    /// If output is stopped from another thread the loop ends with
    /// `RunExit::Stopped`.
    pub fn run<F>(&self, handle: DeviceHandle, mut producer: F) -> Result<RunExit>
    where
        F: FnMut(u64) -> Option<Frame>,
    {
        let session = self.session(handle)?;
        session.start_output()?;

        let mut index = 0u64;
        let result = loop {
            match session.wait_for_free(WaitTimeout::Forever) {
                Ok(_) => {}
                Err(Error::NotStarted) => break Ok(RunExit::Stopped),
                Err(e) => break Err(e),
            }

            let Some(frame) = producer(index) else {
                break Ok(RunExit::ProducerEnded);
            };
            if let Err(e) = session.write_frame(frame) {
                if e.is_not_started() {
                    break Ok(RunExit::Stopped);
                }
                break Err(e);
            }
            index += 1;
        };

        match session.stop_output() {
            Ok(()) | Err(Error::NotStarted) => {}
            Err(e) if result.is_ok() => return Err(e),
            Err(e) => log::warn!("{}: stop after failed run: {}", session.device_id(), e),
        }

        log::debug!(
            "{}: run ended after {} frame(s): {:?}",
            session.device_id(),
            index,
            result
        );
        result
    }
}
