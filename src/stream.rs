//! Output worker: streams queued frames to the transport.
//!
//! One worker thread runs per started session. It owns the session's
//! [`Transport`] for as long as output is started and hands it back through
//! its join handle when it exits.
//!
//! # Playback
//!
//! Frames are written in chunks of at most `max_points_per_write` points,
//! pass after pass:
//!
//! - `repeat == n`: exactly `n` passes, then the next queued frame (or idle).
//! - `repeat == 0`: passes continue until a newer frame is queued. The newer
//!   frame takes over at the next chunk boundary and starts at its first point.
//!
//! # Backpressure
//!
//! When the transport reports `WouldBlock` the worker sleeps for the
//! configured retry interval and tries the same chunk again. Stop requests
//! are checked before every attempt, so a stop takes effect within one
//! chunk write.
//!
//! # Failure
//!
//! A transport error is never retried: it is recorded in the frame buffer
//! and the worker exits. Every later wait or submit reports it as I/O.
//! A transport that panics is treated the same way, so the transport still
//! goes back to the session and the shutter can be closed.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::frame_buffer::FrameBuffer;
use crate::transport::{Transport, WriteOutcome};
use crate::types::{Frame, Point};

/// How a frame left the worker.
#[derive(Debug)]
enum PlayExit {
    /// All passes of a finite frame were written.
    Completed,
    /// A repeating frame was replaced by this newer one.
    Superseded(Frame),
    /// Output was stopped mid-frame.
    Stopped,
}

/// Streaming loop of one session.
pub(crate) struct OutputWorker {
    transport: Box<dyn Transport>,
    buffer: Arc<FrameBuffer>,
    chunk_points: usize,
    retry_interval: Duration,
}

impl OutputWorker {
    pub(crate) fn new(
        transport: Box<dyn Transport>,
        buffer: Arc<FrameBuffer>,
        retry_interval: Duration,
    ) -> Self {
        let chunk_points = transport.caps().max_points_per_write.max(1);
        Self {
            transport,
            buffer,
            chunk_points,
            retry_interval,
        }
    }

    /// Run the worker on its own named thread.
    ///
    /// If the thread cannot be spawned the transport is lost with it; the
    /// error is reported as I/O.
    pub(crate) fn spawn(self) -> Result<JoinHandle<Box<dyn Transport>>> {
        let name = format!("laser-output-{}", self.transport.device_id());
        thread::Builder::new()
            .name(name)
            .spawn(move || self.run())
            .map_err(|e| Error::io(format!("failed to spawn output worker: {}", e)))
    }

    /// Stream frames until output stops or the transport fails.
    pub(crate) fn run(mut self) -> Box<dyn Transport> {
        let device_id = self.transport.device_id().to_string();
        log::debug!("{}: output worker started", device_id);

        let mut pending: Option<Frame> = None;
        loop {
            let frame = match pending.take() {
                Some(frame) => frame,
                None => match self.buffer.next_frame() {
                    Some(frame) => frame,
                    None => break,
                },
            };

            let played = panic::catch_unwind(AssertUnwindSafe(|| self.play_frame(&frame)))
                .unwrap_or_else(|_| Err(Error::io(format!("{}: transport panicked", device_id))));
            match played {
                Ok(PlayExit::Completed) => self.buffer.finish_frame(),
                Ok(PlayExit::Superseded(next)) => {
                    log::trace!("{}: frame superseded after partial pass", device_id);
                    pending = Some(next);
                }
                Ok(PlayExit::Stopped) => break,
                Err(e) => {
                    log::error!("{}: output failed: {}", device_id, e);
                    self.buffer.fail(e);
                    break;
                }
            }
        }

        log::debug!("{}: output worker exited", device_id);
        self.transport
    }

    fn play_frame(&mut self, frame: &Frame) -> Result<PlayExit> {
        if frame.is_empty() {
            return Ok(PlayExit::Completed);
        }

        let mut passes = 0u32;
        loop {
            for chunk in frame.points.chunks(self.chunk_points) {
                if frame.repeats_forever() {
                    if let Some(next) = self.buffer.take_superseding() {
                        return Ok(PlayExit::Superseded(next));
                    }
                }
                if !self.write_chunk(frame.sample_rate, chunk)? {
                    return Ok(PlayExit::Stopped);
                }
            }

            passes += 1;
            if !frame.repeats_forever() && passes >= frame.repeat {
                return Ok(PlayExit::Completed);
            }
        }
    }

    /// Write one chunk, retrying on backpressure. Returns false on stop.
    fn write_chunk(&mut self, sample_rate: u32, chunk: &[Point]) -> Result<bool> {
        loop {
            if !self.buffer.is_active() {
                return Ok(false);
            }

            match self.transport.try_write_points(sample_rate, chunk) {
                Ok(WriteOutcome::Written) => {
                    self.buffer.record_chunk(chunk.len());
                    return Ok(true);
                }
                Ok(WriteOutcome::WouldBlock) => {
                    self.buffer.record_would_block();
                    thread::sleep(self.retry_interval);
                }
                Err(Error::Io(msg)) => return Err(Error::Io(msg)),
                Err(e) => return Err(Error::io(e.to_string())),
            }
        }
    }
}
