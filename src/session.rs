//! Device session: one opened device and its output lifecycle.
//!
//! A [`Session`] owns the device link, tracks the lifecycle state and owns
//! the session's [`FrameBuffer`]. Control calls (start, stop, close, label,
//! DMX) are serialized by the session lock. The streaming calls
//! (`wait_for_free`, `write_frame`) go straight to the frame buffer so a
//! caller blocked in a wait never holds up a stop.
//!
//! ```text
//! Opened --start--> Started --stop--> Stopped --start--> Started ...
//!   |                                    |
//!   +---------------close----------------+--> Closed
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::error::{Error, Result};
use crate::frame_buffer::FrameBuffer;
use crate::stream::OutputWorker;
use crate::transport::{DeviceAccess, DeviceLink, Transport};
use crate::types::{
    DeviceCapabilities, DeviceHandle, Frame, SessionConfig, SessionState, StreamStats,
    UniverseDirection, UniverseInfo, WaitTimeout,
};

struct SessionInner {
    state: SessionState,
    /// `None` while the output worker owns it.
    transport: Option<Box<dyn Transport>>,
    access: Box<dyn DeviceAccess>,
    worker: Option<JoinHandle<Box<dyn Transport>>>,
}

impl SessionInner {
    fn ensure_open(&self, handle: DeviceHandle) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(Error::invalid_handle(format!("{} is closed", handle)));
        }
        Ok(())
    }

    /// Look up a universe and check a channel range against it.
    fn checked_universe(
        &mut self,
        index: usize,
        start_channel: usize,
        len: usize,
        direction: UniverseDirection,
    ) -> Result<UniverseInfo> {
        let universe = self.universe(index)?;
        if len == 0 {
            return Err(Error::invalid("no DMX channels given"));
        }
        if universe.direction != direction {
            return Err(Error::invalid(format!(
                "universe {} ({}) is not an {:?} universe",
                index, universe.name, direction
            )));
        }
        let end = start_channel.saturating_add(len);
        if end > universe.channel_count {
            return Err(Error::out_of_range(format!(
                "channels {}..{} exceed the {} channels of universe {}",
                start_channel, end, universe.channel_count, index
            )));
        }
        Ok(universe)
    }

    fn universe(&mut self, index: usize) -> Result<UniverseInfo> {
        let mut universes = self.access.universes()?;
        let count = universes.len();
        if index >= count {
            return Err(Error::out_of_range(format!(
                "universe index {} (device has {})",
                index, count
            )));
        }
        Ok(universes.swap_remove(index))
    }
}

/// One opened device.
pub struct Session {
    handle: DeviceHandle,
    device_id: String,
    caps: DeviceCapabilities,
    buffer: Arc<FrameBuffer>,
    config: SessionConfig,
    inner: Mutex<SessionInner>,
}

impl Session {
    /// Connect the link's transport and create the session in `Opened` state.
    pub fn open(handle: DeviceHandle, link: DeviceLink, config: SessionConfig) -> Result<Self> {
        config.validate()?;

        let DeviceLink {
            mut transport,
            access,
        } = link;
        transport
            .connect()
            .map_err(|e| Error::io(format!("connect to {}: {}", transport.device_id(), e)))?;

        let device_id = transport.device_id().to_string();
        let caps = transport.caps().clone();
        let buffer = Arc::new(FrameBuffer::new(caps.clone(), config.buffer_depth));

        log::info!(
            "opened {} as {} (max {} Hz, {} points/frame)",
            device_id,
            handle,
            caps.max_sample_rate,
            caps.max_points_per_frame
        );

        Ok(Self {
            handle,
            device_id,
            caps,
            buffer,
            config,
            inner: Mutex::new(SessionInner {
                state: SessionState::Opened,
                transport: Some(transport),
                access,
                worker: None,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn handle(&self) -> DeviceHandle {
        self.handle
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn caps(&self) -> &DeviceCapabilities {
        &self.caps
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Cumulative output statistics.
    pub fn stats(&self) -> StreamStats {
        self.buffer.stats()
    }

    // =========================================================================
    // Output Lifecycle
    // =========================================================================

    /// Open the shutter and start the output worker.
    ///
    /// Returns `NotInitialised` if output is already started. A shutter
    /// failure is reported as `Io` and leaves the state unchanged.
    pub fn start_output(&self) -> Result<()> {
        let mut inner = self.lock();
        match inner.state {
            SessionState::Started => {
                return Err(Error::not_initialised(format!(
                    "output of {} already started",
                    self.handle
                )))
            }
            SessionState::Closed => {
                return Err(Error::invalid_handle(format!("{} is closed", self.handle)))
            }
            SessionState::Opened | SessionState::Stopped => {}
        }

        let mut transport = inner
            .transport
            .take()
            .ok_or_else(|| Error::io(format!("{}: transport was lost", self.device_id)))?;

        if let Err(e) = transport.set_shutter(true) {
            inner.transport = Some(transport);
            return Err(Error::io(format!("open shutter: {}", e)));
        }

        self.buffer.activate();
        let worker = OutputWorker::new(
            transport,
            Arc::clone(&self.buffer),
            self.config.write_retry_interval,
        );
        match worker.spawn() {
            Ok(handle) => inner.worker = Some(handle),
            Err(e) => {
                self.buffer.deactivate();
                return Err(e);
            }
        }

        inner.state = SessionState::Started;
        log::info!("{}: output started", self.device_id);
        Ok(())
    }

    /// Stop output and close the shutter.
    ///
    /// The streaming frame is abandoned at the next chunk boundary and queued
    /// frames are dropped. The session ends up `Stopped` even when the
    /// transport fails to stop or to close the shutter; that failure is
    /// returned as `Io`.
    ///
    /// A panicking transport is caught by the worker and behaves like a
    /// write error. Only if the worker thread itself dies is the transport
    /// lost: the shutter state is then unknown and every later start fails
    /// with `Io` until the device is closed and opened again.
    pub fn stop_output(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != SessionState::Started {
            return Err(Error::NotStarted);
        }

        let dropped = self.buffer.deactivate();
        inner.state = SessionState::Stopped;

        let transport = match inner.worker.take().map(JoinHandle::join) {
            Some(Ok(transport)) => transport,
            Some(Err(_)) => {
                log::error!(
                    "{}: output worker died, transport lost with the shutter possibly open",
                    self.device_id
                );
                return Err(Error::io(format!("{}: output worker panicked", self.device_id)));
            }
            None => {
                log::error!("{}: no output worker to stop", self.device_id);
                return Err(Error::io(format!("{}: transport was lost", self.device_id)));
            }
        };
        let transport = inner.transport.insert(transport);

        let stopped = transport.stop();
        let shutter = transport.set_shutter(false);
        log::info!(
            "{}: output stopped ({} frame(s) dropped)",
            self.device_id,
            dropped
        );

        if let Some(fault) = self.buffer.fault() {
            log::debug!("{}: stopped after fault: {}", self.device_id, fault);
        }
        stopped
            .and(shutter)
            .map_err(|e| Error::io(format!("stop {}: {}", self.device_id, e)))
    }

    /// Disconnect the device. Output must be stopped first.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.lock();
        match inner.state {
            SessionState::Started => {
                return Err(Error::invalid_handle(format!(
                    "stop output of {} before closing",
                    self.handle
                )))
            }
            SessionState::Closed => {
                return Err(Error::invalid_handle(format!("{} already closed", self.handle)))
            }
            SessionState::Opened | SessionState::Stopped => {}
        }

        if let Some(transport) = inner.transport.as_mut() {
            if let Err(e) = transport.disconnect() {
                log::warn!("{}: disconnect failed: {}", self.device_id, e);
            }
        }
        inner.transport = None;
        inner.state = SessionState::Closed;
        log::info!("closed {} ({})", self.device_id, self.handle);
        Ok(())
    }

    /// Stop output if needed and close. Errors are logged, not returned.
    pub(crate) fn shutdown(&self) {
        if self.state() == SessionState::Started {
            if let Err(e) = self.stop_output() {
                log::warn!("{}: stop during shutdown: {}", self.device_id, e);
            }
        }
        if self.state() != SessionState::Closed {
            if let Err(e) = self.close() {
                log::warn!("{}: close during shutdown: {}", self.device_id, e);
            }
        }
    }

    // =========================================================================
    // Streaming
    // =========================================================================

    /// Wait for a free frame slot. See [`FrameBuffer::wait_for_free`].
    pub fn wait_for_free(&self, timeout: impl Into<WaitTimeout>) -> Result<usize> {
        self.buffer.wait_for_free(timeout.into())
    }

    /// Queue a frame for output. See [`FrameBuffer::submit`].
    pub fn write_frame(&self, frame: Frame) -> Result<()> {
        self.buffer.submit(frame)
    }

    /// Maximum sample rate of the device in Hz.
    pub fn max_sample_rate(&self) -> Result<u32> {
        self.lock().ensure_open(self.handle)?;
        Ok(self.caps.max_sample_rate)
    }

    // =========================================================================
    // Label
    // =========================================================================

    pub fn label(&self) -> Result<String> {
        let mut inner = self.lock();
        inner.ensure_open(self.handle)?;
        inner.access.label()
    }

    /// Store a new device label. A label containing NUL is rejected.
    pub fn set_label(&self, label: &str) -> Result<()> {
        if label.contains('\0') {
            return Err(Error::invalid("device label contains a NUL character"));
        }
        let mut inner = self.lock();
        inner.ensure_open(self.handle)?;
        inner.access.set_label(label)
    }

    // =========================================================================
    // DMX Universes
    // =========================================================================

    pub fn universe_count(&self) -> Result<usize> {
        let mut inner = self.lock();
        inner.ensure_open(self.handle)?;
        Ok(inner.access.universes()?.len())
    }

    pub fn universe_info(&self, index: usize) -> Result<UniverseInfo> {
        let mut inner = self.lock();
        inner.ensure_open(self.handle)?;
        inner.universe(index)
    }

    /// Write channel values to an output universe.
    pub fn write_universe(&self, index: usize, start_channel: usize, data: &[u8]) -> Result<()> {
        let mut inner = self.lock();
        inner.ensure_open(self.handle)?;
        inner.checked_universe(index, start_channel, data.len(), UniverseDirection::Output)?;
        inner.access.write_universe(index, start_channel, data)
    }

    /// Read channel values from an input universe into `buf`.
    pub fn read_universe(&self, index: usize, start_channel: usize, buf: &mut [u8]) -> Result<()> {
        let mut inner = self.lock();
        inner.ensure_open(self.handle)?;
        inner.checked_universe(index, start_channel, buf.len(), UniverseDirection::Input)?;
        inner.access.read_universe(index, start_channel, buf)
    }

    /// Flush written values of an output universe to the wire.
    pub fn update_universe(&self, index: usize) -> Result<()> {
        let mut inner = self.lock();
        inner.ensure_open(self.handle)?;
        let universe = inner.universe(index)?;
        if universe.direction != UniverseDirection::Output {
            return Err(Error::invalid(format!(
                "universe {} ({}) is an input",
                index, universe.name
            )));
        }
        inner.access.update_universe(index)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
