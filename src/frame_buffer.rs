//! Bounded frame queue shared between a session and its output worker.
//!
//! The caller side (`wait_for_free`, `submit`) and the worker side
//! (`next_frame`, `take_superseding`, chunk accounting) meet on one mutex.
//! Two condition variables hang off it: `slot_freed` wakes callers blocked in
//! `wait_for_free`, `frame_queued` wakes the worker when it is idle.
//!
//! # Slot accounting
//!
//! A buffer of depth `n` starts with `n` free slots. `submit` takes one, the
//! worker gives it back the moment it dequeues the frame. The frame being
//! streamed holds no slot, so with the default depth of 2 a caller can always
//! keep one frame playing and two more waiting.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Instant;

use crate::error::{Error, Result};
use crate::types::{DeviceCapabilities, Frame, StreamStats, WaitTimeout};

struct BufferState {
    queue: VecDeque<Frame>,
    free: usize,
    running: bool,
    /// Set by the worker when the transport fails; cleared on the next start.
    fault: Option<Error>,
    /// Whether the worker currently holds a frame.
    streaming: bool,
    stats: StreamStats,
}

impl BufferState {
    /// Gate shared by every caller-side operation.
    ///
    /// Once output is stopped every call reports `NotStarted`, even if the
    /// worker failed before the stop. While started, a recorded fault is `Io`.
    fn check_active(&self) -> Result<()> {
        if !self.running {
            return Err(Error::NotStarted);
        }
        if let Some(fault) = &self.fault {
            return Err(match fault {
                Error::Io(_) => fault.clone(),
                other => Error::io(other.to_string()),
            });
        }
        Ok(())
    }
}

/// Frame queue of one device session.
pub struct FrameBuffer {
    caps: DeviceCapabilities,
    capacity: usize,
    state: Mutex<BufferState>,
    slot_freed: Condvar,
    frame_queued: Condvar,
}

impl FrameBuffer {
    /// Create a stopped buffer holding up to `capacity` queued frames.
    pub fn new(caps: DeviceCapabilities, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            caps,
            capacity,
            state: Mutex::new(BufferState {
                queue: VecDeque::with_capacity(capacity),
                free: capacity,
                running: false,
                fault: None,
                streaming: false,
                stats: StreamStats::default(),
            }),
            slot_freed: Condvar::new(),
            frame_queued: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of frames that may wait behind the streaming one.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current free-slot count, regardless of state.
    pub fn free_slots(&self) -> usize {
        self.lock().free
    }

    /// Number of frames waiting to be streamed.
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    /// Whether output is running and no fault has been recorded.
    pub fn is_active(&self) -> bool {
        let state = self.lock();
        state.running && state.fault.is_none()
    }

    /// Whether the worker is currently streaming a frame.
    pub fn is_streaming(&self) -> bool {
        self.lock().streaming
    }

    /// The transport failure that stopped the worker, if any.
    pub fn fault(&self) -> Option<Error> {
        self.lock().fault.clone()
    }

    /// Snapshot of the cumulative statistics.
    pub fn stats(&self) -> StreamStats {
        self.lock().stats.clone()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Reset the queue and accept frames. Called when output starts.
    pub fn activate(&self) {
        let mut state = self.lock();
        state.queue.clear();
        state.free = self.capacity;
        state.fault = None;
        state.streaming = false;
        state.running = true;
    }

    /// Stop accepting frames, drop everything queued and wake all waiters.
    ///
    /// Returns the number of frames discarded, including the one streaming.
    pub fn deactivate(&self) -> usize {
        let mut state = self.lock();
        let mut dropped = state.queue.len();
        if state.streaming {
            dropped += 1;
        }
        state.queue.clear();
        state.free = self.capacity;
        state.running = false;
        state.stats.frames_dropped += dropped as u64;
        drop(state);

        self.slot_freed.notify_all();
        self.frame_queued.notify_all();
        dropped
    }

    /// Record a transport failure and wake everyone so they observe it.
    pub fn fail(&self, err: Error) {
        let mut state = self.lock();
        state.fault = Some(err);
        state.streaming = false;
        drop(state);

        self.slot_freed.notify_all();
        self.frame_queued.notify_all();
    }

    // =========================================================================
    // Caller Side
    // =========================================================================

    /// Wait until at least one slot is free, then return the free count.
    ///
    /// `Poll` returns immediately, `For(d)` may return 0 once `d` elapses.
    /// A stop while waiting yields `NotStarted`, a worker fault `Io`.
    /// A limit too large to form a deadline waits like `Forever`.
    pub fn wait_for_free(&self, timeout: WaitTimeout) -> Result<usize> {
        let mut state = self.lock();
        state.check_active()?;

        let deadline = match timeout {
            WaitTimeout::Poll => return Ok(state.free),
            WaitTimeout::Forever => None,
            WaitTimeout::For(limit) => Instant::now().checked_add(limit),
        };

        while state.free == 0 {
            state = match deadline {
                None => self
                    .slot_freed
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(0);
                    }
                    match self.slot_freed.wait_timeout(state, deadline - now) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    }
                }
            };
            state.check_active()?;
        }
        Ok(state.free)
    }

    /// Queue a frame for output. Never blocks.
    pub fn submit(&self, frame: Frame) -> Result<()> {
        let mut state = self.lock();
        state.check_active()?;
        self.validate(&frame)?;

        if state.free == 0 {
            return Err(Error::out_of_range("no free frame buffer"));
        }

        log::trace!(
            "queued frame: {} points at {} Hz, repeat {}",
            frame.len(),
            frame.sample_rate,
            frame.repeat
        );
        state.queue.push_back(frame);
        state.free -= 1;
        state.stats.frames_submitted += 1;
        drop(state);

        self.frame_queued.notify_one();
        Ok(())
    }

    fn validate(&self, frame: &Frame) -> Result<()> {
        if frame.is_empty() {
            return Err(Error::invalid("frame has no points"));
        }
        if frame.len() > self.caps.max_points_per_frame {
            return Err(Error::out_of_range(format!(
                "{} points exceed the device limit of {}",
                frame.len(),
                self.caps.max_points_per_frame
            )));
        }
        if frame.sample_rate == 0 || frame.sample_rate > self.caps.max_sample_rate {
            return Err(Error::out_of_range(format!(
                "sample rate {} Hz (device maximum {} Hz)",
                frame.sample_rate, self.caps.max_sample_rate
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Worker Side
    // =========================================================================

    /// Block until a frame is queued and dequeue it.
    ///
    /// Returns `None` once output stops or a fault is recorded.
    pub(crate) fn next_frame(&self) -> Option<Frame> {
        let mut state = self.lock();
        state.streaming = false;
        loop {
            if !state.running || state.fault.is_some() {
                return None;
            }
            if let Some(frame) = state.queue.pop_front() {
                self.begin_frame(&mut state);
                drop(state);
                self.slot_freed.notify_all();
                return Some(frame);
            }
            state = self
                .frame_queued
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Dequeue the next frame if one is waiting, replacing the streaming one.
    pub(crate) fn take_superseding(&self) -> Option<Frame> {
        let mut state = self.lock();
        if !state.running {
            return None;
        }
        let frame = state.queue.pop_front()?;
        state.stats.frames_superseded += 1;
        self.begin_frame(&mut state);
        drop(state);

        self.slot_freed.notify_all();
        Some(frame)
    }

    fn begin_frame(&self, state: &mut BufferState) {
        state.free = (state.free + 1).min(self.capacity);
        state.streaming = true;
        state.stats.frames_started += 1;
    }

    /// Mark the streaming frame as played to completion.
    pub(crate) fn finish_frame(&self) {
        let mut state = self.lock();
        state.streaming = false;
        state.stats.frames_completed += 1;
    }

    pub(crate) fn record_chunk(&self, points: usize) {
        let mut state = self.lock();
        state.stats.chunks_written += 1;
        state.stats.points_written += points as u64;
    }

    pub(crate) fn record_would_block(&self) {
        self.lock().stats.would_block_retries += 1;
    }
}
