//! Frames and the capture → processing handoff.
//!
//! - `Frame`: one decoded RGB24 image with its stream index.
//! - `FrameSlot`: fixed depth-1 handoff between the capture worker and the
//!   processing loop. A new frame replaces an unconsumed one, so processing
//!   always works on the newest frame and staleness stays bounded.

use anyhow::{anyhow, Result};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// One decoded frame. Pixels are packed RGB24, row-major, no padding.
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Position in the stream, assigned by the source. Strictly increasing.
    pub index: u64,
    captured_at: Instant,
}

impl Frame {
    pub fn new(index: u64, width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            index,
            captured_at: Instant::now(),
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Time since capture; used for staleness logging.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Why the capture side closed the slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotClose {
    /// The source reported end of stream, or a stop was requested.
    Ended,
    /// The source could not produce further frames.
    Failed(String),
}

/// Result of waiting on a `FrameSlot`.
#[derive(Debug)]
pub enum SlotTake {
    Frame(Frame),
    /// Nothing arrived before the timeout.
    Empty,
    /// Closed and drained.
    Closed(SlotClose),
}

#[derive(Default)]
struct SlotState {
    pending: Option<Frame>,
    closed: Option<SlotClose>,
    dropped: u64,
}

/// Depth-1 frame handoff.
#[derive(Default)]
pub struct FrameSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Offer a frame. Replaces (drops) any frame not yet taken.
    ///
    /// Returns false once the slot is closed; the frame is discarded.
    pub fn put(&self, frame: Frame) -> bool {
        let mut state = self.lock();
        if state.closed.is_some() {
            return false;
        }
        if let Some(stale) = state.pending.replace(frame) {
            state.dropped += 1;
            log::debug!("frame {} dropped for a newer frame", stale.index);
        }
        drop(state);
        self.ready.notify_one();
        true
    }

    /// Close the slot. The first reason wins; a pending frame can still be taken.
    pub fn close(&self, reason: SlotClose) {
        let mut state = self.lock();
        if state.closed.is_none() {
            state.closed = Some(reason);
        }
        drop(state);
        self.ready.notify_all();
    }

    pub fn take(&self, timeout: Duration) -> SlotTake {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(frame) = state.pending.take() {
                return SlotTake::Frame(frame);
            }
            if let Some(reason) = &state.closed {
                return SlotTake::Closed(reason.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return SlotTake::Empty;
            }
            state = self
                .ready
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Frames replaced before the processing loop took them.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }
}
