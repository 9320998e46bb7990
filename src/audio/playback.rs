//! # Playback Scheduler
//!
//! Plays inbound audio chunks back to back with no gaps and no overlap, in the
//! order they arrived, on an output context with a monotonic clock.
//!
//! ## Scheduling Rule:
//! Each chunk starts at `max(next_start_time, output.current_time())` and then
//! pushes `next_start_time` forward by the chunk's duration. When the model
//! stalls, the next chunk starts "now" instead of in the past.
//!
//! ## Interruption:
//! Barge-in stops every scheduled chunk at once and resets the timeline, so the
//! first chunk of the next response plays immediately.

use crate::audio::codec::{self, EncodedChunk};
use crate::device::AudioOutput;
use crate::error::SessionError;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Identifies one scheduled chunk for its whole playback lifetime.
pub type HandleId = u64;

/// Decoded audio ready for scheduling: one float buffer per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    sample_rate: u32,
    planes: Vec<Vec<f32>>,
}

impl PlaybackBuffer {
    pub fn new(sample_rate: u32, planes: Vec<Vec<f32>>) -> Self {
        Self { sample_rate, planes }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn planes(&self) -> &[Vec<f32>] {
        &self.planes
    }

    pub fn channel_count(&self) -> u16 {
        self.planes.len() as u16
    }

    /// Samples per channel.
    pub fn frames(&self) -> usize {
        self.planes.first().map(Vec::len).unwrap_or(0)
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

#[derive(Debug, Clone, Copy)]
struct ScheduledChunk {
    start_at: f64,
    duration: f64,
}

/// Gapless, ordered playback over one output context.
pub struct PlaybackScheduler {
    output: Option<Box<dyn AudioOutput>>,
    channels: u16,
    next_start_time: f64,
    next_handle: HandleId,
    active: BTreeMap<HandleId, ScheduledChunk>,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn AudioOutput>, channels: u16) -> Self {
        Self {
            output: Some(output),
            channels,
            next_start_time: 0.0,
            next_handle: 1,
            active: BTreeMap::new(),
        }
    }

    /// Decode `chunk` and schedule it right after everything already queued.
    ///
    /// A chunk that fails to decode is rejected without touching the timeline.
    pub fn enqueue(&mut self, chunk: &EncodedChunk) -> Result<HandleId, SessionError> {
        let output = self
            .output
            .as_mut()
            .ok_or_else(|| SessionError::Device("playback output is closed".to_string()))?;

        let planes = codec::decode_chunk(chunk, self.channels)?;
        let sample_rate = chunk.sample_rate().unwrap_or_else(|| output.sample_rate());
        let buffer = PlaybackBuffer::new(sample_rate, planes);

        let start_at = self.next_start_time.max(output.current_time());
        let handle = self.next_handle;
        output.schedule(handle, &buffer, start_at)?;

        let duration = buffer.duration();
        self.next_handle += 1;
        self.next_start_time = start_at + duration;
        self.active.insert(handle, ScheduledChunk { start_at, duration });

        debug!(handle, start_at, duration, "Queued model audio");
        Ok(handle)
    }

    /// Forget a chunk that finished on its own.
    ///
    /// Returns `false` for handles that were already stopped or never existed.
    pub fn complete(&mut self, handle: HandleId) -> bool {
        self.active.remove(&handle).is_some()
    }

    /// Stop every scheduled chunk and rewind the timeline.
    pub fn interrupt(&mut self) {
        let handles: Vec<HandleId> = self.active.keys().copied().collect();
        if let Some(output) = self.output.as_mut() {
            for handle in &handles {
                // The chunk may have just finished; nothing left to stop
                if let Err(e) = output.stop(*handle) {
                    debug!(handle, "Ignoring stop failure: {}", e);
                }
            }
        }
        if !handles.is_empty() {
            debug!(stopped = handles.len(), "Playback interrupted");
        }
        self.active.clear();
        self.next_start_time = 0.0;
    }

    /// Stop everything and release the output context. Safe to call twice.
    pub fn shutdown(&mut self) {
        self.interrupt();
        if let Some(mut output) = self.output.take() {
            if let Err(e) = output.close() {
                warn!("Failed to close playback output: {}", e);
            }
        }
    }

    /// Chunks scheduled and not yet finished or stopped.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
impl PlaybackScheduler {
    pub fn is_active(&self, handle: HandleId) -> bool {
        self.active.contains_key(&handle)
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn is_closed(&self) -> bool {
        self.output.is_none()
    }

    /// Start and end of a scheduled chunk on the output clock.
    pub fn slot(&self, handle: HandleId) -> Option<(f64, f64)> {
        self.active
            .get(&handle)
            .map(|chunk| (chunk.start_at, chunk.start_at + chunk.duration))
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
