//! # Capture Pipeline
//!
//! Turns the raw microphone stream into fixed-size frames and hands each one,
//! already encoded for the wire, to a caller-supplied sink.
//!
//! Samples arrive in arbitrarily sized pieces (whatever the browser's audio
//! worklet produced). The pipeline accumulates them and emits exactly
//! `frame_size` samples per frame; a partial tail waits for the next push.

use crate::audio::codec::{self, EncodedChunk};
use crate::device::AudioInput;
use crate::error::SessionError;
use tracing::{debug, trace, warn};

/// Entry point for starting microphone capture.
pub struct CapturePipeline;

impl CapturePipeline {
    /// Wire `input` through a framing stage of `frame_size` samples.
    ///
    /// The input context is released again if wiring fails.
    pub fn start(mut input: Box<dyn AudioInput>, frame_size: usize) -> Result<CaptureHandle, SessionError> {
        if frame_size == 0 {
            return Err(SessionError::Device("capture frame size must be non-zero".to_string()));
        }

        if let Err(e) = input.connect(frame_size) {
            if let Err(close_err) = input.close() {
                debug!("Ignoring input close failure after connect error: {}", close_err);
            }
            return Err(e);
        }

        let sample_rate = input.sample_rate();
        debug!(sample_rate, frame_size, "Microphone capture started");

        Ok(CaptureHandle {
            input: Some(input),
            sample_rate,
            frame_size,
            pending: Vec::with_capacity(frame_size),
            frames_sent: 0,
            frames_failed: 0,
        })
    }
}

/// A running capture. Dropping it stops capture.
pub struct CaptureHandle {
    input: Option<Box<dyn AudioInput>>,
    sample_rate: u32,
    frame_size: usize,
    pending: Vec<f32>,
    frames_sent: u64,
    frames_failed: u64,
}

impl CaptureHandle {
    /// Feed captured samples; every completed frame goes to `sink`.
    ///
    /// A sink error only loses that one frame: it is logged and framing carries
    /// on with the next one. Returns how many frames were emitted.
    pub fn push_samples<F>(&mut self, samples: &[f32], mut sink: F) -> usize
    where
        F: FnMut(EncodedChunk) -> Result<(), SessionError>,
    {
        if self.input.is_none() {
            return 0;
        }

        let mut emitted = 0;
        let mut remaining = samples;

        while !remaining.is_empty() {
            let take = (self.frame_size - self.pending.len()).min(remaining.len());
            self.pending.extend_from_slice(&remaining[..take]);
            remaining = &remaining[take..];

            if self.pending.len() == self.frame_size {
                let chunk = codec::samples_to_wire(&self.pending, self.sample_rate);
                self.pending.clear();
                emitted += 1;

                match sink(chunk) {
                    Ok(()) => self.frames_sent += 1,
                    Err(e) => {
                        self.frames_failed += 1;
                        warn!("Dropping microphone frame: {}", e);
                    }
                }
            }
        }

        trace!(emitted, buffered = self.pending.len(), "Framed microphone samples");
        emitted
    }

    /// Disconnect the framing stage and release the input context.
    ///
    /// Idempotent; failures are logged and swallowed.
    pub fn stop(&mut self) {
        let Some(mut input) = self.input.take() else {
            return;
        };

        if let Err(e) = input.disconnect() {
            debug!("Ignoring capture disconnect failure: {}", e);
        }
        if let Err(e) = input.close() {
            debug!("Ignoring input context close failure: {}", e);
        }
        self.pending.clear();

        debug!(
            sent = self.frames_sent,
            failed = self.frames_failed,
            "Microphone capture stopped"
        );
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn frames_failed(&self) -> u64 {
        self.frames_failed
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
