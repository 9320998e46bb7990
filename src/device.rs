//! # Audio Device Capabilities
//!
//! The session never touches hardware directly. It asks a [`DeviceProvider`]
//! for microphone permission and for input/output audio contexts, each with an
//! open/close lifecycle. This keeps the session state machine testable with
//! in-memory fakes.
//!
//! ## Browser Bridge:
//! In production the devices live in the user's browser, on the other side of
//! the `/ws/assistant` WebSocket:
//! - **BrowserInput**: tells the page to start/stop streaming 16 kHz mono samples
//! - **BrowserOutput**: forwards each scheduled chunk with its start time and
//!   reports completion back to the session when the chunk's slot has elapsed
//! - **BrowserDevices**: hands out both, gated by the permission the page reported

use crate::audio::codec;
use crate::audio::playback::{HandleId, PlaybackBuffer};
use crate::error::SessionError;
use crate::session::events::{SessionSignal, UiEvent};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// A microphone input context.
pub trait AudioInput {
    /// Sample rate frames are captured at.
    fn sample_rate(&self) -> u32;

    /// Wire the microphone source into a framing stage of `frame_size` samples.
    fn connect(&mut self, frame_size: usize) -> Result<(), SessionError>;

    /// Detach the framing stage from the source.
    fn disconnect(&mut self) -> Result<(), SessionError>;

    /// Release the input context.
    fn close(&mut self) -> Result<(), SessionError>;
}

/// An audio output context with a monotonic clock.
pub trait AudioOutput {
    fn sample_rate(&self) -> u32;

    /// Seconds on the output clock. Never goes backwards.
    fn current_time(&self) -> f64;

    /// Schedule `buffer` to start exactly at `start_at` on the output clock.
    ///
    /// Implementations must eventually report completion of `handle` through
    /// [`SessionSignal::PlaybackEnded`] unless it is stopped first.
    fn schedule(&mut self, handle: HandleId, buffer: &PlaybackBuffer, start_at: f64) -> Result<(), SessionError>;

    /// Stop a scheduled chunk immediately. Fails if it already finished.
    fn stop(&mut self, handle: HandleId) -> Result<(), SessionError>;

    /// Release the output context.
    fn close(&mut self) -> Result<(), SessionError>;
}

/// Source of microphone permission and audio contexts.
pub trait DeviceProvider {
    fn acquire_microphone(&mut self) -> Result<(), SessionError>;

    fn open_input(&mut self, sample_rate: u32) -> Result<Box<dyn AudioInput>, SessionError>;

    /// Open an output context for the session identified by `epoch`.
    fn open_output(&mut self, epoch: u64, sample_rate: u32) -> Result<Box<dyn AudioOutput>, SessionError>;
}

/// Devices hosted by the browser connected to this WebSocket.
pub struct BrowserDevices {
    ui: UnboundedSender<UiEvent>,
    signals: UnboundedSender<SessionSignal>,
    microphone_granted: bool,
}

impl BrowserDevices {
    pub fn new(ui: UnboundedSender<UiEvent>, signals: UnboundedSender<SessionSignal>) -> Self {
        Self {
            ui,
            signals,
            microphone_granted: false,
        }
    }

    /// Record the permission the page obtained from `getUserMedia`.
    pub fn set_microphone_permission(&mut self, granted: bool) {
        self.microphone_granted = granted;
    }
}

impl DeviceProvider for BrowserDevices {
    fn acquire_microphone(&mut self) -> Result<(), SessionError> {
        if self.microphone_granted {
            Ok(())
        } else {
            Err(SessionError::PermissionDenied(
                "the browser did not grant microphone access".to_string(),
            ))
        }
    }

    fn open_input(&mut self, sample_rate: u32) -> Result<Box<dyn AudioInput>, SessionError> {
        if self.ui.is_closed() {
            return Err(SessionError::Device("browser connection is gone".to_string()));
        }
        Ok(Box::new(BrowserInput {
            ui: self.ui.clone(),
            sample_rate,
            frame_size: 0,
            connected: false,
        }))
    }

    fn open_output(&mut self, epoch: u64, sample_rate: u32) -> Result<Box<dyn AudioOutput>, SessionError> {
        if self.ui.is_closed() {
            return Err(SessionError::Device("browser connection is gone".to_string()));
        }
        Ok(Box::new(BrowserOutput::new(
            self.ui.clone(),
            self.signals.clone(),
            epoch,
            sample_rate,
        )))
    }
}

/// Microphone stream coming from the page as binary WebSocket frames.
pub struct BrowserInput {
    ui: UnboundedSender<UiEvent>,
    sample_rate: u32,
    frame_size: usize,
    connected: bool,
}

impl BrowserInput {
    fn send_capture(&self, enabled: bool) -> Result<(), SessionError> {
        self.ui
            .send(UiEvent::Capture {
                enabled,
                sample_rate: self.sample_rate,
                frame_size: self.frame_size,
            })
            .map_err(|_| SessionError::Device("browser connection is gone".to_string()))
    }
}

impl AudioInput for BrowserInput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn connect(&mut self, frame_size: usize) -> Result<(), SessionError> {
        self.frame_size = frame_size;
        self.send_capture(true)?;
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), SessionError> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        self.send_capture(false)
    }

    fn close(&mut self) -> Result<(), SessionError> {
        self.disconnect()
    }
}

/// Playback on the page's audio context.
///
/// The clock is seconds since this output was opened; the page maps it onto
/// its own `AudioContext` time when the first `play` message arrives.
pub struct BrowserOutput {
    ui: UnboundedSender<UiEvent>,
    signals: UnboundedSender<SessionSignal>,
    epoch: u64,
    sample_rate: u32,
    opened_at: Instant,
    timers: HashMap<HandleId, JoinHandle<()>>,
    closed: bool,
}

impl BrowserOutput {
    pub fn new(
        ui: UnboundedSender<UiEvent>,
        signals: UnboundedSender<SessionSignal>,
        epoch: u64,
        sample_rate: u32,
    ) -> Self {
        Self {
            ui,
            signals,
            epoch,
            sample_rate,
            opened_at: Instant::now(),
            timers: HashMap::new(),
            closed: false,
        }
    }
}

impl AudioOutput for BrowserOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.opened_at.elapsed().as_secs_f64()
    }

    fn schedule(&mut self, handle: HandleId, buffer: &PlaybackBuffer, start_at: f64) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Device("output context is closed".to_string()));
        }
        self.timers.retain(|_, timer| !timer.is_finished());

        let chunk = codec::samples_to_wire(&codec::interleave(buffer.planes()), buffer.sample_rate());
        self.ui
            .send(UiEvent::Play {
                handle,
                start_at,
                sample_rate: buffer.sample_rate(),
                channels: buffer.channel_count(),
                data: chunk.data,
            })
            .map_err(|_| SessionError::Device("browser connection is gone".to_string()))?;

        // Completion fires once the chunk's slot on the shared clock has elapsed
        let ends_in = (start_at + buffer.duration() - self.current_time()).max(0.0);
        let signals = self.signals.clone();
        let epoch = self.epoch;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs_f64(ends_in)).await;
            let _ = signals.send(SessionSignal::PlaybackEnded { epoch, handle });
        });
        self.timers.insert(handle, timer);

        trace!(handle, start_at, ends_in, "Scheduled playback chunk");
        Ok(())
    }

    fn stop(&mut self, handle: HandleId) -> Result<(), SessionError> {
        let timer = self
            .timers
            .remove(&handle)
            .ok_or_else(|| SessionError::Device(format!("playback handle {} already finished", handle)))?;
        timer.abort();

        self.ui
            .send(UiEvent::StopPlayback { handles: vec![handle] })
            .map_err(|_| SessionError::Device("browser connection is gone".to_string()))
    }

    fn close(&mut self) -> Result<(), SessionError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        for (handle, timer) in self.timers.drain() {
            debug!(handle, "Cancelling playback timer on close");
            timer.abort();
        }
        Ok(())
    }
}
