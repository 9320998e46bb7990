//! Messages flowing into and out of a session.
//!
//! - [`SessionSignal`]: asynchronous results delivered back to the session's
//!   event loop (remote provider events, playback completions). Each carries
//!   the epoch of the session that produced it so late arrivals from a
//!   torn-down session can be recognised and dropped.
//! - [`UiEvent`]: everything the browser needs to render: call status,
//!   transcript, captured leads, scheduled audio.

use crate::audio::playback::HandleId;
use crate::error::SessionError;
use crate::live::protocol::ServerEvent;
use crate::session::tools::{AppointmentDetails, LeadDetails};
use crate::session::transcript::TranscriptLine;
use serde::Serialize;

/// Asynchronous input to the session event loop.
#[derive(Debug)]
pub enum SessionSignal {
    /// Something happened on the remote live connection.
    Provider { epoch: u64, signal: ProviderSignal },
    /// A scheduled audio chunk finished playing.
    PlaybackEnded { epoch: u64, handle: HandleId },
}

/// Lifecycle callbacks of the remote session provider.
#[derive(Debug)]
pub enum ProviderSignal {
    /// One inbound frame, already split into events (in frame order).
    Events(Vec<ServerEvent>),
    /// The connection could not be established or broke irrecoverably.
    Failed(SessionError),
    /// The remote side closed the connection.
    Closed(Option<String>),
}

/// Server → browser messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    /// Call status. `unavailable` enables the retry / phone fallback panel.
    Status {
        state: String,
        unavailable: bool,
        message: Option<String>,
    },
    /// Full transcript snapshot, oldest line first.
    Transcript { lines: Vec<TranscriptLine> },
    LeadCaptured(LeadDetails),
    AppointmentBooked(AppointmentDetails),
    /// Start or stop streaming microphone samples to the server.
    Capture {
        enabled: bool,
        sample_rate: u32,
        frame_size: usize,
    },
    /// Play `data` (base64 PCM16) at `start_at` seconds on the session output clock.
    Play {
        handle: HandleId,
        start_at: f64,
        sample_rate: u32,
        channels: u16,
        data: String,
    },
    StopPlayback { handles: Vec<HandleId> },
    Error { code: String, message: String },
    Pong { timestamp: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::transcript::Role;

    #[test]
    fn test_ui_event_serialization() {
        let status = UiEvent::Status {
            state: "listening".to_string(),
            unavailable: false,
            message: None,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["state"], "listening");

        let lead = UiEvent::LeadCaptured(LeadDetails {
            name: "Dana".to_string(),
            contact: "555-0100".to_string(),
            issue: "Laptop won't boot".to_string(),
        });
        let json = serde_json::to_value(&lead).unwrap();
        assert_eq!(json["type"], "lead_captured");
        assert_eq!(json["contact"], "555-0100");
    }

    #[test]
    fn test_transcript_event_shape() {
        let event = UiEvent::Transcript {
            lines: vec![TranscriptLine::new(Role::Assistant, "Hello")],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["lines"][0]["role"], "assistant");
        assert_eq!(json["lines"][0]["text"], "Hello");
    }
}
