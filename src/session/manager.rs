//! # Session Manager
//!
//! The state machine behind one browser's call button.
//!
//! ```text
//! Idle --start--> Connecting --setupComplete--> Active --stop--> (Closing) --> Idle
//!                     |                           |
//!                     +------ error / close ------+--> Unavailable --retry/dismiss--> Idle
//! ```
//!
//! ## Ownership:
//! At most one [`LiveSession`] exists at a time and it is owned here, together
//! with the capture pipeline and playback scheduler that belong to it. Tearing
//! the session down takes it out of `self.session` first, so anything that
//! arrives afterwards for that session (late provider frames, playback
//! completions) fails the epoch check and is dropped.
//!
//! ## Outbound ordering:
//! Messages produced before the service confirms the session (a typed message
//! that triggered the call, for instance) wait in a queue and are flushed in
//! order on `setupComplete`. Microphone audio is not queued: capture is only
//! wired up once the session is active.

use crate::audio::capture::{CaptureHandle, CapturePipeline};
use crate::audio::playback::PlaybackScheduler;
use crate::config::AppConfig;
use crate::device::{AudioInput, DeviceProvider};
use crate::error::SessionError;
use crate::live::protocol::{ClientMessage, LiveSetup, ServerEvent};
use crate::live::SessionProvider;
use crate::session::events::{ProviderSignal, SessionSignal, UiEvent};
use crate::session::prompt;
use crate::session::tools::{ToolCallRequest, ToolDispatcher, ToolEffect};
use crate::session::transcript::{Role, TranscriptAggregator};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Closing,
    Unavailable,
}

impl SessionState {
    /// Name shown to the browser.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Active => "listening",
            SessionState::Closing => "closing",
            SessionState::Unavailable => "unavailable",
        }
    }
}

/// Everything a session needs that comes from configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub setup: LiveSetup,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub frame_size: usize,
    pub channels: u16,
    /// Offered to the user when the assistant is unavailable.
    pub fallback_phone: String,
}

impl SessionConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            setup: prompt::build_setup(&config.live, &config.business),
            input_sample_rate: config.audio.input_sample_rate,
            output_sample_rate: config.audio.output_sample_rate,
            frame_size: config.audio.frame_size,
            channels: config.audio.channels,
            fallback_phone: config.business.phone.clone(),
        }
    }
}

/// One live conversation. Never reused once torn down.
struct LiveSession {
    epoch: u64,
    started_at: DateTime<Utc>,
    /// Outbound messages waiting for the session to open.
    pending: VecDeque<ClientMessage>,
    /// Microphone context, until capture takes it over on open.
    input: Option<Box<dyn AudioInput>>,
    capture: Option<CaptureHandle>,
    playback: PlaybackScheduler,
}

pub struct SessionManager<P: SessionProvider, D: DeviceProvider> {
    config: SessionConfig,
    provider: P,
    devices: D,
    tools: ToolDispatcher,
    ui: UnboundedSender<UiEvent>,
    state: SessionState,
    session: Option<LiveSession>,
    transcript: TranscriptAggregator,
    next_epoch: u64,
}

impl<P: SessionProvider, D: DeviceProvider> SessionManager<P, D> {
    pub fn new(
        config: SessionConfig,
        provider: P,
        devices: D,
        tools: ToolDispatcher,
        ui: UnboundedSender<UiEvent>,
    ) -> Self {
        Self {
            config,
            provider,
            devices,
            tools,
            ui,
            state: SessionState::Idle,
            session: None,
            transcript: TranscriptAggregator::new(),
            next_epoch: 1,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether a call is connecting or running.
    pub fn in_call(&self) -> bool {
        self.session.is_some()
    }

    pub fn transcript(&self) -> &TranscriptAggregator {
        &self.transcript
    }

    pub fn devices_mut(&mut self) -> &mut D {
        &mut self.devices
    }

    /// The call button.
    ///
    /// Starts a call from `Idle`; hangs up when a call is connecting or active.
    /// Never opens a second session.
    pub fn start(&mut self) {
        match self.state {
            SessionState::Connecting | SessionState::Active => {
                info!("Start requested during a call; hanging up");
                self.stop();
            }
            SessionState::Unavailable => {
                self.dismiss();
                self.begin(None);
            }
            SessionState::Idle => self.begin(None),
            SessionState::Closing => debug!("Ignoring start while closing"),
        }
    }

    /// Send a typed message, starting a call first if there is none.
    pub fn send_text(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        match self.state {
            SessionState::Idle => self.begin(Some(text.to_string())),
            SessionState::Unavailable => {
                self.dismiss();
                self.begin(Some(text.to_string()));
            }
            SessionState::Connecting => {
                if let Some(session) = self.session.as_mut() {
                    session.pending.push_back(ClientMessage::text(text));
                    debug!(queued = session.pending.len(), "Queued text until the session opens");
                }
                self.transcript.push_message(Role::User, text);
                self.publish_transcript();
            }
            SessionState::Active => {
                self.transcript.push_message(Role::User, text);
                self.publish_transcript();
                self.send_or_log(ClientMessage::text(text));
            }
            SessionState::Closing => debug!("Dropping text sent while closing"),
        }
    }

    /// User-initiated retry from the unavailable panel.
    pub fn retry(&mut self) {
        match self.state {
            SessionState::Unavailable | SessionState::Idle => {
                self.dismiss();
                self.begin(None);
            }
            _ => debug!(state = self.state.as_str(), "Ignoring retry"),
        }
    }

    /// Close the unavailable panel.
    pub fn dismiss(&mut self) {
        if self.state == SessionState::Unavailable {
            self.state = SessionState::Idle;
            self.publish_status(None);
        }
    }

    /// Reject a start attempt before anything is opened (e.g. no capacity).
    pub fn refuse(&mut self, err: SessionError) {
        self.dismiss();
        self.fail(err);
    }

    /// End the call and release everything it held.
    ///
    /// Safe from any state and safe to repeat; always ends in `Idle`.
    pub fn stop(&mut self) {
        let previous = self.state;
        if self.session.is_some() {
            self.state = SessionState::Closing;
        }
        self.teardown();
        self.state = SessionState::Idle;

        if previous != SessionState::Idle {
            info!(from = previous.as_str(), "Call ended");
            self.publish_status(None);
        }
    }

    /// Microphone samples from the input device.
    ///
    /// Dropped unless the session is active. Returns how many frames went out.
    pub fn on_microphone_samples(&mut self, samples: &[f32]) -> usize {
        if self.state != SessionState::Active {
            trace!(samples = samples.len(), "Dropping microphone samples outside an active call");
            return 0;
        }

        let Some(capture) = self.session.as_mut().and_then(|s| s.capture.as_mut()) else {
            return 0;
        };
        let provider = &mut self.provider;
        capture.push_samples(samples, |chunk| provider.send(ClientMessage::audio(chunk)))
    }

    /// Asynchronous results for the current session.
    pub fn handle_signal(&mut self, signal: SessionSignal) {
        let epoch = match &signal {
            SessionSignal::Provider { epoch, .. } | SessionSignal::PlaybackEnded { epoch, .. } => *epoch,
        };
        if self.session.as_ref().map(|s| s.epoch) != Some(epoch) {
            trace!(epoch, "Dropping signal for a session that no longer exists");
            return;
        }

        match signal {
            SessionSignal::PlaybackEnded { handle, .. } => {
                if let Some(session) = self.session.as_mut() {
                    session.playback.complete(handle);
                }
            }
            SessionSignal::Provider { signal, .. } => match signal {
                ProviderSignal::Events(events) => {
                    for event in events {
                        self.handle_event(event);
                        // An event may have ended the session; the rest of the frame is moot
                        if self.session.is_none() {
                            break;
                        }
                    }
                }
                ProviderSignal::Failed(err) => self.fail(err),
                ProviderSignal::Closed(reason) => {
                    info!(reason = ?reason, "Live service closed the session");
                    self.fail(SessionError::ProviderClose(reason));
                }
            },
        }
    }

    fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::SetupComplete => self.on_open(),
            ServerEvent::Error(message) => {
                self.fail(SessionError::Provider(message));
            }
            ServerEvent::GoAway { time_left } => {
                warn!(time_left = ?time_left, "Live service is about to drop the connection");
            }
            ServerEvent::ToolCallCancellation(ids) => {
                info!(?ids, "Model cancelled tool calls");
            }
            _ if self.state != SessionState::Active => {
                debug!(state = self.state.as_str(), "Ignoring live event before the session opened");
            }
            ServerEvent::Audio(chunk) => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                match session.playback.enqueue(&chunk) {
                    Ok(_) => {}
                    Err(err) if err.is_fatal() => self.fail(err),
                    Err(err) => warn!("Skipping inbound audio chunk: {}", err),
                }
            }
            ServerEvent::MalformedAudio(reason) => {
                warn!("Skipping inbound audio chunk: {}", reason);
            }
            ServerEvent::Interrupted => {
                if let Some(session) = self.session.as_mut() {
                    session.playback.interrupt();
                }
            }
            ServerEvent::OutputTranscript(text) => {
                if self.transcript.append_fragment(Role::Assistant, &text) {
                    self.publish_transcript();
                }
            }
            ServerEvent::InputTranscript(text) => {
                if self.transcript.append_fragment(Role::User, &text) {
                    self.publish_transcript();
                }
            }
            ServerEvent::TurnComplete => self.transcript.complete_turn(),
            ServerEvent::ToolCall(calls) => self.dispatch_tools(&calls),
        }
    }

    fn on_open(&mut self) {
        if self.state != SessionState::Connecting {
            debug!(state = self.state.as_str(), "Ignoring duplicate setupComplete");
            return;
        }

        let frame_size = self.config.frame_size;
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let capture = match session.input.take() {
            Some(input) => CapturePipeline::start(input, frame_size),
            None => Err(SessionError::Device("microphone input already released".to_string())),
        };
        match capture {
            Ok(capture) => session.capture = Some(capture),
            Err(err) => {
                self.fail(err);
                return;
            }
        }

        let pending: Vec<ClientMessage> = session.pending.drain(..).collect();
        let epoch = session.epoch;
        self.state = SessionState::Active;
        info!(epoch, flushed = pending.len(), "Live session open");

        for message in pending {
            self.send_or_log(message);
        }
        self.publish_status(None);
    }

    fn dispatch_tools(&mut self, calls: &[ToolCallRequest]) {
        let mut responses = Vec::with_capacity(calls.len());

        for call in calls {
            let outcome = self.tools.invoke(call);
            match outcome.effect {
                ToolEffect::LeadCaptured(lead) => self.notify(UiEvent::LeadCaptured(lead)),
                ToolEffect::AppointmentBooked(appointment) => {
                    self.notify(UiEvent::AppointmentBooked(appointment))
                }
                ToolEffect::None => {}
            }
            responses.push(outcome.response);
        }

        if !responses.is_empty() {
            self.send_or_log(ClientMessage::tool_response(responses));
        }
    }

    fn begin(&mut self, text: Option<String>) {
        if self.session.is_some() {
            // Unreachable through the public transitions; never layer a second session
            warn!("Refusing to open a second session");
            return;
        }

        let epoch = self.next_epoch;
        self.next_epoch += 1;
        self.state = SessionState::Connecting;
        info!(epoch, "Starting live session");
        self.publish_status(None);

        if let Some(text) = &text {
            self.transcript.push_message(Role::User, text);
            self.publish_transcript();
        }

        if let Err(err) = self.open_session(epoch, text) {
            self.fail(err);
        }
    }

    fn open_session(&mut self, epoch: u64, text: Option<String>) -> Result<(), SessionError> {
        self.devices.acquire_microphone()?;

        let mut input = self.devices.open_input(self.config.input_sample_rate)?;
        let output = match self.devices.open_output(epoch, self.config.output_sample_rate) {
            Ok(output) => output,
            Err(err) => {
                if let Err(close_err) = input.close() {
                    debug!("Ignoring input close failure: {}", close_err);
                }
                return Err(err);
            }
        };

        let mut pending = VecDeque::new();
        if let Some(text) = text {
            pending.push_back(ClientMessage::text(text));
        }

        self.session = Some(LiveSession {
            epoch,
            started_at: Utc::now(),
            pending,
            input: Some(input),
            capture: None,
            playback: PlaybackScheduler::new(output, self.config.channels),
        });

        self.provider
            .open(epoch, &self.config.setup)
            .map_err(|err| match err {
                SessionError::ConnectionFailure(_) => err,
                other => SessionError::ConnectionFailure(other.to_string()),
            })
    }

    /// Unrecoverable error: tear down and show the unavailable panel.
    fn fail(&mut self, err: SessionError) {
        error!(code = err.code(), "Live session failed: {}", err);
        self.notify(UiEvent::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        });

        self.teardown();
        self.state = SessionState::Unavailable;
        let message = format!(
            "The assistant is unavailable right now. Please call us at {}.",
            self.config.fallback_phone
        );
        self.publish_status(Some(message));
    }

    /// Release everything the current session holds. Never fails.
    fn teardown(&mut self) {
        self.transcript.reset_fragments();

        let Some(mut session) = self.session.take() else {
            return;
        };

        if let Err(err) = self.provider.close() {
            debug!("Ignoring live session close failure: {}", err);
        }
        let (frames_sent, frames_failed) = session
            .capture
            .as_ref()
            .map(|capture| (capture.frames_sent(), capture.frames_failed()))
            .unwrap_or((0, 0));
        if let Some(mut capture) = session.capture.take() {
            capture.stop();
        }
        let playing = session.playback.active_count();
        if let Some(mut input) = session.input.take() {
            if let Err(err) = input.close() {
                debug!("Ignoring input close failure: {}", err);
            }
        }
        session.playback.shutdown();

        let duration = Utc::now().signed_duration_since(session.started_at);
        info!(
            epoch = session.epoch,
            duration_ms = duration.num_milliseconds(),
            dropped = session.pending.len(),
            frames_sent,
            frames_failed,
            playing,
            "Live session torn down"
        );
    }

    fn send_or_log(&mut self, message: ClientMessage) {
        let kind = message.kind();
        if let Err(err) = self.provider.send(message) {
            warn!(kind, "Failed to send to live service: {}", err);
        }
    }

    fn publish_status(&self, message: Option<String>) {
        self.notify(UiEvent::Status {
            state: self.state.as_str().to_string(),
            unavailable: self.state == SessionState::Unavailable,
            message,
        });
    }

    fn publish_transcript(&self) {
        self.notify(UiEvent::Transcript {
            lines: self.transcript.lines().to_vec(),
        });
    }

    fn notify(&self, event: UiEvent) {
        if self.ui.send(event).is_err() {
            trace!("Browser is gone; dropping UI event");
        }
    }
}

impl<P: SessionProvider, D: DeviceProvider> Drop for SessionManager<P, D> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::tests::{FakeInput, InputLog};
    use crate::audio::codec::samples_to_wire;
    use crate::audio::playback::tests::{FakeOutput, OutputLog};
    use crate::device::AudioOutput;
    use crate::session::tools::ToolCallRequest;
    use serde_json::json;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    #[derive(Default)]
    struct ProviderLog {
        opens: RefCell<Vec<u64>>,
        sent: RefCell<Vec<ClientMessage>>,
        closes: Cell<usize>,
    }

    struct FakeProvider {
        log: Rc<ProviderLog>,
        fail_open: bool,
        fail_close: bool,
    }

    impl SessionProvider for FakeProvider {
        fn open(&mut self, epoch: u64, _setup: &LiveSetup) -> Result<(), SessionError> {
            if self.fail_open {
                return Err(SessionError::ConnectionFailure("handshake rejected".to_string()));
            }
            self.log.opens.borrow_mut().push(epoch);
            Ok(())
        }

        fn send(&mut self, message: ClientMessage) -> Result<(), SessionError> {
            self.log.sent.borrow_mut().push(message);
            Ok(())
        }

        fn close(&mut self) -> Result<(), SessionError> {
            self.log.closes.set(self.log.closes.get() + 1);
            if self.fail_close {
                return Err(SessionError::Transport("already closed".to_string()));
            }
            Ok(())
        }
    }

    struct FakeDevices {
        microphone: bool,
        input_log: Rc<InputLog>,
        output_log: Rc<OutputLog>,
    }

    impl DeviceProvider for FakeDevices {
        fn acquire_microphone(&mut self) -> Result<(), SessionError> {
            if self.microphone {
                Ok(())
            } else {
                Err(SessionError::PermissionDenied("denied".to_string()))
            }
        }

        fn open_input(&mut self, _sample_rate: u32) -> Result<Box<dyn AudioInput>, SessionError> {
            Ok(Box::new(FakeInput {
                log: self.input_log.clone(),
                fail_connect: false,
            }))
        }

        fn open_output(&mut self, _epoch: u64, sample_rate: u32) -> Result<Box<dyn AudioOutput>, SessionError> {
            Ok(Box::new(FakeOutput {
                log: self.output_log.clone(),
                sample_rate,
            }))
        }
    }

    struct Harness {
        manager: SessionManager<FakeProvider, FakeDevices>,
        provider: Rc<ProviderLog>,
        input: Rc<InputLog>,
        output: Rc<OutputLog>,
        ui: UnboundedReceiver<UiEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let mut config = SessionConfig::from_app(&AppConfig::default());
            config.frame_size = 4;

            let provider = Rc::new(ProviderLog::default());
            let input = Rc::new(InputLog::default());
            let output = Rc::new(OutputLog::default());
            let (ui_tx, ui) = unbounded_channel();

            let manager = SessionManager::new(
                config,
                FakeProvider {
                    log: provider.clone(),
                    fail_open: false,
                    fail_close: false,
                },
                FakeDevices {
                    microphone: true,
                    input_log: input.clone(),
                    output_log: output.clone(),
                },
                ToolDispatcher::default(),
                ui_tx,
            );

            Self {
                manager,
                provider,
                input,
                output,
                ui,
            }
        }

        fn events(&self, epoch: u64, events: Vec<ServerEvent>) -> SessionSignal {
            SessionSignal::Provider {
                epoch,
                signal: ProviderSignal::Events(events),
            }
        }

        fn open(&mut self) -> u64 {
            self.manager.start();
            let epoch = *self.provider.opens.borrow().last().unwrap();
            let signal = self.events(epoch, vec![ServerEvent::SetupComplete]);
            self.manager.handle_signal(signal);
            assert_eq!(self.manager.state(), SessionState::Active);
            epoch
        }

        fn deliver(&mut self, epoch: u64, events: Vec<ServerEvent>) {
            let signal = self.events(epoch, events);
            self.manager.handle_signal(signal);
        }

        fn text_messages(&self) -> Vec<ClientMessage> {
            self.provider
                .sent
                .borrow()
                .iter()
                .filter(|m| matches!(m, ClientMessage::ClientContent(_)))
                .cloned()
                .collect()
        }

        fn drain_ui(&mut self) -> Vec<UiEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.ui.try_recv() {
                events.push(event);
            }
            events
        }
    }

    #[test]
    fn test_start_connects_then_listens() {
        let mut h = Harness::new();
        h.manager.start();
        assert_eq!(h.manager.state(), SessionState::Connecting);
        assert_eq!(*h.provider.opens.borrow(), vec![1]);
        assert!(h.input.connects.borrow().is_empty());

        h.deliver(1, vec![ServerEvent::SetupComplete]);
        assert_eq!(h.manager.state(), SessionState::Active);
        assert_eq!(*h.input.connects.borrow(), vec![4]);

        let statuses: Vec<String> = h
            .drain_ui()
            .into_iter()
            .filter_map(|e| match e {
                UiEvent::Status { state, .. } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(statuses, vec!["connecting", "listening"]);
    }

    #[test]
    fn test_stop_twice_is_idle() {
        let mut h = Harness::new();
        h.open();

        h.manager.stop();
        h.manager.stop();

        assert_eq!(h.manager.state(), SessionState::Idle);
        assert_eq!(h.provider.closes.get(), 1);
        assert_eq!(h.output.closes.get(), 1);
        assert_eq!(*h.input.closes.borrow(), 1);
        assert!(!h.manager.in_call());
    }

    #[test]
    fn test_stop_from_idle_is_noop() {
        let mut h = Harness::new();
        h.manager.stop();
        assert_eq!(h.manager.state(), SessionState::Idle);
        assert_eq!(h.provider.closes.get(), 0);
        assert!(h.drain_ui().is_empty());
    }

    #[test]
    fn test_start_while_active_hangs_up() {
        let mut h = Harness::new();
        h.open();

        h.manager.start();
        assert_eq!(h.manager.state(), SessionState::Idle);
        assert_eq!(h.provider.opens.borrow().len(), 1);
    }

    #[test]
    fn test_start_while_connecting_hangs_up() {
        let mut h = Harness::new();
        h.manager.start();
        h.manager.start();
        assert_eq!(h.manager.state(), SessionState::Idle);
        assert_eq!(h.provider.opens.borrow().len(), 1);
    }

    #[test]
    fn test_text_while_connecting_delivered_once() {
        let mut h = Harness::new();
        h.manager.start();
        h.manager.send_text("Do you replace batteries?");
        assert!(h.text_messages().is_empty());

        h.deliver(1, vec![ServerEvent::SetupComplete]);
        assert_eq!(
            h.text_messages(),
            vec![ClientMessage::text("Do you replace batteries?")]
        );

        // A duplicate setupComplete must not flush again
        h.deliver(1, vec![ServerEvent::SetupComplete]);
        assert_eq!(h.text_messages().len(), 1);
    }

    #[test]
    fn test_text_from_idle_starts_call() {
        let mut h = Harness::new();
        h.manager.send_text("Hi there");
        assert_eq!(h.manager.state(), SessionState::Connecting);
        assert_eq!(h.manager.transcript().lines().len(), 1);

        h.deliver(1, vec![ServerEvent::SetupComplete]);
        assert_eq!(h.text_messages(), vec![ClientMessage::text("Hi there")]);
    }

    #[test]
    fn test_text_while_active_is_sent_immediately() {
        let mut h = Harness::new();
        h.open();
        h.manager.send_text("  What are your hours?  ");
        h.manager.send_text("   ");
        assert_eq!(h.text_messages(), vec![ClientMessage::text("What are your hours?")]);
    }

    #[test]
    fn test_unknown_tool_keeps_session_active() {
        let mut h = Harness::new();
        let epoch = h.open();

        h.deliver(
            epoch,
            vec![ServerEvent::ToolCall(vec![ToolCallRequest {
                id: "fc-7".to_string(),
                name: "launch_rocket".to_string(),
                args: json!({}),
            }])],
        );

        assert_eq!(h.manager.state(), SessionState::Active);
        let sent = h.provider.sent.borrow();
        let value = serde_json::to_value(sent.last().unwrap()).unwrap();
        assert_eq!(value["toolResponse"]["functionResponses"][0]["id"], "fc-7");
        assert_eq!(
            value["toolResponse"]["functionResponses"][0]["response"],
            json!({"result": "ok"})
        );
    }

    #[test]
    fn test_lead_tool_notifies_browser() {
        let mut h = Harness::new();
        let epoch = h.open();
        h.drain_ui();

        h.deliver(
            epoch,
            vec![ServerEvent::ToolCall(vec![ToolCallRequest {
                id: "fc-1".to_string(),
                name: "record_lead".to_string(),
                args: json!({"name": "Sam", "contact": "sam@example.com", "issue": "fan noise"}),
            }])],
        );

        let events = h.drain_ui();
        assert!(events.iter().any(|e| matches!(e, UiEvent::LeadCaptured(lead) if lead.name == "Sam")));
    }

    #[test]
    fn test_audio_and_barge_in() {
        let mut h = Harness::new();
        let epoch = h.open();
        h.output.now.set(3.0);

        let chunk = samples_to_wire(&vec![0.0; 2400], 24000);
        h.deliver(
            epoch,
            vec![ServerEvent::Audio(chunk.clone()), ServerEvent::Audio(chunk.clone())],
        );
        {
            let scheduled = h.output.scheduled.borrow();
            assert_eq!(scheduled.len(), 2);
            assert_eq!(scheduled[0].1, 3.0);
            assert!((scheduled[1].1 - 3.1).abs() < 1e-9);
        }

        h.deliver(epoch, vec![ServerEvent::Interrupted]);
        assert_eq!(h.output.stopped.borrow().len(), 2);

        h.output.now.set(3.05);
        h.deliver(epoch, vec![ServerEvent::Audio(chunk)]);
        assert_eq!(h.output.scheduled.borrow()[2].1, 3.05);
    }

    #[test]
    fn test_malformed_audio_is_skipped() {
        let mut h = Harness::new();
        let epoch = h.open();

        h.deliver(
            epoch,
            vec![
                ServerEvent::MalformedAudio("no data".to_string()),
                ServerEvent::Audio(crate::audio::codec::EncodedChunk::new("@@@", "audio/pcm;rate=24000")),
                ServerEvent::OutputTranscript("Still here".to_string()),
            ],
        );

        assert_eq!(h.manager.state(), SessionState::Active);
        assert_eq!(h.manager.transcript().lines()[0].text, "Still here");
    }

    #[test]
    fn test_transcript_merges_until_turn_complete() {
        let mut h = Harness::new();
        let epoch = h.open();

        h.deliver(epoch, vec![ServerEvent::OutputTranscript("Hel".to_string())]);
        h.deliver(
            epoch,
            vec![ServerEvent::OutputTranscript("lo".to_string()), ServerEvent::TurnComplete],
        );
        h.deliver(epoch, vec![ServerEvent::OutputTranscript("Bye".to_string())]);

        let lines: Vec<&str> = h
            .manager
            .transcript()
            .lines()
            .iter()
            .map(|l| l.text.as_str())
            .collect();
        assert_eq!(lines, vec!["Hello", "Bye"]);
    }

    #[test]
    fn test_microphone_frames_only_flow_when_active() {
        let mut h = Harness::new();
        h.manager.start();
        assert_eq!(h.manager.on_microphone_samples(&[0.1; 8]), 0);

        h.deliver(1, vec![ServerEvent::SetupComplete]);
        assert_eq!(h.manager.on_microphone_samples(&[0.1; 8]), 2);

        let audio = h
            .provider
            .sent
            .borrow()
            .iter()
            .filter(|m| matches!(m, ClientMessage::RealtimeInput(_)))
            .count();
        assert_eq!(audio, 2);
    }

    #[test]
    fn test_stale_signals_are_ignored() {
        let mut h = Harness::new();
        let epoch = h.open();
        h.manager.stop();

        h.deliver(epoch, vec![ServerEvent::OutputTranscript("late".to_string())]);
        h.manager.handle_signal(SessionSignal::Provider {
            epoch,
            signal: ProviderSignal::Closed(None),
        });

        assert_eq!(h.manager.state(), SessionState::Idle);
        assert!(h.manager.transcript().is_empty());
    }

    #[test]
    fn test_permission_denied_then_retry() {
        let mut h = Harness::new();
        h.manager.devices_mut().microphone = false;

        h.manager.start();
        assert_eq!(h.manager.state(), SessionState::Unavailable);
        assert!(h.provider.opens.borrow().is_empty());
        let events = h.drain_ui();
        assert!(events.iter().any(|e| matches!(
            e,
            UiEvent::Error { code, .. } if code == "permission_denied"
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            UiEvent::Status { unavailable: true, message: Some(m), .. } if m.contains("(555) 013-2040")
        )));

        h.manager.devices_mut().microphone = true;
        h.manager.retry();
        assert_eq!(h.manager.state(), SessionState::Connecting);
        assert_eq!(*h.provider.opens.borrow(), vec![2]);
    }

    #[test]
    fn test_connection_failure_is_unavailable() {
        let mut h = Harness::new();
        h.manager.provider.fail_open = true;

        h.manager.start();
        assert_eq!(h.manager.state(), SessionState::Unavailable);
        // Devices opened for the attempt are released
        assert_eq!(h.output.closes.get(), 1);
        assert_eq!(*h.input.closes.borrow(), 1);

        h.manager.dismiss();
        assert_eq!(h.manager.state(), SessionState::Idle);
    }

    #[test]
    fn test_provider_error_mid_call() {
        let mut h = Harness::new();
        let epoch = h.open();

        h.deliver(
            epoch,
            vec![
                ServerEvent::Error("quota exceeded".to_string()),
                ServerEvent::OutputTranscript("never shown".to_string()),
            ],
        );

        assert_eq!(h.manager.state(), SessionState::Unavailable);
        assert!(!h.manager.in_call());
        assert!(h.manager.transcript().is_empty());
        assert_eq!(h.provider.closes.get(), 1);
    }

    #[test]
    fn test_provider_close_and_failure_signals() {
        let mut h = Harness::new();
        let epoch = h.open();
        h.manager.handle_signal(SessionSignal::Provider {
            epoch,
            signal: ProviderSignal::Closed(Some("session expired".to_string())),
        });
        assert_eq!(h.manager.state(), SessionState::Unavailable);

        h.manager.start();
        let epoch = *h.provider.opens.borrow().last().unwrap();
        h.manager.handle_signal(SessionSignal::Provider {
            epoch,
            signal: ProviderSignal::Failed(SessionError::ConnectionFailure("dns".to_string())),
        });
        assert_eq!(h.manager.state(), SessionState::Unavailable);

        h.manager.stop();
        assert_eq!(h.manager.state(), SessionState::Idle);
    }

    #[test]
    fn test_close_errors_are_swallowed() {
        let mut h = Harness::new();
        h.manager.provider.fail_close = true;
        h.open();

        h.manager.stop();
        assert_eq!(h.manager.state(), SessionState::Idle);
    }

    #[test]
    fn test_playback_completion_signal() {
        let mut h = Harness::new();
        let epoch = h.open();

        h.deliver(epoch, vec![ServerEvent::Audio(samples_to_wire(&[0.0; 240], 24000))]);
        let handle = h.output.scheduled.borrow()[0].0;
        h.manager
            .handle_signal(SessionSignal::PlaybackEnded { epoch, handle });

        // Nothing left to stop on barge-in
        h.deliver(epoch, vec![ServerEvent::Interrupted]);
        assert!(h.output.stopped.borrow().is_empty());
    }

    #[test]
    fn test_refuse_marks_unavailable() {
        let mut h = Harness::new();
        h.manager
            .refuse(SessionError::ConnectionFailure("all lines busy".to_string()));
        assert_eq!(h.manager.state(), SessionState::Unavailable);
        assert!(h.provider.opens.borrow().is_empty());
    }
}
