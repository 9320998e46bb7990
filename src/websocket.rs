//! # Assistant WebSocket Handler
//!
//! Each browser tab connects to `/ws/assistant`; the connection is one actix
//! actor that owns exactly one [`SessionManager`]. The actor is the session's
//! event loop: browser commands, microphone frames, live-service signals and
//! playback completions all arrive as actor messages and are handled one at a
//! time, to completion.
//!
//! ## WebSocket Protocol:
//! - **Client → Server (text)**: JSON commands tagged by `type`
//!   (`start_call`, `end_call`, `send_text`, `retry`, `dismiss`, `ping`)
//! - **Client → Server (binary)**: microphone samples, 32-bit float little-endian
//! - **Server → Client**: JSON [`UiEvent`]s (`status`, `transcript`, `play`, ...)
//!
//! ## Message Flow:
//! ```text
//! browser ──ws──▶ AssistantWebSocket ──▶ SessionManager ──▶ LiveClient task ──▶ live API
//!    ▲                 │   ▲                   │
//!    └──── UiEvent ────┘   └── SessionSignal ──┘ (provider events, playback timers)
//! ```

use crate::device::BrowserDevices;
use crate::error::SessionError;
use crate::live::client::LiveClient;
use crate::session::events::{SessionSignal, UiEvent};
use crate::session::manager::{SessionConfig, SessionManager};
use crate::session::tools::{ToolDispatcher, ToolHook};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use byteorder::{ByteOrder, LittleEndian};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

/// How often the server pings the browser.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
/// Drop the connection after this long without any traffic from the browser.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(45);

/// Commands sent by the browser.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrowserCommand {
    /// The call button. Starts a call, or hangs up if one is running.
    StartCall {
        #[serde(default)]
        microphone: bool,
    },
    EndCall,
    SendText {
        text: String,
        /// Permission state, when the page already knows it
        #[serde(default)]
        microphone: Option<bool>,
    },
    Retry {
        #[serde(default)]
        microphone: bool,
    },
    Dismiss,
    Ping {
        timestamp: u64,
    },
}

/// Decode a binary frame of little-endian f32 microphone samples.
pub fn decode_microphone_frame(data: &[u8]) -> Result<Vec<f32>, SessionError> {
    if data.len() % 4 != 0 {
        return Err(SessionError::Decode(format!(
            "microphone frame of {} bytes is not a whole number of f32 samples",
            data.len()
        )));
    }
    let mut samples = vec![0.0f32; data.len() / 4];
    LittleEndian::read_f32_into(data, &mut samples);
    Ok(samples)
}

/// WebSocket actor for one browser tab.
pub struct AssistantWebSocket {
    state: web::Data<AppState>,
    manager: SessionManager<LiveClient, BrowserDevices>,
    /// Handed to the context as streams once the actor starts.
    ui_events: Option<UnboundedReceiver<UiEvent>>,
    signals: Option<UnboundedReceiver<SessionSignal>>,
    /// Whether this connection currently counts against the call cap.
    holds_slot: bool,
    last_heartbeat: Instant,
}

impl AssistantWebSocket {
    pub fn new(state: web::Data<AppState>) -> Self {
        let config = state.get_config();
        let (ui_tx, ui_rx) = unbounded_channel();
        let (signal_tx, signal_rx) = unbounded_channel();

        let devices = BrowserDevices::new(ui_tx.clone(), signal_tx.clone());
        let provider = LiveClient::new(config.live.endpoint.clone(), config.live.api_key.clone(), signal_tx);
        let hook: Arc<dyn ToolHook> = state.ledger.clone();

        let manager = SessionManager::new(
            SessionConfig::from_app(&config),
            provider,
            devices,
            ToolDispatcher::new(Some(hook)),
            ui_tx,
        );

        Self {
            state,
            manager,
            ui_events: Some(ui_rx),
            signals: Some(signal_rx),
            holds_slot: false,
            last_heartbeat: Instant::now(),
        }
    }

    fn handle_command(&mut self, command: BrowserCommand, ctx: &mut ws::WebsocketContext<Self>) {
        debug!(?command, "Browser command");
        match command {
            BrowserCommand::StartCall { microphone } => {
                self.manager.devices_mut().set_microphone_permission(microphone);
                if self.manager.in_call() || self.reserve_slot() {
                    self.manager.start();
                }
            }
            BrowserCommand::EndCall => self.manager.stop(),
            BrowserCommand::SendText { text, microphone } => {
                if let Some(granted) = microphone {
                    self.manager.devices_mut().set_microphone_permission(granted);
                }
                if self.manager.in_call() || self.reserve_slot() {
                    self.manager.send_text(&text);
                }
            }
            BrowserCommand::Retry { microphone } => {
                self.manager.devices_mut().set_microphone_permission(microphone);
                if self.manager.in_call() || self.reserve_slot() {
                    self.manager.retry();
                }
            }
            BrowserCommand::Dismiss => self.manager.dismiss(),
            BrowserCommand::Ping { timestamp } => self.send_event(ctx, &UiEvent::Pong { timestamp }),
        }
        self.sync_slot();
    }

    /// Claim a call slot before a call can start; refuse the call when full.
    fn reserve_slot(&mut self) -> bool {
        if self.holds_slot {
            return true;
        }

        let max = self.state.get_config().performance.max_concurrent_sessions;
        if self.state.try_acquire_session(max) {
            self.holds_slot = true;
            true
        } else {
            warn!(max, "All call slots are busy");
            self.manager.refuse(SessionError::ConnectionFailure(format!(
                "all {} lines are busy",
                max
            )));
            false
        }
    }

    /// Release the slot once the call is over.
    fn sync_slot(&mut self) {
        if self.holds_slot && !self.manager.in_call() {
            self.state.release_session();
            self.holds_slot = false;
        }
    }

    fn send_event(&self, ctx: &mut ws::WebsocketContext<Self>, event: &UiEvent) {
        match serde_json::to_string(event) {
            Ok(json) => ctx.text(json),
            Err(err) => error!("Failed to encode browser event: {}", err),
        }
    }
}

impl Actor for AssistantWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Assistant connection started");

        if let Some(rx) = self.ui_events.take() {
            ctx.add_stream(UnboundedReceiverStream::new(rx));
        }
        if let Some(rx) = self.signals.take() {
            ctx.add_stream(UnboundedReceiverStream::new(rx));
        }

        self.send_event(
            ctx,
            &UiEvent::Status {
                state: self.manager.state().as_str().to_string(),
                unavailable: false,
                message: None,
            },
        );

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("Assistant connection heartbeat timeout, closing");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.manager.stop();
        self.sync_slot();
        info!(
            transcript_lines = self.manager.transcript().lines().len(),
            "Assistant connection stopped"
        );
    }
}

/// Browser traffic.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for AssistantWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                match serde_json::from_str::<BrowserCommand>(&text) {
                    Ok(command) => self.handle_command(command, ctx),
                    Err(err) => {
                        warn!("Invalid browser command: {}", err);
                        self.send_event(
                            ctx,
                            &UiEvent::Error {
                                code: "invalid_command".to_string(),
                                message: format!("Invalid command: {}", err),
                            },
                        );
                    }
                }
            }
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                match decode_microphone_frame(&data) {
                    Ok(samples) => {
                        self.manager.on_microphone_samples(&samples);
                    }
                    Err(err) => debug!("Dropping microphone frame: {}", err),
                }
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("Assistant WebSocket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// Events for the browser produced by the session.
impl StreamHandler<UiEvent> for AssistantWebSocket {
    fn handle(&mut self, event: UiEvent, ctx: &mut Self::Context) {
        self.send_event(ctx, &event);
    }

    // The actor holds a sender itself, so this stream only ends with the actor
    fn finished(&mut self, _ctx: &mut Self::Context) {}
}

/// Provider events and playback completions.
impl StreamHandler<SessionSignal> for AssistantWebSocket {
    fn handle(&mut self, signal: SessionSignal, _ctx: &mut Self::Context) {
        self.manager.handle_signal(signal);
        self.sync_slot();
    }

    fn finished(&mut self, _ctx: &mut Self::Context) {}
}

/// WebSocket endpoint handler.
///
/// Upgrades the HTTP request and hands the connection to a new
/// [`AssistantWebSocket`] actor.
pub async fn assistant_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!("New assistant connection from: {:?}", req.connection_info().peer_addr());
    ws::start(AssistantWebSocket::new(app_state), &req, stream)
}
