//! # Live API Wire Protocol
//!
//! JSON messages exchanged with the hosted real-time speech service.
//!
//! ## Outbound ([`ClientMessage`]):
//! - **setup**: model, voice, system prompt, tool declarations, transcription flags
//! - **realtimeInput**: one microphone chunk
//! - **clientContent**: one typed user message, marked turn-complete
//! - **toolResponse**: acknowledgements for tool calls
//!
//! ## Inbound:
//! Server frames are loosely shaped objects where several things can arrive at
//! once (audio, transcription and turn completion in one `serverContent`).
//! [`parse_server_frame`] flattens each frame into an ordered list of
//! [`ServerEvent`]s so the session can `match` exhaustively over them.

use crate::audio::codec::EncodedChunk;
use crate::session::tools::ToolCallRequest;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages sent to the live service. Externally tagged:
/// `{"realtimeInput": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(LiveSetup),
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent),
    ToolResponse(ToolResponse),
}

impl ClientMessage {
    pub fn audio(chunk: EncodedChunk) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            audio: Blob {
                data: chunk.data,
                mime_type: chunk.mime_type,
            },
        })
    }

    pub fn text(text: impl Into<String>) -> Self {
        ClientMessage::ClientContent(ClientContent {
            turns: vec![Content::user(text)],
            turn_complete: true,
        })
    }

    pub fn tool_response(function_responses: Vec<FunctionResponse>) -> Self {
        ClientMessage::ToolResponse(ToolResponse { function_responses })
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Setup(_) => "setup",
            ClientMessage::RealtimeInput(_) => "realtime_input",
            ClientMessage::ClientContent(_) => "client_content",
            ClientMessage::ToolResponse(_) => "tool_response",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Session configuration, sent once as the first frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSetup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub tools: Vec<Tool>,
    pub input_audio_transcription: TranscriptionConfig,
    pub output_audio_transcription: TranscriptionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Presence enables transcription; there are no options.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TranscriptionConfig {}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Some("user".to_string()),
            parts: vec![Part { text: text.into() }],
        }
    }

    /// Role-less content, as used for the system instruction.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            role: None,
            parts: vec![Part { text: text.into() }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Part {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealtimeInput {
    pub audio: Blob,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

/// One thing that happened on the live connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// The service accepted the setup message; the session is open.
    SetupComplete,
    /// A chunk of synthesized speech.
    Audio(EncodedChunk),
    /// An audio part that could not be used (no payload).
    MalformedAudio(String),
    /// The user started talking over the model.
    Interrupted,
    /// Transcription of the model's speech.
    OutputTranscript(String),
    /// Transcription of the user's speech.
    InputTranscript(String),
    TurnComplete,
    ToolCall(Vec<ToolCallRequest>),
    ToolCallCancellation(Vec<String>),
    /// The service will drop the connection soon.
    GoAway { time_left: Option<String> },
    Error(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerFrame {
    setup_complete: Option<Value>,
    server_content: Option<ServerContent>,
    tool_call: Option<ToolCallFrame>,
    tool_call_cancellation: Option<ToolCallCancellationFrame>,
    go_away: Option<GoAwayFrame>,
    error: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    interrupted: bool,
    input_transcription: Option<TranscriptionFrame>,
    output_transcription: Option<TranscriptionFrame>,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<ModelPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelPart {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: Option<String>,
    data: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TranscriptionFrame {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallFrame {
    #[serde(default)]
    function_calls: Vec<ToolCallRequest>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolCallCancellationFrame {
    #[serde(default)]
    ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoAwayFrame {
    time_left: Option<String>,
}

/// Split one inbound text frame into events, in handling order.
///
/// Within a `serverContent` the order is: audio parts, interruption, output
/// transcript, input transcript, turn completion. Tool calls follow.
pub fn parse_server_frame(text: &str) -> Result<Vec<ServerEvent>, serde_json::Error> {
    let frame: ServerFrame = serde_json::from_str(text)?;
    let mut events = Vec::new();

    if frame.setup_complete.is_some() {
        events.push(ServerEvent::SetupComplete);
    }

    if let Some(content) = frame.server_content {
        let parts = content.model_turn.map(|turn| turn.parts).unwrap_or_default();
        for part in parts {
            let Some(inline) = part.inline_data else {
                continue;
            };
            let mime_type = inline.mime_type.unwrap_or_else(|| "audio/pcm".to_string());
            match inline.data {
                Some(data) => events.push(ServerEvent::Audio(EncodedChunk::new(data, mime_type))),
                None => events.push(ServerEvent::MalformedAudio(format!(
                    "inline {} part has no data",
                    mime_type
                ))),
            }
        }

        if content.interrupted {
            events.push(ServerEvent::Interrupted);
        }
        if let Some(text) = content.output_transcription.and_then(|t| t.text) {
            events.push(ServerEvent::OutputTranscript(text));
        }
        if let Some(text) = content.input_transcription.and_then(|t| t.text) {
            events.push(ServerEvent::InputTranscript(text));
        }
        if content.turn_complete {
            events.push(ServerEvent::TurnComplete);
        }
    }

    if let Some(call) = frame.tool_call {
        if !call.function_calls.is_empty() {
            events.push(ServerEvent::ToolCall(call.function_calls));
        }
    }

    if let Some(cancellation) = frame.tool_call_cancellation {
        events.push(ServerEvent::ToolCallCancellation(cancellation.ids));
    }

    if let Some(go_away) = frame.go_away {
        events.push(ServerEvent::GoAway {
            time_left: go_away.time_left,
        });
    }

    if let Some(error) = frame.error {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| error.as_str().map(str::to_string))
            .unwrap_or_else(|| error.to_string());
        events.push(ServerEvent::Error(message));
    }

    Ok(events)
}
