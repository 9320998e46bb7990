//! # Assistant Session
//!
//! The call logic that sits between the browser and the live speech service.
//!
//! ## Key Components:
//! - **manager**: the call state machine (`Idle → Connecting → Active → Idle`, plus `Unavailable`)
//! - **transcript**: merges streamed transcription fragments into displayed lines
//! - **tools**: runs `record_lead` / `schedule_repair` and builds acknowledgements
//! - **prompt**: builds the setup message (system prompt, voice, tool schemas)
//! - **events**: signals into the session and events out to the browser

pub mod events;
pub mod manager;
pub mod prompt;
pub mod tools;
pub mod transcript;
