//! # Audio Module
//!
//! Everything between the microphone/speaker and the live session's wire format.
//!
//! ## Key Components:
//! - **codec**: float samples ⇄ base64 PCM16 (`audio/pcm;rate=N`)
//! - **capture**: microphone frames → fixed-size encoded chunks for the session
//! - **playback**: gapless, ordered scheduling of model audio with barge-in support
//!
//! ## Audio Format Requirements:
//! - **Input**: 16 kHz mono, 4096-sample frames
//! - **Output**: 24 kHz mono (or whatever rate the chunk's MIME tag declares)
//! - **Bit Depth**: 16-bit signed little-endian PCM on the wire

pub mod capture;  // Microphone framing and encoding
pub mod codec;    // PCM16 wire codec
pub mod playback; // Output scheduling and interruption
