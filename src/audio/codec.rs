//! # PCM Wire Codec
//!
//! Converts between floating-point audio samples and the 16-bit signed
//! little-endian PCM the live speech service speaks, wrapped in base64 text.
//!
//! ## Key Functions:
//! - **samples_to_wire**: `[-1.0, 1.0]` floats → base64 PCM16 with a MIME tag
//! - **wire_to_samples**: PCM16 bytes → one float buffer per channel
//! - **decode_chunk**: base64 + PCM16 decode in one step (inbound audio)
//!
//! ## Quantization:
//! Samples are scaled by 32768 and truncated toward zero. A round trip through
//! the codec loses at most 1/32768 per sample.

use crate::error::SessionError;
use base64::{engine::general_purpose, Engine as _};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Scale factor between float samples and 16-bit PCM.
const PCM_SCALE: f32 = 32768.0;

/// One base64 PCM payload plus the MIME tag describing it.
///
/// Chunks are transport-only: created once by the codec (or parsed off the
/// wire) and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    /// Base64 text of little-endian PCM16 samples
    pub data: String,
    /// e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
}

impl EncodedChunk {
    pub fn new(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Sample rate declared by the `rate=` parameter of the MIME tag, if any.
    pub fn sample_rate(&self) -> Option<u32> {
        self.mime_type
            .split(';')
            .filter_map(|param| param.trim().strip_prefix("rate="))
            .find_map(|rate| rate.trim().parse().ok())
    }
}

/// MIME tag for raw PCM16 at the given sample rate.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Convert one float sample to its 16-bit wire value.
///
/// Out-of-range input is not clamped: it wraps exactly like a store into a
/// 16-bit integer would. The single exception is the `+1.0` endpoint, which
/// would otherwise wrap to `-32768`; it is pinned to `i16::MAX`.
fn sample_to_pcm(sample: f32) -> i16 {
    if sample == 1.0 {
        return i16::MAX;
    }
    (sample * PCM_SCALE) as i32 as i16
}

/// Encode float samples as a base64 PCM16 chunk tagged with `sample_rate`.
pub fn samples_to_wire(samples: &[f32], sample_rate: u32) -> EncodedChunk {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&sample_to_pcm(sample).to_le_bytes());
    }

    EncodedChunk::new(general_purpose::STANDARD.encode(&bytes), pcm_mime_type(sample_rate))
}

/// Decode interleaved PCM16 bytes into one float buffer per channel.
///
/// ## Errors:
/// `SessionError::Decode` when `channels` is zero or the byte length is not a
/// whole number of frames (`2 * channels` bytes each).
pub fn wire_to_samples(bytes: &[u8], channels: u16) -> Result<Vec<Vec<f32>>, SessionError> {
    if channels == 0 {
        return Err(SessionError::Decode("channel count must be at least 1".to_string()));
    }

    let frame_bytes = 2 * channels as usize;
    if bytes.len() % frame_bytes != 0 {
        return Err(SessionError::Decode(format!(
            "PCM payload of {} bytes is not a multiple of {} ({} channel(s) x 16-bit)",
            bytes.len(),
            frame_bytes,
            channels
        )));
    }

    let frames = bytes.len() / frame_bytes;
    let mut planes = vec![Vec::with_capacity(frames); channels as usize];
    let mut cursor = Cursor::new(bytes);

    for _ in 0..frames {
        for plane in planes.iter_mut() {
            let sample = cursor
                .read_i16::<LittleEndian>()
                .map_err(|e| SessionError::Decode(e.to_string()))?;
            plane.push(sample as f32 / PCM_SCALE);
        }
    }

    Ok(planes)
}

/// Decode a base64 chunk straight into per-channel float buffers.
pub fn decode_chunk(chunk: &EncodedChunk, channels: u16) -> Result<Vec<Vec<f32>>, SessionError> {
    let bytes = general_purpose::STANDARD
        .decode(chunk.data.as_bytes())
        .map_err(|e| SessionError::Decode(format!("invalid base64 audio payload: {}", e)))?;
    wire_to_samples(&bytes, channels)
}

/// Interleave per-channel buffers back into a single sample stream.
pub fn interleave(planes: &[Vec<f32>]) -> Vec<f32> {
    let frames = planes.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(frames * planes.len());
    for frame in 0..frames {
        for plane in planes {
            out.push(plane[frame]);
        }
    }
    out
}
