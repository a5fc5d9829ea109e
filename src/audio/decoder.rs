//! PCM chunk decoding.
//!
//! Streamed audio arrives as base64 of little-endian signed 16-bit mono PCM.
//! Samples are normalised to `[-1.0, 1.0)` by dividing by 32768.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use byteorder::{LittleEndian, ReadBytesExt};
use std::fmt;
use std::io::Cursor;
use std::time::Duration;

/// Rate used when the chunk's mime type does not carry one.
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// Decoded mono audio ready for scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Fewer than two bytes: not even one sample
    Empty,
    InvalidBase64(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Empty => write!(f, "audio chunk holds no samples"),
            DecodeError::InvalidBase64(msg) => write!(f, "audio chunk is not valid base64: {}", msg),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Reads `rate=` from a mime type such as `audio/pcm;rate=24000`.
pub fn sample_rate_from_mime(mime_type: &str) -> u32 {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.trim().parse::<u32>().ok())
        .filter(|rate| *rate > 0)
        .unwrap_or(DEFAULT_SAMPLE_RATE)
}

/// Decode raw PCM bytes. A trailing odd byte is ignored.
pub fn decode_pcm16(bytes: &[u8], sample_rate: u32) -> Result<AudioBuffer, DecodeError> {
    if bytes.len() < 2 {
        return Err(DecodeError::Empty);
    }

    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / 32768.0);
    }

    Ok(AudioBuffer {
        samples,
        sample_rate,
    })
}

/// Decode one streamed chunk as carried by an `audioChunk` event.
pub fn decode_chunk(data: &str, mime_type: &str) -> Result<AudioBuffer, DecodeError> {
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| DecodeError::InvalidBase64(e.to_string()))?;
    decode_pcm16(&bytes, sample_rate_from_mime(mime_type))
}

/// Convert normalised samples back to 16-bit PCM.
pub fn encode_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| (sample * 32768.0).clamp(-32768.0, 32767.0) as i16)
        .collect()
}
