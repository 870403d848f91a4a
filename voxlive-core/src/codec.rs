// Conversions between base64 text, raw PCM16 bytes, normalized samples and the
// RIFF/WAVE container used for transcription uploads.
//
// Everything here is pure: no I/O, no shared state. Byte order is little-endian
// throughout, including every multi-byte header field.

use base64::Engine;

pub const WAV_HEADER_LEN: usize = 44;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),

    #[error("PCM16 payload has odd byte length: {0}")]
    OddByteLength(usize),

    #[error("audio container is truncated ({0} bytes)")]
    TruncatedContainer(usize),

    #[error("not a RIFF/WAVE container")]
    NotWave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerFormat {
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub data_len: u32,
}

pub fn decode_base64(text: &str) -> Result<Vec<u8>, DecodeError> {
    base64::engine::general_purpose::STANDARD
        .decode(text.trim())
        .map_err(|e| DecodeError::InvalidBase64(e.to_string()))
}

pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Interpret little-endian PCM16 bytes as samples.
///
/// A trailing odd byte is dropped; callers that must reject odd input check first.
pub fn pcm16_bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

pub fn samples_to_pcm16_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Decode a base64 PCM16 payload into samples normalized to [-1, 1].
pub fn decode_base64_pcm16(text: &str) -> Result<Vec<f32>, DecodeError> {
    let bytes = decode_base64(text)?;
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddByteLength(bytes.len()));
    }

    Ok(pcm16_bytes_to_samples(&bytes)
        .into_iter()
        .map(|s| s as f32 / 32768.0)
        .collect())
}

/// Clamp normalized samples to [-1, 1] and scale to little-endian PCM16 bytes.
pub fn f32_to_pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    let pcm: Vec<i16> = samples
        .iter()
        .map(|s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
        .collect();
    samples_to_pcm16_bytes(&pcm)
}

/// Encode normalized samples as base64 PCM16 for upload.
pub fn encode_pcm16_base64(samples: &[f32]) -> String {
    encode_base64(&f32_to_pcm16_bytes(samples))
}

/// Build a mono 16-bit RIFF/WAVE container: 44-byte header followed by the samples.
pub fn build_container(samples: &[i16], sample_rate_hz: u32) -> Vec<u8> {
    let num_channels: u16 = 1;
    let bits_per_sample: u16 = 16;
    let audio_format: u16 = 1; // PCM

    let byte_rate = sample_rate_hz * num_channels as u32 * (bits_per_sample as u32 / 8);
    let block_align = num_channels * (bits_per_sample / 8);

    let data_bytes_len = samples.len() as u32 * 2;

    let mut out = Vec::with_capacity(WAV_HEADER_LEN + data_bytes_len as usize);

    // RIFF header
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_bytes_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    // fmt chunk
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&audio_format.to_le_bytes());
    out.extend_from_slice(&num_channels.to_le_bytes());
    out.extend_from_slice(&sample_rate_hz.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data chunk
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_bytes_len.to_le_bytes());

    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }

    out
}

/// Same as `build_container`, base64-wrapped for JSON transports.
pub fn encode_container(samples: &[i16], sample_rate_hz: u32) -> String {
    encode_base64(&build_container(samples, sample_rate_hz))
}

pub fn parse_container_header(bytes: &[u8]) -> Result<ContainerFormat, DecodeError> {
    if bytes.len() < WAV_HEADER_LEN {
        return Err(DecodeError::TruncatedContainer(bytes.len()));
    }
    if &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(DecodeError::NotWave);
    }

    let u16_at = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
    let u32_at = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);

    Ok(ContainerFormat {
        channels: u16_at(22),
        sample_rate_hz: u32_at(24),
        bits_per_sample: u16_at(34),
        data_len: u32_at(40),
    })
}
