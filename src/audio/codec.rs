//! Conversion between float PCM and the session's wire representation.
//!
//! - Outbound: f32 frame → clamp → i16 LE → base64, tagged `audio/pcm;rate=16000`
//! - Inbound: base64 → raw bytes → i16 LE → per-channel f32 buffer

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;

use crate::error::EngineError;

/// MIME tag of every outbound chunk.
pub const OUTBOUND_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Sample rate of inbound audio when the MIME tag does not name one.
pub const DEFAULT_INBOUND_SAMPLE_RATE: u32 = 24000;

const PCM_SCALE: f32 = 32768.0;

/// One block of mono float samples as delivered by the capture device.
pub type AudioFrame = Vec<f32>;

/// One outbound audio payload, ready to be embedded in a realtime-input message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireChunk {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub data: String,
}

/// Float PCM, one vector per channel, at `sample_rate`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBuffer {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl DecodedBuffer {
    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Playback length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Mono view of the buffer; multi-channel buffers are averaged.
    pub fn mono(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            n => (0..self.frames())
                .map(|i| self.channels.iter().map(|ch| ch[i]).sum::<f32>() / n as f32)
                .collect(),
        }
    }
}

/// Quantize a single float sample to 16-bit. Out-of-range input saturates.
pub fn quantize(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let scaled = (sample.clamp(-1.0, 1.0) * PCM_SCALE).round();
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Encode a captured frame into an outbound chunk. Never fails.
pub fn encode_outbound(frame: &[f32]) -> WireChunk {
    let mut bytes = Vec::with_capacity(frame.len() * 2);
    for &sample in frame {
        bytes.extend_from_slice(&quantize(sample).to_le_bytes());
    }
    WireChunk {
        mime_type: OUTBOUND_MIME_TYPE.to_string(),
        data: STANDARD.encode(bytes),
    }
}

/// Reverse the text-safe transport encoding of an inbound chunk.
pub fn decode_inbound(payload: &str) -> Result<Vec<u8>, EngineError> {
    STANDARD
        .decode(payload.trim())
        .map_err(|e| EngineError::MalformedPayload(e.to_string()))
}

/// Interpret raw bytes as interleaved little-endian i16 PCM.
pub fn decode_audio_data(
    raw: &[u8],
    sample_rate: u32,
    channel_count: usize,
) -> Result<DecodedBuffer, EngineError> {
    if channel_count == 0 {
        return Err(EngineError::DecodeError("channel count must be at least 1".into()));
    }
    let frame_bytes = 2 * channel_count;
    if raw.len() % frame_bytes != 0 {
        return Err(EngineError::DecodeError(format!(
            "{} bytes is not a whole number of {}-channel 16-bit frames",
            raw.len(),
            channel_count
        )));
    }

    let frames = raw.len() / frame_bytes;
    let mut channels: Vec<Vec<f32>> = (0..channel_count)
        .map(|_| Vec::with_capacity(frames))
        .collect();

    for (i, pair) in raw.chunks_exact(2).enumerate() {
        let value = i16::from_le_bytes([pair[0], pair[1]]);
        channels[i % channel_count].push(value as f32 / PCM_SCALE);
    }

    Ok(DecodedBuffer { sample_rate, channels })
}

/// Extract the `rate=` parameter from a MIME tag such as `audio/pcm;rate=24000`.
pub fn sample_rate_from_mime(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(samples: &[f32]) -> Vec<f32> {
        let chunk = encode_outbound(samples);
        let raw = decode_inbound(&chunk.data).unwrap();
        decode_audio_data(&raw, 16000, 1).unwrap().channels.remove(0)
    }

    #[test]
    fn quantization_error_is_bounded() {
        let samples: Vec<f32> = (0..2000)
            .map(|i| ((i as f32) * 0.013).sin() * 0.9 + if i % 7 == 0 { 0.1 } else { 0.0 })
            .chain([1.0, -1.0, 0.0, 0.5, -0.5, 1.0 / 32768.0])
            .collect();
        let decoded = round_trip(&samples);
        assert_eq!(decoded.len(), samples.len());
        for (orig, back) in samples.iter().zip(&decoded) {
            let expected = orig.clamp(-1.0, 1.0);
            assert!(
                (expected - back).abs() <= 1.0 / 32768.0 + f32::EPSILON,
                "{} decoded as {}",
                orig,
                back
            );
        }
    }

    #[test]
    fn out_of_range_input_is_clamped() {
        assert_eq!(quantize(3.5), i16::MAX);
        assert_eq!(quantize(-7.0), i16::MIN);
        assert_eq!(quantize(f32::NAN), 0);
        assert_eq!(quantize(f32::INFINITY), i16::MAX);

        let decoded = round_trip(&[2.0, -2.0]);
        assert!((decoded[0] - 32767.0 / 32768.0).abs() < f32::EPSILON);
        assert_eq!(decoded[1], -1.0);
    }

    #[test]
    fn outbound_chunk_is_little_endian_and_tagged() {
        let chunk = encode_outbound(&[0.5, -0.5]);
        assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
        let raw = STANDARD.decode(&chunk.data).unwrap();
        // 0.5 * 32768 = 16384 = 0x4000, -16384 = 0xC000
        assert_eq!(raw, vec![0x00, 0x40, 0x00, 0xC0]);
    }

    #[test]
    fn empty_frame_encodes_to_empty_payload() {
        let chunk = encode_outbound(&[]);
        assert!(chunk.data.is_empty());
        let buffer = decode_audio_data(&decode_inbound(&chunk.data).unwrap(), 24000, 1).unwrap();
        assert_eq!(buffer.frames(), 0);
        assert_eq!(buffer.duration(), 0.0);
    }

    #[test]
    fn decode_inbound_rejects_bad_alphabet_and_length() {
        assert!(matches!(
            decode_inbound("AAE*"),
            Err(EngineError::MalformedPayload(_))
        ));
        assert!(matches!(
            decode_inbound("AAECA"),
            Err(EngineError::MalformedPayload(_))
        ));
    }

    #[test]
    fn decode_audio_data_rejects_partial_frames() {
        assert!(matches!(
            decode_audio_data(&[0, 1, 2], 24000, 1),
            Err(EngineError::DecodeError(_))
        ));
        assert!(matches!(
            decode_audio_data(&[0, 1, 2, 3, 4, 5], 24000, 2),
            Err(EngineError::DecodeError(_))
        ));
        assert!(matches!(
            decode_audio_data(&[0, 1], 24000, 0),
            Err(EngineError::DecodeError(_))
        ));
    }

    #[test]
    fn decode_audio_data_deinterleaves_channels() {
        let raw: Vec<u8> = [1000i16, -1000, 2000, -2000]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let buffer = decode_audio_data(&raw, 24000, 2).unwrap();
        assert_eq!(buffer.frames(), 2);
        assert_eq!(buffer.channels[0], vec![1000.0 / 32768.0, 2000.0 / 32768.0]);
        assert_eq!(buffer.channels[1], vec![-1000.0 / 32768.0, -2000.0 / 32768.0]);
        assert!(buffer.mono().iter().all(|s| *s == 0.0));
    }

    #[test]
    fn duration_follows_sample_rate() {
        let raw = vec![0u8; 24000 * 2];
        let buffer = decode_audio_data(&raw, 24000, 1).unwrap();
        assert!((buffer.duration() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn mime_rate_parsing() {
        assert_eq!(sample_rate_from_mime("audio/pcm;rate=24000"), Some(24000));
        assert_eq!(sample_rate_from_mime("audio/pcm; Rate = 16000"), Some(16000));
        assert_eq!(sample_rate_from_mime("audio/pcm"), None);
        assert_eq!(sample_rate_from_mime("audio/pcm;rate=abc"), None);
    }
}
