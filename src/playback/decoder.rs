//! Chunk payload decoding
//!
//! Turns one base64 audio payload into mono samples at the output rate.
//! WAV and MPEG audio are recognized; everything else is rejected with a
//! typed error so the sequencer can skip the chunk.

use std::io::Cursor;

use base64::Engine as _;

use super::types::PlayableBuffer;
use crate::error::DecodeError;

/// Default output sample rate (matches common TTS output)
pub const DEFAULT_OUTPUT_RATE: u32 = 24_000;

/// Lowest sample rate accepted from a payload or for output
pub const MIN_SAMPLE_RATE: u32 = 8_000;

/// Highest sample rate accepted from a payload or for output
pub const MAX_SAMPLE_RATE: u32 = 192_000;

/// Resampler input block size
const RESAMPLE_CHUNK: usize = 1024;

/// Converts one encoded payload into playable samples
///
/// Implementations must be pure: the same payload always yields the same
/// result, and no state is shared between calls.
pub trait ChunkDecoder: Send + Sync + 'static {
    /// Decode a payload
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the payload is malformed or unsupported
    fn decode(&self, payload: &[u8]) -> Result<PlayableBuffer, DecodeError>;
}

/// Container detected from the payload's leading bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Wav,
    Ogg,
    Flac,
    Mpeg,
}

impl Container {
    fn sniff(bytes: &[u8]) -> Self {
        if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
            Self::Wav
        } else if bytes.starts_with(b"OggS") {
            Self::Ogg
        } else if bytes.starts_with(b"fLaC") {
            Self::Flac
        } else {
            Self::Mpeg
        }
    }
}

/// Decodes base64 WAV or MPEG payloads to mono at a fixed output rate
#[derive(Debug, Clone, Copy)]
pub struct AudioChunkDecoder {
    output_rate: u32,
}

impl Default for AudioChunkDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_RATE)
    }
}

impl AudioChunkDecoder {
    /// Create a decoder that resamples everything to `output_rate`
    #[must_use]
    pub const fn new(output_rate: u32) -> Self {
        Self { output_rate }
    }

    /// Output sample rate in Hz
    #[must_use]
    pub const fn output_rate(&self) -> u32 {
        self.output_rate
    }
}

impl ChunkDecoder for AudioChunkDecoder {
    fn decode(&self, payload: &[u8]) -> Result<PlayableBuffer, DecodeError> {
        let bytes = decode_base64(payload)?;

        let (samples, sample_rate) = match Container::sniff(&bytes) {
            Container::Wav => decode_wav(&bytes)?,
            Container::Mpeg => decode_mpeg(&bytes)?,
            Container::Ogg => return Err(DecodeError::Unsupported("ogg".to_string())),
            Container::Flac => return Err(DecodeError::Unsupported("flac".to_string())),
        };

        // Resampling an out-of-range rate can inflate a tiny payload enormously
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
            return Err(DecodeError::Unsupported(format!(
                "{sample_rate} Hz sample rate"
            )));
        }

        let samples = if sample_rate == self.output_rate {
            samples
        } else {
            resample(&samples, sample_rate, self.output_rate)?
        };

        Ok(PlayableBuffer::new(samples, self.output_rate))
    }
}

/// Strip whitespace and decode standard base64
fn decode_base64(payload: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let compact: Vec<u8> = payload
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&compact)
        .map_err(|e| DecodeError::Encoding(e.to_string()))?;

    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(bytes)
}

/// Decode WAV bytes to mono f32 samples
#[allow(clippy::cast_precision_loss)]
fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u32), DecodeError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| DecodeError::Malformed(format!("WAV header: {e}")))?;
    let spec = reader.spec();

    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(DecodeError::Malformed("WAV declares no channels".to_string()));
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| DecodeError::Malformed(format!("WAV data: {e}")))?,
        hound::SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                return Err(DecodeError::Unsupported(format!(
                    "{}-bit WAV",
                    spec.bits_per_sample
                )));
            }
            let scale = (1_u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|e| DecodeError::Malformed(format!("WAV data: {e}")))?
        }
    };

    Ok((downmix(&interleaved, usize::from(spec.channels)), spec.sample_rate))
}

/// Decode MPEG audio bytes to mono f32 samples
#[allow(clippy::cast_sign_loss)]
fn decode_mpeg(bytes: &[u8]) -> Result<(Vec<f32>, u32), DecodeError> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(bytes));
    let mut samples = Vec::new();
    let mut sample_rate = 0_u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                // First frame fixes the rate for the whole chunk
                if sample_rate == 0 {
                    sample_rate = frame.sample_rate as u32;
                }
                let pcm: Vec<f32> = frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&pcm, frame.channels));
            }
            Err(minimp3::Error::SkippedData) => {}
            Err(minimp3::Error::Eof | minimp3::Error::InsufficientData) => break,
            Err(e) => return Err(DecodeError::Malformed(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(DecodeError::Malformed("no MPEG audio frames found".to_string()));
    }

    Ok((samples, sample_rate))
}

/// Average interleaved channels down to mono
#[allow(clippy::cast_precision_loss)]
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Resample mono audio using rubato
///
/// The tail block is zero-padded and the resampler delay trimmed, so the
/// output length is exactly `len * to_rate / from_rate`.
#[allow(clippy::cast_possible_truncation)]
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, DecodeError> {
    use rubato::{FftFixedIn, Resampler};

    if samples.is_empty() {
        return Ok(Vec::new());
    }

    let expected = (samples.len() as u64 * u64::from(to_rate) / u64::from(from_rate)) as usize;

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, RESAMPLE_CHUNK, 2, 1)
            .map_err(|e| DecodeError::Resample(format!("resampler init failed: {e}")))?;
    let delay = resampler.output_delay();

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let mut output: Vec<f64> = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);
    let mut position = 0;

    while output.len() < expected + delay {
        let frames = resampler.input_frames_next();
        let mut block = vec![0.0; frames];
        if position < input.len() {
            let end = (position + frames).min(input.len());
            block[..end - position].copy_from_slice(&input[position..end]);
        }
        position += frames;

        let result = resampler
            .process(&[block], None)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;
        output.extend_from_slice(&result[0]);
    }

    Ok(output
        .into_iter()
        .skip(delay)
        .take(expected)
        .map(|s| s as f32)
        .collect())
}
