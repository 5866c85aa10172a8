//! Audio frame types and PCM helpers
//!
//! Inbound audio is 16-bit signed little-endian PCM. Frames keep the raw
//! bytes in a shared [`Bytes`] buffer so fanning a frame out to the
//! transcription bridge and the barge-in detector never copies samples.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// PCM16 normalization constant (i16::MAX + 1)
pub const PCM16_NORMALIZE: f32 = 32768.0;

/// Bytes per PCM16 sample
pub const BYTES_PER_SAMPLE: usize = 2;

/// Supported audio sample rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SampleRate {
    /// 8kHz - Telephony
    Hz8000,
    /// 16kHz - Speech recognition input
    #[default]
    Hz16000,
    /// 22.05kHz - Common TTS output
    Hz22050,
    /// 24kHz - Common TTS output
    Hz24000,
    /// 48kHz - Browser capture
    Hz48000,
}

impl SampleRate {
    /// Get sample rate as u32
    pub fn as_u32(&self) -> u32 {
        match self {
            SampleRate::Hz8000 => 8000,
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz22050 => 22050,
            SampleRate::Hz24000 => 24000,
            SampleRate::Hz48000 => 48000,
        }
    }

    /// Parse a numeric rate
    pub fn from_u32(hz: u32) -> Option<Self> {
        match hz {
            8000 => Some(SampleRate::Hz8000),
            16000 => Some(SampleRate::Hz16000),
            22050 => Some(SampleRate::Hz22050),
            24000 => Some(SampleRate::Hz24000),
            48000 => Some(SampleRate::Hz48000),
            _ => None,
        }
    }
}

/// Audio channel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Channels {
    #[default]
    Mono,
    Stereo,
}

impl Channels {
    pub fn count(&self) -> usize {
        match self {
            Channels::Mono => 1,
            Channels::Stereo => 2,
        }
    }
}

/// Number of bytes covering `ms` milliseconds of PCM16 audio
pub fn pcm16_bytes_for(ms: u64, sample_rate: SampleRate, channels: Channels) -> usize {
    (sample_rate.as_u32() as usize * channels.count() * BYTES_PER_SAMPLE * ms as usize) / 1000
}

/// Playback duration of `len` bytes of PCM16 audio
pub fn pcm16_duration(len: usize, sample_rate: SampleRate, channels: Channels) -> Duration {
    let samples = (len / BYTES_PER_SAMPLE / channels.count()) as u64;
    Duration::from_nanos(samples * 1_000_000_000 / sample_rate.as_u32() as u64)
}

/// Decode little-endian PCM16 bytes into normalized f32 samples.
///
/// A trailing odd byte is ignored.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / PCM16_NORMALIZE)
        .collect()
}

/// Encode normalized f32 samples as little-endian PCM16 bytes
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|s| {
            let clamped = s.clamp(-1.0, 1.0);
            ((clamped * (PCM16_NORMALIZE - 1.0)) as i16).to_le_bytes()
        })
        .collect()
}

/// RMS energy of normalized samples. Empty input has zero energy.
pub fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    let rms = (sum_squares / samples.len() as f32).sqrt();
    if rms.is_finite() {
        rms
    } else {
        0.0
    }
}

/// Fixed-duration frame of PCM16 audio
#[derive(Clone)]
pub struct AudioFrame {
    /// Raw little-endian PCM16 bytes
    pub data: Bytes,
    /// Sample rate
    pub sample_rate: SampleRate,
    /// Number of channels
    pub channels: Channels,
    /// Frame sequence number for ordering
    pub sequence: u64,
    /// Timestamp when frame was captured
    pub timestamp: Instant,
    /// Duration of this frame
    pub duration: Duration,
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("bytes", &self.data.len())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("sequence", &self.sequence)
            .field("duration", &self.duration)
            .finish()
    }
}

impl AudioFrame {
    /// Create a frame from PCM16 bytes captured now
    pub fn new(
        data: impl Into<Bytes>,
        sample_rate: SampleRate,
        channels: Channels,
        sequence: u64,
    ) -> Self {
        Self::with_timestamp(data, sample_rate, channels, sequence, Instant::now())
    }

    /// Create a frame with an explicit capture timestamp
    pub fn with_timestamp(
        data: impl Into<Bytes>,
        sample_rate: SampleRate,
        channels: Channels,
        sequence: u64,
        timestamp: Instant,
    ) -> Self {
        let data = data.into();
        let duration = pcm16_duration(data.len(), sample_rate, channels);
        Self {
            data,
            sample_rate,
            channels,
            sequence,
            timestamp,
            duration,
        }
    }

    /// Build a frame from normalized samples (test signals, synthesized tones)
    pub fn from_f32(samples: &[f32], sample_rate: SampleRate, sequence: u64) -> Self {
        Self::new(f32_to_pcm16(samples), sample_rate, Channels::Mono, sequence)
    }

    /// Decoded samples in [-1.0, 1.0]
    pub fn samples(&self) -> Vec<f32> {
        pcm16_to_f32(&self.data)
    }

    /// RMS energy of the frame's normalized samples
    pub fn energy(&self) -> f32 {
        rms_energy(&self.samples())
    }

    /// Energy in dBFS, floored at -96
    pub fn energy_db(&self) -> f32 {
        let rms = self.energy();
        if rms > 0.0 {
            20.0 * rms.log10()
        } else {
            -96.0
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
