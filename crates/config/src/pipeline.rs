//! Pipeline component configuration

use serde::{Deserialize, Serialize};

use crate::constants::{audio, barge_in, playback, sentence, vad};

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub barge_in: BargeInConfig,
    #[serde(default)]
    pub sentence: SentenceConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
}

/// Inbound audio format and framing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    /// Framer output duration
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u64,
}

fn default_sample_rate() -> u32 {
    audio::SAMPLE_RATE
}
fn default_channels() -> u16 {
    audio::CHANNELS
}
fn default_frame_ms() -> u64 {
    audio::FRAME_MS
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            frame_ms: default_frame_ms(),
        }
    }
}

/// Energy VAD configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    /// Minimum adaptive threshold (normalized RMS)
    #[serde(default = "default_energy_floor")]
    pub energy_floor: f32,
    /// Background noise EWMA decay per frame
    #[serde(default = "default_noise_decay")]
    pub noise_decay: f32,
    /// Continuous speech required to enter SPEAKING
    #[serde(default = "default_speech_timeout_ms")]
    pub speech_timeout_ms: u64,
    /// Continuous silence required to leave SPEAKING
    #[serde(default = "default_silence_timeout_ms")]
    pub silence_timeout_ms: u64,
}

fn default_energy_floor() -> f32 {
    vad::ENERGY_FLOOR
}
fn default_noise_decay() -> f32 {
    vad::NOISE_DECAY
}
fn default_speech_timeout_ms() -> u64 {
    vad::SPEECH_TIMEOUT_MS
}
fn default_silence_timeout_ms() -> u64 {
    vad::SILENCE_TIMEOUT_MS
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_floor: default_energy_floor(),
            noise_decay: default_noise_decay(),
            speech_timeout_ms: default_speech_timeout_ms(),
            silence_timeout_ms: default_silence_timeout_ms(),
        }
    }
}

/// Barge-in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BargeInConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Energy a frame must exceed to count toward a barge-in
    #[serde(default = "default_barge_in_threshold")]
    pub energy_threshold: f32,
    #[serde(default = "default_min_consecutive_frames")]
    pub min_consecutive_frames: u32,
}

fn default_true() -> bool {
    true
}
fn default_barge_in_threshold() -> f32 {
    barge_in::ENERGY_THRESHOLD
}
fn default_min_consecutive_frames() -> u32 {
    barge_in::MIN_CONSECUTIVE_FRAMES
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            energy_threshold: default_barge_in_threshold(),
            min_consecutive_frames: default_min_consecutive_frames(),
        }
    }
}

/// Sentence boundary detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentenceConfig {
    #[serde(default = "default_min_length")]
    pub min_length: usize,
    #[serde(default = "default_max_buffer_chars")]
    pub max_buffer_chars: usize,
    #[serde(default = "default_abbreviations")]
    pub abbreviations: Vec<String>,
}

fn default_min_length() -> usize {
    sentence::MIN_LENGTH
}
fn default_max_buffer_chars() -> usize {
    sentence::MAX_BUFFER_CHARS
}
fn default_abbreviations() -> Vec<String> {
    sentence::ABBREVIATIONS.iter().map(|s| s.to_string()).collect()
}

impl Default for SentenceConfig {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
            max_buffer_chars: default_max_buffer_chars(),
            abbreviations: default_abbreviations(),
        }
    }
}

/// Client playback jitter buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Buffered audio required before playback starts
    #[serde(default = "default_min_buffer_ms")]
    pub min_buffer_ms: u64,
    /// Buffered audio above which the oldest chunk is dropped
    #[serde(default = "default_max_buffer_ms")]
    pub max_buffer_ms: u64,
}

fn default_min_buffer_ms() -> u64 {
    playback::MIN_BUFFER_MS
}
fn default_max_buffer_ms() -> u64 {
    playback::MAX_BUFFER_MS
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            min_buffer_ms: default_min_buffer_ms(),
            max_buffer_ms: default_max_buffer_ms(),
        }
    }
}
