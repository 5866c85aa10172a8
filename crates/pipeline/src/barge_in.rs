//! Barge-in detection
//!
//! Wraps the energy VAD and debounces interruptions of synthesized speech:
//! a barge-in is confirmed only while TTS is playing, and only after N
//! consecutive frames that the VAD classifies as speech and whose energy
//! exceeds the barge-in threshold.

use voice_session_config::{BargeInConfig, VadConfig};
use voice_session_core::AudioFrame;

use crate::vad::{EnergyVad, VadResult};

/// Outcome of one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BargeInResult {
    pub should_barge_in: bool,
    pub consecutive_frames: u32,
    pub vad: VadResult,
}

/// Barge-in detector
#[derive(Debug, Clone)]
pub struct BargeInDetector {
    config: BargeInConfig,
    vad: EnergyVad,
    playing_tts: bool,
    consecutive: u32,
}

impl BargeInDetector {
    pub fn new(config: BargeInConfig, vad_config: VadConfig) -> Self {
        Self {
            config,
            vad: EnergyVad::new(vad_config),
            playing_tts: false,
            consecutive: 0,
        }
    }

    /// Arm or disarm detection. Disarming resets the counter.
    pub fn set_playing_tts(&mut self, playing: bool) {
        self.playing_tts = playing;
        if !playing {
            self.consecutive = 0;
        }
    }

    pub fn is_playing_tts(&self) -> bool {
        self.playing_tts
    }

    /// Run the VAD on a frame and update the debounce counter.
    ///
    /// The VAD sees every frame so its noise floor keeps adapting while the
    /// detector is disarmed.
    pub fn process(&mut self, frame: &AudioFrame) -> BargeInResult {
        let vad = self.vad.process(frame);

        let qualifies = self.config.enabled
            && self.playing_tts
            && vad.is_speech
            && vad.energy > self.config.energy_threshold;

        if qualifies {
            self.consecutive = self.consecutive.saturating_add(1);
        } else {
            self.consecutive = 0;
        }

        let should_barge_in = qualifies && self.consecutive >= self.config.min_consecutive_frames;
        if should_barge_in {
            tracing::debug!(
                frames = self.consecutive,
                energy = vad.energy,
                "Barge-in confirmed"
            );
        }

        BargeInResult {
            should_barge_in,
            consecutive_frames: self.consecutive,
            vad,
        }
    }

    /// Clear the debounce counter after a confirmed barge-in
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    /// Whether the underlying VAD currently reports speech
    pub fn is_user_speaking(&self) -> bool {
        self.vad.is_speaking()
    }
}
