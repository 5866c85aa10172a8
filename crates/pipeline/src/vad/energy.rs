//! Energy VAD with adaptive noise floor

use std::time::Duration;

use voice_session_config::VadConfig;
use voice_session_core::AudioFrame;

use super::{VadResult, VadState, VadTransition};

/// Energy-based voice activity detector
///
/// Threshold is `max(energy_floor, 2 * background)`. The background noise
/// estimate is an EWMA fed only by non-speech frames while the detector is
/// [`VadState::Silent`], so speech onset never raises the threshold above
/// itself. Entering or leaving speech requires the frame
/// classification to hold continuously for the configured timeout, measured
/// in frame durations.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    config: VadConfig,
    state: VadState,
    background: f32,
    speech_run: Duration,
    silence_run: Duration,
}

impl EnergyVad {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            state: VadState::Silent,
            background: 0.0,
            speech_run: Duration::ZERO,
            silence_run: Duration::ZERO,
        }
    }

    /// Classify one frame. Never fails; empty frames have zero energy.
    pub fn process(&mut self, frame: &AudioFrame) -> VadResult {
        let energy = frame.energy();
        let threshold = self.threshold();
        let is_speech = energy > threshold;
        let confidence = (energy / (2.0 * threshold)).clamp(0.0, 1.0);

        let transition = self.advance(is_speech, frame.duration);

        if !is_speech && self.state == VadState::Silent {
            let decay = self.config.noise_decay;
            self.background = decay * self.background + (1.0 - decay) * energy;
        }

        if let Some(t) = transition {
            tracing::debug!(?t, energy, threshold, "VAD transition");
        }

        VadResult {
            is_speech,
            energy,
            confidence,
            threshold,
            state: self.state,
            transition,
            timestamp: frame.timestamp,
        }
    }

    fn advance(&mut self, is_speech: bool, duration: Duration) -> Option<VadTransition> {
        let speech_timeout = Duration::from_millis(self.config.speech_timeout_ms);
        let silence_timeout = Duration::from_millis(self.config.silence_timeout_ms);

        if is_speech {
            self.speech_run += duration;
            self.silence_run = Duration::ZERO;
        } else {
            self.silence_run += duration;
            self.speech_run = Duration::ZERO;
        }

        match self.state {
            VadState::Silent if is_speech && self.speech_run >= speech_timeout => {
                self.state = VadState::Speaking;
                Some(VadTransition::SpeechStart)
            }
            VadState::Speaking if !is_speech && self.silence_run >= silence_timeout => {
                self.state = VadState::Silent;
                Some(VadTransition::SpeechEnd)
            }
            _ => None,
        }
    }

    /// Current adaptive threshold
    pub fn threshold(&self) -> f32 {
        self.config.energy_floor.max(2.0 * self.background)
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    pub fn is_speaking(&self) -> bool {
        self.state == VadState::Speaking
    }

    pub fn background_noise(&self) -> f32 {
        self.background
    }

    /// Reset hysteresis and the noise estimate
    pub fn reset(&mut self) {
        self.state = VadState::Silent;
        self.background = 0.0;
        self.speech_run = Duration::ZERO;
        self.silence_run = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_session_core::{Channels, SampleRate};

    fn frame(amplitude: f32, ms: usize) -> AudioFrame {
        let samples: Vec<f32> = (0..16 * ms)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .collect();
        AudioFrame::from_f32(&samples, SampleRate::Hz16000, 0)
    }

    #[test]
    fn test_sustained_speech_starts_once() {
        let mut vad = EnergyVad::new(VadConfig::default());
        let mut starts = 0;
        for _ in 0..20 {
            let result = vad.process(&frame(0.3, 100));
            assert!(result.is_speech);
            if result.transition == Some(VadTransition::SpeechStart) {
                starts += 1;
            }
        }
        assert_eq!(starts, 1);
        assert!(vad.is_speaking());
    }

    #[test]
    fn test_speech_requires_timeout() {
        let mut vad = EnergyVad::new(VadConfig::default());
        for _ in 0..4 {
            vad.process(&frame(0.3, 20));
        }
        assert!(!vad.is_speaking());
        vad.process(&frame(0.3, 20));
        assert!(vad.is_speaking());
    }

    #[test]
    fn test_silence_after_timeout() {
        let mut vad = EnergyVad::new(VadConfig::default());
        for _ in 0..3 {
            vad.process(&frame(0.3, 100));
        }
        assert!(vad.is_speaking());

        for _ in 0..9 {
            vad.process(&frame(0.001, 100));
        }
        assert!(vad.is_speaking(), "still inside silence timeout");

        let result = vad.process(&frame(0.001, 100));
        assert_eq!(result.transition, Some(VadTransition::SpeechEnd));
        assert!(!vad.is_speaking());
    }

    #[test]
    fn test_brief_dip_does_not_end_speech() {
        let mut vad = EnergyVad::new(VadConfig::default());
        vad.process(&frame(0.3, 100));
        for _ in 0..5 {
            vad.process(&frame(0.0, 100));
        }
        vad.process(&frame(0.3, 100));
        for _ in 0..5 {
            vad.process(&frame(0.0, 100));
        }
        assert!(vad.is_speaking());
    }

    #[test]
    fn test_quiet_input_never_speaks() {
        let mut vad = EnergyVad::new(VadConfig::default());
        for _ in 0..30 {
            let result = vad.process(&frame(0.005, 100));
            assert!(!result.is_speech);
        }
        assert!(!vad.is_speaking());
    }

    #[test]
    fn test_noise_floor_adapts_while_silent() {
        let mut vad = EnergyVad::new(VadConfig::default());
        let floor = vad.threshold();
        for _ in 0..200 {
            vad.process(&frame(0.008, 100));
        }
        assert!(vad.background_noise() > 0.007);
        assert!(vad.threshold() > floor);
        // Just above the old floor but below twice the learned noise
        assert!(!vad.process(&frame(0.012, 100)).is_speech);
    }

    #[test]
    fn test_onset_frames_do_not_raise_noise_floor() {
        let config = VadConfig {
            speech_timeout_ms: 300,
            ..VadConfig::default()
        };
        let mut vad = EnergyVad::new(config);
        let floor = vad.threshold();

        // Quiet speech just above the floor, in frames much shorter than the timeout
        for i in 0..14 {
            let result = vad.process(&frame(0.02, 20));
            assert!(result.is_speech, "frame {} fell below threshold", i);
            assert!(!vad.is_speaking());
        }
        assert_eq!(vad.background_noise(), 0.0);
        assert_eq!(vad.threshold(), floor);

        let result = vad.process(&frame(0.02, 20));
        assert_eq!(result.transition, Some(VadTransition::SpeechStart));
        for _ in 0..85 {
            vad.process(&frame(0.02, 20));
        }
        assert!(vad.is_speaking());
    }

    #[test]
    fn test_noise_frozen_while_speaking() {
        let mut vad = EnergyVad::new(VadConfig::default());
        vad.process(&frame(0.3, 100));
        let before = vad.background_noise();
        for _ in 0..10 {
            vad.process(&frame(0.3, 100));
        }
        assert_eq!(vad.background_noise(), before);
    }

    #[test]
    fn test_empty_frame() {
        let mut vad = EnergyVad::new(VadConfig::default());
        let empty = AudioFrame::new(Vec::new(), SampleRate::Hz16000, Channels::Mono, 0);
        let result = vad.process(&empty);
        assert_eq!(result.energy, 0.0);
        assert_eq!(result.confidence, 0.0);
        assert!(!result.is_speech);
    }

    #[test]
    fn test_confidence_clamped() {
        let mut vad = EnergyVad::new(VadConfig::default());
        let result = vad.process(&frame(0.9, 100));
        assert_eq!(result.confidence, 1.0);

        let mut vad = EnergyVad::new(VadConfig::default());
        let result = vad.process(&frame(0.01, 100));
        assert!(result.confidence > 0.4 && result.confidence < 0.6);
    }
}
