//! Voice Activity Detection
//!
//! Energy-based VAD with an adaptive noise floor and hysteresis. Runs on
//! the server, which owns the authoritative session state.

mod energy;

pub use energy::EnergyVad;

use std::time::Instant;

/// Hysteresis state of a VAD instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VadState {
    #[default]
    Silent,
    Speaking,
}

/// State change reported by the frame that caused it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadTransition {
    SpeechStart,
    SpeechEnd,
}

/// Per-frame classification
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadResult {
    /// Frame energy exceeded the adaptive threshold
    pub is_speech: bool,
    /// RMS energy of normalized samples
    pub energy: f32,
    /// energy / (2 * threshold), clamped to [0, 1]
    pub confidence: f32,
    /// Adaptive threshold used for this frame
    pub threshold: f32,
    /// Hysteresis state after this frame
    pub state: VadState,
    pub transition: Option<VadTransition>,
    pub timestamp: Instant,
}

impl VadResult {
    pub fn is_speaking(&self) -> bool {
        self.state == VadState::Speaking
    }
}
