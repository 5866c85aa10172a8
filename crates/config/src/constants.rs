//! Centralized defaults for the voice session pipeline

/// Audio format defaults
pub mod audio {
    /// Inbound capture rate
    pub const SAMPLE_RATE: u32 = 16_000;

    pub const CHANNELS: u16 = 1;

    /// Framer output duration (3200 bytes at 16kHz mono PCM16)
    pub const FRAME_MS: u64 = 100;

    pub const SUPPORTED_SAMPLE_RATES: &[u32] = &[8_000, 16_000, 22_050, 24_000, 48_000];
}

/// Voice activity detection defaults
pub mod vad {
    /// Fixed floor of the adaptive threshold (normalized RMS)
    pub const ENERGY_FLOOR: f32 = 0.01;

    /// Per-frame decay of the background noise estimate
    pub const NOISE_DECAY: f32 = 0.95;

    pub const SPEECH_TIMEOUT_MS: u64 = 100;

    pub const SILENCE_TIMEOUT_MS: u64 = 1_000;
}

/// Barge-in defaults
pub mod barge_in {
    pub const ENERGY_THRESHOLD: f32 = 0.02;

    pub const MIN_CONSECUTIVE_FRAMES: u32 = 3;
}

/// Sentence segmentation defaults
pub mod sentence {
    pub const MIN_LENGTH: usize = 10;

    /// Buffer length that forces a clause/phrase split
    pub const MAX_BUFFER_CHARS: usize = 200;

    pub const ABBREVIATIONS: &[&str] = &[
        "Dr.", "Mr.", "Mrs.", "Ms.", "Prof.", "Sr.", "Jr.", "St.", "vs.", "etc.", "e.g.", "i.e.",
        "approx.", "No.", "Inc.", "Ltd.", "mg.", "ml.",
    ];
}

/// Client playback defaults
pub mod playback {
    pub const MIN_BUFFER_MS: u64 = 100;

    pub const MAX_BUFFER_MS: u64 = 500;
}

/// Session lifecycle defaults
pub mod session {
    /// Inactivity before the sweep closes a session (10 minutes)
    pub const IDLE_TIMEOUT_SECS: u64 = 600;

    pub const CLEANUP_INTERVAL_SECS: u64 = 30;

    pub const MAX_SESSIONS: usize = 100;

    /// Per-session ordered event queue depth
    pub const EVENT_QUEUE_CAPACITY: usize = 256;

    pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;
}

/// Vendor connection defaults
pub mod vendor {
    pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

    pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;

    pub const INITIAL_BACKOFF_MS: u64 = 250;

    pub const STT_URL: &str = "ws://127.0.0.1:8091/v1/listen";

    pub const TTS_URL: &str = "http://127.0.0.1:8092/v1/speak";

    pub const TTS_SAMPLE_RATE: u32 = 24_000;

    pub const LLM_ENDPOINT: &str = "https://api.anthropic.com";

    pub const LLM_MODEL: &str = "claude-sonnet-4-20250514";
}
