//! Audio framer
//!
//! Accumulates arbitrary-length PCM16 byte runs into fixed-duration frames.

use bytes::BytesMut;

use voice_session_config::AudioConfig;
use voice_session_core::audio::pcm16_bytes_for;
use voice_session_core::{AudioFrame, Channels, SampleRate};

use crate::PipelineError;

/// Fixed-duration framer (100ms at 16kHz mono = 3200 bytes by default)
#[derive(Debug)]
pub struct AudioFramer {
    buffer: BytesMut,
    frame_bytes: usize,
    sample_rate: SampleRate,
    channels: Channels,
    sequence: u64,
}

impl AudioFramer {
    pub fn new(config: &AudioConfig) -> Result<Self, PipelineError> {
        let sample_rate = SampleRate::from_u32(config.sample_rate).ok_or_else(|| {
            PipelineError::Config(format!("unsupported sample rate {}", config.sample_rate))
        })?;
        let channels = match config.channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            n => return Err(PipelineError::Config(format!("unsupported channel count {}", n))),
        };
        let frame_bytes = pcm16_bytes_for(config.frame_ms, sample_rate, channels);
        if frame_bytes == 0 {
            return Err(PipelineError::Config("frame duration too short".to_string()));
        }

        Ok(Self {
            buffer: BytesMut::with_capacity(frame_bytes * 2),
            frame_bytes,
            sample_rate,
            channels,
            sequence: 0,
        })
    }

    /// Append bytes, returning every frame completed by them
    pub fn push(&mut self, data: &[u8]) -> Vec<AudioFrame> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::with_capacity(self.buffer.len() / self.frame_bytes);
        while self.buffer.len() >= self.frame_bytes {
            let bytes = self.buffer.split_to(self.frame_bytes).freeze();
            frames.push(self.make_frame(bytes));
        }
        frames
    }

    /// Emit the remainder as a final (possibly short) frame and clear state
    pub fn flush(&mut self) -> Option<AudioFrame> {
        if self.buffer.is_empty() {
            self.sequence = 0;
            return None;
        }
        let bytes = self.buffer.split().freeze();
        let frame = self.make_frame(bytes);
        self.sequence = 0;
        Some(frame)
    }

    /// Drop buffered bytes and restart sequence numbering. Keeps the allocation.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.sequence = 0;
    }

    fn make_frame(&mut self, bytes: bytes::Bytes) -> AudioFrame {
        let frame = AudioFrame::new(bytes, self.sample_rate, self.channels, self.sequence);
        self.sequence += 1;
        frame
    }

    /// Bytes per full frame
    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    /// Bytes waiting for the next frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
