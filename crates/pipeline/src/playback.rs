//! Playback jitter buffer for synthesized audio (client side)
//!
//! Absorbs network jitter before playback: chunks are held in sequence
//! order until at least `min_buffer_ms` is buffered, then scheduled
//! back-to-back on a running "next play time" cursor so playback is
//! gapless. When more than `max_buffer_ms` is queued the oldest chunk is
//! dropped to bound latency.
//!
//! The buffer is driven by an external clock (`now` is the player's
//! current output time), which keeps it usable with any audio backend.

use std::collections::VecDeque;
use std::time::Duration;

use voice_session_config::PlaybackConfig;
use voice_session_core::audio::{pcm16_duration, pcm16_to_f32};
use voice_session_core::{Channels, SampleRate, SynthesisChunk};

/// Decoded chunk with its scheduled start time
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledChunk {
    pub sequence: u64,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Output time at which playback of this chunk begins
    pub start_at: Duration,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
struct QueuedChunk {
    sequence: u64,
    chunk: SynthesisChunk,
    duration: Duration,
}

/// Client-side jitter buffer
#[derive(Debug)]
pub struct JitterBuffer {
    config: PlaybackConfig,
    queue: VecDeque<QueuedChunk>,
    buffered: Duration,
    next_play_time: Duration,
    /// Lowest sequence still accepted; older chunks arrive too late
    next_sequence: u64,
    playing: bool,
    paused: bool,
    end_of_stream: bool,
    dropped: u64,
}

impl JitterBuffer {
    pub fn new(config: PlaybackConfig) -> Self {
        Self {
            config,
            queue: VecDeque::new(),
            buffered: Duration::ZERO,
            next_play_time: Duration::ZERO,
            next_sequence: 0,
            playing: false,
            paused: false,
            end_of_stream: false,
            dropped: 0,
        }
    }

    /// Queue a chunk in sequence order. Returns false if it arrived after
    /// its slot was already scheduled or dropped, or if its sample rate is
    /// not one the buffer can time.
    pub fn push(&mut self, chunk: SynthesisChunk) -> bool {
        if chunk.sequence < self.next_sequence {
            tracing::debug!(sequence = chunk.sequence, "Discarding late audio chunk");
            return false;
        }

        let Some(rate) = SampleRate::from_u32(chunk.sample_rate) else {
            tracing::warn!(
                sequence = chunk.sequence,
                sample_rate = chunk.sample_rate,
                "Unsupported sample rate, discarding audio chunk"
            );
            return false;
        };
        let duration = pcm16_duration(chunk.audio.len(), rate, Channels::Mono);
        let position = self
            .queue
            .iter()
            .position(|q| q.sequence > chunk.sequence)
            .unwrap_or(self.queue.len());

        self.buffered += duration;
        self.queue.insert(
            position,
            QueuedChunk {
                sequence: chunk.sequence,
                chunk,
                duration,
            },
        );

        let max = Duration::from_millis(self.config.max_buffer_ms);
        while self.buffered > max {
            match self.queue.pop_front() {
                Some(oldest) => {
                    self.buffered -= oldest.duration;
                    self.next_sequence = self.next_sequence.max(oldest.sequence + 1);
                    self.dropped += 1;
                    tracing::debug!(sequence = oldest.sequence, "Jitter buffer overflow, dropped oldest chunk");
                }
                None => break,
            }
        }
        true
    }

    /// Mark the end of the current synthesis stream so a short tail below
    /// the start threshold is still played.
    pub fn mark_end_of_stream(&mut self) {
        self.end_of_stream = true;
    }

    /// Schedule every chunk that may start now.
    ///
    /// Playback starts once the buffered duration reaches the minimum (or
    /// the stream has ended). An underrun returns to buffering.
    pub fn poll(&mut self, now: Duration) -> Vec<ScheduledChunk> {
        if self.paused {
            return Vec::new();
        }

        // Underrun: the cursor fell behind the output clock
        let drained = self.queue.is_empty() && self.next_play_time <= now;
        if self.playing && (drained || self.next_play_time < now) {
            self.playing = false;
        }

        if !self.playing {
            let min = Duration::from_millis(self.config.min_buffer_ms);
            if self.queue.is_empty() || (self.buffered < min && !self.end_of_stream) {
                return Vec::new();
            }
            self.playing = true;
        }

        let mut scheduled = Vec::with_capacity(self.queue.len());
        while let Some(queued) = self.queue.pop_front() {
            let start_at = self.next_play_time.max(now);
            self.next_play_time = start_at + queued.duration;
            self.buffered -= queued.duration;
            self.next_sequence = queued.sequence + 1;

            scheduled.push(ScheduledChunk {
                sequence: queued.sequence,
                samples: pcm16_to_f32(&queued.chunk.audio),
                sample_rate: queued.chunk.sample_rate,
                start_at,
                duration: queued.duration,
            });
        }
        if self.queue.is_empty() && self.end_of_stream {
            self.end_of_stream = false;
        }
        scheduled
    }

    /// Stop consuming the queue without clearing it
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Continue from where playback left off
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Drop everything (barge-in or new response)
    pub fn clear(&mut self) {
        self.queue.clear();
        self.buffered = Duration::ZERO;
        self.playing = false;
        self.end_of_stream = false;
        self.next_sequence = 0;
    }

    pub fn buffered(&self) -> Duration {
        self.buffered
    }

    pub fn is_playing(&self) -> bool {
        self.playing && !self.paused
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
