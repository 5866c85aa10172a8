//! Sentence boundary detector for streaming LLM output
//!
//! Buffers text increments and emits speakable units as soon as a
//! boundary is safe, so synthesis can start before the full response is
//! available. Boundaries are terminal punctuation followed by whitespace;
//! a candidate is rejected when it is too short, ends in a known
//! abbreviation, or contains no word characters.

use voice_session_config::SentenceConfig;

const TERMINATORS: &[char] = &['.', '!', '?', '…'];
const CLOSERS: &[char] = &['"', '\'', ')', ']', '\u{201D}', '\u{2019}'];
const SOFT_BREAKS: &[char] = &[',', ';', ':'];

const CONJUNCTIONS: &[&str] = &[
    "and", "but", "or", "so", "because", "although", "while", "which", "that", "if", "when",
];

const VERB_HINTS: &[&str] = &[
    "is", "are", "was", "were", "be", "been", "am", "has", "have", "had", "do", "does", "did",
    "will", "would", "can", "could", "should", "may", "might", "must", "take", "takes", "get",
    "gets", "need", "needs", "see", "saw", "go", "goes", "make", "makes", "help", "let",
];

/// Label for an emitted unit. Best effort, not used for control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Sentence,
    Clause,
    Phrase,
}

/// Text judged safe to hand to synthesis
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakableUnit {
    pub text: String,
    pub kind: UnitKind,
    /// Heuristic boundary confidence in [0, 1]
    pub confidence: f32,
    /// False for text flushed at end of stream
    pub is_complete: bool,
}

/// Streaming sentence boundary detector
#[derive(Debug, Clone)]
pub struct SentenceBoundaryDetector {
    config: SentenceConfig,
    buffer: String,
}

impl SentenceBoundaryDetector {
    pub fn new(config: SentenceConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
        }
    }

    /// Append a text increment and return every unit it completes
    pub fn add_text(&mut self, text: &str) -> Vec<SpeakableUnit> {
        self.buffer.push_str(text);

        let mut units = self.extract_sentences();
        while self.buffer.chars().count() > self.config.max_buffer_chars {
            match self.force_split() {
                Some(unit) => units.push(unit),
                None => break,
            }
        }
        units
    }

    /// Return the unconsumed remainder as a low-confidence incomplete unit
    pub fn flush(&mut self) -> Option<SpeakableUnit> {
        let text = self.buffer.trim().to_string();
        self.buffer.clear();

        if text.is_empty() || !text.chars().any(char::is_alphanumeric) {
            return None;
        }
        Some(SpeakableUnit {
            kind: classify(&text),
            confidence: score(&text) * 0.5,
            is_complete: false,
            text,
        })
    }

    /// Discard buffered text
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Buffered text not yet emitted
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    fn extract_sentences(&mut self) -> Vec<SpeakableUnit> {
        let chars: Vec<(usize, char)> = self.buffer.char_indices().collect();
        let mut units = Vec::new();
        let mut start = 0;
        let mut i = 0;

        while i < chars.len() {
            let terminal = chars[i].1;
            if !TERMINATORS.contains(&terminal) {
                i += 1;
                continue;
            }

            // Absorb "?!", "..." and closing quotes/brackets
            let mut j = i + 1;
            while j < chars.len() && (TERMINATORS.contains(&chars[j].1) || CLOSERS.contains(&chars[j].1)) {
                j += 1;
            }
            if j >= chars.len() {
                // Need the next character to decide
                break;
            }
            if !chars[j].1.is_whitespace() {
                i = j;
                continue;
            }

            let candidate = self.buffer[start..chars[j].0].trim();
            if self.accepts(candidate, terminal) {
                units.push(SpeakableUnit {
                    text: candidate.to_string(),
                    kind: classify(candidate),
                    confidence: score(candidate),
                    is_complete: true,
                });

                let mut k = j;
                while k < chars.len() && chars[k].1.is_whitespace() {
                    k += 1;
                }
                start = chars.get(k).map_or(self.buffer.len(), |(idx, _)| *idx);
                i = k;
            } else {
                i = j;
            }
        }

        self.buffer.drain(..start);
        units
    }

    fn accepts(&self, candidate: &str, terminal: char) -> bool {
        if candidate.chars().count() < self.config.min_length {
            return false;
        }
        if !candidate.chars().any(char::is_alphanumeric) {
            return false;
        }
        if terminal == '.' && self.ends_with_abbreviation(candidate) {
            return false;
        }
        true
    }

    fn ends_with_abbreviation(&self, candidate: &str) -> bool {
        let Some(last) = candidate.split_whitespace().last() else {
            return false;
        };
        let token = last.trim_end_matches(CLOSERS);

        // Single-letter initials ("J. Smith")
        let mut letters = token.chars();
        if let (Some(c), Some('.'), None) = (letters.next(), letters.next(), letters.next()) {
            if c.is_alphabetic() {
                return true;
            }
        }

        self.config
            .abbreviations
            .iter()
            .any(|abbr| abbr.eq_ignore_ascii_case(token))
    }

    /// Split an over-long buffer at the last soft break (or word boundary)
    /// inside the limit.
    fn force_split(&mut self) -> Option<SpeakableUnit> {
        let limit = self
            .buffer
            .char_indices()
            .nth(self.config.max_buffer_chars)
            .map_or(self.buffer.len(), |(idx, _)| idx);
        let window = &self.buffer[..limit];

        let split_at = window
            .char_indices()
            .filter(|(idx, c)| {
                SOFT_BREAKS.contains(c)
                    && window[idx + c.len_utf8()..]
                        .chars()
                        .next()
                        .map_or(false, char::is_whitespace)
            })
            .map(|(idx, c)| idx + c.len_utf8())
            .filter(|end| window[..*end].trim().chars().count() >= self.config.min_length)
            .last()
            .or_else(|| {
                window
                    .char_indices()
                    .filter(|(_, c)| c.is_whitespace())
                    .map(|(idx, _)| idx)
                    .filter(|end| window[..*end].trim().chars().count() >= self.config.min_length)
                    .last()
            })?;

        let text = self.buffer[..split_at].trim().to_string();
        self.buffer.drain(..split_at);
        let rest = self.buffer.trim_start().len();
        let trimmed = self.buffer.len() - rest;
        self.buffer.drain(..trimmed);

        tracing::trace!(len = text.len(), "forced split of long response text");
        Some(SpeakableUnit {
            kind: classify(&text),
            confidence: score(&text) * 0.8,
            is_complete: true,
            text,
        })
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
}

fn has_verb_hint(text: &str) -> bool {
    words(text).any(|w| {
        VERB_HINTS.contains(&w.as_str())
            || (w.len() > 4 && (w.ends_with("ed") || w.ends_with("ing")))
    })
}

fn has_conjunction(text: &str) -> bool {
    words(text).any(|w| CONJUNCTIONS.contains(&w.as_str()))
}

fn last_significant(text: &str) -> Option<char> {
    text.trim_end().trim_end_matches(CLOSERS).chars().last()
}

/// Heuristic confidence from length, capitalization, terminal strength and
/// verb-like tokens
fn score(text: &str) -> f32 {
    let len = text.chars().count();
    let word_count = words(text).count();
    let mut score: f32 = 0.3;

    if len >= 20 {
        score += 0.1;
    }
    if len >= 40 {
        score += 0.05;
    }
    if text
        .chars()
        .find(|c| c.is_alphabetic())
        .map_or(false, char::is_uppercase)
    {
        score += 0.1;
    }
    score += match last_significant(text) {
        Some('.') | Some('!') | Some('?') | Some('…') => 0.25,
        Some(';') | Some(':') => 0.1,
        Some(',') => 0.05,
        _ => 0.0,
    };
    if word_count >= 3 && has_verb_hint(text) {
        score += 0.2;
    }

    score.clamp(0.0, 1.0)
}

fn classify(text: &str) -> UnitKind {
    let terminal = last_significant(text);
    let verb = has_verb_hint(text);

    match terminal {
        Some(c) if TERMINATORS.contains(&c) => {
            if verb || words(text).count() >= 4 {
                UnitKind::Sentence
            } else {
                UnitKind::Phrase
            }
        }
        Some(c) if SOFT_BREAKS.contains(&c) => UnitKind::Clause,
        _ if has_conjunction(text) && verb => UnitKind::Clause,
        _ => UnitKind::Phrase,
    }
}
