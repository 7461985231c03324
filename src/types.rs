use std::fmt;
use std::sync::Arc;

use crate::logmath::{LogMath, LOG_ONE};

/// A dictionary word as seen by the search graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Word {
    spelling: Arc<str>,
    filler: bool,
}

impl Word {
    pub const SENTENCE_START: &'static str = "<s>";
    pub const SENTENCE_END: &'static str = "</s>";
    pub const SILENCE: &'static str = "<sil>";

    pub fn new(spelling: impl Into<Arc<str>>, filler: bool) -> Self {
        Self {
            spelling: spelling.into(),
            filler,
        }
    }

    pub fn sentence_start() -> Self {
        Self::new(Self::SENTENCE_START, false)
    }

    pub fn sentence_end() -> Self {
        Self::new(Self::SENTENCE_END, false)
    }

    pub fn silence() -> Self {
        Self::new(Self::SILENCE, true)
    }

    pub fn spelling(&self) -> &str {
        &self.spelling
    }

    pub fn is_filler(&self) -> bool {
        self.filler || self.spelling.as_ref() == "<skip>"
    }

    pub fn is_sentence_start(&self) -> bool {
        self.spelling.as_ref() == Self::SENTENCE_START
    }

    pub fn is_sentence_end(&self) -> bool {
        self.spelling.as_ref() == Self::SENTENCE_END
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spelling)
    }
}

/// One acoustic feature frame. The payload is opaque to the decoder; only
/// the frame index and duration are interpreted.
#[derive(Debug, Clone)]
pub struct Feature {
    index: u64,
    duration_ms: u64,
    data: Arc<[f32]>,
}

impl Feature {
    pub const DEFAULT_DURATION_MS: u64 = 10;

    pub fn new(index: u64, duration_ms: u64, data: impl Into<Arc<[f32]>>) -> Self {
        Self {
            index,
            duration_ms,
            data: data.into(),
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

/// Millisecond interval of a recognized word, [begin_ms, end_ms).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct TimeFrame {
    pub begin_ms: u64,
    pub end_ms: u64,
}

impl TimeFrame {
    pub fn new(begin_ms: u64, end_ms: u64) -> Self {
        Self { begin_ms, end_ms }
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.begin_ms)
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.begin_ms, self.end_ms)
    }
}

/// A word in a recognition result, with timing, Viterbi score, and a log
/// posterior confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct WordResult {
    word: Word,
    time_frame: TimeFrame,
    score: f32,
    log_confidence: f32,
}

impl WordResult {
    pub fn new(word: Word, time_frame: TimeFrame, score: f32, log_confidence: f32) -> Self {
        Self {
            word,
            time_frame,
            score,
            log_confidence,
        }
    }

    pub fn word(&self) -> &Word {
        &self.word
    }

    pub fn time_frame(&self) -> TimeFrame {
        self.time_frame
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    /// Log posterior confidence, capped at log(1) to mask floating-point
    /// overshoot in the forward/backward pass.
    pub fn log_confidence(&self) -> f32 {
        self.log_confidence.min(LOG_ONE as f32)
    }

    /// Linear confidence in [0, 1].
    pub fn confidence_linear(&self, log_math: &LogMath) -> f64 {
        log_math
            .log_to_linear(f64::from(self.log_confidence()))
            .clamp(0.0, 1.0)
    }

    pub fn is_filler(&self) -> bool {
        self.word.is_filler()
    }
}

impl fmt::Display for WordResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}, [{}]}}", self.word, self.time_frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filler_detection() {
        assert!(Word::silence().is_filler());
        assert!(Word::new("<skip>", false).is_filler());
        assert!(!Word::new("HELLO", false).is_filler());
        assert!(!Word::sentence_start().is_filler());
    }

    #[test]
    fn confidence_is_capped_at_log_one() {
        let result = WordResult::new(
            Word::new("HELLO", false),
            TimeFrame::new(0, 100),
            -20.0,
            0.3,
        );
        assert_eq!(result.log_confidence(), 0.0);
        let lm = LogMath::default();
        assert_eq!(result.confidence_linear(&lm), 1.0);
    }

    #[test]
    fn confidence_linear_range() {
        let lm = LogMath::default();
        let result = WordResult::new(
            Word::new("HELLO", false),
            TimeFrame::new(0, 100),
            -20.0,
            -0.5,
        );
        let linear = result.confidence_linear(&lm);
        assert!(linear > 0.0 && linear < 1.0);
        assert!((linear - (-0.5f64).exp()).abs() < 1e-6);
    }
}
