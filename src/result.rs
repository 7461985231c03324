use std::sync::Arc;

use crate::lattice::Lattice;
use crate::logmath::{LogMath, LOG_ONE};
use crate::search::alternate::AlternateHypothesisManager;
use crate::token::Token;
use crate::types::{TimeFrame, WordResult};

/// The outcome of a `recognize` call: the surviving frontier, any tokens
/// that reached a final state, and everything needed to build a lattice.
///
/// Results are self-contained; they stay valid after `stop_recognition`
/// releases the search's own lists.
pub struct RecognitionResult {
    active_tokens: Vec<Arc<Token>>,
    final_tokens: Vec<Arc<Token>>,
    is_final: bool,
    error: Option<String>,
    alternates: Arc<AlternateHypothesisManager>,
    log_math: LogMath,
    frame_duration_ms: u64,
}

impl RecognitionResult {
    pub(crate) fn new(
        active_tokens: Vec<Arc<Token>>,
        final_tokens: Vec<Arc<Token>>,
        is_final: bool,
        alternates: Arc<AlternateHypothesisManager>,
        log_math: LogMath,
        frame_duration_ms: u64,
    ) -> Self {
        Self {
            active_tokens,
            final_tokens,
            is_final,
            error: None,
            alternates,
            log_math,
            frame_duration_ms,
        }
    }

    pub(crate) fn error_result(
        message: String,
        alternates: Arc<AlternateHypothesisManager>,
        log_math: LogMath,
        frame_duration_ms: u64,
    ) -> Self {
        Self {
            active_tokens: Vec::new(),
            final_tokens: Vec::new(),
            is_final: true,
            error: Some(message),
            alternates,
            log_math,
            frame_duration_ms,
        }
    }

    /// True once the utterance is fully decoded (end of data reached).
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// Why the utterance was aborted, if it was.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.active_tokens.is_empty() && self.final_tokens.is_empty()
    }

    pub fn active_tokens(&self) -> &[Arc<Token>] {
        &self.active_tokens
    }

    /// Tokens that reached a final search state.
    pub fn final_tokens(&self) -> &[Arc<Token>] {
        &self.final_tokens
    }

    pub fn best_final_token(&self) -> Option<&Arc<Token>> {
        self.final_tokens
            .iter()
            .min_by(|a, b| Token::compare_score_desc(a, b))
    }

    pub fn best_active_token(&self) -> Option<&Arc<Token>> {
        self.active_tokens
            .iter()
            .min_by(|a, b| Token::compare_score_desc(a, b))
    }

    /// The best token reaching a final state, falling back to the best
    /// active token when nothing reached one.
    pub fn best_token(&self) -> Option<&Arc<Token>> {
        self.best_final_token().or_else(|| self.best_active_token())
    }

    pub fn log_math(&self) -> &LogMath {
        &self.log_math
    }

    pub fn frame_duration_ms(&self) -> u64 {
        self.frame_duration_ms
    }

    /// The best path's word sequence, space separated. Fillers excluded.
    pub fn best_result_text(&self) -> String {
        self.timed_best_result(false)
            .iter()
            .map(|w| w.word().spelling().to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Words along the best token's back-path with millisecond timings.
    /// Word end frames come from the word boundaries themselves; begin
    /// frames follow the previous boundary. Confidences are log(1) here;
    /// posterior confidences come from the lattice.
    pub fn timed_best_result(&self, with_fillers: bool) -> Vec<WordResult> {
        let Some(best) = self.best_token() else {
            return Vec::new();
        };
        let mut word_tokens: Vec<Arc<Token>> = Vec::new();
        let mut cursor = Some(Arc::clone(best));
        while let Some(token) = cursor {
            if token.is_word() {
                word_tokens.push(Arc::clone(&token));
            }
            cursor = token.predecessor().cloned();
        }
        word_tokens.reverse();

        let mut results = Vec::with_capacity(word_tokens.len());
        let mut previous_end: i64 = -1;
        for token in word_tokens {
            let begin_frame = previous_end + 1;
            let end_frame = token.frame();
            previous_end = end_frame.max(previous_end);
            let Some(word) = token.word().cloned() else {
                continue;
            };
            if !with_fillers && word.is_filler() {
                continue;
            }
            let begin_ms = begin_frame.max(0) as u64 * self.frame_duration_ms;
            let end_ms = (end_frame + 1).max(0) as u64 * self.frame_duration_ms;
            results.push(WordResult::new(
                word,
                TimeFrame::new(begin_ms, end_ms.max(begin_ms)),
                token.score(),
                LOG_ONE as f32,
            ));
        }
        results
    }

    /// Builds the word lattice for this result from the surviving final
    /// tokens (or the best active token for a partial result) and the
    /// alternate predecessors archived during the search.
    pub fn lattice(&self) -> Lattice {
        let seeds: Vec<Arc<Token>> = if self.final_tokens.is_empty() {
            self.best_active_token().cloned().into_iter().collect()
        } else {
            self.final_tokens.clone()
        };
        Lattice::build(
            &seeds,
            &self.alternates,
            self.log_math,
            self.frame_duration_ms,
        )
    }
}
