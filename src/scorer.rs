use std::sync::Arc;

use crate::error::DecoderError;
use crate::linguist::SearchState;
use crate::types::Feature;

/// Scores for one frame over a batch of states, plus the best score for
/// relative beaming.
#[derive(Debug, Clone)]
pub struct ScoredBatch {
    pub scores: Vec<f32>,
    pub best_score: f32,
}

/// The acoustic model boundary. Given a feature frame and an emitting state,
/// returns a log-likelihood in the decoder's log base.
///
/// Implementations may parallelize internally; the decoder always hands over
/// whole frames through `calculate_scores_and_normalize` so batched Gaussian
/// evaluation stays possible.
pub trait AcousticScorer: Send {
    fn allocate(&mut self) -> Result<(), DecoderError> {
        Ok(())
    }

    fn deallocate(&mut self) {}

    fn score(&self, frame: &Feature, state: &dyn SearchState) -> Result<f32, DecoderError>;

    /// Scores every state against the frame in one call. The default
    /// implementation maps `score`; batching scorers override this.
    fn calculate_scores_and_normalize(
        &self,
        frame: &Feature,
        states: &[Arc<dyn SearchState>],
    ) -> Result<ScoredBatch, DecoderError> {
        let mut scores = Vec::with_capacity(states.len());
        let mut best_score = f32::NEG_INFINITY;
        for state in states {
            let score = self.score(frame, state.as_ref())?;
            if score > best_score {
                best_score = score;
            }
            scores.push(score);
        }
        Ok(ScoredBatch { scores, best_score })
    }
}
