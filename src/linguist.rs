use std::fmt;
use std::sync::Arc;

use crate::types::Word;

/// Stable identity of a search state, used for token recombination. Two
/// states with the same signature are the same destination for the purposes
/// of Viterbi recombination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateSignature(pub u64);

impl fmt::Display for StateSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// An outgoing arc of a search state. Scores are in the decoder's log base.
#[derive(Clone)]
pub struct SearchArc {
    pub destination: Arc<dyn SearchState>,
    pub language_score: f32,
    pub insertion_score: f32,
}

impl SearchArc {
    pub fn new(
        destination: Arc<dyn SearchState>,
        language_score: f32,
        insertion_score: f32,
    ) -> Self {
        Self {
            destination,
            language_score,
            insertion_score,
        }
    }
}

impl fmt::Debug for SearchArc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchArc")
            .field("destination", &self.destination.signature())
            .field("language_score", &self.language_score)
            .field("insertion_score", &self.insertion_score)
            .finish()
    }
}

/// A state in the linguist's search graph.
///
/// The graph may be generated lazily; the decoder never assumes it is finite
/// or fully materialized, and only ever walks it through `arcs`.
pub trait SearchState: Send + Sync {
    fn signature(&self) -> StateSignature;

    /// True if entering this state consumes one feature frame.
    fn is_emitting(&self) -> bool;

    fn is_final(&self) -> bool;

    /// The word this state ends, if it is a word boundary.
    fn word(&self) -> Option<&Word>;

    fn is_word(&self) -> bool {
        self.word().is_some()
    }

    fn arcs(&self) -> Vec<SearchArc>;
}

/// Read-only view of the linguist's search space. Must be safe to share
/// across threads for reading.
pub trait SearchGraph: Send + Sync {
    fn initial_state(&self) -> Arc<dyn SearchState>;
}
