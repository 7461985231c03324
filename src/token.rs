use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::linguist::{SearchState, StateSignature};
use crate::types::Word;

/// Identity of a token, unique within one decode. Alternate-predecessor
/// records and lattice construction key on this rather than on addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(pub(crate) u64);

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Allocates token ids for one decode.
#[derive(Debug, Default)]
pub(crate) struct TokenIdSource {
    next: u64,
}

impl TokenIdSource {
    pub(crate) fn next(&mut self) -> TokenId {
        let id = TokenId(self.next);
        self.next += 1;
        id
    }

    pub(crate) fn created(&self) -> u64 {
        self.next
    }
}

/// One search hypothesis: a state, an accumulated score, and a back-pointer.
///
/// Tokens are immutable; ancestry is shared through `Arc`, so any surviving
/// leaf keeps its whole back-path alive. Frame indices strictly increase
/// across emitting transitions, which keeps the predecessor graph acyclic.
pub struct Token {
    id: TokenId,
    state: Arc<dyn SearchState>,
    score: f32,
    acoustic_score: f32,
    language_score: f32,
    insertion_score: f32,
    /// Frame of the most recent emitting ancestor; -1 before the first frame.
    frame: i64,
    predecessor: Option<Arc<Token>>,
    /// Word of the nearest word-state ancestor (or of this state itself).
    word: Option<Word>,
}

impl Token {
    /// The token the search starts from, sitting at the graph's initial state
    /// before any frame has been consumed.
    pub(crate) fn initial(id: TokenId, state: Arc<dyn SearchState>) -> Arc<Self> {
        let word = state.word().cloned();
        Arc::new(Self {
            id,
            state,
            score: 0.0,
            acoustic_score: 0.0,
            language_score: 0.0,
            insertion_score: 0.0,
            frame: -1,
            predecessor: None,
            word,
        })
    }

    /// A successor of `predecessor` across one arc. The acoustic score is
    /// zero until the frame is scored.
    pub(crate) fn successor(
        id: TokenId,
        state: Arc<dyn SearchState>,
        predecessor: Arc<Token>,
        language_score: f32,
        insertion_score: f32,
        frame: i64,
    ) -> Arc<Self> {
        let word = match state.word() {
            Some(word) => Some(word.clone()),
            None => predecessor.word.clone(),
        };
        let score = predecessor.score + language_score + insertion_score;
        Arc::new(Self {
            id,
            state,
            score,
            acoustic_score: 0.0,
            language_score,
            insertion_score,
            frame,
            predecessor: Some(predecessor),
            word,
        })
    }

    /// The same hypothesis with the scored frame's acoustic score applied.
    /// Identity is preserved so alternate-predecessor records keyed on the
    /// unscored token still resolve.
    pub(crate) fn with_acoustic_score(&self, acoustic_score: f32, frame: i64) -> Arc<Self> {
        Arc::new(Self {
            id: self.id,
            state: Arc::clone(&self.state),
            score: self.score + acoustic_score,
            acoustic_score,
            language_score: self.language_score,
            insertion_score: self.insertion_score,
            frame,
            predecessor: self.predecessor.clone(),
            word: self.word.clone(),
        })
    }

    pub fn id(&self) -> TokenId {
        self.id
    }

    pub fn state(&self) -> &Arc<dyn SearchState> {
        &self.state
    }

    pub fn signature(&self) -> StateSignature {
        self.state.signature()
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    pub fn acoustic_score(&self) -> f32 {
        self.acoustic_score
    }

    pub fn language_score(&self) -> f32 {
        self.language_score
    }

    pub fn insertion_score(&self) -> f32 {
        self.insertion_score
    }

    pub fn frame(&self) -> i64 {
        self.frame
    }

    pub fn predecessor(&self) -> Option<&Arc<Token>> {
        self.predecessor.as_ref()
    }

    /// Word of the nearest word-state ancestor, if any.
    pub fn word(&self) -> Option<&Word> {
        self.word.as_ref()
    }

    pub fn is_emitting(&self) -> bool {
        self.state.is_emitting()
    }

    pub fn is_final(&self) -> bool {
        self.state.is_final()
    }

    pub fn is_word(&self) -> bool {
        self.state.is_word()
    }

    /// Descending score; equal scores fall back to the stable token id so
    /// distinct tokens never compare equal and sorts cannot merge them.
    pub fn compare_score_desc(a: &Token, b: &Token) -> Ordering {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.id.cmp(&b.id))
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("id", &self.id)
            .field("state", &self.state.signature())
            .field("score", &self.score)
            .field("frame", &self.frame)
            .field("word", &self.word)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linguist::SearchArc;

    struct StubState {
        signature: StateSignature,
        emitting: bool,
        word: Option<Word>,
    }

    impl SearchState for StubState {
        fn signature(&self) -> StateSignature {
            self.signature
        }
        fn is_emitting(&self) -> bool {
            self.emitting
        }
        fn is_final(&self) -> bool {
            false
        }
        fn word(&self) -> Option<&Word> {
            self.word.as_ref()
        }
        fn arcs(&self) -> Vec<SearchArc> {
            Vec::new()
        }
    }

    fn state(signature: u64, word: Option<&str>) -> Arc<dyn SearchState> {
        Arc::new(StubState {
            signature: StateSignature(signature),
            emitting: false,
            word: word.map(|w| Word::new(w, false)),
        })
    }

    #[test]
    fn score_identity_holds_through_successors() {
        let mut ids = TokenIdSource::default();
        let root = Token::initial(ids.next(), state(1, Some(Word::SENTENCE_START)));
        let child = Token::successor(ids.next(), state(2, None), Arc::clone(&root), -1.5, -0.25, 0);
        let scored = child.with_acoustic_score(-2.0, 0);

        let expected = root.score() + scored.language_score() + scored.insertion_score()
            + scored.acoustic_score();
        assert!((scored.score() - expected).abs() < 1e-5);
        assert_eq!(scored.id(), child.id());
        assert_eq!(scored.frame(), 0);
    }

    #[test]
    fn word_is_inherited_from_nearest_word_ancestor() {
        let mut ids = TokenIdSource::default();
        let root = Token::initial(ids.next(), state(1, Some("HELLO")));
        let hmm = Token::successor(ids.next(), state(2, None), Arc::clone(&root), 0.0, 0.0, 0);
        assert_eq!(hmm.word().unwrap().spelling(), "HELLO");
        let next_word = Token::successor(ids.next(), state(3, Some("WORLD")), hmm, 0.0, 0.0, 1);
        assert_eq!(next_word.word().unwrap().spelling(), "WORLD");
    }

    #[test]
    fn ordering_is_descending_with_stable_ties() {
        let mut ids = TokenIdSource::default();
        let a = Token::initial(ids.next(), state(1, None));
        let b = Token::initial(ids.next(), state(2, None));
        // Same score: the earlier id wins, and the two never compare equal.
        assert_eq!(Token::compare_score_desc(&a, &b), Ordering::Less);
        assert_eq!(Token::compare_score_desc(&b, &a), Ordering::Greater);

        let better = a.with_acoustic_score(1.0, 0);
        assert_eq!(Token::compare_score_desc(&better, &b), Ordering::Less);
    }
}
