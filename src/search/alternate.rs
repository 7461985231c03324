use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::token::{Token, TokenId};

/// Keeps the losing predecessors of Viterbi recombinations so the lattice
/// builder can restore alternate paths later.
///
/// Keys are winner token ids; values are the losers ordered as recorded.
/// `add_alternate` is atomic per map, so scorer threads never racing on it is
/// the only requirement the search loop has to uphold.
pub struct AlternateHypothesisManager {
    viterbi_losers: Mutex<HashMap<TokenId, Vec<Arc<Token>>>>,
    max_edges: usize,
}

impl AlternateHypothesisManager {
    pub fn new(max_edges: usize) -> Self {
        Self {
            viterbi_losers: Mutex::new(HashMap::new()),
            max_edges,
        }
    }

    /// Records a predecessor that lost a recombination against `token`'s own
    /// predecessor. Recording a token's current predecessor as its own
    /// alternate is a caller bug.
    pub fn add_alternate(&self, token: &Token, predecessor: Arc<Token>) {
        debug_assert!(
            token
                .predecessor()
                .map_or(true, |p| p.id() != predecessor.id()),
            "alternate predecessor must differ from the viterbi predecessor"
        );
        let mut map = self.viterbi_losers.lock().expect("alternate map poisoned");
        map.entry(token.id()).or_default().push(predecessor);
    }

    /// Archives the losing side of a recombination. The loser's predecessor
    /// is recorded against the winner unless both hypotheses share it.
    pub fn record_loser(&self, winner: &Token, loser: &Token) {
        let Some(loser_pred) = loser.predecessor() else {
            return;
        };
        let differs = winner
            .predecessor()
            .map_or(true, |winner_pred| winner_pred.id() != loser_pred.id());
        if differs {
            self.add_alternate(winner, Arc::clone(loser_pred));
        }
    }

    pub fn has_alternates(&self, token: TokenId) -> bool {
        let map = self.viterbi_losers.lock().expect("alternate map poisoned");
        map.contains_key(&token)
    }

    pub fn alternates(&self, token: TokenId) -> Option<Vec<Arc<Token>>> {
        let map = self.viterbi_losers.lock().expect("alternate map poisoned");
        map.get(&token).cloned()
    }

    /// Truncates every loser list to `max_edges - 1` entries, keeping the
    /// highest-scoring losers.
    pub fn purge(&self) {
        let keep = self.max_edges.saturating_sub(1);
        let mut map = self.viterbi_losers.lock().expect("alternate map poisoned");
        for losers in map.values_mut() {
            if losers.len() > keep {
                losers.sort_by(|a, b| Token::compare_score_desc(a, b));
                losers.truncate(keep);
            }
        }
    }

    pub fn len(&self) -> usize {
        let map = self.viterbi_losers.lock().expect("alternate map poisoned");
        map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every record. Called when a decode's results are released.
    pub fn clear(&self) {
        let mut map = self.viterbi_losers.lock().expect("alternate map poisoned");
        map.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linguist::{SearchArc, SearchState, StateSignature};
    use crate::token::TokenIdSource;
    use crate::types::Word;

    struct StubState(u64);

    impl SearchState for StubState {
        fn signature(&self) -> StateSignature {
            StateSignature(self.0)
        }
        fn is_emitting(&self) -> bool {
            false
        }
        fn is_final(&self) -> bool {
            false
        }
        fn word(&self) -> Option<&Word> {
            None
        }
        fn arcs(&self) -> Vec<SearchArc> {
            Vec::new()
        }
    }

    fn token(ids: &mut TokenIdSource, signature: u64, score: f32) -> Arc<Token> {
        let tok = Token::initial(ids.next(), Arc::new(StubState(signature)));
        tok.with_acoustic_score(score, 0)
    }

    #[test]
    fn purge_keeps_best_losers() {
        let mut ids = TokenIdSource::default();
        let manager = AlternateHypothesisManager::new(3);
        let winner = token(&mut ids, 1, 0.0);

        manager.add_alternate(&winner, token(&mut ids, 2, -3.0));
        manager.add_alternate(&winner, token(&mut ids, 3, -1.0));
        manager.add_alternate(&winner, token(&mut ids, 4, -2.0));
        manager.purge();

        let losers = manager.alternates(winner.id()).unwrap();
        assert_eq!(losers.len(), 2);
        assert_eq!(losers[0].score(), -1.0);
        assert_eq!(losers[1].score(), -2.0);
    }

    #[test]
    fn unknown_token_has_no_alternates() {
        let mut ids = TokenIdSource::default();
        let manager = AlternateHypothesisManager::new(2);
        let tok = token(&mut ids, 1, 0.0);
        assert!(!manager.has_alternates(tok.id()));
        assert!(manager.alternates(tok.id()).is_none());
    }
}
