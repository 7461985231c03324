use std::sync::Arc;

use crate::config::DecoderConfig;
use crate::search::active_list::{ActiveList, ActiveListFactory};
use crate::search::alternate::AlternateHypothesisManager;
use crate::token::Token;

/// Applies the beam policies to the search's token lists.
///
/// The main prune commits the frame's scored list under the absolute and
/// relative beams. Word-boundary tokens are additionally gated through a
/// word-constrained list (word beams plus per-word and filler quotas)
/// before their arcs are expanded.
pub struct Pruner {
    word_factory: Option<ActiveListFactory>,
}

impl Pruner {
    pub fn new(config: &DecoderConfig) -> Self {
        let word_constrained = config.word_beam_absolute > 0
            || config.word_beam_relative < 0.0
            || config.max_paths_per_word > 0
            || config.max_filler_words > 0;
        let word_factory = word_constrained.then(|| {
            let absolute = if config.word_beam_absolute == 0 {
                usize::MAX
            } else {
                config.word_beam_absolute
            };
            ActiveListFactory::word(
                absolute,
                config.word_beam_relative,
                config.max_paths_per_word,
                config.max_filler_words,
            )
        });
        Self { word_factory }
    }

    /// Prunes the frame's scored frontier.
    pub fn prune(&self, list: ActiveList) -> ActiveList {
        let before = list.len();
        let committed = list.commit();
        if committed.len() < before {
            tracing::trace!(
                before,
                after = committed.len(),
                "beam pruning dropped tokens"
            );
        }
        committed
    }

    /// Prunes a wave of word-boundary tokens under the word-level policies.
    /// A no-op passthrough when no word constraint is configured.
    pub fn prune_words(
        &self,
        tokens: Vec<Arc<Token>>,
        alternates: &AlternateHypothesisManager,
    ) -> Vec<Arc<Token>> {
        let Some(word_factory) = self.word_factory else {
            return tokens;
        };
        let before = tokens.len();
        let mut list = word_factory.new_list();
        for token in tokens {
            list.add(token, alternates);
        }
        let survivors = list.commit().into_tokens();
        if survivors.len() < before {
            tracing::trace!(
                before,
                after = survivors.len(),
                "word pruning dropped tokens"
            );
        }
        survivors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linguist::{SearchArc, SearchState, StateSignature};
    use crate::token::TokenIdSource;
    use crate::types::Word;

    struct StubState {
        signature: StateSignature,
        word: Option<Word>,
    }

    impl SearchState for StubState {
        fn signature(&self) -> StateSignature {
            self.signature
        }
        fn is_emitting(&self) -> bool {
            false
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

    fn word_token(ids: &mut TokenIdSource, signature: u64, score: f32, word: Word) -> Arc<Token> {
        let state = Arc::new(StubState {
            signature: StateSignature(signature),
            word: Some(word),
        });
        Token::initial(ids.next(), state).with_acoustic_score(score, 0)
    }

    #[test]
    fn word_pass_disabled_when_unconfigured() {
        let config = DecoderConfig {
            max_filler_words: 0,
            ..DecoderConfig::default()
        };
        let pruner = Pruner::new(&config);
        assert!(pruner.word_factory.is_none());
    }

    #[test]
    fn prune_words_caps_fillers() {
        let config = DecoderConfig {
            max_filler_words: 1,
            ..DecoderConfig::default()
        };
        let pruner = Pruner::new(&config);
        let alternates = AlternateHypothesisManager::new(4);
        let mut ids = TokenIdSource::default();

        let survivors = pruner.prune_words(
            vec![
                word_token(&mut ids, 1, -1.0, Word::new("HELLO", false)),
                word_token(&mut ids, 2, -2.0, Word::silence()),
                word_token(&mut ids, 3, -3.0, Word::silence()),
            ],
            &alternates,
        );
        assert_eq!(survivors.len(), 2);
        let fillers = survivors
            .iter()
            .filter(|t| t.word().is_some_and(Word::is_filler))
            .count();
        assert_eq!(fillers, 1);
        // The better filler is the one kept.
        assert!(survivors.iter().any(|t| t.score() == -2.0));
    }

    #[test]
    fn prune_words_caps_paths_per_word() {
        let config = DecoderConfig {
            max_paths_per_word: 2,
            max_filler_words: 0,
            ..DecoderConfig::default()
        };
        let pruner = Pruner::new(&config);
        let alternates = AlternateHypothesisManager::new(4);
        let mut ids = TokenIdSource::default();
        let hello = Word::new("HELLO", false);

        let survivors = pruner.prune_words(
            (0..5)
                .map(|i| word_token(&mut ids, 10 + i, -(i as f32), hello.clone()))
                .collect(),
            &alternates,
        );
        // A quota of 2 keeps one path per word, and score order keeps the
        // best one.
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].score(), 0.0);
    }
}
