use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::linguist::StateSignature;
use crate::search::alternate::AlternateHypothesisManager;
use crate::token::Token;
use crate::types::Word;

/// Selection strategy used by [`ActiveList::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActiveListKind {
    /// Full sort, then truncate to the absolute beam.
    Standard,
    /// Hoare-partition selection of the top K; cheaper when K is much
    /// smaller than the frontier.
    #[default]
    Partitioned,
    /// Score-sorted walk enforcing per-word and filler quotas before the
    /// absolute beam.
    Word,
}

/// Beam policy plus list kind; stamped onto every list it creates.
#[derive(Debug, Clone, Copy)]
pub struct ActiveListFactory {
    kind: ActiveListKind,
    absolute_beam_width: usize,
    /// Log-domain delta, <= 0; 0.0 disables the relative beam.
    relative_beam_width: f64,
    /// 0 disables the per-word cap.
    max_paths_per_word: usize,
    /// 0 disables the filler cap.
    max_filler_words: usize,
}

impl ActiveListFactory {
    pub fn standard(absolute_beam_width: usize, relative_beam_width: f64) -> Self {
        Self {
            kind: ActiveListKind::Standard,
            absolute_beam_width,
            relative_beam_width,
            max_paths_per_word: 0,
            max_filler_words: 0,
        }
    }

    pub fn partitioned(absolute_beam_width: usize, relative_beam_width: f64) -> Self {
        Self {
            kind: ActiveListKind::Partitioned,
            ..Self::standard(absolute_beam_width, relative_beam_width)
        }
    }

    pub fn word(
        absolute_beam_width: usize,
        relative_beam_width: f64,
        max_paths_per_word: usize,
        max_filler_words: usize,
    ) -> Self {
        Self {
            kind: ActiveListKind::Word,
            absolute_beam_width,
            relative_beam_width,
            max_paths_per_word,
            max_filler_words,
        }
    }

    pub fn new_list(&self) -> ActiveList {
        ActiveList {
            factory: *self,
            tokens: Vec::new(),
            by_signature: HashMap::new(),
            best: None,
        }
    }
}

/// The frontier of surviving hypotheses for one frame.
///
/// `add` performs Viterbi recombination per state signature; `commit`
/// applies the beam policies and returns the pruned successor list. All
/// scores are in the decoder's log base.
pub struct ActiveList {
    factory: ActiveListFactory,
    tokens: Vec<Arc<Token>>,
    by_signature: HashMap<StateSignature, usize>,
    best: Option<Arc<Token>>,
}

impl ActiveList {
    /// Inserts a token, recombining against any incumbent with the same
    /// state signature: the higher-scoring hypothesis survives and the
    /// loser's predecessor is archived for lattice construction. Returns
    /// true if the token is now the live hypothesis for its signature.
    pub fn add(&mut self, token: Arc<Token>, alternates: &AlternateHypothesisManager) -> bool {
        let signature = token.signature();
        let kept = match self.by_signature.get(&signature) {
            Some(&index) => {
                let incumbent = &self.tokens[index];
                if Token::compare_score_desc(&token, incumbent) == Ordering::Less {
                    alternates.record_loser(&token, incumbent);
                    self.tokens[index] = Arc::clone(&token);
                    true
                } else {
                    alternates.record_loser(incumbent, &token);
                    false
                }
            }
            None => {
                self.by_signature.insert(signature, self.tokens.len());
                self.tokens.push(Arc::clone(&token));
                true
            }
        };
        if kept {
            let is_new_best = self
                .best
                .as_ref()
                .map_or(true, |best| Token::compare_score_desc(&token, best) == Ordering::Less);
            if is_new_best {
                self.best = Some(token);
            }
        }
        kept
    }

    /// Applies the pruning policies and returns the surviving list.
    pub fn commit(self) -> ActiveList {
        let factory = self.factory;
        let threshold = self.beam_threshold();
        let mut tokens = self.tokens;

        if threshold > f64::from(f32::MIN) {
            tokens.retain(|t| f64::from(t.score()) >= threshold);
        }

        match factory.kind {
            ActiveListKind::Standard => {
                tokens.sort_by(|a, b| Token::compare_score_desc(a, b));
                tokens.truncate(factory.absolute_beam_width);
            }
            ActiveListKind::Partitioned => {
                select_top(&mut tokens, factory.absolute_beam_width);
                tokens.truncate(factory.absolute_beam_width);
            }
            ActiveListKind::Word => {
                tokens.sort_by(|a, b| Token::compare_score_desc(a, b));
                apply_word_quotas(
                    &mut tokens,
                    factory.max_paths_per_word,
                    factory.max_filler_words,
                );
                tokens.truncate(factory.absolute_beam_width);
            }
        }

        let mut committed = factory.new_list();
        for token in tokens {
            let signature = token.signature();
            committed.by_signature.insert(signature, committed.tokens.len());
            let is_new_best = committed
                .best
                .as_ref()
                .map_or(true, |best| Token::compare_score_desc(&token, best) == Ordering::Less);
            if is_new_best {
                committed.best = Some(Arc::clone(&token));
            }
            committed.tokens.push(token);
        }
        committed
    }

    pub fn best(&self) -> Option<&Arc<Token>> {
        self.best.as_ref()
    }

    pub fn best_score(&self) -> f64 {
        self.best
            .as_ref()
            .map_or(f64::from(f32::MIN), |t| f64::from(t.score()))
    }

    /// `best_score + relative_beam_width`, or an accept-everything floor
    /// when the relative beam is disabled.
    pub fn beam_threshold(&self) -> f64 {
        if self.factory.relative_beam_width == 0.0 || self.best.is_none() {
            f64::from(f32::MIN)
        } else {
            self.best_score() + self.factory.relative_beam_width
        }
    }

    /// Lowest kept score when the list is at capacity; otherwise a floor
    /// that accepts anything.
    pub fn worst_score(&self) -> f64 {
        if self.tokens.len() < self.factory.absolute_beam_width {
            return f64::from(f32::MIN);
        }
        self.tokens
            .iter()
            .map(|t| f64::from(t.score()))
            .fold(f64::INFINITY, f64::min)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Token>> {
        self.tokens.iter()
    }

    pub fn tokens(&self) -> &[Arc<Token>] {
        &self.tokens
    }

    pub(crate) fn into_tokens(self) -> Vec<Arc<Token>> {
        self.tokens
    }

    pub fn new_instance(&self) -> ActiveList {
        self.factory.new_list()
    }

    pub(crate) fn factory(&self) -> &ActiveListFactory {
        &self.factory
    }
}

/// Walks score-sorted tokens dropping those over the filler quota or the
/// per-word path quota.
fn apply_word_quotas(tokens: &mut Vec<Arc<Token>>, max_paths_per_word: usize, max_filler_words: usize) {
    let mut filler_count = 0usize;
    let mut per_word: HashMap<Word, usize> = HashMap::new();
    tokens.retain(|token| {
        let Some(word) = token.word() else {
            return true;
        };
        if max_filler_words > 0 && word.is_filler() {
            if filler_count >= max_filler_words {
                return false;
            }
            filler_count += 1;
        }
        if max_paths_per_word > 0 {
            // At most max_paths_per_word - 1 tokens survive per word label.
            let count = per_word.entry(word.clone()).or_insert(0);
            if *count >= max_paths_per_word.saturating_sub(1) {
                return false;
            }
            *count += 1;
        }
        true
    });
}

/// Hoare-style selection: after the call the first `k` slots hold the `k`
/// best tokens (unordered beyond that).
fn select_top(tokens: &mut [Arc<Token>], k: usize) {
    if k == 0 || k >= tokens.len() {
        return;
    }
    let mut lo = 0usize;
    let mut hi = tokens.len() - 1;
    loop {
        let p = partition(tokens, lo, hi);
        match p.cmp(&(k - 1)) {
            Ordering::Equal => return,
            Ordering::Less => lo = p + 1,
            Ordering::Greater => {
                if p == 0 {
                    return;
                }
                hi = p - 1;
            }
        }
    }
}

fn partition(tokens: &mut [Arc<Token>], lo: usize, hi: usize) -> usize {
    let mid = lo + (hi - lo) / 2;
    tokens.swap(mid, hi);
    let mut store = lo;
    for i in lo..hi {
        if Token::compare_score_desc(&tokens[i], &tokens[hi]) == Ordering::Less {
            tokens.swap(i, store);
            store += 1;
        }
    }
    tokens.swap(store, hi);
    store
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linguist::{SearchArc, SearchState};
    use crate::token::TokenIdSource;

    struct StubState {
        signature: StateSignature,
        word: Option<Word>,
    }

    impl SearchState for StubState {
        fn signature(&self) -> StateSignature {
            self.signature
        }
        fn is_emitting(&self) -> bool {
            true
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

    fn plain_token(ids: &mut TokenIdSource, signature: u64, score: f32) -> Arc<Token> {
        let state = Arc::new(StubState {
            signature: StateSignature(signature),
            word: None,
        });
        Token::initial(ids.next(), state).with_acoustic_score(score, 0)
    }

    fn word_token(ids: &mut TokenIdSource, signature: u64, score: f32, word: Word) -> Arc<Token> {
        let state = Arc::new(StubState {
            signature: StateSignature(signature),
            word: Some(word),
        });
        Token::initial(ids.next(), state).with_acoustic_score(score, 0)
    }

    #[test]
    fn add_recombines_by_signature() {
        let mut ids = TokenIdSource::default();
        let alternates = AlternateHypothesisManager::new(4);
        let mut list = ActiveListFactory::standard(10, 0.0).new_list();

        assert!(list.add(plain_token(&mut ids, 7, -2.0), &alternates));
        assert!(list.add(plain_token(&mut ids, 7, -1.0), &alternates));
        assert!(!list.add(plain_token(&mut ids, 7, -3.0), &alternates));

        assert_eq!(list.len(), 1);
        assert_eq!(list.best().unwrap().score(), -1.0);
    }

    #[test]
    fn commit_applies_absolute_beam() {
        let mut ids = TokenIdSource::default();
        let alternates = AlternateHypothesisManager::new(4);
        let mut list = ActiveListFactory::standard(3, 0.0).new_list();
        for i in 0..10 {
            list.add(plain_token(&mut ids, i, -(i as f32)), &alternates);
        }
        let committed = list.commit();
        assert_eq!(committed.len(), 3);
        let scores: Vec<f32> = committed.iter().map(|t| t.score()).collect();
        assert_eq!(scores, vec![0.0, -1.0, -2.0]);
    }

    #[test]
    fn partitioned_commit_keeps_same_survivor_set() {
        let mut ids = TokenIdSource::default();
        let alternates = AlternateHypothesisManager::new(4);
        let mut list = ActiveListFactory::partitioned(4, 0.0).new_list();
        for i in 0..32 {
            // Scatter scores so insertion order and score order disagree.
            let score = -(((i * 13) % 32) as f32);
            list.add(plain_token(&mut ids, i, score), &alternates);
        }
        let committed = list.commit();
        assert_eq!(committed.len(), 4);
        let mut scores: Vec<f32> = committed.iter().map(|t| t.score()).collect();
        scores.sort_by(|a, b| b.total_cmp(a));
        assert_eq!(scores, vec![0.0, -1.0, -2.0, -3.0]);
    }

    #[test]
    fn commit_applies_relative_beam() {
        let mut ids = TokenIdSource::default();
        let alternates = AlternateHypothesisManager::new(4);
        let mut list = ActiveListFactory::standard(100, -1.5).new_list();
        list.add(plain_token(&mut ids, 1, 0.0), &alternates);
        list.add(plain_token(&mut ids, 2, -1.0), &alternates);
        list.add(plain_token(&mut ids, 3, -2.0), &alternates);

        assert_eq!(list.beam_threshold(), -1.5);
        let committed = list.commit();
        assert_eq!(committed.len(), 2);
        for token in committed.iter() {
            assert!(f64::from(token.score()) >= -1.5);
        }
    }

    #[test]
    fn relative_beam_zero_is_disabled() {
        let mut ids = TokenIdSource::default();
        let alternates = AlternateHypothesisManager::new(4);
        let mut list = ActiveListFactory::standard(100, 0.0).new_list();
        list.add(plain_token(&mut ids, 1, 0.0), &alternates);
        list.add(plain_token(&mut ids, 2, -500.0), &alternates);
        assert_eq!(list.commit().len(), 2);
    }

    #[test]
    fn word_commit_enforces_quotas() {
        let mut ids = TokenIdSource::default();
        let alternates = AlternateHypothesisManager::new(4);
        let mut list = ActiveListFactory::word(100, 0.0, 2, 1).new_list();
        let hello = Word::new("HELLO", false);

        for i in 0..4 {
            list.add(
                word_token(&mut ids, 10 + i, -(i as f32), hello.clone()),
                &alternates,
            );
        }
        for i in 0..3 {
            list.add(
                word_token(&mut ids, 20 + i, -10.0 - i as f32, Word::silence()),
                &alternates,
            );
        }

        let committed = list.commit();
        let hello_count = committed
            .iter()
            .filter(|t| t.word().map(Word::spelling) == Some("HELLO"))
            .count();
        let filler_count = committed.iter().filter(|t| t.word().is_some_and(Word::is_filler)).count();
        // A path quota of 2 keeps one HELLO token.
        assert_eq!(hello_count, 1);
        assert_eq!(filler_count, 1);
        // Score order means the best HELLO path survived.
        assert_eq!(committed.best().unwrap().score(), 0.0);
    }

    #[test]
    fn max_paths_per_word_zero_disables_cap() {
        let mut ids = TokenIdSource::default();
        let alternates = AlternateHypothesisManager::new(4);
        let mut list = ActiveListFactory::word(100, 0.0, 0, 0).new_list();
        let hello = Word::new("HELLO", false);
        for i in 0..8 {
            list.add(
                word_token(&mut ids, 10 + i, -(i as f32), hello.clone()),
                &alternates,
            );
        }
        assert_eq!(list.commit().len(), 8);
    }

    #[test]
    fn recombination_records_losing_predecessor() {
        let mut ids = TokenIdSource::default();
        let alternates = AlternateHypothesisManager::new(4);
        let mut list = ActiveListFactory::standard(10, 0.0).new_list();

        let pred_a = plain_token(&mut ids, 100, -1.0);
        let pred_b = plain_token(&mut ids, 200, -2.0);
        let shared = Arc::new(StubState {
            signature: StateSignature(7),
            word: None,
        });
        let winner = Token::successor(ids.next(), shared.clone(), pred_a, 0.0, 0.0, 0);
        let loser = Token::successor(ids.next(), shared, pred_b, 0.0, 0.0, 0);

        list.add(Arc::clone(&winner), &alternates);
        list.add(loser, &alternates);

        let recorded = alternates.alternates(winner.id()).unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].score(), -2.0);
    }

    #[test]
    fn worst_score_is_floor_under_capacity() {
        let mut ids = TokenIdSource::default();
        let alternates = AlternateHypothesisManager::new(4);
        let mut list = ActiveListFactory::standard(2, 0.0).new_list();
        list.add(plain_token(&mut ids, 1, -1.0), &alternates);
        assert_eq!(list.worst_score(), f64::from(f32::MIN));
        list.add(plain_token(&mut ids, 2, -4.0), &alternates);
        assert_eq!(list.worst_score(), -4.0);
    }
}
