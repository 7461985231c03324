use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::config::DecoderConfig;
use crate::error::DecoderError;
use crate::frontend::FrontEnd;
use crate::linguist::{SearchGraph, SearchState, StateSignature};
use crate::logmath::LogMath;
use crate::result::RecognitionResult;
use crate::scorer::AcousticScorer;
use crate::search::active_list::{ActiveList, ActiveListFactory};
use crate::search::alternate::AlternateHypothesisManager;
use crate::search::pruner::Pruner;
use crate::token::{Token, TokenId, TokenIdSource};

/// Cap on non-emitting expansion depth within one frame. A well-formed
/// search graph converges in a handful of hops; hitting the cap means the
/// linguist produced a cycle through non-emitting states.
const MAX_NON_EMITTING_DEPTH: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchPhase {
    Idle,
    Allocated,
    Running,
    Drained,
}

impl SearchPhase {
    fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Allocated => "allocated",
            Self::Running => "running",
            Self::Drained => "drained",
        }
    }
}

enum StepOutcome {
    Continue,
    EndOfData,
}

/// Frame-synchronous token-passing search.
///
/// Drives one utterance at a time: `allocate`, then per utterance
/// `start_recognition` / `recognize(block)` until a final result /
/// `stop_recognition`, and finally `deallocate`. Decoding several
/// utterances in parallel means running independent managers.
pub struct SearchManager {
    graph: Arc<dyn SearchGraph>,
    scorer: Box<dyn AcousticScorer>,
    frontend: Box<dyn FrontEnd>,
    config: DecoderConfig,
    log_math: LogMath,
    phase: SearchPhase,
    factory: ActiveListFactory,
    pruner: Pruner,
    alternates: Arc<AlternateHypothesisManager>,
    active_list: Option<ActiveList>,
    final_tokens: Vec<Arc<Token>>,
    ids: TokenIdSource,
    /// Index of the most recently scored frame; -1 before the first.
    current_frame: i64,
    end_of_data: bool,
}

impl SearchManager {
    pub fn new(
        graph: Arc<dyn SearchGraph>,
        scorer: Box<dyn AcousticScorer>,
        frontend: Box<dyn FrontEnd>,
        config: DecoderConfig,
    ) -> Self {
        let factory =
            ActiveListFactory::partitioned(config.absolute_beam_width, config.relative_beam_width);
        let pruner = Pruner::new(&config);
        let alternates = Arc::new(AlternateHypothesisManager::new(config.alt_hyp_max_edges));
        Self {
            graph,
            scorer,
            frontend,
            config,
            log_math: LogMath::default(),
            phase: SearchPhase::Idle,
            factory,
            pruner,
            alternates,
            active_list: None,
            final_tokens: Vec::new(),
            ids: TokenIdSource::default(),
            current_frame: -1,
            end_of_data: false,
        }
    }

    pub fn log_math(&self) -> &LogMath {
        &self.log_math
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Validates the configuration and allocates the scorer. Fatal on any
    /// configuration problem.
    pub fn allocate(&mut self) -> Result<(), DecoderError> {
        if self.phase != SearchPhase::Idle {
            return Err(DecoderError::state("idle", self.phase.name()));
        }
        self.config.validate()?;
        self.log_math = LogMath::new(self.config.log_base)?;
        self.factory = ActiveListFactory::partitioned(
            self.config.absolute_beam_width,
            self.config.relative_beam_width,
        );
        self.pruner = Pruner::new(&self.config);
        self.scorer.allocate()?;
        self.phase = SearchPhase::Allocated;
        tracing::debug!(
            absolute_beam_width = self.config.absolute_beam_width,
            relative_beam_width = self.config.relative_beam_width,
            strict_pruning = self.config.strict_pruning,
            "search manager allocated"
        );
        Ok(())
    }

    /// Releases scorer resources and all per-utterance state.
    pub fn deallocate(&mut self) -> Result<(), DecoderError> {
        if self.phase != SearchPhase::Allocated {
            return Err(DecoderError::state("allocated", self.phase.name()));
        }
        self.scorer.deallocate();
        self.active_list = None;
        self.final_tokens.clear();
        self.phase = SearchPhase::Idle;
        Ok(())
    }

    /// Places a single token at the graph's initial state and arms the
    /// frame loop.
    pub fn start_recognition(&mut self) -> Result<(), DecoderError> {
        if self.phase != SearchPhase::Allocated {
            return Err(DecoderError::state("allocated", self.phase.name()));
        }
        self.ids = TokenIdSource::default();
        self.alternates = Arc::new(AlternateHypothesisManager::new(self.config.alt_hyp_max_edges));
        self.final_tokens.clear();
        self.current_frame = -1;
        self.end_of_data = false;

        let mut list = self.factory.new_list();
        let initial = Token::initial(self.ids.next(), self.graph.initial_state());
        list.add(initial, &self.alternates);
        self.active_list = Some(list);
        self.phase = SearchPhase::Running;
        tracing::debug!("recognition started");
        Ok(())
    }

    /// Tears down the utterance; a result already returned by `recognize`
    /// stays valid.
    pub fn stop_recognition(&mut self) -> Result<(), DecoderError> {
        if self.phase != SearchPhase::Running && self.phase != SearchPhase::Drained {
            return Err(DecoderError::state("running or drained", self.phase.name()));
        }
        tracing::debug!(
            frames = self.current_frame + 1,
            tokens_created = self.ids.created(),
            "recognition stopped"
        );
        self.active_list = None;
        self.final_tokens.clear();
        self.phase = SearchPhase::Allocated;
        Ok(())
    }

    /// Decodes up to `block_size` frames and returns the current result, or
    /// `None` for an empty block or a drained utterance. Scorer failures
    /// abort the utterance and propagate; graph failures surface as an
    /// error-flagged result.
    pub fn recognize(
        &mut self,
        block_size: usize,
    ) -> Result<Option<RecognitionResult>, DecoderError> {
        if block_size == 0 {
            return Ok(None);
        }
        match self.phase {
            SearchPhase::Running => {}
            SearchPhase::Drained => return Ok(None),
            other => return Err(DecoderError::state("running", other.name())),
        }

        for _ in 0..block_size {
            if self.end_of_data {
                break;
            }
            match self.step() {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::EndOfData) => break,
                Err(err @ DecoderError::Graph { .. }) => {
                    tracing::warn!(error = %err, "aborting utterance on graph error");
                    self.phase = SearchPhase::Drained;
                    return Ok(Some(RecognitionResult::error_result(
                        err.to_string(),
                        Arc::clone(&self.alternates),
                        self.log_math,
                        self.config.frame_duration_ms,
                    )));
                }
                Err(err) => {
                    self.phase = SearchPhase::Drained;
                    return Err(err);
                }
            }
        }

        if self.end_of_data {
            self.phase = SearchPhase::Drained;
            self.alternates.purge();
        }

        let active_tokens = self
            .active_list
            .as_ref()
            .map(|list| list.tokens().to_vec())
            .unwrap_or_default();
        Ok(Some(RecognitionResult::new(
            active_tokens,
            self.final_tokens.clone(),
            self.end_of_data,
            Arc::clone(&self.alternates),
            self.log_math,
            self.config.frame_duration_ms,
        )))
    }

    /// One frame: grow non-emitting arcs, score, prune, expand.
    fn step(&mut self) -> Result<StepOutcome, DecoderError> {
        let list = self
            .active_list
            .take()
            .unwrap_or_else(|| self.factory.new_list());

        let emitting = match self.grow_non_emitting(list) {
            Ok(emitting) => emitting,
            Err(err) => {
                self.active_list = Some(self.factory.new_list());
                return Err(err);
            }
        };

        if emitting.is_empty() {
            // Every surviving path has reached a final state; further
            // frames cannot change the outcome.
            self.end_of_data = true;
            self.active_list = Some(emitting);
            return Ok(StepOutcome::EndOfData);
        }

        let Some(frame) = self.frontend.next_feature()? else {
            self.end_of_data = true;
            self.active_list = Some(emitting);
            return Ok(StepOutcome::EndOfData);
        };
        self.current_frame += 1;
        if frame.index() as i64 != self.current_frame {
            tracing::warn!(
                expected = self.current_frame,
                actual = frame.index(),
                "front end frame index out of step"
            );
        }

        let states: Vec<Arc<dyn SearchState>> = emitting
            .iter()
            .map(|token| Arc::clone(token.state()))
            .collect();
        let batch = self.scorer.calculate_scores_and_normalize(&frame, &states)?;
        debug_assert_eq!(batch.scores.len(), emitting.len());

        let mut scored = emitting.new_instance();
        for (token, &score) in emitting.iter().zip(batch.scores.iter()) {
            scored.add(
                token.with_acoustic_score(score, self.current_frame),
                &self.alternates,
            );
        }

        let pruned = self.pruner.prune(scored);
        tracing::debug!(
            frame = self.current_frame,
            active = pruned.len(),
            best_score = pruned.best_score(),
            batch_best = batch.best_score,
            "frame scored and pruned"
        );

        let mut next = self.factory.new_list();
        let entry_threshold = pruned.beam_threshold();
        for token in pruned.iter() {
            // Entry-time pruning gates on the predecessor's scored total,
            // never on partially-built output state, so the surviving set
            // does not depend on expansion order.
            if !self.config.strict_pruning && f64::from(token.score()) < entry_threshold {
                continue;
            }
            for arc in token.state().arcs() {
                let candidate = Token::successor(
                    self.ids.next(),
                    Arc::clone(&arc.destination),
                    Arc::clone(token),
                    arc.language_score,
                    arc.insertion_score,
                    self.current_frame,
                );
                next.add(candidate, &self.alternates);
            }
        }
        self.active_list = Some(next);
        Ok(StepOutcome::Continue)
    }

    /// Expands non-emitting states to a fixed point, recombining per state
    /// signature, and collects tokens at final states. Word-boundary tokens
    /// are gated through the word-level pruning policies between waves of
    /// expansion. Returns the purely emitting frontier.
    fn grow_non_emitting(&mut self, list: ActiveList) -> Result<ActiveList, DecoderError> {
        let mut emitting = list.new_instance();
        self.final_tokens.clear();

        let mut best_by_signature: HashMap<StateSignature, Arc<Token>> = HashMap::new();
        let mut gated: HashSet<TokenId> = HashSet::new();
        let mut queue: VecDeque<(Arc<Token>, usize)> = VecDeque::new();
        let mut wave: Vec<(Arc<Token>, usize)> = list
            .into_tokens()
            .into_iter()
            .map(|token| (token, 0))
            .collect();
        for (token, _) in &wave {
            if !token.is_emitting() {
                best_by_signature.insert(token.signature(), Arc::clone(token));
            }
        }

        while !wave.is_empty() {
            queue.extend(wave.drain(..));
            let mut word_wave: Vec<(Arc<Token>, usize)> = Vec::new();

            while let Some((token, depth)) = queue.pop_front() {
                if token.is_final() {
                    self.final_tokens.push(token);
                    continue;
                }
                if token.is_emitting() {
                    emitting.add(token, &self.alternates);
                    continue;
                }
                if token.is_word() && !gated.contains(&token.id()) {
                    // Freshly reached word boundary: hold it for the word
                    // pruning gate at the end of this wave.
                    word_wave.push((token, depth));
                    continue;
                }
                if depth >= MAX_NON_EMITTING_DEPTH {
                    return Err(DecoderError::graph(
                        "expanding non-emitting states",
                        format!(
                            "non-emitting expansion exceeded depth {MAX_NON_EMITTING_DEPTH}; \
                             the search graph has a cycle through non-emitting states"
                        ),
                    ));
                }
                for arc in token.state().arcs() {
                    let candidate = Token::successor(
                        self.ids.next(),
                        Arc::clone(&arc.destination),
                        Arc::clone(&token),
                        arc.language_score,
                        arc.insertion_score,
                        token.frame(),
                    );
                    if candidate.is_emitting() {
                        // Emitting children recombine inside the output
                        // list when they are popped.
                        queue.push_back((candidate, depth + 1));
                        continue;
                    }
                    let signature = candidate.signature();
                    match best_by_signature.get(&signature) {
                        Some(incumbent)
                            if Token::compare_score_desc(&candidate, incumbent)
                                != std::cmp::Ordering::Less =>
                        {
                            self.alternates.record_loser(incumbent, &candidate);
                        }
                        Some(incumbent) => {
                            self.alternates.record_loser(&candidate, incumbent);
                            best_by_signature.insert(signature, Arc::clone(&candidate));
                            queue.push_back((candidate, depth + 1));
                        }
                        None => {
                            best_by_signature.insert(signature, Arc::clone(&candidate));
                            queue.push_back((candidate, depth + 1));
                        }
                    }
                }
            }

            if word_wave.is_empty() {
                break;
            }
            let depths: HashMap<TokenId, usize> = word_wave
                .iter()
                .map(|(token, depth)| (token.id(), *depth))
                .collect();
            let survivors = self.pruner.prune_words(
                word_wave.into_iter().map(|(token, _)| token).collect(),
                &self.alternates,
            );
            wave = survivors
                .into_iter()
                .map(|token| {
                    gated.insert(token.id());
                    let depth = depths.get(&token.id()).copied().unwrap_or(0);
                    (token, depth)
                })
                .collect();
        }
        Ok(emitting)
    }
}
