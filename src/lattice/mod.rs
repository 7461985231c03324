pub mod optimizer;
pub mod posterior;
pub mod slf;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use crate::error::DecoderError;
use crate::logmath::{LogMath, LOG_ZERO};
use crate::search::alternate::AlternateHypothesisManager;
use crate::token::{Token, TokenId};
use crate::types::{TimeFrame, Word, WordResult};

pub use optimizer::{LatticeOptimizer, ScoreMergePolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub(crate) u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// One word hypothesis in the lattice, spanning `[begin_frame, end_frame]`.
#[derive(Debug, Clone)]
pub struct LatticeNode {
    id: NodeId,
    word: Word,
    begin_frame: i64,
    end_frame: i64,
    viterbi_score: f64,
    forward_score: f64,
    backward_score: f64,
    posterior: f64,
    entering: Vec<EdgeId>,
    leaving: Vec<EdgeId>,
}

impl LatticeNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn word(&self) -> &Word {
        &self.word
    }

    pub fn begin_frame(&self) -> i64 {
        self.begin_frame
    }

    pub fn end_frame(&self) -> i64 {
        self.end_frame
    }

    pub fn viterbi_score(&self) -> f64 {
        self.viterbi_score
    }

    pub fn forward_score(&self) -> f64 {
        self.forward_score
    }

    pub fn backward_score(&self) -> f64 {
        self.backward_score
    }

    /// Log posterior; [`LOG_ZERO`] until posteriors are computed.
    pub fn posterior(&self) -> f64 {
        self.posterior
    }

    pub fn entering(&self) -> &[EdgeId] {
        &self.entering
    }

    pub fn leaving(&self) -> &[EdgeId] {
        &self.leaving
    }
}

#[derive(Debug, Clone)]
pub struct LatticeEdge {
    id: EdgeId,
    from: NodeId,
    to: NodeId,
    acoustic_score: f64,
    language_score: f64,
}

impl LatticeEdge {
    pub fn id(&self) -> EdgeId {
        self.id
    }

    pub fn from(&self) -> NodeId {
        self.from
    }

    pub fn to(&self) -> NodeId {
        self.to
    }

    pub fn acoustic_score(&self) -> f64 {
        self.acoustic_score
    }

    pub fn language_score(&self) -> f64 {
        self.language_score
    }
}

/// Word-level DAG of surviving hypotheses.
///
/// Nodes and edges live in id-indexed arenas so removal during optimization
/// never invalidates other handles. There is a unique initial node (sentence
/// start) and a unique terminal node; after `remove_hanging_nodes` every
/// remaining node lies on some initial-to-terminal path.
pub struct Lattice {
    nodes: BTreeMap<NodeId, LatticeNode>,
    edges: BTreeMap<EdgeId, LatticeEdge>,
    initial: NodeId,
    terminal: NodeId,
    next_node: u64,
    next_edge: u64,
    frame_duration_ms: u64,
    log_math: LogMath,
}

impl Lattice {
    pub fn new(log_math: LogMath, frame_duration_ms: u64) -> Self {
        Self {
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
            initial: NodeId(0),
            terminal: NodeId(0),
            next_node: 0,
            next_edge: 0,
            frame_duration_ms,
            log_math,
        }
    }

    /// Builds the word lattice for a set of surviving end-of-utterance
    /// tokens plus the alternate predecessors archived during search.
    ///
    /// Every word-boundary token on a back-path becomes (or merges into) a
    /// node keyed by its word and time span; segments between word
    /// boundaries collapse into edges carrying the accumulated acoustic and
    /// language scores. The best seed's word boundary becomes the terminal
    /// node and the remaining seeds collapse onto it.
    pub fn build(
        seeds: &[Arc<Token>],
        alternates: &AlternateHypothesisManager,
        log_math: LogMath,
        frame_duration_ms: u64,
    ) -> Self {
        let mut lattice = Self::new(log_math, frame_duration_ms);
        let mut builder = LatticeBuilder {
            lattice: &mut lattice,
            alternates,
            node_by_label: HashMap::new(),
            node_by_token: HashMap::new(),
            processed: HashSet::new(),
            pending: VecDeque::new(),
        };
        builder.run(seeds);
        lattice.remove_hanging_nodes();
        tracing::debug!(
            nodes = lattice.node_count(),
            edges = lattice.edge_count(),
            "lattice built"
        );
        lattice
    }

    pub fn log_math(&self) -> &LogMath {
        &self.log_math
    }

    pub fn frame_duration_ms(&self) -> u64 {
        self.frame_duration_ms
    }

    pub fn initial_node(&self) -> NodeId {
        self.initial
    }

    pub fn set_boundaries(&mut self, initial: NodeId, terminal: NodeId) {
        self.initial = initial;
        self.terminal = terminal;
    }

    pub fn terminal_node(&self) -> NodeId {
        self.terminal
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn has_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node(&self, id: NodeId) -> Option<&LatticeNode> {
        self.nodes.get(&id)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut LatticeNode> {
        self.nodes.get_mut(&id)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&LatticeEdge> {
        self.edges.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &LatticeNode> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &LatticeEdge> {
        self.edges.values()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn add_node(
        &mut self,
        word: Word,
        begin_frame: i64,
        end_frame: i64,
        viterbi_score: f64,
    ) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        self.nodes.insert(
            id,
            LatticeNode {
                id,
                word,
                begin_frame,
                end_frame,
                viterbi_score,
                forward_score: LOG_ZERO,
                backward_score: LOG_ZERO,
                posterior: LOG_ZERO,
                entering: Vec::new(),
                leaving: Vec::new(),
            },
        );
        id
    }

    pub fn add_edge(
        &mut self,
        from: NodeId,
        to: NodeId,
        acoustic_score: f64,
        language_score: f64,
    ) -> EdgeId {
        debug_assert!(from != to, "lattice edges may not be self loops");
        let id = EdgeId(self.next_edge);
        self.next_edge += 1;
        self.edges.insert(
            id,
            LatticeEdge {
                id,
                from,
                to,
                acoustic_score,
                language_score,
            },
        );
        if let Some(node) = self.nodes.get_mut(&from) {
            node.leaving.push(id);
        }
        if let Some(node) = self.nodes.get_mut(&to) {
            node.entering.push(id);
        }
        id
    }

    pub(crate) fn set_edge_scores(&mut self, id: EdgeId, acoustic: f64, language: f64) {
        if let Some(edge) = self.edges.get_mut(&id) {
            edge.acoustic_score = acoustic;
            edge.language_score = language;
        }
    }

    pub fn edge_between(&self, from: NodeId, to: NodeId) -> Option<EdgeId> {
        let node = self.nodes.get(&from)?;
        node.leaving
            .iter()
            .copied()
            .find(|id| self.edges.get(id).is_some_and(|e| e.to == to))
    }

    pub fn remove_node_and_edges(&mut self, id: NodeId) {
        let Some(node) = self.nodes.remove(&id) else {
            return;
        };
        for edge_id in node.entering.iter().chain(node.leaving.iter()) {
            if let Some(edge) = self.edges.remove(edge_id) {
                if let Some(from) = self.nodes.get_mut(&edge.from) {
                    from.leaving.retain(|e| e != edge_id);
                }
                if let Some(to) = self.nodes.get_mut(&edge.to) {
                    to.entering.retain(|e| e != edge_id);
                }
            }
        }
    }

    /// Deletes nodes (other than initial and terminal) with no entering or
    /// no leaving edges, repeating until none remain.
    pub fn remove_hanging_nodes(&mut self) {
        loop {
            let hanging: Vec<NodeId> = self
                .nodes
                .values()
                .filter(|n| {
                    n.id != self.initial
                        && n.id != self.terminal
                        && (n.entering.is_empty() || n.leaving.is_empty())
                })
                .map(|n| n.id)
                .collect();
            if hanging.is_empty() {
                return;
            }
            for id in hanging {
                self.remove_node_and_edges(id);
            }
        }
    }

    /// Kahn topological order from the initial node. Fails if the lattice
    /// has a cycle.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, DecoderError> {
        let mut in_degree: HashMap<NodeId, usize> = self
            .nodes
            .values()
            .map(|n| (n.id, n.entering.len()))
            .collect();
        let mut ready: VecDeque<NodeId> = self
            .nodes
            .values()
            .filter(|n| n.entering.is_empty())
            .map(|n| n.id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = ready.pop_front() {
            order.push(id);
            let leaving = self.nodes[&id].leaving.clone();
            for edge_id in leaving {
                let to = self.edges[&edge_id].to;
                let degree = in_degree.get_mut(&to).expect("edge to live node");
                *degree -= 1;
                if *degree == 0 {
                    ready.push_back(to);
                }
            }
        }
        if order.len() != self.nodes.len() {
            return Err(DecoderError::graph(
                "ordering lattice nodes",
                "lattice contains a cycle",
            ));
        }
        Ok(order)
    }

    fn time_frame(&self, node: &LatticeNode) -> TimeFrame {
        let begin = node.begin_frame.max(0) as u64 * self.frame_duration_ms;
        let end = (node.end_frame + 1).max(0) as u64 * self.frame_duration_ms;
        TimeFrame::new(begin, end.max(begin))
    }

    /// Word results along the highest-scoring initial-to-terminal path,
    /// carrying each node's log posterior as its confidence.
    pub fn word_results(&self, with_fillers: bool) -> Result<Vec<WordResult>, DecoderError> {
        if self.nodes.is_empty() {
            return Ok(Vec::new());
        }
        let order = self.topological_order()?;
        let mut path_score: HashMap<NodeId, f64> =
            order.iter().map(|&id| (id, LOG_ZERO)).collect();
        let mut back: HashMap<NodeId, NodeId> = HashMap::new();
        path_score.insert(self.initial, 0.0);
        for &id in &order {
            let score = path_score[&id];
            if score <= LOG_ZERO {
                continue;
            }
            for edge_id in &self.nodes[&id].leaving {
                let edge = &self.edges[edge_id];
                let candidate = score + edge.acoustic_score + edge.language_score;
                if candidate > path_score[&edge.to] {
                    path_score.insert(edge.to, candidate);
                    back.insert(edge.to, id);
                }
            }
        }

        let mut path = vec![self.terminal];
        let mut cursor = self.terminal;
        while cursor != self.initial {
            let Some(&prev) = back.get(&cursor) else {
                // No path reaches the terminal; fall back to the terminal
                // node alone.
                path = vec![self.terminal];
                break;
            };
            path.push(prev);
            cursor = prev;
        }
        path.reverse();

        let results = path
            .into_iter()
            .filter_map(|id| self.nodes.get(&id))
            .filter(|node| with_fillers || !node.word.is_filler())
            .map(|node| {
                WordResult::new(
                    node.word.clone(),
                    self.time_frame(node),
                    node.viterbi_score as f32,
                    node.posterior as f32,
                )
            })
            .collect();
        Ok(results)
    }
}

struct LatticeBuilder<'a> {
    lattice: &'a mut Lattice,
    alternates: &'a AlternateHypothesisManager,
    node_by_label: HashMap<(Word, i64, i64), NodeId>,
    node_by_token: HashMap<TokenId, NodeId>,
    processed: HashSet<TokenId>,
    pending: VecDeque<Arc<Token>>,
}

impl LatticeBuilder<'_> {
    fn run(&mut self, seeds: &[Arc<Token>]) {
        let word_seeds: Vec<Arc<Token>> = seeds
            .iter()
            .filter_map(|seed| nearest_word_token(seed))
            .collect();
        let Some(best) = word_seeds
            .iter()
            .min_by(|a, b| Token::compare_score_desc(a, b))
            .cloned()
        else {
            // Nothing survived; a lone sentence-start node keeps the
            // degenerate lattice well formed.
            let node = self
                .lattice
                .add_node(Word::sentence_start(), -1, -1, 0.0);
            self.lattice.initial = node;
            self.lattice.terminal = node;
            return;
        };

        let terminal = self.node_for_word_token(&best);
        self.lattice.terminal = terminal;
        self.lattice.initial = terminal;
        // Remaining end-of-utterance boundaries collapse onto the terminal.
        for seed in &word_seeds {
            self.node_by_token.insert(seed.id(), terminal);
            self.pending.push_back(Arc::clone(seed));
        }

        while let Some(word_token) = self.pending.pop_front() {
            self.collapse_word_token(&word_token);
        }
    }

    /// Node for a word-boundary token: its word plus the frame span from
    /// the end of the previous word on its Viterbi path.
    fn node_for_word_token(&mut self, token: &Arc<Token>) -> NodeId {
        if let Some(&node) = self.node_by_token.get(&token.id()) {
            return node;
        }
        let word = token
            .word()
            .cloned()
            .unwrap_or_else(Word::sentence_start);
        let end_frame = token.frame();
        let begin_frame = previous_word_frame(token)
            .map(|f| f + 1)
            .unwrap_or(end_frame.min(0))
            .min(end_frame);
        let score = f64::from(token.score());

        let node = match self.node_by_label.entry((word.clone(), begin_frame, end_frame)) {
            std::collections::hash_map::Entry::Occupied(entry) => {
                let node = *entry.get();
                if let Some(existing) = self.lattice.node_mut(node) {
                    existing.viterbi_score = existing.viterbi_score.max(score);
                }
                node
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                let node = self
                    .lattice
                    .add_node(word, begin_frame, end_frame, score);
                entry.insert(node);
                node
            }
        };
        self.node_by_token.insert(token.id(), node);
        node
    }

    /// Walks every back-path out of `token`'s word boundary, collapsing the
    /// token segment between word boundaries into a single edge.
    fn collapse_word_token(&mut self, token: &Arc<Token>) {
        if !self.processed.insert(token.id()) {
            return;
        }
        let node = self.node_for_word_token(token);
        let seed_acoustic = f64::from(token.acoustic_score());
        let seed_language =
            f64::from(token.language_score()) + f64::from(token.insertion_score());

        let mut segments: Vec<(Option<Arc<Token>>, f64, f64)> = Vec::new();
        segments.push((token.predecessor().cloned(), seed_acoustic, seed_language));
        if let Some(losers) = self.alternates.alternates(token.id()) {
            for loser in losers {
                segments.push((Some(loser), seed_acoustic, seed_language));
            }
        }

        while let Some((cursor, acoustic, language)) = segments.pop() {
            match cursor {
                None => {
                    // Reached the start of the utterance: this path's first
                    // word boundary is the lattice's initial node.
                    self.lattice.initial = node;
                }
                Some(t) if t.is_word() => {
                    let from = self.node_for_word_token(&t);
                    if from != node {
                        self.add_or_merge_edge(from, node, acoustic, language);
                    }
                    self.pending.push_back(t);
                }
                Some(t) => {
                    let acoustic = acoustic + f64::from(t.acoustic_score());
                    let language = language
                        + f64::from(t.language_score())
                        + f64::from(t.insertion_score());
                    if let Some(losers) = self.alternates.alternates(t.id()) {
                        for loser in losers {
                            segments.push((Some(loser), acoustic, language));
                        }
                    }
                    segments.push((t.predecessor().cloned(), acoustic, language));
                }
            }
        }
    }

    /// Parallel edges between the same pair of nodes keep the better score
    /// on each component, matching the Viterbi merge used downstream.
    fn add_or_merge_edge(&mut self, from: NodeId, to: NodeId, acoustic: f64, language: f64) {
        match self.lattice.edge_between(from, to) {
            Some(edge_id) => {
                let edge = self.lattice.edge(edge_id).expect("edge exists");
                let merged_acoustic = edge.acoustic_score.max(acoustic);
                let merged_language = edge.language_score.max(language);
                self.lattice
                    .set_edge_scores(edge_id, merged_acoustic, merged_language);
            }
            None => {
                self.lattice.add_edge(from, to, acoustic, language);
            }
        }
    }
}

fn nearest_word_token(token: &Arc<Token>) -> Option<Arc<Token>> {
    let mut cursor = Some(token);
    while let Some(t) = cursor {
        if t.is_word() {
            return Some(Arc::clone(t));
        }
        cursor = t.predecessor();
    }
    None
}

fn previous_word_frame(token: &Token) -> Option<i64> {
    let mut cursor = token.predecessor();
    while let Some(t) = cursor {
        if t.is_word() {
            return Some(t.frame());
        }
        cursor = t.predecessor();
    }
    None
}
