use crate::lattice::{Lattice, NodeId};
use crate::logmath::LogMath;

/// How scores on collapsed parallel edges combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoreMergePolicy {
    /// Keep the better score. Lossy for true posteriors but preserves the
    /// classic lattice output byte for byte.
    #[default]
    Viterbi,
    /// Log-domain sum, preserving total path probability.
    LogAdd,
}

/// Collapses equivalent paths in a lattice.
///
/// The result is deterministic (no node has edges to two equivalent nodes)
/// and minimal (no node has edges from two equivalent nodes). Nodes are
/// equivalent when their labels (word, begin frame, end frame) match and
/// their entering edges (forward pass) or leaving edges (backward pass)
/// match source/destination and scores. Each merge strictly reduces the
/// node count, so both fixpoints terminate.
pub struct LatticeOptimizer {
    policy: ScoreMergePolicy,
}

impl Default for LatticeOptimizer {
    fn default() -> Self {
        Self::new(ScoreMergePolicy::default())
    }
}

impl LatticeOptimizer {
    pub fn new(policy: ScoreMergePolicy) -> Self {
        Self { policy }
    }

    pub fn optimize(&self, lattice: &mut Lattice) {
        let before = lattice.node_count();
        self.optimize_forward(lattice);
        self.optimize_backward(lattice);
        lattice.remove_hanging_nodes();
        tracing::debug!(
            nodes_before = before,
            nodes_after = lattice.node_count(),
            "lattice optimized"
        );
    }

    /// Determinize: merge sibling successors that are equivalent forward.
    fn optimize_forward(&self, lattice: &mut Lattice) {
        let mut more_changes = true;
        while more_changes {
            more_changes = false;
            // Node removal invalidates ids captured before this sweep, so
            // every id is re-checked against the live lattice.
            for id in lattice.node_ids() {
                if lattice.has_node(id) {
                    more_changes |= self.optimize_node_forward(lattice, id);
                }
            }
        }
    }

    fn optimize_node_forward(&self, lattice: &mut Lattice, id: NodeId) -> bool {
        let leaving = match lattice.node(id) {
            Some(node) => node.leaving().to_vec(),
            None => return false,
        };
        for (j, &first) in leaving.iter().enumerate() {
            for &second in &leaving[j + 1..] {
                let n1 = lattice.edge(first).expect("live edge").to();
                let n2 = lattice.edge(second).expect("live edge").to();
                if n1 != n2 && equivalent_nodes_forward(lattice, n1, n2) {
                    self.merge_nodes_forward(lattice, n1, n2);
                    return true;
                }
            }
        }
        false
    }

    /// Merges `n2` into `n1`: parallel entering edges fold their scores,
    /// leaving edges are unioned, and `n2` disappears.
    fn merge_nodes_forward(&self, lattice: &mut Lattice, n1: NodeId, n2: NodeId) {
        let log_math = *lattice.log_math();
        let entering: Vec<_> = lattice
            .node(n2)
            .expect("merge target exists")
            .entering()
            .to_vec();
        for edge_id in entering {
            let (from, acoustic, language) = {
                let edge = lattice.edge(edge_id).expect("live edge");
                (edge.from(), edge.acoustic_score(), edge.language_score())
            };
            let twin = lattice
                .edge_between(from, n1)
                .expect("equivalent nodes share entering sources");
            let (twin_acoustic, twin_language) = {
                let edge = lattice.edge(twin).expect("live edge");
                (edge.acoustic_score(), edge.language_score())
            };
            lattice.set_edge_scores(
                twin,
                self.merge_scores(&log_math, acoustic, twin_acoustic),
                self.merge_scores(&log_math, language, twin_language),
            );
        }

        let leaving: Vec<_> = lattice
            .node(n2)
            .expect("merge target exists")
            .leaving()
            .to_vec();
        for edge_id in leaving {
            let (to, acoustic, language) = {
                let edge = lattice.edge(edge_id).expect("live edge");
                (edge.to(), edge.acoustic_score(), edge.language_score())
            };
            match lattice.edge_between(n1, to) {
                Some(twin) => {
                    let (twin_acoustic, twin_language) = {
                        let edge = lattice.edge(twin).expect("live edge");
                        (edge.acoustic_score(), edge.language_score())
                    };
                    lattice.set_edge_scores(
                        twin,
                        self.merge_scores(&log_math, acoustic, twin_acoustic),
                        self.merge_scores(&log_math, language, twin_language),
                    );
                }
                None => {
                    lattice.add_edge(n1, to, acoustic, language);
                }
            }
        }

        if lattice.terminal_node() == n2 {
            // Should not happen given label equivalence, but never leave a
            // dangling terminal handle.
            tracing::warn!("terminal node merged away during determinization");
        }
        lattice.remove_node_and_edges(n2);
    }

    /// Minimize: merge predecessors that are equivalent backward.
    fn optimize_backward(&self, lattice: &mut Lattice) {
        let mut more_changes = true;
        while more_changes {
            more_changes = false;
            for id in lattice.node_ids() {
                if lattice.has_node(id) {
                    more_changes |= self.optimize_node_backward(lattice, id);
                }
            }
        }
    }

    fn optimize_node_backward(&self, lattice: &mut Lattice, id: NodeId) -> bool {
        let entering = match lattice.node(id) {
            Some(node) => node.entering().to_vec(),
            None => return false,
        };
        for (j, &first) in entering.iter().enumerate() {
            for &second in &entering[j + 1..] {
                let n1 = lattice.edge(first).expect("live edge").from();
                let n2 = lattice.edge(second).expect("live edge").from();
                if n1 != n2 && equivalent_nodes_backward(lattice, n1, n2) {
                    self.merge_nodes_backward(lattice, n1, n2);
                    return true;
                }
            }
        }
        false
    }

    fn merge_nodes_backward(&self, lattice: &mut Lattice, n1: NodeId, n2: NodeId) {
        let log_math = *lattice.log_math();
        let leaving: Vec<_> = lattice
            .node(n2)
            .expect("merge target exists")
            .leaving()
            .to_vec();
        for edge_id in leaving {
            let (to, acoustic, language) = {
                let edge = lattice.edge(edge_id).expect("live edge");
                (edge.to(), edge.acoustic_score(), edge.language_score())
            };
            let twin = lattice
                .edge_between(n1, to)
                .expect("equivalent nodes share leaving destinations");
            let (twin_acoustic, twin_language) = {
                let edge = lattice.edge(twin).expect("live edge");
                (edge.acoustic_score(), edge.language_score())
            };
            lattice.set_edge_scores(
                twin,
                self.merge_scores(&log_math, acoustic, twin_acoustic),
                self.merge_scores(&log_math, language, twin_language),
            );
        }

        let entering: Vec<_> = lattice
            .node(n2)
            .expect("merge target exists")
            .entering()
            .to_vec();
        for edge_id in entering {
            let (from, acoustic, language) = {
                let edge = lattice.edge(edge_id).expect("live edge");
                (edge.from(), edge.acoustic_score(), edge.language_score())
            };
            match lattice.edge_between(from, n1) {
                Some(twin) => {
                    let (twin_acoustic, twin_language) = {
                        let edge = lattice.edge(twin).expect("live edge");
                        (edge.acoustic_score(), edge.language_score())
                    };
                    lattice.set_edge_scores(
                        twin,
                        self.merge_scores(&log_math, acoustic, twin_acoustic),
                        self.merge_scores(&log_math, language, twin_language),
                    );
                }
                None => {
                    lattice.add_edge(from, n1, acoustic, language);
                }
            }
        }

        lattice.remove_node_and_edges(n2);
    }

    /// The single place parallel-edge scores combine; swap the policy to
    /// change the whole optimizer.
    fn merge_scores(&self, log_math: &LogMath, a: f64, b: f64) -> f64 {
        match self.policy {
            ScoreMergePolicy::Viterbi => a.max(b),
            ScoreMergePolicy::LogAdd => log_math.add_as_linear(a, b),
        }
    }
}

fn equivalent_labels(lattice: &Lattice, n1: NodeId, n2: NodeId) -> bool {
    match (lattice.node(n1), lattice.node(n2)) {
        (Some(a), Some(b)) => {
            a.word() == b.word()
                && a.begin_frame() == b.begin_frame()
                && a.end_frame() == b.end_frame()
        }
        _ => false,
    }
}

/// Equivalent forward: same label and the same entering sources and scores.
fn equivalent_nodes_forward(lattice: &Lattice, n1: NodeId, n2: NodeId) -> bool {
    equivalent_labels(lattice, n1, n2) && entering_profiles_match(lattice, n1, n2)
}

/// Equivalent backward: same label and the same leaving destinations and
/// scores.
fn equivalent_nodes_backward(lattice: &Lattice, n1: NodeId, n2: NodeId) -> bool {
    equivalent_labels(lattice, n1, n2) && leaving_profiles_match(lattice, n1, n2)
}

fn entering_profiles_match(lattice: &Lattice, n1: NodeId, n2: NodeId) -> bool {
    let profile = |id: NodeId| -> Vec<(NodeId, u64, u64)> {
        let mut edges: Vec<_> = lattice
            .node(id)
            .map(|n| n.entering().to_vec())
            .unwrap_or_default()
            .into_iter()
            .filter_map(|e| lattice.edge(e))
            .map(|e| {
                (
                    e.from(),
                    e.acoustic_score().to_bits(),
                    e.language_score().to_bits(),
                )
            })
            .collect();
        edges.sort_unstable();
        edges
    };
    profile(n1) == profile(n2)
}

fn leaving_profiles_match(lattice: &Lattice, n1: NodeId, n2: NodeId) -> bool {
    let profile = |id: NodeId| -> Vec<(NodeId, u64, u64)> {
        let mut edges: Vec<_> = lattice
            .node(id)
            .map(|n| n.leaving().to_vec())
            .unwrap_or_default()
            .into_iter()
            .filter_map(|e| lattice.edge(e))
            .map(|e| {
                (
                    e.to(),
                    e.acoustic_score().to_bits(),
                    e.language_score().to_bits(),
                )
            })
            .collect();
        edges.sort_unstable();
        edges
    };
    profile(n1) == profile(n2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Word;

    /// <s> branches to two HELLO nodes with identical labels and entering
    /// edges, each continuing to </s>.
    fn duplicated_path_lattice() -> Lattice {
        let mut lattice = Lattice::new(LogMath::default(), 10);
        let start = lattice.add_node(Word::sentence_start(), -1, -1, 0.0);
        let hello_a = lattice.add_node(Word::new("HELLO", false), 0, 4, -9.0);
        let hello_b = lattice.add_node(Word::new("HELLO", false), 0, 4, -9.0);
        let end = lattice.add_node(Word::sentence_end(), 5, 5, -9.0);
        lattice.set_boundaries(start, end);
        lattice.add_edge(start, hello_a, -9.0, -1.0);
        lattice.add_edge(start, hello_b, -9.0, -1.0);
        lattice.add_edge(hello_a, end, -2.0, 0.0);
        lattice.add_edge(hello_b, end, -3.0, 0.0);
        lattice
    }

    #[test]
    fn forward_merge_collapses_equivalent_successors() {
        let mut lattice = duplicated_path_lattice();
        assert_eq!(lattice.node_count(), 4);

        LatticeOptimizer::default().optimize(&mut lattice);

        assert_eq!(lattice.node_count(), 3);
        // The surviving parallel edge keeps the better acoustic score.
        let end = lattice.terminal_node();
        let entering = lattice.node(end).unwrap().entering().to_vec();
        assert_eq!(entering.len(), 1);
        let edge = lattice.edge(entering[0]).unwrap();
        assert_eq!(edge.acoustic_score(), -2.0);
    }

    #[test]
    fn log_add_policy_grows_merged_score() {
        let mut lattice = duplicated_path_lattice();
        LatticeOptimizer::new(ScoreMergePolicy::LogAdd).optimize(&mut lattice);

        let end = lattice.terminal_node();
        let entering = lattice.node(end).unwrap().entering().to_vec();
        assert_eq!(entering.len(), 1);
        let edge = lattice.edge(entering[0]).unwrap();
        // logadd(-2, -3) > max(-2, -3)
        assert!(edge.acoustic_score() > -2.0);
    }

    #[test]
    fn different_labels_never_merge() {
        let mut lattice = Lattice::new(LogMath::default(), 10);
        let start = lattice.add_node(Word::sentence_start(), -1, -1, 0.0);
        let hello = lattice.add_node(Word::new("HELLO", false), 0, 4, -9.0);
        let halo = lattice.add_node(Word::new("HALO", false), 0, 4, -9.5);
        let end = lattice.add_node(Word::sentence_end(), 5, 5, -9.0);
        lattice.set_boundaries(start, end);
        lattice.add_edge(start, hello, -9.0, 0.0);
        lattice.add_edge(start, halo, -9.5, 0.0);
        lattice.add_edge(hello, end, 0.0, 0.0);
        lattice.add_edge(halo, end, 0.0, 0.0);

        LatticeOptimizer::default().optimize(&mut lattice);
        assert_eq!(lattice.node_count(), 4);
    }

    #[test]
    fn optimized_lattice_has_no_equivalent_siblings() {
        let mut lattice = duplicated_path_lattice();
        LatticeOptimizer::default().optimize(&mut lattice);

        for node in lattice.node_ids() {
            let leaving = lattice.node(node).unwrap().leaving().to_vec();
            for (j, &a) in leaving.iter().enumerate() {
                for &b in &leaving[j + 1..] {
                    let to_a = lattice.edge(a).unwrap().to();
                    let to_b = lattice.edge(b).unwrap().to();
                    assert!(!equivalent_nodes_forward(&lattice, to_a, to_b));
                }
            }
        }
    }
}
