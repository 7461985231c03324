use std::collections::HashMap;

use crate::error::DecoderError;
use crate::lattice::{Lattice, NodeId};
use crate::logmath::{LOG_ONE, LOG_ZERO};

/// Relative tolerance for the forward/backward total agreement check.
const NORMALIZER_TOLERANCE: f64 = 1e-4;

/// Computes forward and backward scores over the lattice in the log
/// semiring and derives per-node log posteriors, capped at log(1).
///
/// Degenerate lattices (a single node, or no edges at all) are not an
/// error: the lone path gets posterior log(1).
pub fn compute_posteriors(lattice: &mut Lattice) -> Result<(), DecoderError> {
    let order = lattice.topological_order()?;
    if order.is_empty() {
        return Ok(());
    }

    let log_math = *lattice.log_math();
    let mut forward: HashMap<NodeId, f64> =
        order.iter().map(|&id| (id, LOG_ZERO)).collect();
    let mut backward: HashMap<NodeId, f64> =
        order.iter().map(|&id| (id, LOG_ZERO)).collect();

    forward.insert(lattice.initial_node(), LOG_ONE);
    for &id in &order {
        let alpha = forward[&id];
        if alpha <= LOG_ZERO {
            continue;
        }
        let leaving = lattice.node(id).map(|n| n.leaving().to_vec()).unwrap_or_default();
        for edge_id in leaving {
            let edge = lattice.edge(edge_id).expect("live edge");
            let contribution = alpha + edge.acoustic_score() + edge.language_score();
            let entry = forward.get_mut(&edge.to()).expect("node in order");
            *entry = log_math.add_as_linear(*entry, contribution);
        }
    }

    backward.insert(lattice.terminal_node(), LOG_ONE);
    for &id in order.iter().rev() {
        let leaving = lattice.node(id).map(|n| n.leaving().to_vec()).unwrap_or_default();
        let mut beta = backward[&id];
        for edge_id in leaving {
            let edge = lattice.edge(edge_id).expect("live edge");
            let contribution =
                backward[&edge.to()] + edge.acoustic_score() + edge.language_score();
            beta = log_math.add_as_linear(beta, contribution);
        }
        backward.insert(id, beta);
    }

    let normalizer = forward[&lattice.terminal_node()];
    let backward_total = backward[&lattice.initial_node()];
    let disagreement = (normalizer - backward_total).abs();
    if disagreement > NORMALIZER_TOLERANCE * normalizer.abs().max(1.0) {
        tracing::warn!(
            forward_total = normalizer,
            backward_total,
            "forward and backward lattice totals disagree"
        );
    }

    for &id in &order {
        let posterior = if normalizer <= LOG_ZERO {
            LOG_ZERO
        } else {
            (forward[&id] + backward[&id] - normalizer).min(LOG_ONE)
        };
        if let Some(node) = lattice.node_mut(id) {
            node.forward_score = forward[&id];
            node.backward_score = backward[&id];
            node.posterior = posterior;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logmath::LogMath;
    use crate::types::Word;

    fn ambiguous_lattice(delta: f64) -> Lattice {
        // <s> -> HELLO -> </s> against <s> -> HALO -> </s>, HELLO ahead by
        // `delta` in log score.
        let mut lattice = Lattice::new(LogMath::default(), 10);
        let start = lattice.add_node(Word::sentence_start(), -1, -1, 0.0);
        let hello = lattice.add_node(Word::new("HELLO", false), 0, 4, -9.5);
        let halo = lattice.add_node(Word::new("HALO", false), 0, 4, -10.0);
        let end = lattice.add_node(Word::sentence_end(), 5, 5, 0.0);
        lattice.set_boundaries(start, end);
        lattice.add_edge(start, hello, -10.0 + delta, 0.0);
        lattice.add_edge(start, halo, -10.0, 0.0);
        lattice.add_edge(hello, end, 0.0, 0.0);
        lattice.add_edge(halo, end, 0.0, 0.0);
        lattice
    }

    #[test]
    fn totals_agree_and_posteriors_split() {
        let delta = 0.5;
        let mut lattice = ambiguous_lattice(delta);
        compute_posteriors(&mut lattice).unwrap();

        let initial = lattice.initial_node();
        let terminal = lattice.terminal_node();
        let z = lattice.node(terminal).unwrap().forward_score();
        let z_b = lattice.node(initial).unwrap().backward_score();
        assert!((z - z_b).abs() <= 1e-4 * z.abs());

        let hello = lattice
            .nodes()
            .find(|n| n.word().spelling() == "HELLO")
            .unwrap();
        let halo = lattice
            .nodes()
            .find(|n| n.word().spelling() == "HALO")
            .unwrap();
        assert!(hello.posterior() > halo.posterior());

        // P(hello) = e^delta / (e^delta + 1)
        let lm = LogMath::default();
        let expected = delta.exp() / (delta.exp() + 1.0);
        let observed = lm.log_to_linear(hello.posterior());
        assert!((observed - expected).abs() < 1e-9);
        assert!(observed > 0.5 && observed < 0.65);
    }

    #[test]
    fn parallel_posteriors_sum_to_at_most_one() {
        let mut lattice = ambiguous_lattice(0.5);
        compute_posteriors(&mut lattice).unwrap();
        let lm = *lattice.log_math();
        let total: f64 = lattice
            .nodes()
            .filter(|n| n.begin_frame() == 0)
            .map(|n| lm.log_to_linear(n.posterior()))
            .sum();
        assert!(total <= 1.0 + 1e-9);
    }

    #[test]
    fn endpoints_have_full_posterior() {
        let mut lattice = ambiguous_lattice(0.5);
        compute_posteriors(&mut lattice).unwrap();
        let initial = lattice.initial_node();
        let terminal = lattice.terminal_node();
        assert_eq!(lattice.node(initial).unwrap().posterior(), LOG_ONE);
        assert_eq!(lattice.node(terminal).unwrap().posterior(), LOG_ONE);
    }

    #[test]
    fn single_node_lattice_gets_log_one() {
        let mut lattice = Lattice::new(LogMath::default(), 10);
        let only = lattice.add_node(Word::sentence_start(), -1, -1, 0.0);
        lattice.set_boundaries(only, only);
        compute_posteriors(&mut lattice).unwrap();
        assert_eq!(lattice.node(only).unwrap().posterior(), LOG_ONE);
    }
}
