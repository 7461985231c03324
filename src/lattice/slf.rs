//! HTK-style SLF lattice persistence.
//!
//! The exact byte layout is a compatibility contract: a `VERSION` line, a
//! header carrying node and link counts, node lines `I=<id> t=<sec> W=<word>`
//! with times in seconds at millisecond precision, and link lines
//! `J=<id> S=<src> E=<dst> a=<acoustic> l=<lm>`.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

use crate::error::DecoderError;
use crate::lattice::{Lattice, NodeId};
use crate::logmath::LogMath;
use crate::types::Word;

pub fn write_string(lattice: &Lattice) -> String {
    let mut out = String::new();
    out.push_str("VERSION=1.0\n");
    let _ = writeln!(
        out,
        "N={} L={}",
        lattice.node_count(),
        lattice.edge_count()
    );

    let mut index: HashMap<NodeId, usize> = HashMap::new();
    for (i, node) in lattice.nodes().enumerate() {
        index.insert(node.id(), i);
        let seconds =
            node.begin_frame().max(0) as f64 * lattice.frame_duration_ms() as f64 / 1000.0;
        let _ = writeln!(out, "I={} t={:.3} W={}", i, seconds, node.word().spelling());
    }
    for (j, edge) in lattice.edges().enumerate() {
        let _ = writeln!(
            out,
            "J={} S={} E={} a={:.6} l={:.6}",
            j,
            index[&edge.from()],
            index[&edge.to()],
            edge.acoustic_score(),
            edge.language_score()
        );
    }
    out
}

pub fn save(lattice: &Lattice, path: &Path) -> Result<(), DecoderError> {
    std::fs::write(path, write_string(lattice))
        .map_err(|e| DecoderError::io("write SLF lattice", e))
}

pub fn load(
    path: &Path,
    frame_duration_ms: u64,
    log_math: LogMath,
) -> Result<Lattice, DecoderError> {
    let text =
        std::fs::read_to_string(path).map_err(|e| DecoderError::io("read SLF lattice", e))?;
    parse(&text, frame_duration_ms, log_math)
}

pub fn parse(
    text: &str,
    frame_duration_ms: u64,
    log_math: LogMath,
) -> Result<Lattice, DecoderError> {
    let mut lattice = Lattice::new(log_math, frame_duration_ms);
    let mut nodes_by_index: HashMap<usize, NodeId> = HashMap::new();
    let mut declared_nodes: Option<usize> = None;
    let mut declared_edges: Option<usize> = None;

    for (line_no, raw) in text.lines().enumerate() {
        let line_no = line_no + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("VERSION=") {
            continue;
        }
        let fields = parse_fields(line, line_no)?;
        if fields.contains_key("N") || fields.contains_key("L") {
            declared_nodes = field_usize(&fields, "N", line_no)?.or(declared_nodes);
            declared_edges = field_usize(&fields, "L", line_no)?.or(declared_edges);
        } else if fields.contains_key("I") {
            let index = field_usize(&fields, "I", line_no)?
                .ok_or_else(|| DecoderError::lattice_format(line_no, "node line missing I="))?;
            let seconds = field_f64(&fields, "t", line_no)?
                .ok_or_else(|| DecoderError::lattice_format(line_no, "node line missing t="))?;
            let spelling = fields
                .get("W")
                .ok_or_else(|| DecoderError::lattice_format(line_no, "node line missing W="))?;
            let begin_frame =
                (seconds * 1000.0 / frame_duration_ms as f64).round() as i64;
            let word = word_from_spelling(spelling);
            let node = lattice.add_node(word, begin_frame, begin_frame, 0.0);
            nodes_by_index.insert(index, node);
        } else if fields.contains_key("J") {
            let source = field_usize(&fields, "S", line_no)?
                .ok_or_else(|| DecoderError::lattice_format(line_no, "link line missing S="))?;
            let destination = field_usize(&fields, "E", line_no)?
                .ok_or_else(|| DecoderError::lattice_format(line_no, "link line missing E="))?;
            let acoustic = field_f64(&fields, "a", line_no)?.unwrap_or(0.0);
            let language = field_f64(&fields, "l", line_no)?.unwrap_or(0.0);
            let from = *nodes_by_index.get(&source).ok_or_else(|| {
                DecoderError::lattice_format(line_no, format!("unknown source node {source}"))
            })?;
            let to = *nodes_by_index.get(&destination).ok_or_else(|| {
                DecoderError::lattice_format(line_no, format!("unknown target node {destination}"))
            })?;
            lattice.add_edge(from, to, acoustic, language);
        } else {
            return Err(DecoderError::lattice_format(
                line_no,
                format!("unrecognized line '{line}'"),
            ));
        }
    }

    if let Some(expected) = declared_nodes {
        if expected != lattice.node_count() {
            return Err(DecoderError::lattice_format(
                0,
                format!(
                    "header declares {expected} nodes, found {}",
                    lattice.node_count()
                ),
            ));
        }
    }
    if let Some(expected) = declared_edges {
        if expected != lattice.edge_count() {
            return Err(DecoderError::lattice_format(
                0,
                format!(
                    "header declares {expected} links, found {}",
                    lattice.edge_count()
                ),
            ));
        }
    }

    assign_boundaries(&mut lattice)?;
    Ok(lattice)
}

/// Initial and terminal are recovered structurally: the node without
/// entering edges and the node without leaving edges.
fn assign_boundaries(lattice: &mut Lattice) -> Result<(), DecoderError> {
    let mut sources: Vec<NodeId> = lattice
        .nodes()
        .filter(|n| n.entering().is_empty())
        .map(|n| n.id())
        .collect();
    let mut sinks: Vec<NodeId> = lattice
        .nodes()
        .filter(|n| n.leaving().is_empty())
        .map(|n| n.id())
        .collect();
    sources.sort_unstable();
    sinks.sort_unstable();
    let initial = *sources
        .first()
        .ok_or_else(|| DecoderError::lattice_format(0, "lattice has no source node"))?;
    let terminal = *sinks
        .last()
        .ok_or_else(|| DecoderError::lattice_format(0, "lattice has no sink node"))?;
    if sources.len() > 1 || sinks.len() > 1 {
        tracing::warn!(
            sources = sources.len(),
            sinks = sinks.len(),
            "SLF lattice has multiple boundary candidates"
        );
    }
    lattice.set_boundaries(initial, terminal);
    Ok(())
}

fn word_from_spelling(spelling: &str) -> Word {
    let filler = matches!(spelling, Word::SILENCE | "<skip>" | "<noise>");
    Word::new(spelling, filler)
}

fn parse_fields(line: &str, line_no: usize) -> Result<HashMap<&str, &str>, DecoderError> {
    line.split_whitespace()
        .map(|field| {
            field.split_once('=').ok_or_else(|| {
                DecoderError::lattice_format(line_no, format!("expected key=value, got '{field}'"))
            })
        })
        .collect()
}

fn field_usize(
    fields: &HashMap<&str, &str>,
    key: &str,
    line_no: usize,
) -> Result<Option<usize>, DecoderError> {
    fields
        .get(key)
        .map(|value| {
            value.parse::<usize>().map_err(|_| {
                DecoderError::lattice_format(line_no, format!("invalid {key}='{value}'"))
            })
        })
        .transpose()
}

fn field_f64(
    fields: &HashMap<&str, &str>,
    key: &str,
    line_no: usize,
) -> Result<Option<f64>, DecoderError> {
    fields
        .get(key)
        .map(|value| {
            value.parse::<f64>().map_err(|_| {
                DecoderError::lattice_format(line_no, format!("invalid {key}='{value}'"))
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_lattice() -> Lattice {
        let mut lattice = Lattice::new(LogMath::default(), 10);
        let start = lattice.add_node(Word::sentence_start(), -1, -1, 0.0);
        let hello = lattice.add_node(Word::new("HELLO", false), 0, 4, -9.5);
        let end = lattice.add_node(Word::sentence_end(), 5, 5, -9.5);
        lattice.set_boundaries(start, end);
        lattice.add_edge(start, hello, -9.5, -1.25);
        lattice.add_edge(hello, end, -0.5, 0.0);
        lattice
    }

    #[test]
    fn writes_expected_byte_layout() {
        let text = write_string(&sample_lattice());
        let expected = "VERSION=1.0\n\
                        N=3 L=2\n\
                        I=0 t=0.000 W=<s>\n\
                        I=1 t=0.000 W=HELLO\n\
                        I=2 t=0.050 W=</s>\n\
                        J=0 S=0 E=1 a=-9.500000 l=-1.250000\n\
                        J=1 S=1 E=2 a=-0.500000 l=0.000000\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn round_trip_preserves_structure() {
        let original = write_string(&sample_lattice());
        let reloaded = parse(&original, 10, LogMath::default()).unwrap();
        assert_eq!(reloaded.node_count(), 3);
        assert_eq!(reloaded.edge_count(), 2);
        assert_eq!(write_string(&reloaded), original);
    }

    #[test]
    fn single_node_round_trip() {
        let mut lattice = Lattice::new(LogMath::default(), 10);
        let only = lattice.add_node(Word::sentence_start(), -1, -1, 0.0);
        lattice.set_boundaries(only, only);

        let text = write_string(&lattice);
        let reloaded = parse(&text, 10, LogMath::default()).unwrap();
        assert_eq!(reloaded.node_count(), 1);
        assert_eq!(reloaded.initial_node(), reloaded.terminal_node());
        assert_eq!(write_string(&reloaded), text);
    }

    #[test]
    fn header_mismatch_is_rejected() {
        let text = "VERSION=1.0\nN=2 L=0\nI=0 t=0.000 W=<s>\n";
        assert!(parse(text, 10, LogMath::default()).is_err());
    }

    #[test]
    fn malformed_line_is_rejected() {
        let text = "VERSION=1.0\nN=1 L=0\nbogus line\n";
        assert!(parse(text, 10, LogMath::default()).is_err());
    }
}
