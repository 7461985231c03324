use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tokenpass::lattice::{posterior, slf};
use tokenpass::{LatticeOptimizer, LogMath, ScoreMergePolicy};

/// Inspect an SLF word lattice: optimize it, compute posterior
/// confidences, and print the best path.
#[derive(Debug, Parser)]
#[command(name = "lattice-tool", version)]
struct Args {
    /// SLF lattice file to read.
    lattice: PathBuf,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Collapse equivalent paths before computing posteriors.
    #[arg(long)]
    optimize: bool,

    #[arg(long, value_enum, default_value_t = MergeChoice::Viterbi)]
    merge: MergeChoice,

    /// Frame duration used to convert node times back to frames.
    #[arg(long, default_value_t = 10)]
    frame_duration_ms: u64,

    /// Base of the log domain the lattice scores are in.
    #[arg(long, default_value_t = std::f64::consts::E)]
    log_base: f64,

    /// Keep filler words in the output.
    #[arg(long)]
    with_fillers: bool,

    /// Write the (possibly optimized) lattice back out as SLF.
    #[arg(long)]
    save: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum MergeChoice {
    Viterbi,
    Logadd,
}

impl MergeChoice {
    fn policy(self) -> ScoreMergePolicy {
        match self {
            Self::Viterbi => ScoreMergePolicy::Viterbi,
            Self::Logadd => ScoreMergePolicy::LogAdd,
        }
    }
}

#[derive(Debug, Serialize)]
struct WordRow {
    word: String,
    begin_ms: u64,
    end_ms: u64,
    score: f32,
    log_confidence: f32,
    confidence: f64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_math = LogMath::new(args.log_base)?;
    let mut lattice = slf::load(&args.lattice, args.frame_duration_ms, log_math)?;

    if args.optimize {
        LatticeOptimizer::new(args.merge.policy()).optimize(&mut lattice);
    }
    posterior::compute_posteriors(&mut lattice)?;

    if let Some(path) = &args.save {
        slf::save(&lattice, path)?;
    }

    let words = lattice.word_results(args.with_fillers)?;
    let rows: Vec<WordRow> = words
        .iter()
        .map(|w| WordRow {
            word: w.word().spelling().to_string(),
            begin_ms: w.time_frame().begin_ms,
            end_ms: w.time_frame().end_ms,
            score: w.score(),
            log_confidence: w.log_confidence(),
            confidence: w.confidence_linear(&log_math),
        })
        .collect();

    match args.format {
        OutputFormat::Text => {
            for row in &rows {
                println!(
                    "{:<20} {:>8}ms {:>8}ms  conf={:.3}",
                    row.word, row.begin_ms, row.end_ms, row.confidence
                );
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }
    Ok(())
}
