use std::path::Path;

use crate::error::DecoderError;
use crate::types::Feature;

/// Decoder configuration.
///
/// Beam widths and score deltas are in the log domain of the configured
/// `log_base`; `relative_beam_width` values must be <= 0 (0 disables the
/// relative beam).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct DecoderConfig {
    /// Cap on the number of tokens kept per frame.
    #[serde(default = "default_absolute_beam_width")]
    pub absolute_beam_width: usize,
    /// Minimum log-score delta from the best token; 0.0 disables.
    #[serde(default)]
    pub relative_beam_width: f64,
    /// Absolute cap for word-boundary tokens per frame; 0 disables.
    #[serde(default)]
    pub word_beam_absolute: usize,
    /// Relative beam for word-boundary tokens; 0.0 disables.
    #[serde(default)]
    pub word_beam_relative: f64,
    /// Cap on surviving paths per distinct word label; 0 disables.
    #[serde(default)]
    pub max_paths_per_word: usize,
    /// Cap on filler-word tokens surviving per frame.
    #[serde(default = "default_max_filler_words")]
    pub max_filler_words: usize,
    /// Frames consumed per `recognize` call.
    #[serde(default = "default_feature_block_size")]
    pub feature_block_size: usize,
    /// When true, tokens are only pruned after their acoustic score for the
    /// current frame is known; when false, entry-time pruning on the
    /// predecessor score is allowed.
    #[serde(default = "default_strict_pruning")]
    pub strict_pruning: bool,
    /// Cap on alternate predecessors kept per token (lattice edges).
    #[serde(default = "default_alt_hyp_max_edges")]
    pub alt_hyp_max_edges: usize,
    /// Base of the log domain all scores live in.
    #[serde(default = "default_log_base")]
    pub log_base: f64,
    /// Duration of one feature frame in milliseconds.
    #[serde(default = "default_frame_duration_ms")]
    pub frame_duration_ms: u64,
}

fn default_absolute_beam_width() -> usize {
    2000
}
fn default_max_filler_words() -> usize {
    1
}
fn default_feature_block_size() -> usize {
    usize::MAX
}
fn default_strict_pruning() -> bool {
    true
}
fn default_alt_hyp_max_edges() -> usize {
    4
}
fn default_log_base() -> f64 {
    std::f64::consts::E
}
fn default_frame_duration_ms() -> u64 {
    Feature::DEFAULT_DURATION_MS
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            absolute_beam_width: default_absolute_beam_width(),
            relative_beam_width: 0.0,
            word_beam_absolute: 0,
            word_beam_relative: 0.0,
            max_paths_per_word: 0,
            max_filler_words: default_max_filler_words(),
            feature_block_size: default_feature_block_size(),
            strict_pruning: default_strict_pruning(),
            alt_hyp_max_edges: default_alt_hyp_max_edges(),
            log_base: default_log_base(),
            frame_duration_ms: default_frame_duration_ms(),
        }
    }
}

impl DecoderConfig {
    pub fn load(path: &Path) -> Result<Self, DecoderError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| DecoderError::io("read decoder config", e))?;
        serde_json::from_str(&data).map_err(|e| DecoderError::json("parse decoder config", e))
    }

    /// Checks the configuration. Called once at allocate time; all failures
    /// are fatal.
    pub fn validate(&self) -> Result<(), DecoderError> {
        if self.absolute_beam_width == 0 {
            return Err(DecoderError::config("absolute_beam_width must be > 0"));
        }
        if self.relative_beam_width > 0.0 || !self.relative_beam_width.is_finite() {
            return Err(DecoderError::config(format!(
                "relative_beam_width must be a finite log value <= 0, got {}",
                self.relative_beam_width
            )));
        }
        if self.word_beam_relative > 0.0 || !self.word_beam_relative.is_finite() {
            return Err(DecoderError::config(format!(
                "word_beam_relative must be a finite log value <= 0, got {}",
                self.word_beam_relative
            )));
        }
        if self.feature_block_size == 0 {
            return Err(DecoderError::config("feature_block_size must be > 0"));
        }
        if self.alt_hyp_max_edges == 0 {
            return Err(DecoderError::config("alt_hyp_max_edges must be > 0"));
        }
        if self.frame_duration_ms == 0 {
            return Err(DecoderError::config("frame_duration_ms must be > 0"));
        }
        if !self.log_base.is_finite() || self.log_base <= 1.0 {
            return Err(DecoderError::config(format!(
                "log_base must be a finite value greater than 1.0, got {}",
                self.log_base
            )));
        }
        Ok(())
    }
}
