pub mod config;
pub mod decoder;
pub mod error;
pub mod frontend;
pub mod lattice;
pub mod linguist;
pub mod logmath;
pub mod result;
pub mod scorer;
pub mod search;
pub mod token;
pub mod types;

pub use config::DecoderConfig;
pub use decoder::{Decoder, DecoderBuilder};
pub use error::DecoderError;
pub use frontend::{BufferedFrontEnd, FrontEnd};
pub use lattice::{Lattice, LatticeOptimizer, ScoreMergePolicy};
pub use linguist::{SearchArc, SearchGraph, SearchState, StateSignature};
pub use logmath::{LogMath, LOG_ONE, LOG_ZERO};
pub use result::RecognitionResult;
pub use scorer::{AcousticScorer, ScoredBatch};
pub use search::{ActiveList, ActiveListFactory, AlternateHypothesisManager, SearchManager};
pub use token::{Token, TokenId};
pub use types::{Feature, TimeFrame, Word, WordResult};
