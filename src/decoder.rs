use std::sync::Arc;

use crate::config::DecoderConfig;
use crate::error::DecoderError;
use crate::frontend::FrontEnd;
use crate::linguist::SearchGraph;
use crate::logmath::LogMath;
use crate::result::RecognitionResult;
use crate::scorer::AcousticScorer;
use crate::search::manager::SearchManager;

/// Assembles a [`Decoder`] from the graph, scorer, and front end seams.
pub struct DecoderBuilder {
    config: DecoderConfig,
    graph: Option<Arc<dyn SearchGraph>>,
    scorer: Option<Box<dyn AcousticScorer>>,
    frontend: Option<Box<dyn FrontEnd>>,
}

impl DecoderBuilder {
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            config,
            graph: None,
            scorer: None,
            frontend: None,
        }
    }

    pub fn with_graph(mut self, graph: Arc<dyn SearchGraph>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn with_scorer(mut self, scorer: Box<dyn AcousticScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn with_frontend(mut self, frontend: Box<dyn FrontEnd>) -> Self {
        self.frontend = Some(frontend);
        self
    }

    pub fn build(self) -> Result<Decoder, DecoderError> {
        let graph = self
            .graph
            .ok_or_else(|| DecoderError::config("decoder requires a search graph"))?;
        let scorer = self
            .scorer
            .ok_or_else(|| DecoderError::config("decoder requires an acoustic scorer"))?;
        let frontend = self
            .frontend
            .ok_or_else(|| DecoderError::config("decoder requires a front end"))?;
        let feature_block_size = self.config.feature_block_size;
        let manager = SearchManager::new(graph, scorer, frontend, self.config);
        Ok(Decoder {
            manager,
            feature_block_size,
        })
    }
}

/// The primary decoding surface: wraps the search manager and drives it in
/// `feature_block_size` blocks until a final result.
pub struct Decoder {
    manager: SearchManager,
    feature_block_size: usize,
}

impl Decoder {
    pub fn allocate(&mut self) -> Result<(), DecoderError> {
        self.manager.allocate()
    }

    pub fn deallocate(&mut self) -> Result<(), DecoderError> {
        self.manager.deallocate()
    }

    pub fn start_recognition(&mut self) -> Result<(), DecoderError> {
        self.manager.start_recognition()
    }

    pub fn stop_recognition(&mut self) -> Result<(), DecoderError> {
        self.manager.stop_recognition()
    }

    pub fn recognize(
        &mut self,
        block_size: usize,
    ) -> Result<Option<RecognitionResult>, DecoderError> {
        self.manager.recognize(block_size)
    }

    pub fn log_math(&self) -> &LogMath {
        self.manager.log_math()
    }

    pub fn config(&self) -> &DecoderConfig {
        self.manager.config()
    }

    /// Decodes one utterance start to finish and returns the final result.
    pub fn decode(&mut self) -> Result<RecognitionResult, DecoderError> {
        self.decode_with(|_| true)
            .and_then(|result| {
                result.ok_or_else(|| {
                    DecoderError::config("decode produced no result; check feature_block_size")
                })
            })
    }

    /// Decodes one utterance, handing every intermediate and final result
    /// to `on_result`. Returning `false` from the callback stops the
    /// utterance early; the last result is still returned.
    pub fn decode_with(
        &mut self,
        mut on_result: impl FnMut(&RecognitionResult) -> bool,
    ) -> Result<Option<RecognitionResult>, DecoderError> {
        self.start_recognition()?;
        let mut last = None;
        let outcome = loop {
            match self.manager.recognize(self.feature_block_size) {
                Ok(Some(result)) => {
                    let keep_going = on_result(&result);
                    let is_final = result.is_final();
                    last = Some(result);
                    if is_final || !keep_going {
                        break Ok(());
                    }
                }
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        self.stop_recognition()?;
        outcome.map(|()| last)
    }
}
