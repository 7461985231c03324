use std::collections::VecDeque;

use crate::error::DecoderError;
use crate::types::Feature;

/// Pull interface over the acoustic front end. `None` signals end of data.
pub trait FrontEnd: Send {
    fn next_feature(&mut self) -> Result<Option<Feature>, DecoderError>;
}

/// A front end over a pre-extracted sequence of frames. Used by tests and
/// offline decoding where the whole utterance is already in memory.
#[derive(Debug, Default)]
pub struct BufferedFrontEnd {
    frames: VecDeque<Feature>,
}

impl BufferedFrontEnd {
    pub fn new(frames: impl IntoIterator<Item = Feature>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    /// Builds a frame per payload vector, indexed from 0 with a uniform
    /// duration.
    pub fn from_payloads(
        payloads: impl IntoIterator<Item = Vec<f32>>,
        frame_duration_ms: u64,
    ) -> Self {
        Self::new(
            payloads
                .into_iter()
                .enumerate()
                .map(|(i, data)| Feature::new(i as u64, frame_duration_ms, data)),
        )
    }

    pub fn push(&mut self, frame: Feature) {
        self.frames.push_back(frame);
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrontEnd for BufferedFrontEnd {
    fn next_feature(&mut self) -> Result<Option<Feature>, DecoderError> {
        Ok(self.frames.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_front_end_drains_in_order() {
        let mut frontend = BufferedFrontEnd::from_payloads(vec![vec![0.0], vec![1.0]], 10);
        assert_eq!(frontend.remaining(), 2);
        let first = frontend.next_feature().unwrap().unwrap();
        assert_eq!(first.index(), 0);
        assert_eq!(first.duration_ms(), 10);
        let second = frontend.next_feature().unwrap().unwrap();
        assert_eq!(second.index(), 1);
        assert!(frontend.next_feature().unwrap().is_none());
    }
}
