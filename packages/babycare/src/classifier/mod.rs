//! Cry / not-cry scoring of a log-mel window.

mod cry_net;

pub use cry_net::{CryNet, TensorInfo};

use crate::{
    constants::{CRY_CLASS, NOT_CRY_CLASS},
    mel::MelSpectrogram,
};

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),
    #[error("cannot load model '{path}': {reason}")]
    Load { path: String, reason: String },
    #[error("spectrogram shape {given:?} does not match model input {expected:?}")]
    Shape {
        given: (usize, usize),
        expected: (usize, usize),
    },
    #[error("model produced no scores")]
    EmptyScores,
}

/// The two classes the detector distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CryClass {
    Cry,
    NotCry,
}

impl CryClass {
    /// Map a model output index. Anything but [`CRY_CLASS`] is “not cry”.
    #[inline]
    pub const fn from_index(index: usize) -> Self {
        if index == CRY_CLASS {
            Self::Cry
        } else {
            Self::NotCry
        }
    }

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Self::Cry => CRY_CLASS,
            Self::NotCry => NOT_CRY_CLASS,
        }
    }
}

impl std::fmt::Display for CryClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cry => write!(f, "cry"),
            Self::NotCry => write!(f, "not cry"),
        }
    }
}

/// Predicted index plus the per-class scores it was taken from.
///
/// `index` is always the position of the first maximum of `scores`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    index: usize,
    scores: Vec<f32>,
}

impl ClassificationResult {
    /// Arg-max over `scores`; ties resolve to the first maximum.
    pub fn from_scores(scores: Vec<f32>) -> Result<Self, ClassifierError> {
        let mut best: Option<(usize, f32)> = None;
        for (i, &s) in scores.iter().enumerate() {
            if best.is_none_or(|(_, b)| s > b) {
                best = Some((i, s));
            }
        }
        let (index, _) = best.ok_or(ClassifierError::EmptyScores)?;
        Ok(Self { index, scores })
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    #[inline]
    pub fn class(&self) -> CryClass {
        CryClass::from_index(self.index)
    }

    /// Score of the predicted class.
    #[inline]
    pub fn confidence(&self) -> f32 {
        self.scores[self.index]
    }
}

/// Opaque scoring function loaded once per session.
///
/// Implementations must be deterministic for identical input and must
/// return one score per class.
pub trait Classifier: Send {
    fn num_classes(&self) -> usize;

    fn predict(&mut self, spectrogram: &MelSpectrogram)
    -> Result<ClassificationResult, ClassifierError>;
}

impl<C: Classifier + ?Sized> Classifier for Box<C> {
    fn num_classes(&self) -> usize {
        (**self).num_classes()
    }

    fn predict(
        &mut self,
        spectrogram: &MelSpectrogram,
    ) -> Result<ClassificationResult, ClassifierError> {
        (**self).predict(spectrogram)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_picks_first_maximum() {
        let r = ClassificationResult::from_scores(vec![0.4, 0.6]).unwrap();
        assert_eq!(r.index(), 1);
        assert_eq!(r.class(), CryClass::NotCry);

        let tie = ClassificationResult::from_scores(vec![0.5, 0.5]).unwrap();
        assert_eq!(tie.index(), 0);
        assert_eq!(tie.class(), CryClass::Cry);
        assert_eq!(tie.confidence(), 0.5);
    }

    #[test]
    fn empty_scores_are_rejected() {
        assert!(matches!(
            ClassificationResult::from_scores(Vec::new()),
            Err(ClassifierError::EmptyScores)
        ));
    }

    #[test]
    fn unknown_indices_count_as_not_cry() {
        assert_eq!(CryClass::from_index(0), CryClass::Cry);
        assert_eq!(CryClass::from_index(1), CryClass::NotCry);
        assert_eq!(CryClass::from_index(7), CryClass::NotCry);
        assert_eq!(CryClass::NotCry.index(), 1);
    }
}
