use std::{collections::HashMap, path::Path};

use candle_core::{D, DType, Device, Module, Result as CandleResult, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, Linear, VarBuilder, VarMap};
use tracing::{debug, info};

use super::{ClassificationResult, Classifier, ClassifierError};
use crate::{
    constants::{N_FRAMES, N_MELS, NUM_CLASSES},
    mel::MelSpectrogram,
};

/* ------------------------------------------------------------------------- */
/*  Architecture                                                             */
/* ------------------------------------------------------------------------- */

const CONV1_CHANNELS: usize = 16;
const CONV2_CHANNELS: usize = 32;
const HIDDEN: usize = 64;

/// Flattened size after two 2×2 max-pools.
const fn flat_features() -> usize {
    CONV2_CHANNELS * (N_MELS / 4) * (N_FRAMES / 4)
}

struct ConvStack {
    conv1: Conv2d,
    conv2: Conv2d,
    fc1: Linear,
    fc2: Linear,
}

impl ConvStack {
    fn new(vs: VarBuilder) -> CandleResult<Self> {
        let same = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        Ok(Self {
            conv1: candle_nn::conv2d(1, CONV1_CHANNELS, 3, same, vs.pp("conv1"))?,
            conv2: candle_nn::conv2d(CONV1_CHANNELS, CONV2_CHANNELS, 3, same, vs.pp("conv2"))?,
            fc1: candle_nn::linear(flat_features(), HIDDEN, vs.pp("fc1"))?,
            fc2: candle_nn::linear(HIDDEN, NUM_CLASSES, vs.pp("fc2"))?,
        })
    }
}

impl Module for ConvStack {
    fn forward(&self, xs: &Tensor) -> CandleResult<Tensor> {
        let xs = self.conv1.forward(xs)?.relu()?.max_pool2d(2)?;
        let xs = self.conv2.forward(&xs)?.relu()?.max_pool2d(2)?;
        let xs = xs.flatten_from(1)?;
        let xs = self.fc1.forward(&xs)?.relu()?;
        self.fc2.forward(&xs)
    }
}

/* ------------------------------------------------------------------------- */
/*  Public struct                                                            */
/* ------------------------------------------------------------------------- */

/// Convolutional cry classifier over a `(1, 1, 64, 64)` log-mel input.
///
/// Weights come from a `safetensors` artifact with the tensors
/// `conv1.*`, `conv2.*`, `fc1.*`, `fc2.*`; scores are softmax
/// probabilities in class order (`0` = cry, `1` = not cry).
pub struct CryNet {
    net: ConvStack,
    device: Device,
}

/// Name and shape of one tensor inside a model artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorInfo {
    pub name: String,
    pub dims: Vec<usize>,
}

impl CryNet {
    /// Load the classifier from a `safetensors` file.
    ///
    /// Fails if the file is unreadable or any expected tensor is missing
    /// or mis-shaped; there is no fallback model.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ClassifierError> {
        let path = path.as_ref();
        let load_err = |e: candle_core::Error| ClassifierError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        let device = Device::Cpu;
        let tensors = candle_core::safetensors::load(path, &device).map_err(load_err)?;
        debug!("loaded {} tensors from {}", tensors.len(), path.display());

        let vs = VarBuilder::from_tensors(tensors, DType::F32, &device);
        let net = ConvStack::new(vs).map_err(load_err)?;
        info!("cry classifier ready ({})", path.display());
        Ok(Self { net, device })
    }

    /// Build the network on top of a [`VarMap`] (fresh weights are
    /// initialised on first access). `VarMap::save` writes a loadable artifact.
    pub fn from_varmap(var_map: &VarMap) -> Result<Self, ClassifierError> {
        let device = Device::Cpu;
        let vs = VarBuilder::from_varmap(var_map, DType::F32, &device);
        Ok(Self {
            net: ConvStack::new(vs)?,
            device,
        })
    }

    /// List the tensors stored in a model artifact, sorted by name.
    pub fn describe<P: AsRef<Path>>(path: P) -> Result<Vec<TensorInfo>, ClassifierError> {
        let path = path.as_ref();
        let tensors: HashMap<String, Tensor> = candle_core::safetensors::load(path, &Device::Cpu)
            .map_err(|e| ClassifierError::Load {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        let mut infos: Vec<TensorInfo> = tensors
            .into_iter()
            .map(|(name, t)| TensorInfo {
                name,
                dims: t.dims().to_vec(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }
}

impl Classifier for CryNet {
    fn num_classes(&self) -> usize {
        NUM_CLASSES
    }

    fn predict(
        &mut self,
        spectrogram: &MelSpectrogram,
    ) -> Result<ClassificationResult, ClassifierError> {
        let (rows, cols) = spectrogram.shape();
        if (rows, cols) != (N_MELS, N_FRAMES) {
            return Err(ClassifierError::Shape {
                given: (rows, cols),
                expected: (N_MELS, N_FRAMES),
            });
        }

        let input = Tensor::from_slice(spectrogram.as_slice(), (1, 1, rows, cols), &self.device)?;
        let logits = self.net.forward(&input)?;
        let probs = candle_nn::ops::softmax(&logits, D::Minus1)?;
        let scores = probs.squeeze(0)?.to_vec1::<f32>()?;
        ClassificationResult::from_scores(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> MelSpectrogram {
        let data = (0..N_MELS * N_FRAMES).map(|i| -((i % 80) as f32)).collect();
        MelSpectrogram::from_vec(N_MELS, N_FRAMES, data).unwrap()
    }

    #[test]
    fn scores_are_a_distribution_and_argmax_holds() {
        let vm = VarMap::new();
        let mut net = CryNet::from_varmap(&vm).unwrap();
        let r = net.predict(&ramp()).unwrap();

        assert_eq!(r.scores().len(), 2);
        approx::assert_abs_diff_eq!(r.scores().iter().sum::<f32>(), 1.0, epsilon = 1e-5);
        let best = if r.scores()[1] > r.scores()[0] { 1 } else { 0 };
        assert_eq!(r.index(), best);
    }

    #[test]
    fn prediction_is_deterministic() {
        let vm = VarMap::new();
        let mut net = CryNet::from_varmap(&vm).unwrap();
        let a = net.predict(&ramp()).unwrap();
        let b = net.predict(&ramp()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn wrong_shape_is_a_contract_violation() {
        let vm = VarMap::new();
        let mut net = CryNet::from_varmap(&vm).unwrap();
        let small = MelSpectrogram::from_vec(8, 8, vec![0.0; 64]).unwrap();
        assert!(matches!(
            net.predict(&small),
            Err(ClassifierError::Shape {
                given: (8, 8),
                expected: (64, 64)
            })
        ));
    }

    #[test]
    fn missing_artifact_fails_to_load() {
        let err = CryNet::load("/definitely/not/here.safetensors")
            .err()
            .expect("load must fail");
        assert!(matches!(err, ClassifierError::Load { .. }));
    }
}
