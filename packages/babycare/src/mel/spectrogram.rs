use super::MelError;

/// Dense `n_mels × n_frames` matrix of log-mel energies (row-major, one
/// row per mel band).
#[derive(Debug, Clone, PartialEq)]
pub struct MelSpectrogram {
    n_mels: usize,
    n_frames: usize,
    data: Vec<f32>,
}

impl MelSpectrogram {
    /// Wrap `data` laid out band-major; the length must equal `n_mels * n_frames`.
    pub fn from_vec(n_mels: usize, n_frames: usize, data: Vec<f32>) -> Result<Self, MelError> {
        if data.len() != n_mels * n_frames {
            return Err(MelError::BadShape {
                rows: n_mels,
                cols: n_frames,
                len: data.len(),
            });
        }
        Ok(Self {
            n_mels,
            n_frames,
            data,
        })
    }

    /// `(n_mels, n_frames)`.
    #[inline]
    pub const fn shape(&self) -> (usize, usize) {
        (self.n_mels, self.n_frames)
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn get(&self, mel: usize, frame: usize) -> Option<f32> {
        if mel >= self.n_mels || frame >= self.n_frames {
            return None;
        }
        self.data.get(mel * self.n_frames + frame).copied()
    }

    /// One mel band across all frames.
    pub fn band(&self, mel: usize) -> Option<&[f32]> {
        let start = mel.checked_mul(self.n_frames)?;
        self.data.get(start..start + self.n_frames)
    }

    pub fn max(&self) -> f32 {
        self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    pub fn min(&self) -> f32 {
        self.data.iter().copied().fold(f32::INFINITY, f32::min)
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_length() {
        let err = MelSpectrogram::from_vec(2, 3, vec![0.0; 5]).unwrap_err();
        assert!(matches!(err, MelError::BadShape { rows: 2, cols: 3, len: 5 }));
    }

    #[test]
    fn indexes_band_major() {
        let spec = MelSpectrogram::from_vec(2, 3, vec![0., 1., 2., 3., 4., 5.]).unwrap();
        assert_eq!(spec.get(1, 0), Some(3.0));
        assert_eq!(spec.get(0, 2), Some(2.0));
        assert_eq!(spec.get(2, 0), None);
        assert_eq!(spec.band(1), Some(&[3.0, 4.0, 5.0][..]));
        assert_eq!(spec.max(), 5.0);
        assert_eq!(spec.min(), 0.0);
    }
}
