use rustfft::{Fft, FftPlanner, num_complex::Complex32};
use std::{f32::consts::PI, sync::Arc};

use super::{
    MelError, MelSpectrogram,
    filter_bank::{MelFilter, mel_filter_bank},
    power_to_db,
};
use crate::constants::{HOP_LENGTH, N_FFT, N_MELS, NUM_SAMPLES, SAMPLE_RATE, n_stft_frames};

/// Log-mel spectrogram extractor for one fixed-length detection window.
///
/// *No* heap allocation happens per window besides the returned matrix;
/// all scratch buffers are allocated in [`MelExtractor::new`].
///
/// ```no_run
/// # use babycare::mel::MelExtractor;
/// let mut mel = MelExtractor::new();
/// let window = vec![0f32; babycare::constants::NUM_SAMPLES]; // fill from the audio source
/// let spec = mel.extract(&window)?;
/// assert_eq!(spec.shape(), (64, 64));
/// # Ok::<(), babycare::mel::MelError>(())
/// ```
pub struct MelExtractor {
    // configuration
    frame_len: usize,
    n_fft: usize,
    hop: usize,
    n_frames: usize,

    // cached DSP bits
    fft: Arc<dyn Fft<f32>>,
    hann: Vec<f32>,
    filter_bank: Vec<MelFilter>,

    // scratch
    padded: Vec<f32>,
    fft_buf: Vec<Complex32>,
    power: Vec<f32>,
}

impl Default for MelExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl MelExtractor {
    /// Extractor with the fixed detection parameters
    /// (8 kHz, 1024-point FFT, hop 512, 64 mel bands, 32 256-sample window).
    pub fn new() -> Self {
        Self::with_params(SAMPLE_RATE, NUM_SAMPLES, N_FFT, HOP_LENGTH, N_MELS)
    }

    pub(crate) fn with_params(
        sample_rate: u32,
        frame_len: usize,
        n_fft: usize,
        hop: usize,
        n_mels: usize,
    ) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n_fft);
        // periodic Hann
        let hann = (0..n_fft)
            .map(|n| 0.5 - 0.5 * ((2.0 * PI * n as f32) / n_fft as f32).cos())
            .collect();
        let pad = n_fft / 2;
        Self {
            frame_len,
            n_fft,
            hop,
            n_frames: 1 + frame_len / hop,
            fft,
            hann,
            filter_bank: mel_filter_bank(sample_rate, n_fft, n_mels),
            padded: vec![0.0; frame_len + 2 * pad],
            fft_buf: vec![Complex32::ZERO; n_fft],
            power: vec![0.0; n_fft / 2 + 1],
        }
    }

    /// Samples expected by [`extract`](Self::extract).
    #[inline]
    pub const fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// `(n_mels, n_frames)` of every produced spectrogram.
    #[inline]
    pub fn output_shape(&self) -> (usize, usize) {
        (self.filter_bank.len(), self.n_frames)
    }

    /// Compute the power mel spectrogram of `frame` without dB conversion.
    pub fn power_mel(&mut self, frame: &[f32]) -> Result<Vec<f32>, MelError> {
        if frame.len() != self.frame_len {
            return Err(MelError::BadFrame {
                given: frame.len(),
                expected: self.frame_len,
            });
        }
        self.reflect_pad(frame);

        let n_mels = self.filter_bank.len();
        let mut mel = vec![0f32; n_mels * self.n_frames];
        for t in 0..self.n_frames {
            let start = t * self.hop;

            // 1) Window + FFT
            let segment = &self.padded[start..start + self.n_fft];
            for (dst, (&x, &w)) in self.fft_buf.iter_mut().zip(segment.iter().zip(&self.hann)) {
                dst.re = x * w;
                dst.im = 0.0;
            }
            self.fft.process(&mut self.fft_buf);

            // 2) |FFT|² -> power spectrum (non-negative bins only)
            for (p, c) in self.power.iter_mut().zip(&self.fft_buf) {
                *p = c.re * c.re + c.im * c.im;
            }

            // 3) Project onto the mel bands
            for (m, filt) in self.filter_bank.iter().enumerate() {
                mel[m * self.n_frames + t] = filt.apply(&self.power);
            }
        }
        Ok(mel)
    }

    /// Full front-end: power mel spectrogram → dB → 80 dB clip.
    pub fn extract(&mut self, frame: &[f32]) -> Result<MelSpectrogram, MelError> {
        let mut mel = self.power_mel(frame)?;
        power_to_db(&mut mel);
        MelSpectrogram::from_vec(self.filter_bank.len(), self.n_frames, mel)
    }

    // Centre the frames: reflect `n_fft / 2` samples on both sides.
    fn reflect_pad(&mut self, frame: &[f32]) {
        let pad = self.n_fft / 2;
        let n = frame.len() as isize;
        for (j, dst) in self.padded.iter_mut().enumerate() {
            let mut src = j as isize - pad as isize;
            if src < 0 {
                src = -src;
            }
            if src >= n {
                src = 2 * (n - 1) - src;
            }
            *dst = frame[src.clamp(0, n - 1) as usize];
        }
    }
}

const _: () = assert!(n_stft_frames(NUM_SAMPLES) == N_MELS);

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, amp: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / SAMPLE_RATE as f32).sin() * amp)
            .collect()
    }

    #[test]
    fn rejects_wrong_window_length() {
        let mut mel = MelExtractor::new();
        let err = mel.extract(&[0.0; 100]).unwrap_err();
        assert!(matches!(
            err,
            MelError::BadFrame {
                given: 100,
                expected: NUM_SAMPLES
            }
        ));
    }

    #[test]
    fn produces_64_by_64_finite_matrix() {
        let mut mel = MelExtractor::new();
        let spec = mel.extract(&tone(440.0, 0.5, NUM_SAMPLES)).unwrap();
        assert_eq!(spec.shape(), (64, 64));
        assert!(spec.as_slice().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn energy_lands_in_the_band_of_the_tone() {
        let mut mel = MelExtractor::new();
        let spec = mel.extract(&tone(1_000.0, 0.8, NUM_SAMPLES)).unwrap();

        // loudest band on a middle frame
        let frame = 32;
        let loudest = (0..64)
            .max_by(|&a, &b| {
                spec.get(a, frame)
                    .unwrap()
                    .total_cmp(&spec.get(b, frame).unwrap())
            })
            .unwrap();
        let bank = mel_filter_bank(SAMPLE_RATE, N_FFT, N_MELS);
        let tone_bin = (1_000.0 * N_FFT as f32 / SAMPLE_RATE as f32).round() as usize;
        let filt = &bank[loudest];
        assert!(
            (filt.first_bin..filt.first_bin + filt.weights.len()).contains(&tone_bin),
            "band {loudest} does not cover bin {tone_bin}"
        );
    }

    #[test]
    fn silence_is_flat() {
        let mut mel = MelExtractor::new();
        let spec = mel.extract(&vec![0.0; NUM_SAMPLES]).unwrap();
        assert!(spec.as_slice().iter().all(|&v| v == spec.max()));
    }

    #[test]
    fn small_params_reflect_padding_is_symmetric() {
        let mut mel = MelExtractor::with_params(8_000, 16, 8, 4, 4);
        mel.reflect_pad(&[0., 1., 2., 3., 4., 5., 6., 7., 8., 9., 10., 11., 12., 13., 14., 15.]);
        assert_eq!(&mel.padded[..5], &[4., 3., 2., 1., 0.]);
        assert_eq!(&mel.padded[mel.padded.len() - 5..], &[15., 14., 13., 12., 11.]);
        assert_eq!(mel.output_shape(), (4, 5));
    }
}
