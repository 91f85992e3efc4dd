//! Slaney-style mel filter bank (the same scale and area normalisation
//! librosa uses by default).

// Slaney scale: linear below 1 kHz, logarithmic above.
const F_SP: f32 = 200.0 / 3.0;
const MIN_LOG_HZ: f32 = 1_000.0;
const MIN_LOG_MEL: f32 = MIN_LOG_HZ / F_SP;

#[inline]
fn log_step() -> f32 {
    6.4f32.ln() / 27.0
}

#[inline]
pub(crate) fn hz_to_mel(f: f32) -> f32 {
    if f >= MIN_LOG_HZ {
        MIN_LOG_MEL + (f / MIN_LOG_HZ).ln() / log_step()
    } else {
        f / F_SP
    }
}

#[inline]
pub(crate) fn mel_to_hz(m: f32) -> f32 {
    if m >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (m - MIN_LOG_MEL)).exp()
    } else {
        F_SP * m
    }
}

/// One triangular filter, stored sparsely from its first non-zero bin.
#[derive(Debug, Clone)]
pub(crate) struct MelFilter {
    pub(crate) first_bin: usize,
    pub(crate) weights: Vec<f32>,
}

impl MelFilter {
    #[inline]
    pub(crate) fn apply(&self, power: &[f32]) -> f32 {
        power[self.first_bin..]
            .iter()
            .zip(&self.weights)
            .map(|(p, w)| p * w)
            .sum()
    }
}

/// Build `n_mels` filters over `n_fft / 2 + 1` power bins spanning 0 Hz – Nyquist.
pub(crate) fn mel_filter_bank(sample_rate: u32, n_fft: usize, n_mels: usize) -> Vec<MelFilter> {
    let n_bins = n_fft / 2 + 1;
    let f_max = sample_rate as f32 / 2.0;
    let mel_max = hz_to_mel(f_max);

    // n_mels + 2 band edges, evenly spaced on the mel axis
    let edges: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f32 / (n_mels + 1) as f32))
        .collect();
    let bin_hz = |k: usize| k as f32 * sample_rate as f32 / n_fft as f32;

    (0..n_mels)
        .map(|m| {
            let (left, center, right) = (edges[m], edges[m + 1], edges[m + 2]);
            let enorm = 2.0 / (right - left);
            let dense: Vec<f32> = (0..n_bins)
                .map(|k| {
                    let f = bin_hz(k);
                    let lower = (f - left) / (center - left);
                    let upper = (right - f) / (right - center);
                    lower.min(upper).max(0.0) * enorm
                })
                .collect();

            let first_bin = dense.iter().position(|&w| w > 0.0).unwrap_or(n_bins);
            let last_bin = dense.iter().rposition(|&w| w > 0.0).map_or(first_bin, |i| i + 1);
            MelFilter {
                first_bin,
                weights: dense[first_bin..last_bin].to_vec(),
            }
        })
        .collect()
}
