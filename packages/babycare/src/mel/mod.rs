//! Log-mel front-end: fixed-length PCM window → 64×64 dB matrix.

mod extractor;
mod filter_bank;
mod power_db;
mod spectrogram;

pub use extractor::MelExtractor;
pub use power_db::power_to_db;
pub use spectrogram::MelSpectrogram;

/// Returned whenever the mel API is mis-used (wrong window size, etc.).
#[derive(Debug, thiserror::Error)]
pub enum MelError {
    /// Window length does not match the configured window size.
    #[error("window length ({given}) must equal configured window size ({expected})")]
    BadFrame {
        /// The provided window length.
        given: usize,
        /// The expected window length.
        expected: usize,
    },
    /// Matrix data does not fit the declared shape.
    #[error("{len} values cannot form a {rows}x{cols} spectrogram")]
    BadShape { rows: usize, cols: usize, len: usize },
}
