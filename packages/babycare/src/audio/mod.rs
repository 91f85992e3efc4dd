//! Audio capture adapters.
//!
//! Every source yields **mono f32 @ 8 kHz** through a blocking
//! [`AudioSource::read_exact`].

#[cfg(feature = "audio")]
mod mic;
mod wav;

#[cfg(feature = "audio")]
pub use mic::{InputDeviceInfo, MicSource, list_input_devices};
pub use wav::WavFileSource;

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),
    #[error("audio device: {0}")]
    Device(String),
    #[error("unsupported audio format: {0}")]
    Format(String),
    #[error("no audio within {0:?}")]
    Timeout(Duration),
    #[error("audio stream ended")]
    EndOfStream,
    #[error("capture thread disconnected")]
    Disconnected,
    #[error("resampler: {0}")]
    Resample(String),
    #[error("wav: {0}")]
    Wav(#[from] hound::Error),
}

impl AudioError {
    /// `true` when no further reads can ever succeed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::EndOfStream | Self::Disconnected)
    }
}

/// Blocking producer of fixed-size mono windows.
pub trait AudioSource: Send {
    /// Sample-rate of the delivered samples (Hz).
    fn sample_rate(&self) -> u32;

    /// Fill `buf` completely or fail; blocks until enough audio is available.
    fn read_exact(&mut self, buf: &mut [f32]) -> Result<(), AudioError>;
}

impl<S: AudioSource + ?Sized> AudioSource for Box<S> {
    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn read_exact(&mut self, buf: &mut [f32]) -> Result<(), AudioError> {
        (**self).read_exact(buf)
    }
}

/// Average interleaved frames down to one channel.
pub(crate) fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}
