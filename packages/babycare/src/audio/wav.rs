use std::path::Path;

use tracing::info;

use super::{AudioError, AudioSource, downmix};
use crate::constants::SAMPLE_RATE;

/// Serves consecutive windows from an in-memory 8 kHz recording.
///
/// The tail shorter than one window is never delivered; once the
/// recording is exhausted every read returns [`AudioError::EndOfStream`].
pub struct WavFileSource {
    samples: Vec<f32>,
    pos: usize,
}

impl WavFileSource {
    /// Decode a PCM WAV file (int or float, any channel count) at 8 kHz.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, AudioError> {
        let path = path.as_ref();
        let reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        if spec.sample_rate != SAMPLE_RATE {
            return Err(AudioError::Format(format!(
                "{} is {} Hz, expected {SAMPLE_RATE} Hz",
                path.display(),
                spec.sample_rate
            )));
        }

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<Result<_, _>>()?
            }
        };
        let samples = downmix(&interleaved, spec.channels as usize);
        info!(
            "replaying {} ({:.1} s, {} ch)",
            path.display(),
            samples.len() as f32 / SAMPLE_RATE as f32,
            spec.channels
        );
        Ok(Self::from_samples(samples))
    }

    /// Wrap already-decoded mono samples.
    pub fn from_samples(samples: Vec<f32>) -> Self {
        Self { samples, pos: 0 }
    }

    /// Samples not yet delivered.
    pub fn remaining(&self) -> usize {
        self.samples.len() - self.pos
    }
}

impl AudioSource for WavFileSource {
    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn read_exact(&mut self, buf: &mut [f32]) -> Result<(), AudioError> {
        let end = self.pos + buf.len();
        if end > self.samples.len() {
            self.pos = self.samples.len();
            return Err(AudioError::EndOfStream);
        }
        buf.copy_from_slice(&self.samples[self.pos..end]);
        self.pos = end;
        Ok(())
    }
}
