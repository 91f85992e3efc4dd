//! Core compile-time constants for babycare.
//!
//!  * All values are `pub`; every runtime knob in [`crate::config`] defaults
//!    to one of these.
//!  * “Magic numbers” are grouped logically with doc comments.
//!  * Derived constants are expressed with `const fn` so the compiler checks
//!    the arithmetic.

use std::time::Duration;

/* --------------------------------------------------------------------- */
/*  Capture format                                                       */

/// Mono PCM sample-rate the whole pipeline runs at (Hz).
pub const SAMPLE_RATE: u32 = 8_000;

/// Samples per detection window (~4.03 s @ 8 kHz).
///
/// Chosen so a centred STFT with [`HOP_LENGTH`] yields exactly [`N_FRAMES`].
pub const NUM_SAMPLES: usize = 32_256;

/* --------------------------------------------------------------------- */
/*  Mel front-end                                                        */

/// FFT window length (samples).
pub const N_FFT: usize = 1_024;

/// STFT hop length (samples).
pub const HOP_LENGTH: usize = 512;

/// Number of mel bands.
pub const N_MELS: usize = 64;

/// Number of linear-frequency bins produced by a real FFT of [`N_FFT`].
pub const fn n_freq_bins() -> usize {
    N_FFT / 2 + 1
}

/// Number of STFT frames produced from `samples` with centre padding.
pub const fn n_stft_frames(samples: usize) -> usize {
    1 + samples / HOP_LENGTH
}

/// Time frames in one spectrogram.
pub const N_FRAMES: usize = n_stft_frames(NUM_SAMPLES);

/// Dynamic range kept after power-to-dB conversion.
pub const TOP_DB: f32 = 80.0;

/// Magnitudes at or below this are floored instead of passed to `log10`.
pub const AMIN: f32 = 1e-10;

/// dB value assigned to floored magnitudes: `10 * log10(1e-9)`.
pub const FLOOR_DB: f32 = -90.0;

/* --------------------------------------------------------------------- */
/*  Classification                                                       */

/// Class index emitted for a cry.
pub const CRY_CLASS: usize = 0;

/// Class index emitted for anything else.
pub const NOT_CRY_CLASS: usize = 1;

/// Number of classes the bundled classifier scores.
pub const NUM_CLASSES: usize = 2;

/// Peak amplitude below which a window is declared silent without inference.
pub const SOUND_THRESHOLD: f32 = 0.2;

/* --------------------------------------------------------------------- */
/*  Actuation                                                            */

/// Lux at or below which the room counts as dark (“need to sleep”).
pub const LIGHT_THRESHOLD: f32 = 30.0;

/// Consecutive “not cry” cycles required before soothing stops.
pub const STOP_DEBOUNCE: u32 = 5;

/// Upper bound of the “not cry” counter.
pub const STOP_COUNT_SATURATION: u32 = 500;

/// Pending toy commands held before new ones are dropped.
pub const TOY_QUEUE_CAPACITY: usize = 8;

/* --------------------------------------------------------------------- */
/*  Scheduling                                                           */

/// Period between two detection cycles.
pub const DETECTION_PERIOD: Duration = Duration::from_millis(4_000);

/// Delay between session start and the first cycle.
pub const INITIAL_DELAY: Duration = Duration::from_millis(1_000);

/// Upper bound on a single blocking audio read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Cycles whose processing latency is averaged for the diagnostic report.
pub const LATENCY_SAMPLE_CYCLES: u64 = 50;

/// Light-sensor polling interval.
pub const LIGHT_POLL_INTERVAL: Duration = Duration::from_millis(2_000);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_yields_square_spectrogram() {
        assert_eq!(N_FRAMES, 64);
        assert_eq!(N_FRAMES, N_MELS);
        assert_eq!(n_freq_bins(), 513);
    }

    #[test]
    fn floor_matches_log_of_1e9() {
        approx::assert_abs_diff_eq!(FLOOR_DB, 10.0 * 1e-9f32.log10(), epsilon = 1e-4);
    }
}
