//! Babycare – public crate root
//! ============================
//! Baby-cry detector (log-mel front-end + Candle classifier) driving a
//! debounced soothing state machine.
//!
//! * Every few seconds a fixed 8 kHz window is read from an
//!   [`audio::AudioSource`].
//! * Quiet windows are declared “not cry” without running the model.
//! * Loud windows are turned into a 64×64 dB mel matrix and scored by a
//!   [`classifier::Classifier`].
//! * The resulting class drives [`actuation::ActuationStateMachine`], which
//!   starts a lullaby or a toy and stops it after five calm cycles.
//!
//! A [`session::SessionManager`] owns one running [`session::Session`] at a
//! time.
#![deny(unsafe_code)]

/* ────────────────────────  sub-modules  ─────────────────────────────── */
pub mod actuation;
pub mod audio;
pub mod classifier;
pub mod config;
pub mod constants;
pub mod detection;
pub mod light;
pub mod mel;
pub mod session;

mod error;

/* ───────────────────────────── re-exports ─────────────────────────────── */
pub use actuation::{ActuationStateMachine, SoothingMode, SoundChoice};
pub use classifier::{ClassificationResult, Classifier, CryClass, CryNet};
pub use config::BabycareConfig;
pub use detection::{CycleReport, DetectionLoop, Scheduler, peak_amplitude};
pub use error::{Error, Result};
pub use mel::{MelExtractor, MelSpectrogram};
pub use session::{Session, SessionManager, SessionParts, StartOutcome};
