use crate::{
    actuation::{SoundError, ToyError},
    audio::AudioError,
    classifier::ClassifierError,
    config::ConfigError,
    mel::MelError,
};

/// Crate-wide error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Mel(#[from] MelError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Sound(#[from] SoundError),
    #[error(transparent)]
    Toy(#[from] ToyError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
