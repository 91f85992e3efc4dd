//! Command line interface for the babycare detector.

use std::path::PathBuf;

use babycare::{SoothingMode, SoundChoice};
use clap::{Args, Parser, Subcommand};

/// Baby-cry detector and soother
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Listen on a microphone until Ctrl-C
    #[cfg(feature = "audio")]
    Listen(ListenCommand),

    /// Run a full session over a recorded 8 kHz WAV file
    Replay(ReplayCommand),

    /// List audio input devices
    #[cfg(feature = "audio")]
    Devices,

    /// Print the tensors stored in a classifier artifact
    Inspect(InspectCommand),
}

/// Options shared by every session-running command.
#[derive(Args, Debug)]
pub struct SessionArgs {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Classifier artifact (overrides the config)
    #[arg(short, long)]
    pub model: Option<PathBuf>,

    /// Soothing strategy (overrides the config)
    #[arg(long)]
    pub mode: Option<SoothingMode>,

    /// Sound to loop (overrides the config)
    #[arg(long)]
    pub sound: Option<SoundChoice>,

    /// Simulated lux reading when no light sensor is configured
    #[arg(long)]
    pub lux: Option<f32>,
}

#[cfg(feature = "audio")]
#[derive(Parser, Debug)]
pub struct ListenCommand {
    #[command(flatten)]
    pub session: SessionArgs,

    /// Input device name (see `devices`)
    #[arg(short, long)]
    pub device: Option<String>,

    /// Keep the machine from suspending while listening
    #[arg(long)]
    pub keep_awake: bool,
}

#[derive(Parser, Debug)]
pub struct ReplayCommand {
    #[command(flatten)]
    pub session: SessionArgs,

    /// Recording to replay
    #[arg(short, long)]
    pub wav: PathBuf,

    /// Pace cycles like a live session instead of back-to-back
    #[arg(long)]
    pub realtime: bool,
}

#[derive(Parser, Debug)]
pub struct InspectCommand {
    /// Path to the `.safetensors` file
    pub model_path: PathBuf,
}
