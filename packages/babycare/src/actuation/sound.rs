//! Looping playback of the bundled soothing sounds.

use tracing::info;

use super::SoundChoice;

#[derive(Debug, thiserror::Error)]
pub enum SoundError {
    #[error("audio output: {0}")]
    Output(String),
    #[error("sound asset '{path}': {reason}")]
    Asset { path: String, reason: String },
}

/// Start/stop control over a looping sound. Both calls are idempotent.
pub trait SoundActuator: Send {
    fn start(&mut self, choice: SoundChoice);
    fn stop(&mut self);
    fn is_playing(&self) -> bool;
}

/// Logs instead of playing; used for headless replay.
#[derive(Debug, Default)]
pub struct SilentSound {
    playing: Option<SoundChoice>,
}

impl SoundActuator for SilentSound {
    fn start(&mut self, choice: SoundChoice) {
        if self.playing.is_none() {
            info!("(silent) playing {choice}");
            self.playing = Some(choice);
        }
    }

    fn stop(&mut self) {
        if let Some(choice) = self.playing.take() {
            info!("(silent) stopped {choice}");
        }
    }

    fn is_playing(&self) -> bool {
        self.playing.is_some()
    }
}

#[cfg(feature = "audio")]
pub use player::SoundPlayer;

#[cfg(feature = "audio")]
mod player {
    use std::{
        fs::File,
        io::BufReader,
        path::{Path, PathBuf},
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread::JoinHandle,
    };

    use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
    use rodio::{OutputStreamBuilder, Sink, Source};
    use tracing::{debug, error, info, warn};

    use super::{SoundActuator, SoundError};
    use crate::actuation::SoundChoice;

    enum PlayerCommand {
        Play(SoundChoice),
        Stop,
        Shutdown,
    }

    /// Plays assets from a sounds directory on the default output device.
    ///
    /// The rodio output stream is owned by a dedicated thread; this handle
    /// only sends commands to it.
    pub struct SoundPlayer {
        commands: Sender<PlayerCommand>,
        playing: Arc<AtomicBool>,
        thread: Option<JoinHandle<()>>,
    }

    impl SoundPlayer {
        /// Open the default output and verify every asset exists.
        pub fn open(sounds_dir: impl Into<PathBuf>) -> Result<Self, SoundError> {
            let sounds_dir = sounds_dir.into();
            for choice in [
                SoundChoice::Twinkle,
                SoundChoice::RockABye,
                SoundChoice::Rain,
                SoundChoice::WhiteNoise,
            ] {
                let path = sounds_dir.join(choice.asset_name());
                if !path.is_file() {
                    warn!("missing sound asset {}", path.display());
                }
            }

            let (cmd_tx, cmd_rx) = unbounded();
            let (ready_tx, ready_rx) = bounded::<Result<(), SoundError>>(1);
            let playing = Arc::new(AtomicBool::new(false));
            let thread_playing = Arc::clone(&playing);

            let thread = std::thread::Builder::new()
                .name("babycare-sound".into())
                .spawn(move || playback_thread(sounds_dir, cmd_rx, ready_tx, thread_playing))
                .map_err(|e| SoundError::Output(format!("failed to spawn playback thread: {e}")))?;

            ready_rx
                .recv()
                .map_err(|_| SoundError::Output("playback thread exited".into()))??;

            Ok(Self {
                commands: cmd_tx,
                playing,
                thread: Some(thread),
            })
        }
    }

    impl SoundActuator for SoundPlayer {
        fn start(&mut self, choice: SoundChoice) {
            if !self.playing.swap(true, Ordering::AcqRel) {
                let _ = self.commands.send(PlayerCommand::Play(choice));
            }
        }

        fn stop(&mut self) {
            if self.playing.swap(false, Ordering::AcqRel) {
                let _ = self.commands.send(PlayerCommand::Stop);
            }
        }

        fn is_playing(&self) -> bool {
            self.playing.load(Ordering::Acquire)
        }
    }

    impl Drop for SoundPlayer {
        fn drop(&mut self) {
            let _ = self.commands.send(PlayerCommand::Shutdown);
            if let Some(t) = self.thread.take()
                && t.join().is_err()
            {
                error!("playback thread panicked");
            }
        }
    }

    fn open_looped(path: &Path) -> Result<impl Source + Send + 'static, SoundError> {
        let asset_err = |reason: String| SoundError::Asset {
            path: path.display().to_string(),
            reason,
        };
        let file = File::open(path).map_err(|e| asset_err(e.to_string()))?;
        let decoder =
            rodio::Decoder::new(BufReader::new(file)).map_err(|e| asset_err(e.to_string()))?;
        Ok(decoder.repeat_infinite())
    }

    fn playback_thread(
        sounds_dir: PathBuf,
        commands: Receiver<PlayerCommand>,
        ready: Sender<Result<(), SoundError>>,
        playing: Arc<AtomicBool>,
    ) {
        let stream = match OutputStreamBuilder::open_default_stream() {
            Ok(s) => s,
            Err(e) => {
                let _ = ready.send(Err(SoundError::Output(e.to_string())));
                return;
            }
        };
        let _ = ready.send(Ok(()));
        let mut sink: Option<Sink> = None;

        for cmd in commands.iter() {
            match cmd {
                PlayerCommand::Play(choice) => {
                    let path = sounds_dir.join(choice.asset_name());
                    match open_looped(&path) {
                        Ok(source) => {
                            let s = Sink::connect_new(stream.mixer());
                            s.append(source);
                            info!("playing {}", path.display());
                            sink = Some(s);
                        }
                        Err(e) => {
                            error!("{e}");
                            playing.store(false, Ordering::Release);
                        }
                    }
                }
                PlayerCommand::Stop => {
                    if let Some(s) = sink.take() {
                        s.stop();
                        debug!("playback stopped");
                    }
                }
                PlayerCommand::Shutdown => break,
            }
        }
        if let Some(s) = sink.take() {
            s.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_sound_is_idempotent() {
        let mut s = SilentSound::default();
        assert!(!s.is_playing());
        s.start(SoundChoice::Twinkle);
        s.start(SoundChoice::Rain);
        assert!(s.is_playing());
        s.stop();
        s.stop();
        assert!(!s.is_playing());
    }
}
