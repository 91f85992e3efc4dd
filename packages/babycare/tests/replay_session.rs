//! Whole-session runs over synthetic WAV recordings with scripted
//! classifiers and recording actuators.

use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use babycare::{
    BabycareConfig, ClassificationResult, Classifier, SessionManager, SessionParts, SoothingMode,
    StartOutcome,
    actuation::{Actuator, SoundActuator, SoundChoice, ToyActuator, ToyError, Transition},
    audio::{AudioSource, WavFileSource},
    classifier::ClassifierError,
    constants::NUM_SAMPLES,
    light::FixedLight,
    mel::MelSpectrogram,
};

/* ───────────────────────────── helpers ────────────────────────────── */

/// Calls "cry" whenever it is invoked; gating decides the rest.
struct LoudIsCry;

impl Classifier for LoudIsCry {
    fn num_classes(&self) -> usize {
        2
    }

    fn predict(&mut self, _: &MelSpectrogram) -> Result<ClassificationResult, ClassifierError> {
        ClassificationResult::from_scores(vec![0.9, 0.1])
    }
}

#[derive(Default)]
struct Log {
    sound: Vec<&'static str>,
    toy: Vec<bool>,
}

struct RecSound(Arc<Mutex<Log>>, bool);

impl SoundActuator for RecSound {
    fn start(&mut self, _: SoundChoice) {
        self.0.lock().unwrap().sound.push("start");
        self.1 = true;
    }
    fn stop(&mut self) {
        self.0.lock().unwrap().sound.push("stop");
        self.1 = false;
    }
    fn is_playing(&self) -> bool {
        self.1
    }
}

struct RecToy(Arc<Mutex<Log>>);

impl ToyActuator for RecToy {
    fn set_power(&mut self, on: bool) -> Result<(), ToyError> {
        self.0.lock().unwrap().toy.push(on);
        Ok(())
    }
}

/// One window per entry: `true` = loud tone, `false` = near silence.
fn write_recording(path: &Path, windows: &[bool]) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut w = hound::WavWriter::create(path, spec).unwrap();
    for &loud in windows {
        let amp = if loud { 0.7 } else { 0.01 };
        for i in 0..NUM_SAMPLES {
            let s = amp * (i as f32 * 0.25).sin();
            w.write_sample((s * i16::MAX as f32) as i16).unwrap();
        }
    }
    w.finalize().unwrap();
}

fn fast_config(mode: SoothingMode) -> BabycareConfig {
    let mut c = BabycareConfig::default();
    c.detector.initial_delay_ms = 0;
    c.detector.period_ms = 0;
    c.soothing.mode = mode;
    c
}

fn parts(path: &Path, log: &Arc<Mutex<Log>>, lux: Option<f32>) -> SessionParts {
    let path = path.to_path_buf();
    SessionParts::new(
        move || Ok(Box::new(WavFileSource::open(path)?) as Box<dyn AudioSource>),
        || Ok(Box::new(LoudIsCry) as Box<dyn Classifier>),
    )
    .with_sound(Box::new(RecSound(Arc::clone(log), false)))
    .with_toy(Box::new(RecToy(Arc::clone(log))))
    .with_light(Box::new(FixedLight(lux)))
}

/* ───────────────────────────── tests ────────────────────────────── */

#[test]
fn eight_cycle_recording_starts_and_stops_sound() {
    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("night.wav");
    write_recording(&wav, &[false, false, true, false, false, false, false, false]);
    let log = Arc::new(Mutex::new(Log::default()));

    let manager = SessionManager::new();
    let outcome = manager
        .start(&fast_config(SoothingMode::PlaySound), parts(&wav, &log, None))
        .unwrap();
    assert_eq!(outcome, StartOutcome::Started);

    let reports: Vec<_> = manager.reports().unwrap().iter().collect();
    assert_eq!(reports.len(), 8);
    assert_eq!(reports.iter().filter(|r| r.gated).count(), 7);

    let transitions: Vec<_> = reports
        .iter()
        .enumerate()
        .filter_map(|(i, r)| r.transition.map(|t| (i + 1, t)))
        .collect();
    let sound = Actuator::Sound(SoundChoice::Twinkle);
    assert_eq!(
        transitions,
        vec![(3, Transition::Started(sound)), (8, Transition::Stopped(sound))]
    );

    let summary = manager.stop().unwrap();
    assert_eq!(summary.cycles, 8);
    assert_eq!(summary.inferences, 1);
    assert_eq!(log.lock().unwrap().sound, vec!["start", "stop"]);
}

#[test]
fn bright_room_in_auto_mode_uses_the_toy() {
    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("day.wav");
    write_recording(&wav, &[true, true, false, false, false, false, false]);
    let log = Arc::new(Mutex::new(Log::default()));

    let manager = SessionManager::new();
    manager
        .start(&fast_config(SoothingMode::Auto), parts(&wav, &log, Some(400.0)))
        .unwrap();
    manager.wait();
    manager.stop().unwrap();

    let log = log.lock().unwrap();
    assert!(log.sound.is_empty());
    assert_eq!(log.toy, vec![true, false]);
}

#[test]
fn dark_room_in_auto_mode_uses_sound_and_teardown_silences_it() {
    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("dark.wav");
    // cry with no calm tail: sound is still playing when the recording ends
    write_recording(&wav, &[false, true, false]);
    let log = Arc::new(Mutex::new(Log::default()));

    let manager = SessionManager::new();
    manager
        .start(&fast_config(SoothingMode::Auto), parts(&wav, &log, Some(3.0)))
        .unwrap();
    manager.wait();
    manager.stop().unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.sound, vec!["start", "stop"]);
    assert!(log.toy.is_empty());
}

#[test]
fn wrong_sample_rate_fails_session_start() {
    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("cd.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 44_100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut w = hound::WavWriter::create(&wav, spec).unwrap();
    w.write_sample(0i16).unwrap();
    w.finalize().unwrap();

    let log = Arc::new(Mutex::new(Log::default()));
    let manager = SessionManager::new();
    assert!(
        manager
            .start(&fast_config(SoothingMode::PlaySound), parts(&wav, &log, None))
            .is_err()
    );
    assert!(!manager.is_detecting());
}
