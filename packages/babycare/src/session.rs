//! Detection session lifecycle.
//!
//! A [`Session`] owns every per-run resource: audio capture, classifier,
//! light listener, toy worker, keep-awake guard and the detection thread.
//! [`SessionManager`] guarantees at most one of them runs at a time.

use std::{
    process::{Child, Command, Stdio},
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::{
    Result,
    actuation::{
        ActuationStateMachine, LogToy, SilentSound, SoundActuator, ToyActuator, ToyWorker,
    },
    audio::{AudioError, AudioSource},
    classifier::{Classifier, ClassifierError},
    config::BabycareConfig,
    detection::{CycleReport, DetectionLoop, DetectorMetrics, Scheduler},
    light::{AmbientLightSensor, FixedLight, LightLevel},
};

/// Prevents the host from suspending while detection runs.
pub trait KeepAwake: Send {
    fn acquire(&mut self) -> std::io::Result<()>;
    fn release(&mut self);
}

/// Holds a `systemd-inhibit` child for the lifetime of the session.
#[derive(Debug, Default)]
pub struct SystemdInhibit {
    child: Option<Child>,
}

impl KeepAwake for SystemdInhibit {
    fn acquire(&mut self) -> std::io::Result<()> {
        if self.child.is_some() {
            return Ok(());
        }
        let child = Command::new("systemd-inhibit")
            .args([
                "--what=sleep:idle",
                "--who=babycare",
                "--why=cry detection running",
                "sleep",
                "infinity",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        debug!("sleep inhibited (pid {})", child.id());
        self.child = Some(child);
        Ok(())
    }

    fn release(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                warn!("failed to release sleep inhibitor: {e}");
            }
            let _ = child.wait();
        }
    }
}

type AudioOpener = Box<dyn FnOnce() -> std::result::Result<Box<dyn AudioSource>, AudioError> + Send>;
type ClassifierLoader =
    Box<dyn FnOnce() -> std::result::Result<Box<dyn Classifier>, ClassifierError> + Send>;

/// Collaborators a session is assembled from.
///
/// Audio and classifier are opened lazily, in that order, when the session
/// starts; everything else is handed over ready-made.
pub struct SessionParts {
    audio: AudioOpener,
    classifier: ClassifierLoader,
    sound: Box<dyn SoundActuator>,
    toy: Box<dyn ToyActuator>,
    light: Box<dyn AmbientLightSensor>,
    keep_awake: Option<Box<dyn KeepAwake>>,
}

impl SessionParts {
    pub fn new<A, C>(audio: A, classifier: C) -> Self
    where
        A: FnOnce() -> std::result::Result<Box<dyn AudioSource>, AudioError> + Send + 'static,
        C: FnOnce() -> std::result::Result<Box<dyn Classifier>, ClassifierError> + Send + 'static,
    {
        Self {
            audio: Box::new(audio),
            classifier: Box::new(classifier),
            sound: Box::new(SilentSound::default()),
            toy: Box::new(LogToy),
            light: Box::new(FixedLight(None)),
            keep_awake: None,
        }
    }

    pub fn with_sound(mut self, sound: Box<dyn SoundActuator>) -> Self {
        self.sound = sound;
        self
    }

    pub fn with_toy(mut self, toy: Box<dyn ToyActuator>) -> Self {
        self.toy = toy;
        self
    }

    pub fn with_light(mut self, light: Box<dyn AmbientLightSensor>) -> Self {
        self.light = light;
        self
    }

    pub fn with_keep_awake(mut self, guard: Box<dyn KeepAwake>) -> Self {
        self.keep_awake = Some(guard);
        self
    }
}

/// Counters of a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionSummary {
    pub cycles: u64,
    pub gated_cycles: u64,
    pub inferences: u64,
    pub cry_cycles: u64,
    pub read_errors: u64,
    pub skipped_cycles: u64,
    pub average_latency: Option<Duration>,
}

impl SessionSummary {
    fn from_metrics(m: &DetectorMetrics) -> Self {
        Self {
            cycles: m.cycles.load(Ordering::Relaxed),
            gated_cycles: m.gated_cycles.load(Ordering::Relaxed),
            inferences: m.inferences.load(Ordering::Relaxed),
            cry_cycles: m.cry_cycles.load(Ordering::Relaxed),
            read_errors: m.read_errors.load(Ordering::Relaxed),
            skipped_cycles: m.skipped_cycles.load(Ordering::Relaxed),
            average_latency: m.average_latency(),
        }
    }
}

/// One running detection.
pub struct Session {
    scheduler: Option<Scheduler>,
    reports: Receiver<CycleReport>,
    metrics: Arc<DetectorMetrics>,
    light_level: Arc<LightLevel>,
    light: Box<dyn AmbientLightSensor>,
    toy_worker: Option<ToyWorker>,
    keep_awake: Option<Box<dyn KeepAwake>>,
}

impl Session {
    /// Acquire every resource and schedule the first cycle.
    ///
    /// On failure nothing stays acquired.
    #[instrument(skip_all)]
    pub fn start(config: &BabycareConfig, parts: SessionParts) -> Result<Self> {
        config.validate()?;
        let SessionParts {
            audio,
            classifier,
            sound,
            toy,
            mut light,
            mut keep_awake,
        } = parts;

        let source = audio()?;
        info!("audio source open ({} Hz)", source.sample_rate());
        let classifier = classifier()?;
        debug!("classifier loaded ({} classes)", classifier.num_classes());

        if let Some(guard) = keep_awake.as_mut() {
            guard.acquire()?;
        }
        let release_guard = |keep_awake: &mut Option<Box<dyn KeepAwake>>| {
            if let Some(guard) = keep_awake.as_mut() {
                guard.release();
            }
        };

        let light_level = Arc::new(LightLevel::new(config.light.threshold));
        if let Err(e) = light.start(Arc::clone(&light_level)) {
            // detection still runs; AUTO keeps assuming a dark room
            warn!("light sensor unavailable ({e}), assuming the room is dark");
        }

        let toy_worker = match ToyWorker::spawn(toy) {
            Ok(w) => w,
            Err(e) => {
                light.stop();
                release_guard(&mut keep_awake);
                return Err(e.into());
            }
        };

        let machine = ActuationStateMachine::new(
            config.soothing.mode,
            config.soothing.sound,
            Arc::clone(&light_level),
            sound,
            toy_worker.handle(),
        )
        .with_stop_debounce(config.detector.stop_debounce);
        let detection = DetectionLoop::new(source, classifier, machine)
            .with_sound_threshold(config.detector.sound_threshold);
        let metrics = detection.metrics();

        let scheduler = match Scheduler::spawn(detection, config.detector.schedule()) {
            Ok(s) => s,
            Err(e) => {
                drop(toy_worker);
                light.stop();
                release_guard(&mut keep_awake);
                return Err(e.into());
            }
        };

        info!(
            "session started (mode {}, sound {})",
            config.soothing.mode, config.soothing.sound
        );
        Ok(Self {
            reports: scheduler.reports().clone(),
            scheduler: Some(scheduler),
            metrics,
            light_level,
            light,
            toy_worker: Some(toy_worker),
            keep_awake,
        })
    }

    /// Per-cycle reports; disconnects once the detection thread exits.
    #[inline]
    pub fn reports(&self) -> &Receiver<CycleReport> {
        &self.reports
    }

    #[inline]
    pub fn light_level(&self) -> &Arc<LightLevel> {
        &self.light_level
    }

    /// `true` while the detection thread is still running.
    pub fn is_running(&self) -> bool {
        self.scheduler.as_ref().is_some_and(|s| !s.is_finished())
    }

    /// Block until the detection thread exits by itself (finite sources).
    pub fn wait(&self) {
        for _ in self.reports.iter() {}
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary::from_metrics(&self.metrics)
    }

    /// Cancel detection and release every resource.
    #[instrument(skip_all)]
    pub fn stop(mut self) -> SessionSummary {
        self.teardown();
        let summary = self.summary();
        info!("session stopped after {} cycles", summary.cycles);
        summary
    }

    fn teardown(&mut self) {
        if let Some(mut scheduler) = self.scheduler.take()
            && let Some(mut detection) = scheduler.stop()
        {
            detection.shutdown();
        }
        self.light.stop();
        if let Some(mut worker) = self.toy_worker.take() {
            worker.shutdown();
        }
        if let Some(mut guard) = self.keep_awake.take() {
            guard.release();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Result of [`SessionManager::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// Holds the single active session, if any.
#[derive(Default)]
pub struct SessionManager {
    current: Mutex<Option<Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session unless one is already detecting (then a no-op).
    pub fn start(&self, config: &BabycareConfig, parts: SessionParts) -> Result<StartOutcome> {
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(Session::is_running) {
            debug!("start ignored, session already running");
            return Ok(StartOutcome::AlreadyRunning);
        }
        if let Some(finished) = current.take() {
            finished.stop();
        }
        *current = Some(Session::start(config, parts)?);
        Ok(StartOutcome::Started)
    }

    /// Stop the running session. `None` when nothing was running.
    pub fn stop(&self) -> Option<SessionSummary> {
        let session = self.current.lock().take()?;
        Some(session.stop())
    }

    pub fn is_detecting(&self) -> bool {
        self.current.lock().as_ref().is_some_and(Session::is_running)
    }

    /// Report stream of the current session.
    pub fn reports(&self) -> Option<Receiver<CycleReport>> {
        self.current.lock().as_ref().map(|s| s.reports().clone())
    }

    /// Block until the current session's detection thread exits by itself.
    pub fn wait(&self) {
        if let Some(reports) = self.reports() {
            for _ in reports.iter() {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32};

    use super::*;
    use crate::{
        audio::WavFileSource, classifier::ClassificationResult, constants::NUM_SAMPLES,
        mel::MelSpectrogram,
    };

    struct Fixed(usize);

    impl Classifier for Fixed {
        fn num_classes(&self) -> usize {
            2
        }

        fn predict(
            &mut self,
            _: &MelSpectrogram,
        ) -> std::result::Result<ClassificationResult, ClassifierError> {
            let mut s = vec![0.0; 2];
            s[self.0] = 1.0;
            ClassificationResult::from_scores(s)
        }
    }

    #[derive(Clone, Default)]
    struct Guard(Arc<AtomicBool>, Arc<AtomicU32>);

    impl KeepAwake for Guard {
        fn acquire(&mut self) -> std::io::Result<()> {
            self.0.store(true, Ordering::SeqCst);
            self.1.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn release(&mut self) {
            self.0.store(false, Ordering::SeqCst);
        }
    }

    fn fast_config() -> BabycareConfig {
        let mut c = BabycareConfig::default();
        c.detector.initial_delay_ms = 0;
        c.detector.period_ms = 0;
        c
    }

    fn replay_parts(windows: usize) -> SessionParts {
        SessionParts::new(
            move || {
                Ok(Box::new(WavFileSource::from_samples(vec![0.5; NUM_SAMPLES * windows]))
                    as Box<dyn AudioSource>)
            },
            || Ok(Box::new(Fixed(0)) as Box<dyn Classifier>),
        )
    }

    #[test]
    fn replay_session_runs_to_completion() {
        let s = Session::start(&fast_config(), replay_parts(4)).unwrap();
        s.wait();
        let summary = s.stop();
        assert_eq!(summary.cycles, 4);
        assert_eq!(summary.cry_cycles, 4);
        assert_eq!(summary.inferences, 4);
    }

    #[test]
    fn second_start_is_a_no_op() {
        let mut c = BabycareConfig::default();
        c.detector.initial_delay_ms = 60_000;
        let manager = SessionManager::new();
        assert_eq!(manager.start(&c, replay_parts(1)).unwrap(), StartOutcome::Started);
        assert!(manager.is_detecting());

        let opened = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&opened);
        let parts = SessionParts::new(
            move || {
                flag.store(true, Ordering::SeqCst);
                Err(AudioError::Device("unused".into()))
            },
            || Ok(Box::new(Fixed(1)) as Box<dyn Classifier>),
        );
        assert_eq!(manager.start(&c, parts).unwrap(), StartOutcome::AlreadyRunning);
        assert!(!opened.load(Ordering::SeqCst));

        assert!(manager.stop().is_some());
        assert!(!manager.is_detecting());
        assert!(manager.stop().is_none());
    }

    #[test]
    fn audio_failure_aborts_before_anything_else() {
        let guard = Guard::default();
        let loaded = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&loaded);
        let parts = SessionParts::new(
            || Err(AudioError::PermissionDenied("denied".into())),
            move || {
                flag.store(true, Ordering::SeqCst);
                Ok(Box::new(Fixed(1)) as Box<dyn Classifier>)
            },
        )
        .with_keep_awake(Box::new(guard.clone()));

        let manager = SessionManager::new();
        assert!(manager.start(&fast_config(), parts).is_err());
        assert!(!loaded.load(Ordering::SeqCst));
        assert_eq!(guard.1.load(Ordering::SeqCst), 0);
        assert!(!manager.is_detecting());
    }

    #[test]
    fn unreadable_light_sensor_still_detects_and_soothes_with_sound() {
        use crate::{
            SoothingMode, SoundChoice,
            actuation::{Actuator, Transition},
            light::SysfsLight,
        };

        let dir = tempfile::tempdir().unwrap();
        let mut c = fast_config();
        c.soothing.mode = SoothingMode::Auto;
        let parts = replay_parts(2)
            .with_light(Box::new(SysfsLight::new(dir.path().join("in_illuminance_input"))));

        let manager = SessionManager::new();
        assert_eq!(manager.start(&c, parts).unwrap(), StartOutcome::Started);
        let reports: Vec<_> = manager.reports().unwrap().iter().collect();
        assert_eq!(reports.len(), 2);
        assert_eq!(
            reports[0].transition,
            Some(Transition::Started(Actuator::Sound(SoundChoice::Twinkle)))
        );
        assert_eq!(manager.stop().unwrap().cycles, 2);
    }

    #[test]
    fn model_failure_is_fatal() {
        let parts = SessionParts::new(
            || Ok(Box::new(WavFileSource::from_samples(vec![0.0; 8])) as Box<dyn AudioSource>),
            || {
                Err(ClassifierError::Load {
                    path: "missing".into(),
                    reason: "not found".into(),
                })
            },
        );
        assert!(matches!(
            Session::start(&fast_config(), parts),
            Err(crate::Error::Classifier(ClassifierError::Load { .. }))
        ));
    }

    #[test]
    fn stop_releases_keep_awake() {
        let guard = Guard::default();
        let mut c = fast_config();
        c.detector.initial_delay_ms = 60_000;
        let s = Session::start(&c, replay_parts(1).with_keep_awake(Box::new(guard.clone())))
            .unwrap();
        assert!(guard.0.load(Ordering::SeqCst));
        s.stop();
        assert!(!guard.0.load(Ordering::SeqCst));
    }
}
