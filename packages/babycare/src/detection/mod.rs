//! One detection cycle: read → gate → (mel → classify) → actuate.

mod scheduler;

pub use scheduler::{Schedule, Scheduler};

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{
    Error,
    actuation::{ActuationStateMachine, Transition},
    audio::AudioSource,
    classifier::{Classifier, ClassifierError, CryClass},
    constants::{LATENCY_SAMPLE_CYCLES, NUM_SAMPLES, SOUND_THRESHOLD},
    mel::MelExtractor,
};

/// Largest absolute sample value; `0.0` for an empty frame.
pub fn peak_amplitude(frame: &[f32]) -> f32 {
    let (lo, hi) = frame
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &s| {
            (lo.min(s), hi.max(s))
        });
    if frame.is_empty() {
        0.0
    } else {
        hi.abs().max(lo.abs())
    }
}

/// Outcome of one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub class: CryClass,
    pub peak: f32,
    /// `true` when the window was too quiet to classify.
    pub gated: bool,
    /// Classifier scores; `None` for gated cycles.
    pub scores: Option<Vec<f32>>,
    pub transition: Option<Transition>,
    pub elapsed: Duration,
}

/// Running counters for a session.
#[derive(Debug, Default)]
pub struct DetectorMetrics {
    pub cycles: AtomicU64,
    pub gated_cycles: AtomicU64,
    pub inferences: AtomicU64,
    pub cry_cycles: AtomicU64,
    pub read_errors: AtomicU64,
    pub skipped_cycles: AtomicU64,
    /// Summed latency of the first [`LATENCY_SAMPLE_CYCLES`] cycles (µs).
    latency_sum_us: AtomicU64,
}

impl DetectorMetrics {
    fn record_cycle(&self, report: &CycleReport) {
        let n = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        if report.gated {
            self.gated_cycles.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inferences.fetch_add(1, Ordering::Relaxed);
        }
        if report.class == CryClass::Cry {
            self.cry_cycles.fetch_add(1, Ordering::Relaxed);
        }
        if n <= LATENCY_SAMPLE_CYCLES {
            let total = self
                .latency_sum_us
                .fetch_add(report.elapsed.as_micros() as u64, Ordering::Relaxed)
                + report.elapsed.as_micros() as u64;
            if n == LATENCY_SAMPLE_CYCLES {
                info!(
                    "average cycle latency over {n} cycles: {:.3} s",
                    total as f64 / n as f64 / 1e6
                );
            }
        }
    }

    #[inline]
    pub fn add_skipped(&self, n: u64) {
        self.skipped_cycles.fetch_add(n, Ordering::Relaxed);
    }

    /// Mean latency over the sampled cycles completed so far.
    pub fn average_latency(&self) -> Option<Duration> {
        let n = self.cycles.load(Ordering::Relaxed).min(LATENCY_SAMPLE_CYCLES);
        (n > 0).then(|| {
            Duration::from_micros(self.latency_sum_us.load(Ordering::Relaxed) / n)
        })
    }
}

/// Everything a single cycle needs, owned by the scheduler thread.
pub struct DetectionLoop {
    source: Box<dyn AudioSource>,
    extractor: MelExtractor,
    classifier: Box<dyn Classifier>,
    machine: ActuationStateMachine,
    frame: Vec<f32>,
    sound_threshold: f32,
    metrics: Arc<DetectorMetrics>,
}

impl DetectionLoop {
    pub fn new(
        source: Box<dyn AudioSource>,
        classifier: Box<dyn Classifier>,
        machine: ActuationStateMachine,
    ) -> Self {
        Self {
            source,
            extractor: MelExtractor::new(),
            classifier,
            machine,
            frame: vec![0.0; NUM_SAMPLES],
            sound_threshold: SOUND_THRESHOLD,
            metrics: Arc::new(DetectorMetrics::default()),
        }
    }

    pub fn with_sound_threshold(mut self, threshold: f32) -> Self {
        self.sound_threshold = threshold;
        self
    }

    #[inline]
    pub fn metrics(&self) -> Arc<DetectorMetrics> {
        Arc::clone(&self.metrics)
    }

    #[inline]
    pub fn machine(&self) -> &ActuationStateMachine {
        &self.machine
    }

    /// Run one full cycle. A returned error aborts only this cycle.
    pub fn run_cycle(&mut self) -> Result<CycleReport, Error> {
        let start = Instant::now();
        if let Err(e) = self.source.read_exact(&mut self.frame) {
            if !e.is_terminal() {
                self.metrics.read_errors.fetch_add(1, Ordering::Relaxed);
            }
            return Err(e.into());
        }

        let peak = peak_amplitude(&self.frame);
        let (class, scores, gated) = if peak < self.sound_threshold {
            (CryClass::NotCry, None, true)
        } else {
            let spectrogram = self.extractor.extract(&self.frame)?;
            let result = self.classifier.predict(&spectrogram)?;
            debug!("scores {:?} -> {}", result.scores(), result.class());
            (result.class(), Some(result.scores().to_vec()), false)
        };

        let transition = self.machine.on_class(class);
        let report = CycleReport {
            class,
            peak,
            gated,
            scores,
            transition,
            elapsed: start.elapsed(),
        };
        self.metrics.record_cycle(&report);
        Ok(report)
    }

    /// Stop any actuator left running.
    pub fn shutdown(&mut self) {
        self.machine.shutdown();
    }
}

/// Errors after which no later cycle can succeed.
pub(crate) fn ends_session(err: &Error) -> bool {
    match err {
        Error::Audio(e) => e.is_terminal(),
        Error::Classifier(ClassifierError::Shape { .. }) => true,
        _ => false,
    }
}

pub(crate) fn log_cycle_error(err: &Error) {
    match err {
        Error::Audio(e) => warn!("audio read failed, skipping cycle: {e}"),
        other => warn!("detection cycle failed: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        actuation::{LogToy, SilentSound, SoothingMode, SoundChoice, ToyHandle},
        audio::{AudioError, WavFileSource},
        classifier::ClassificationResult,
        light::LightLevel,
        mel::MelSpectrogram,
    };

    struct CountingClassifier {
        calls: Arc<Mutex<u32>>,
        index: usize,
    }

    impl Classifier for CountingClassifier {
        fn num_classes(&self) -> usize {
            2
        }

        fn predict(
            &mut self,
            spectrogram: &MelSpectrogram,
        ) -> Result<ClassificationResult, ClassifierError> {
            assert_eq!(spectrogram.shape(), (64, 64));
            *self.calls.lock().unwrap() += 1;
            let mut scores = vec![0.1; 2];
            scores[self.index] = 0.9;
            ClassificationResult::from_scores(scores)
        }
    }

    fn detection(samples: Vec<f32>, index: usize) -> (DetectionLoop, Arc<Mutex<u32>>) {
        let calls = Arc::new(Mutex::new(0));
        let machine = ActuationStateMachine::new(
            SoothingMode::PlaySound,
            SoundChoice::Twinkle,
            Arc::new(LightLevel::default()),
            Box::new(SilentSound::default()),
            ToyHandle::inline(Box::new(LogToy)),
        );
        let det = DetectionLoop::new(
            Box::new(WavFileSource::from_samples(samples)),
            Box::new(CountingClassifier {
                calls: Arc::clone(&calls),
                index,
            }),
            machine,
        );
        (det, calls)
    }

    fn tone(amplitude: f32) -> Vec<f32> {
        (0..NUM_SAMPLES)
            .map(|i| amplitude * (i as f32 * 0.3).sin())
            .collect()
    }

    #[test]
    fn peak_uses_both_signs() {
        assert_eq!(peak_amplitude(&[0.1, -0.7, 0.3]), 0.7);
        assert_eq!(peak_amplitude(&[0.1, 0.25]), 0.25);
        assert_eq!(peak_amplitude(&[]), 0.0);
    }

    #[test]
    fn quiet_window_never_reaches_classifier() {
        let (mut det, calls) = detection(tone(0.19), 0);
        let report = det.run_cycle().unwrap();
        assert!(report.gated);
        assert_eq!(report.class, CryClass::NotCry);
        assert_eq!(report.scores, None);
        assert_eq!(*calls.lock().unwrap(), 0);
        assert_eq!(det.metrics().gated_cycles.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn peak_exactly_at_threshold_is_classified() {
        use crate::constants::SOUND_THRESHOLD;

        let mut frame = vec![0.0; NUM_SAMPLES];
        frame[NUM_SAMPLES / 2] = -SOUND_THRESHOLD;
        let (mut det, calls) = detection(frame, 1);
        let report = det.run_cycle().unwrap();
        assert_eq!(report.peak, SOUND_THRESHOLD);
        assert!(!report.gated);
        assert!(report.scores.is_some());
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn loud_window_is_classified_and_actuated() {
        let (mut det, calls) = detection(tone(0.8), 0);
        let report = det.run_cycle().unwrap();
        assert!(!report.gated);
        assert_eq!(report.class, CryClass::Cry);
        assert!(matches!(report.transition, Some(Transition::Started(_))));
        assert_eq!(*calls.lock().unwrap(), 1);
        assert!(det.metrics().average_latency().is_some());
    }

    #[test]
    fn exhausted_source_ends_session() {
        let (mut det, _) = detection(vec![0.0; 10], 1);
        let err = det.run_cycle().unwrap_err();
        assert!(matches!(err, Error::Audio(AudioError::EndOfStream)));
        assert!(ends_session(&err));
        assert_eq!(det.metrics().read_errors.load(Ordering::Relaxed), 0);
    }
}
