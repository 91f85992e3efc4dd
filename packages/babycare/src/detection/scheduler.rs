use std::{
    sync::Arc,
    thread::JoinHandle,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError, bounded};
use tracing::{debug, error, info, instrument, warn};

use super::{CycleReport, DetectionLoop, DetectorMetrics, ends_session, log_cycle_error};
use crate::constants::{DETECTION_PERIOD, INITIAL_DELAY};

/// Reports buffered for a slow consumer before new ones are dropped.
const REPORT_QUEUE: usize = 64;

/// Timing of the detection thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub initial_delay: Duration,
    /// Zero runs cycles back-to-back.
    pub period: Duration,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            initial_delay: INITIAL_DELAY,
            period: DETECTION_PERIOD,
        }
    }
}

impl Schedule {
    /// No delay, no pacing; used to replay recordings as fast as possible.
    pub const fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            period: Duration::ZERO,
        }
    }
}

/// Single worker thread that runs one cycle per period, never two at once.
///
/// A cycle that overruns its slot makes the scheduler drop the deadlines it
/// missed rather than catching up.
pub struct Scheduler {
    stop: Sender<()>,
    reports: Receiver<CycleReport>,
    metrics: Arc<DetectorMetrics>,
    thread: Option<JoinHandle<DetectionLoop>>,
}

impl Scheduler {
    #[instrument(skip(detection))]
    pub fn spawn(detection: DetectionLoop, schedule: Schedule) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (report_tx, report_rx) = bounded::<CycleReport>(REPORT_QUEUE);
        let metrics = detection.metrics();

        let thread = std::thread::Builder::new()
            .name("babycare-detector".into())
            .spawn(move || Self::run(detection, schedule, stop_rx, report_tx))?;
        info!("detection scheduled");

        Ok(Self {
            stop: stop_tx,
            reports: report_rx,
            metrics,
            thread: Some(thread),
        })
    }

    /// Per-cycle reports, in order.
    #[inline]
    pub fn reports(&self) -> &Receiver<CycleReport> {
        &self.reports
    }

    #[inline]
    pub fn metrics(&self) -> &Arc<DetectorMetrics> {
        &self.metrics
    }

    /// `true` once the detection thread has returned.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Ask the thread to stop, wait for the in-flight cycle, and hand the
    /// loop back. `None` if already joined or the thread panicked.
    pub fn stop(&mut self) -> Option<DetectionLoop> {
        let _ = self.stop.try_send(());
        self.join()
    }

    /// Wait for the thread to exit on its own (end of a finite source).
    pub fn join(&mut self) -> Option<DetectionLoop> {
        let handle = self.thread.take()?;
        match handle.join() {
            Ok(detection) => Some(detection),
            Err(_) => {
                error!("detector thread panicked");
                None
            }
        }
    }

    fn run(
        mut detection: DetectionLoop,
        schedule: Schedule,
        stop: Receiver<()>,
        reports: Sender<CycleReport>,
    ) -> DetectionLoop {
        let metrics = detection.metrics();
        let mut deadline = Instant::now() + schedule.initial_delay;

        loop {
            if !wait_until(deadline, &stop) {
                debug!("stop requested");
                break;
            }

            match detection.run_cycle() {
                Ok(report) => match reports.try_send(report) {
                    Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                    Err(TrySendError::Full(_)) => debug!("report queue full"),
                },
                Err(e) if ends_session(&e) => {
                    info!("detection finished: {e}");
                    break;
                }
                Err(e) => log_cycle_error(&e),
            }

            if schedule.period.is_zero() {
                deadline = Instant::now();
                continue;
            }
            deadline += schedule.period;
            let now = Instant::now();
            let mut missed = 0;
            while deadline < now {
                deadline += schedule.period;
                missed += 1;
            }
            if missed > 0 {
                warn!("cycle overran, skipping {missed} slot(s)");
                metrics.add_skipped(missed);
            }
        }
        detection
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(mut detection) = self.stop() {
            detection.shutdown();
        }
    }
}

/// Sleep until `deadline` unless a stop arrives first. Returns `false` on stop.
fn wait_until(deadline: Instant, stop: &Receiver<()>) -> bool {
    let now = Instant::now();
    if deadline <= now {
        return matches!(stop.try_recv(), Err(TryRecvError::Empty));
    }
    matches!(stop.recv_timeout(deadline - now), Err(RecvTimeoutError::Timeout))
}
