//! Ambient-light side channel.
//!
//! Sensors push lux readings into a shared [`LightLevel`]; the actuation
//! state machine only ever reads the latest value at decision time.

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use tracing::{debug, error, info, warn};

use crate::constants::{LIGHT_POLL_INTERVAL, LIGHT_THRESHOLD};

/// Lock-free single-value cell holding the most recent light reading.
#[derive(Debug)]
pub struct LightLevel {
    threshold: f32,
    lux_bits: AtomicU32,
    has_reading: AtomicBool,
    needs_sleep: AtomicBool,
}

impl Default for LightLevel {
    fn default() -> Self {
        Self::new(LIGHT_THRESHOLD)
    }
}

impl LightLevel {
    /// A cell with no reading yet. Until the first update the room is
    /// assumed dark.
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            lux_bits: AtomicU32::new(0),
            has_reading: AtomicBool::new(false),
            needs_sleep: AtomicBool::new(true),
        }
    }

    #[inline]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Record a new reading. Non-finite values are ignored.
    pub fn update(&self, lux: f32) {
        if !lux.is_finite() {
            warn!("ignoring non-finite light reading {lux}");
            return;
        }
        self.lux_bits.store(lux.to_bits(), Ordering::Release);
        self.needs_sleep
            .store(lux <= self.threshold, Ordering::Release);
        self.has_reading.store(true, Ordering::Release);
    }

    /// Latest lux value, if any sensor has reported.
    pub fn lux(&self) -> Option<f32> {
        self.has_reading
            .load(Ordering::Acquire)
            .then(|| f32::from_bits(self.lux_bits.load(Ordering::Acquire)))
    }

    /// `true` when the last reading was at or below the threshold.
    #[inline]
    pub fn needs_sleep(&self) -> bool {
        self.needs_sleep.load(Ordering::Acquire)
    }
}

/// Push-based producer of lux readings.
pub trait AmbientLightSensor: Send {
    /// Begin delivering readings into `level`.
    fn start(&mut self, level: Arc<LightLevel>) -> std::io::Result<()>;

    /// Stop delivering readings. Idempotent.
    fn stop(&mut self);
}

impl<S: AmbientLightSensor + ?Sized> AmbientLightSensor for Box<S> {
    fn start(&mut self, level: Arc<LightLevel>) -> std::io::Result<()> {
        (**self).start(level)
    }

    fn stop(&mut self) {
        (**self).stop()
    }
}

/// Sensor that reports one constant reading on start (or nothing at all).
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedLight(pub Option<f32>);

impl AmbientLightSensor for FixedLight {
    fn start(&mut self, level: Arc<LightLevel>) -> std::io::Result<()> {
        if let Some(lux) = self.0 {
            level.update(lux);
        }
        Ok(())
    }

    fn stop(&mut self) {}
}

/// Polls a Linux IIO illuminance attribute
/// (e.g. `/sys/bus/iio/devices/iio:device0/in_illuminance_input`).
pub struct SysfsLight {
    path: PathBuf,
    interval: Duration,
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SysfsLight {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            interval: LIGHT_POLL_INTERVAL,
            stop: None,
            thread: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn read_lux(path: &std::path::Path) -> std::io::Result<f32> {
        let raw = std::fs::read_to_string(path)?;
        raw.trim()
            .parse::<f32>()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

impl AmbientLightSensor for SysfsLight {
    fn start(&mut self, level: Arc<LightLevel>) -> std::io::Result<()> {
        if self.thread.is_some() {
            return Ok(());
        }
        // fail fast if the attribute is not readable at all
        level.update(Self::read_lux(&self.path)?);

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let path = self.path.clone();
        let interval = self.interval;
        let thread = std::thread::Builder::new()
            .name("babycare-light".into())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    match Self::read_lux(&path) {
                        Ok(lux) => level.update(lux),
                        Err(e) => debug!("light read failed: {e}"),
                    }
                }
                debug!("light poller stopped");
            })?;

        info!("polling light sensor {}", self.path.display());
        self.stop = Some(stop_tx);
        self.thread = Some(thread);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.try_send(());
        }
        if let Some(t) = self.thread.take()
            && t.join().is_err()
        {
            error!("light poller panicked");
        }
    }
}

impl Drop for SysfsLight {
    fn drop(&mut self) {
        self.stop();
    }
}
