//! Live microphone capture via `cpal`, resampled to 8 kHz with `rubato`.
//!
//! The `cpal` stream is not `Send` on every backend, so it lives on a
//! dedicated capture thread; the [`MicSource`] handle only holds the
//! receiving end of a bounded chunk channel.

use std::{
    thread::JoinHandle,
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use rubato::{FftFixedIn, Resampler};
use tracing::{debug, error, info, warn};

use super::{AudioError, AudioSource, downmix};
use crate::constants::SAMPLE_RATE;

/// Device-rate chunks buffered between callback and reader. When full, the
/// oldest chunk is evicted so the queue always ends at the live edge.
const CHUNK_QUEUE: usize = 512;
/// Resampler input block (device-rate frames).
const RESAMPLE_CHUNK: usize = 1_024;

/// One enumerated input device.
#[derive(Debug, Clone)]
pub struct InputDeviceInfo {
    pub name: String,
    pub default_config: Option<String>,
    pub is_default: bool,
}

/// Enumerate capture devices on the default host.
pub fn list_input_devices() -> Result<Vec<InputDeviceInfo>, AudioError> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::Device(format!("failed to enumerate devices: {e}")))?;

    Ok(devices
        .map(|d| {
            let name = d.name().unwrap_or_else(|_| "Unknown".into());
            InputDeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                default_config: d.default_input_config().ok().map(|c| format!("{c:?}")),
                name,
            }
        })
        .collect())
}

pub struct MicSource {
    chunks: Receiver<Vec<f32>>,
    resampler: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
    ready: Vec<f32>,
    timeout: Duration,
    stop: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl MicSource {
    /// Open `device` (or the default input) and start capturing.
    ///
    /// Fails before returning if the device cannot be opened, so a session
    /// never starts without audio.
    pub fn open(device: Option<&str>, timeout: Duration) -> Result<Self, AudioError> {
        let (ready_tx, ready_rx) = bounded::<Result<u32, AudioError>>(1);
        let (chunk_tx, chunk_rx) = bounded::<Vec<f32>>(CHUNK_QUEUE);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let device = device.map(str::to_owned);
        let evict = chunk_rx.clone();

        let thread = std::thread::Builder::new()
            .name("babycare-capture".into())
            .spawn(move || match build_input_stream(device.as_deref(), chunk_tx, evict) {
                Ok((stream, rate)) => {
                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(AudioError::Device(format!(
                            "failed to start audio stream: {e}"
                        ))));
                        return;
                    }
                    let _ = ready_tx.send(Ok(rate));
                    // park until the handle is dropped
                    let _ = stop_rx.recv();
                    drop(stream);
                    debug!("capture stream closed");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| AudioError::Device(format!("failed to spawn capture thread: {e}")))?;

        let rate = ready_rx.recv().map_err(|_| AudioError::Disconnected)??;
        let resampler = if rate == SAMPLE_RATE {
            None
        } else {
            info!("resampling microphone {rate} Hz -> {SAMPLE_RATE} Hz");
            Some(
                FftFixedIn::<f32>::new(rate as usize, SAMPLE_RATE as usize, RESAMPLE_CHUNK, 2, 1)
                    .map_err(|e| AudioError::Resample(e.to_string()))?,
            )
        };

        Ok(Self {
            chunks: chunk_rx,
            resampler,
            pending: Vec::with_capacity(RESAMPLE_CHUNK * 2),
            ready: Vec::new(),
            timeout,
            stop: stop_tx,
            thread: Some(thread),
        })
    }

    fn push_device_samples(&mut self, chunk: &[f32]) -> Result<(), AudioError> {
        let Some(resampler) = self.resampler.as_mut() else {
            self.ready.extend_from_slice(chunk);
            return Ok(());
        };
        self.pending.extend_from_slice(chunk);
        loop {
            let need = resampler.input_frames_next();
            if self.pending.len() < need {
                return Ok(());
            }
            let out = resampler
                .process(&[&self.pending[..need]], None)
                .map_err(|e| AudioError::Resample(e.to_string()))?;
            if let Some(mono) = out.first() {
                self.ready.extend_from_slice(mono);
            }
            self.pending.drain(..need);
        }
    }
}

impl AudioSource for MicSource {
    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    /// Deliver the most recent `buf.len()` samples; blocks (up to the
    /// timeout per chunk) until that much audio has been captured.
    fn read_exact(&mut self, buf: &mut [f32]) -> Result<(), AudioError> {
        // take whatever queued up since the last cycle
        while let Ok(chunk) = self.chunks.try_recv() {
            self.push_device_samples(&chunk)?;
        }
        while self.ready.len() < buf.len() {
            let chunk = self.chunks.recv_timeout(self.timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => AudioError::Timeout(self.timeout),
                RecvTimeoutError::Disconnected => AudioError::Disconnected,
            })?;
            self.push_device_samples(&chunk)?;
        }

        let start = self.ready.len() - buf.len();
        buf.copy_from_slice(&self.ready[start..]);
        self.ready.clear();
        Ok(())
    }
}

impl Drop for MicSource {
    fn drop(&mut self) {
        let _ = self.stop.try_send(());
        if let Some(t) = self.thread.take()
            && t.join().is_err()
        {
            error!("capture thread panicked");
        }
    }
}

/* ──────────────────────── stream construction ──────────────────────── */

fn build_input_stream(
    device_name: Option<&str>,
    chunks: Sender<Vec<f32>>,
    evict: Receiver<Vec<f32>>,
) -> Result<(Stream, u32), AudioError> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .input_devices()
            .map_err(|e| AudioError::Device(format!("failed to enumerate devices: {e}")))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| AudioError::Device(format!("device '{name}' not found")))?,
        None => host.default_input_device().ok_or_else(|| {
            AudioError::PermissionDenied("no input device available; check microphone permissions".into())
        })?,
    };

    let supported = device
        .default_input_config()
        .map_err(|e| AudioError::Device(format!("failed to get default input config: {e}")))?;
    let format = supported.sample_format();
    let rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    info!(
        "audio device: {} ({rate} Hz, {channels} ch, {format:?})",
        device.name().unwrap_or_else(|_| "Unknown".into())
    );
    let config: StreamConfig = supported.into();

    let stream = match format {
        SampleFormat::F32 => build_typed::<f32>(&device, &config, channels, chunks, evict, |s| s),
        SampleFormat::I16 => {
            build_typed::<i16>(&device, &config, channels, chunks, evict, |s| s as f32 / 32_768.0)
        }
        SampleFormat::U16 => build_typed::<u16>(&device, &config, channels, chunks, evict, |s| {
            (s as f32 / 32_768.0) - 1.0
        }),
        other => return Err(AudioError::Format(format!("sample format {other:?}"))),
    }?;
    Ok((stream, rate))
}

fn build_typed<T: cpal::SizedSample + Send + 'static>(
    device: &cpal::Device,
    config: &StreamConfig,
    channels: usize,
    chunks: Sender<Vec<f32>>,
    evict: Receiver<Vec<f32>>,
    to_f32: fn(T) -> f32,
) -> Result<Stream, AudioError> {
    let mut scratch: Vec<f32> = Vec::with_capacity(4_096);
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|&s| to_f32(s)));
                push_newest(&chunks, &evict, downmix(&scratch, channels));
            },
            |err| warn!("audio stream error: {err}"),
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                AudioError::PermissionDenied("input device not available".into())
            }
            other => AudioError::Device(other.to_string()),
        })
}

/// Queue `chunk`, dropping the oldest queued chunks while the queue is full.
fn push_newest(chunks: &Sender<Vec<f32>>, evict: &Receiver<Vec<f32>>, mut chunk: Vec<f32>) {
    loop {
        match chunks.try_send(chunk) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => return,
            Err(TrySendError::Full(back)) => {
                chunk = back;
                let _ = evict.try_recv();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_keeps_the_newest_chunks() {
        let (tx, rx) = bounded::<Vec<f32>>(3);
        for i in 0..10 {
            push_newest(&tx, &rx, vec![i as f32]);
        }
        let kept: Vec<f32> = rx.try_iter().flatten().collect();
        assert_eq!(kept, vec![7.0, 8.0, 9.0]);
    }
}
