//! Fire-and-forget control of the soothing toy.
//!
//! Commands are queued on a bounded channel and executed by a worker thread;
//! the detection cycle never waits for the toy and never sees its failures.

use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use tracing::{debug, error, info, warn};

use crate::constants::TOY_QUEUE_CAPACITY;

#[derive(Debug, thiserror::Error)]
pub enum ToyError {
    #[error("toy request failed: {0}")]
    Request(String),
    #[error("toy rejected command with status {0}")]
    Status(u16),
}

/// Something that can be switched on and off.
pub trait ToyActuator: Send {
    fn set_power(&mut self, on: bool) -> Result<(), ToyError>;
}

/// Logs the command only.
#[derive(Debug, Default)]
pub struct LogToy;

impl ToyActuator for LogToy {
    fn set_power(&mut self, on: bool) -> Result<(), ToyError> {
        info!("toy switched {}", if on { "on" } else { "off" });
        Ok(())
    }
}

enum Target {
    Queue(Sender<bool>),
    Inline(Box<dyn ToyActuator>),
}

/// Sending side used by the state machine.
pub struct ToyHandle {
    target: Target,
}

impl ToyHandle {
    /// Execute commands on the caller's thread (no worker).
    pub fn inline(toy: Box<dyn ToyActuator>) -> Self {
        Self {
            target: Target::Inline(toy),
        }
    }

    /// Request the toy on/off without waiting for the outcome.
    pub fn switch(&mut self, on: bool) {
        match &mut self.target {
            Target::Queue(tx) => match tx.try_send(on) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => warn!("toy queue full, dropping switch({on})"),
                Err(TrySendError::Disconnected(_)) => warn!("toy worker gone, dropping switch({on})"),
            },
            Target::Inline(toy) => {
                if let Err(e) = toy.set_power(on) {
                    warn!("toy command failed: {e}");
                }
            }
        }
    }
}

/// Owns a [`ToyActuator`] on a dedicated thread.
pub struct ToyWorker {
    commands: Sender<bool>,
    stop: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl ToyWorker {
    pub fn spawn(toy: Box<dyn ToyActuator>) -> std::io::Result<Self> {
        Self::with_capacity(toy, TOY_QUEUE_CAPACITY)
    }

    pub fn with_capacity(toy: Box<dyn ToyActuator>, capacity: usize) -> std::io::Result<Self> {
        let (tx, rx) = bounded::<bool>(capacity.max(1));
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let thread = std::thread::Builder::new()
            .name("babycare-toy".into())
            .spawn(move || Self::run(toy, rx, stop_rx))?;
        Ok(Self {
            commands: tx,
            stop: stop_tx,
            thread: Some(thread),
        })
    }

    /// A new handle feeding this worker.
    pub fn handle(&self) -> ToyHandle {
        ToyHandle {
            target: Target::Queue(self.commands.clone()),
        }
    }

    fn run(mut toy: Box<dyn ToyActuator>, commands: Receiver<bool>, stop: Receiver<()>) {
        let mut apply = |on: bool| match toy.set_power(on) {
            Ok(()) => debug!("toy switch({on}) done"),
            Err(e) => warn!("toy switch({on}) failed: {e}"),
        };
        loop {
            crossbeam_channel::select! {
                recv(commands) -> msg => match msg {
                    Ok(on) => apply(on),
                    Err(_) => break,
                },
                recv(stop) -> _ => {
                    // flush what was queued before the stop request
                    commands.try_iter().for_each(&mut apply);
                    break;
                }
            }
        }
        debug!("toy worker stopped");
    }

    /// Flush pending commands and join the worker. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(t) = self.thread.take() else {
            return;
        };
        let _ = self.stop.try_send(());
        if t.join().is_err() {
            error!("toy worker panicked");
        }
    }
}

impl Drop for ToyWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(feature = "http-toy")]
pub use http::HttpToy;

#[cfg(feature = "http-toy")]
mod http {
    use std::time::Duration;

    use serde_json::json;
    use tracing::debug;

    use super::{ToyActuator, ToyError};

    /// Smart plug driven by a JSON command endpoint.
    pub struct HttpToy {
        client: reqwest::blocking::Client,
        endpoint: String,
        token: Option<String>,
    }

    impl HttpToy {
        pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Result<Self, ToyError> {
            let client = reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .map_err(|e| ToyError::Request(e.to_string()))?;
            Ok(Self {
                client,
                endpoint: endpoint.into(),
                token,
            })
        }
    }

    /// Body understood by the plug's command API.
    pub(crate) fn command_body(on: bool) -> serde_json::Value {
        json!({ "commands": [{ "code": "switch_1", "value": on }] })
    }

    impl ToyActuator for HttpToy {
        fn set_power(&mut self, on: bool) -> Result<(), ToyError> {
            let mut req = self.client.post(&self.endpoint).json(&command_body(on));
            if let Some(token) = &self.token {
                req = req.bearer_auth(token);
            }
            let resp = req.send().map_err(|e| ToyError::Request(e.to_string()))?;
            let status = resp.status();
            debug!("toy endpoint answered {status}");
            if status.is_success() {
                Ok(())
            } else {
                Err(ToyError::Status(status.as_u16()))
            }
        }
    }

    #[cfg(test)]
    mod tests {
        #[test]
        fn body_shape() {
            assert_eq!(
                super::command_body(true).to_string(),
                r#"{"commands":[{"code":"switch_1","value":true}]}"#
            );
        }
    }
}
