//! Byte sink: records every payload arriving on a single IN endpoint.

use std::sync::{Arc, Mutex, PoisonError};

use cardsim_core::{
    CancelToken, Component, ComponentConfig, ComponentError, Diagnostics, DiagnosticsSnapshot,
    Direction, EndPoint, Lifecycle, spawn_protocol_task,
};
use cardsim_proto::ByteArray;
use tokio::task::JoinHandle;

/// Input endpoint.
pub const IN: &str = "in";

/// Shows what it receives.
#[derive(Debug, Default)]
pub struct ByteArrayViewer {
    lifecycle: Lifecycle,
    endpoint: Option<EndPoint>,
    received: Arc<Mutex<Vec<ByteArray>>>,
    diagnostics: Diagnostics,
    cancel: CancelToken,
    task: Option<JoinHandle<()>>,
}

impl ByteArrayViewer {
    /// Uninitialized viewer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Payloads received since start, oldest first.
    pub fn received(&self) -> Vec<ByteArray> {
        self.received.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Most recent payload.
    pub fn last(&self) -> Option<ByteArray> {
        self.received.lock().unwrap_or_else(PoisonError::into_inner).last().cloned()
    }
}

impl Component for ByteArrayViewer {
    fn initialize(&mut self, _config: &ComponentConfig) -> Result<Vec<EndPoint>, ComponentError> {
        self.lifecycle.initialize()?;
        let endpoint = EndPoint::new(IN, Direction::In);
        self.endpoint = Some(endpoint.clone());
        Ok(vec![endpoint])
    }

    fn start(&mut self) -> Result<(), ComponentError> {
        let endpoint = self.endpoint.clone().ok_or(ComponentError::NotInitialized)?;
        self.lifecycle.start()?;

        self.cancel = CancelToken::new();
        let cancel = self.cancel.clone();
        let received = Arc::clone(&self.received);
        let diagnostics = self.diagnostics.clone();

        let task = spawn_protocol_task(async move {
            loop {
                let message = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    message = endpoint.recv() => message,
                };
                match message {
                    Ok(message) => {
                        diagnostics.log(format!("<< {}", message.payload));
                        let mut received = received.lock().unwrap_or_else(PoisonError::into_inner);
                        received.push(message.payload);
                    },
                    Err(e) => {
                        diagnostics.record_error(e.to_string());
                        break;
                    },
                }
            }
        });

        match task {
            Ok(task) => {
                self.task = Some(task);
                Ok(())
            },
            Err(e) => {
                self.lifecycle.stop();
                Err(e)
            },
        }
    }

    fn stop(&mut self) -> Result<(), ComponentError> {
        if !self.lifecycle.stop() {
            return Ok(());
        }
        self.cancel.cancel();
        self.task = None;
        self.received.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.diagnostics.clear();
        Ok(())
    }

    fn icon(&self) -> &str {
        "visibility"
    }

    fn diagnostics(&self) -> Option<DiagnosticsSnapshot> {
        Some(self.diagnostics.snapshot())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
