//! Byte source: sends configured bytes out of a single OUT endpoint.

use cardsim_core::{
    Component, ComponentConfig, ComponentError, Diagnostics, DiagnosticsSnapshot, Direction,
    EndPoint, EndpointError, Lifecycle, Message,
};
use cardsim_proto::ByteArray;

/// Output endpoint.
pub const OUT: &str = "out";

/// Sends its `data` setting once on start, and again on every [`send`](Self::send).
#[derive(Debug, Default)]
pub struct ByteArrayEntry {
    lifecycle: Lifecycle,
    node_id: String,
    data: ByteArray,
    endpoint: Option<EndPoint>,
    diagnostics: Diagnostics,
}

impl ByteArrayEntry {
    /// Uninitialized entry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes sent on start.
    pub fn data(&self) -> &ByteArray {
        &self.data
    }

    /// Replace the bytes to send.
    pub fn set_data(&mut self, data: impl Into<ByteArray>) {
        self.data = data.into();
    }

    /// Send the current bytes now.
    ///
    /// # Errors
    ///
    /// - `NotRunning` unless started
    /// - `Endpoint(NotConnected)` if nothing is wired to `out`
    pub fn send(&self) -> Result<(), ComponentError> {
        if !self.lifecycle.is_running() {
            return Err(ComponentError::NotRunning);
        }
        let endpoint = self.endpoint.as_ref().ok_or(ComponentError::NotInitialized)?;
        endpoint.send(Message::data(self.data.clone()))?;
        self.diagnostics.log(format!(">> {}", self.data));
        Ok(())
    }
}

impl Component for ByteArrayEntry {
    fn initialize(&mut self, config: &ComponentConfig) -> Result<Vec<EndPoint>, ComponentError> {
        self.lifecycle.initialize()?;
        self.node_id.clone_from(&config.node_id);
        self.data = config.hex_setting("data", &[])?;

        let endpoint = EndPoint::new(OUT, Direction::Out);
        self.endpoint = Some(endpoint.clone());
        Ok(vec![endpoint])
    }

    fn start(&mut self) -> Result<(), ComponentError> {
        self.lifecycle.start()?;
        if self.data.is_empty() {
            return Ok(());
        }

        match self.send() {
            Ok(()) => Ok(()),
            Err(ComponentError::Endpoint(EndpointError::NotConnected { .. })) => {
                tracing::warn!(node = %self.node_id, "byte entry has no receiver");
                self.diagnostics.record_error("output not connected");
                Ok(())
            },
            Err(e) => {
                self.lifecycle.stop();
                Err(e)
            },
        }
    }

    fn stop(&mut self) -> Result<(), ComponentError> {
        if self.lifecycle.stop() {
            self.diagnostics.clear();
        }
        Ok(())
    }

    fn icon(&self) -> &str {
        "input"
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
