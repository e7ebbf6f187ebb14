//! Event system for decoupling logging and UIs from the engine.
//!
//! Device builds typically plug in [`NullObserver`]; host tooling uses
//! [`TracingObserver`] or its own implementation.

use crate::protocol::{Command, DfuError, DfuResult};
use crate::state::machine::SessionState;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Events emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DfuEvent {
    /// Session state changed.
    StateChanged { from: SessionState, to: SessionState },
    /// A packet passed framing and checksum validation.
    PacketReceived { code: u8, len: usize },
    /// A packet failed framing or checksum validation.
    PacketRejected { error: DfuError },
    /// A command finished.
    CommandHandled { code: u8, status: DfuResult },
    /// An NVM row was written and read back.
    RowProgrammed { address: u32, len: usize },
    /// An NVM row was erased.
    RowErased { address: u32 },
    /// Verify App produced a verdict.
    AppVerified { app: u8, valid: bool },
    /// The metadata record of an application changed.
    MetadataUpdated { app: u8, start: u32, length: u32 },
    /// A response packet went out.
    ResponseSent { status: u8, len: usize },
    /// A switch to another application was requested.
    SwitchRequested { app: u8 },
    /// Log message.
    Log { level: LogLevel, message: String },
}

/// Observer trait for receiving engine events.
pub trait DfuObserver {
    /// Called when an event occurs.
    fn on_event(&self, event: &DfuEvent);

    /// Whether [`DfuEvent::Log`] messages at `level` should be built at all.
    fn wants_log(&self, _level: LogLevel) -> bool {
        true
    }
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl DfuObserver for NullObserver {
    fn on_event(&self, _event: &DfuEvent) {}

    fn wants_log(&self, _level: LogLevel) -> bool {
        false
    }
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl DfuObserver for TracingObserver {
    fn on_event(&self, event: &DfuEvent) {
        match event {
            DfuEvent::StateChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Session state changed");
            }
            DfuEvent::PacketReceived { code, len } => {
                tracing::trace!(code = %format!("0x{:02X}", code), len = len, "Packet received");
            }
            DfuEvent::PacketRejected { error } => {
                tracing::warn!(error = %error, "Packet rejected");
            }
            DfuEvent::CommandHandled { code, status } => match Command::from_code(*code) {
                Some(cmd) => tracing::debug!(command = %cmd, status = ?status, "Command handled"),
                None => tracing::debug!(code = %format!("0x{:02X}", code), status = ?status, "Command handled"),
            },
            DfuEvent::RowProgrammed { address, len } => {
                tracing::debug!(address = %format!("0x{:08X}", address), len = len, "Row programmed");
            }
            DfuEvent::RowErased { address } => {
                tracing::debug!(address = %format!("0x{:08X}", address), "Row erased");
            }
            DfuEvent::AppVerified { app, valid } => {
                tracing::info!(app = app, valid = valid, "Application verified");
            }
            DfuEvent::MetadataUpdated { app, start, length } => {
                tracing::info!(
                    app = app,
                    start = %format!("0x{:08X}", start),
                    length = length,
                    "Metadata updated"
                );
            }
            DfuEvent::ResponseSent { status, len } => {
                tracing::trace!(status = %format!("0x{:02X}", status), len = len, "Response sent");
            }
            DfuEvent::SwitchRequested { app } => {
                tracing::info!(app = app, "Application switch requested");
            }
            DfuEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }
}

/// Observer that records every event. Useful in tests and host tools.
#[derive(Default)]
pub struct RecordingObserver {
    events: std::sync::Mutex<Vec<DfuEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<DfuEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl DfuObserver for RecordingObserver {
    fn on_event(&self, event: &DfuEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

impl<O: DfuObserver + ?Sized> DfuObserver for &O {
    fn on_event(&self, event: &DfuEvent) {
        (**self).on_event(event)
    }

    fn wants_log(&self, level: LogLevel) -> bool {
        (**self).wants_log(level)
    }
}
