//! Transport layer abstraction.
//!
//! Defines the `Transport` trait the dispatcher reads packets from and writes
//! responses to, allowing different implementations (device drivers, mock, etc.).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::DfuError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u32 },

    #[error("Device disconnected")]
    Disconnected,

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),
}

impl From<TransportError> for DfuError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout { .. } => DfuError::Timeout,
            _ => DfuError::Data,
        }
    }
}

/// Physical link the packets travel over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    Uart,
    I2c,
    Spi,
    Usb,
    Ble,
    CanFd,
}

/// Abstract packet transport.
///
/// One `read` delivers at most one packet; the engine never retries.
pub trait Transport {
    /// Bring the link up.
    fn start(&mut self, kind: TransportKind);

    /// Take the link down.
    fn stop(&mut self);

    /// Drop any partially received data.
    fn reset(&mut self);

    /// Receive into `buffer`, waiting at most `timeout_ms`.
    ///
    /// Returns the number of bytes received, or `TransportError::Timeout` when
    /// nothing arrived in time.
    fn read(&mut self, buffer: &mut [u8], timeout_ms: u32) -> Result<usize, TransportError>;

    /// Send `data`, waiting at most `timeout_ms`.
    fn write(&mut self, data: &[u8], timeout_ms: u32) -> Result<usize, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn start(&mut self, kind: TransportKind) {
        (**self).start(kind)
    }

    fn stop(&mut self) {
        (**self).stop()
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn read(&mut self, buffer: &mut [u8], timeout_ms: u32) -> Result<usize, TransportError> {
        (**self).read(buffer, timeout_ms)
    }

    fn write(&mut self, data: &[u8], timeout_ms: u32) -> Result<usize, TransportError> {
        (**self).write(data, timeout_ms)
    }
}
