//! Status codes shared by every layer of the engine.
//!
//! Success is `Ok(())`; everything else is a [`DfuError`]. The low byte of each
//! variant is what travels back to the host in the response `cmd` field.

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DfuError {
    #[error("Verification failed")]
    Verify,
    #[error("Length out of expected range")]
    Length,
    #[error("Invalid data")]
    Data,
    #[error("Command not recognized or not allowed in current state")]
    Cmd,
    #[error("Packet checksum mismatch")]
    Checksum,
    #[error("Address out of range or protected")]
    Address,
    #[error("Timed out")]
    Timeout,
    #[error("Invalid parameter")]
    BadParam,
    #[error("Unknown error")]
    Unknown,
}

/// Result type used throughout the engine.
pub type DfuResult<T = ()> = Result<T, DfuError>;

/// Wire code for a successful response.
pub const STATUS_SUCCESS: u8 = 0x00;

impl DfuError {
    /// Status byte placed in the response packet.
    pub const fn code(self) -> u8 {
        match self {
            DfuError::Verify => 0x02,
            DfuError::Length => 0x03,
            DfuError::Data => 0x04,
            DfuError::Cmd => 0x05,
            DfuError::Checksum => 0x08,
            DfuError::Address => 0x0A,
            DfuError::BadParam => 0x0B,
            DfuError::Unknown => 0x0F,
            DfuError::Timeout => 0x40,
        }
    }

    /// Parse a status byte received from the device.
    ///
    /// Returns `Ok(())` for [`STATUS_SUCCESS`]; unrecognized bytes map to `Unknown`.
    pub fn from_code(code: u8) -> DfuResult {
        match code {
            STATUS_SUCCESS => Ok(()),
            0x02 => Err(DfuError::Verify),
            0x03 => Err(DfuError::Length),
            0x04 => Err(DfuError::Data),
            0x05 => Err(DfuError::Cmd),
            0x08 => Err(DfuError::Checksum),
            0x0A => Err(DfuError::Address),
            0x0B => Err(DfuError::BadParam),
            0x40 => Err(DfuError::Timeout),
            _ => Err(DfuError::Unknown),
        }
    }
}

/// Status byte for any engine result.
pub fn status_code(status: &DfuResult) -> u8 {
    match status {
        Ok(()) => STATUS_SUCCESS,
        Err(e) => e.code(),
    }
}
