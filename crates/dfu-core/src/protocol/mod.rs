//! Protocol module - DFU wire format definitions.

pub mod command;
pub mod constants;
pub mod packet;
pub mod status;

pub use command::Command;
pub use constants::*;
pub use packet::{Packet, PacketCodec};
pub use status::{DfuError, DfuResult, STATUS_SUCCESS, status_code};
