//! Command code parsing.
//!
//! Host commands are a single byte in the packet `cmd` field. Codes at or
//! above [`USER_CMD_START`] belong to user-defined handlers.

use std::fmt;

use super::constants::*;

/// Built-in protocol commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Enter = CMD_ENTER,
    Exit = CMD_EXIT,
    ProgramData = CMD_PROGRAM_DATA,
    VerifyData = CMD_VERIFY_DATA,
    EraseData = CMD_ERASE_DATA,
    VerifyApp = CMD_VERIFY_APP,
    SendData = CMD_SEND_DATA,
    SendDataNoResponse = CMD_SEND_DATA_NO_RSP,
    Sync = CMD_SYNC,
    SetAppMetadata = CMD_SET_APP_METADATA,
    GetMetadata = CMD_GET_METADATA,
    SetEiVector = CMD_SET_EI_VECTOR,
}

impl Command {
    /// Look up a built-in command by its wire code.
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            CMD_ENTER => Command::Enter,
            CMD_EXIT => Command::Exit,
            CMD_PROGRAM_DATA => Command::ProgramData,
            CMD_VERIFY_DATA => Command::VerifyData,
            CMD_ERASE_DATA => Command::EraseData,
            CMD_VERIFY_APP => Command::VerifyApp,
            CMD_SEND_DATA => Command::SendData,
            CMD_SEND_DATA_NO_RSP => Command::SendDataNoResponse,
            CMD_SYNC => Command::Sync,
            CMD_SET_APP_METADATA => Command::SetAppMetadata,
            CMD_GET_METADATA => Command::GetMetadata,
            CMD_SET_EI_VECTOR => Command::SetEiVector,
            _ => return None,
        })
    }

    /// Wire code.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Whether `code` lies in the user-defined range.
    pub const fn is_user_code(code: u8) -> bool {
        code >= USER_CMD_START
    }

    pub const fn name(self) -> &'static str {
        match self {
            Command::Enter => "Enter",
            Command::Exit => "Exit",
            Command::ProgramData => "Program Data",
            Command::VerifyData => "Verify Data",
            Command::EraseData => "Erase Data",
            Command::VerifyApp => "Verify App",
            Command::SendData => "Send Data",
            Command::SendDataNoResponse => "Send Data (no response)",
            Command::Sync => "Sync",
            Command::SetAppMetadata => "Set App Metadata",
            Command::GetMetadata => "Get Metadata",
            Command::SetEiVector => "Set EI Vector",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.code())
    }
}
