//! Protocol constants for the DFU host command/response protocol.

// ============================================================================
// Packet Framing
// ============================================================================

/// Start-of-packet marker.
pub const PACKET_SOP: u8 = 0x01;
/// End-of-packet marker.
pub const PACKET_EOP: u8 = 0x17;

pub const PACKET_SOP_IDX: usize = 0x00;
pub const PACKET_CMD_IDX: usize = 0x01;
pub const PACKET_SIZE_IDX: usize = 0x02;
pub const PACKET_DATA_IDX: usize = 0x04;

/// Length of the checksum field in bytes.
pub const PACKET_CHECKSUM_LEN: usize = 2;

/// The smallest valid packet: header, empty data, checksum and EOP.
pub const PACKET_MIN_SIZE: usize = 7;

/// Framing overhead added to the data field.
pub const PACKET_OVERHEAD: usize = PACKET_MIN_SIZE;

/// Offset of the checksum field for a packet with `data_len` data bytes.
#[inline]
pub const fn checksum_index(data_len: usize) -> usize {
    PACKET_DATA_IDX + data_len
}

/// Offset of the EOP byte for a packet with `data_len` data bytes.
#[inline]
pub const fn eop_index(data_len: usize) -> usize {
    PACKET_DATA_IDX + data_len + PACKET_CHECKSUM_LEN
}

// ============================================================================
// Command Codes (Host -> Device)
// ============================================================================

pub const CMD_VERIFY_APP: u8 = 0x31;
pub const CMD_SYNC: u8 = 0x35;
pub const CMD_SEND_DATA: u8 = 0x37;
pub const CMD_ENTER: u8 = 0x38;
pub const CMD_EXIT: u8 = 0x3B;
pub const CMD_GET_METADATA: u8 = 0x3C;
pub const CMD_ERASE_DATA: u8 = 0x44;
pub const CMD_SEND_DATA_NO_RSP: u8 = 0x47;
pub const CMD_PROGRAM_DATA: u8 = 0x49;
pub const CMD_VERIFY_DATA: u8 = 0x4A;
pub const CMD_SET_APP_METADATA: u8 = 0x4C;
pub const CMD_SET_EI_VECTOR: u8 = 0x4D;

/// First command code reserved for user-defined commands.
pub const USER_CMD_START: u8 = 0x50;

// ============================================================================
// Command Payload Layout
// ============================================================================

/// Address + CRC prefix of Program Data / Verify Data.
pub const DATA_PARAMS_SIZE: usize = 8;
/// Offset of the CRC field in Program Data / Verify Data.
pub const DATA_CRC_OFFSET: usize = 4;

/// Erase Data carries exactly one address.
pub const ERASE_DATA_SIZE: usize = 4;

/// Enter may carry a product id as 4 or 6 bytes.
pub const ENTER_PRODUCT_ID_SIZES: [usize; 2] = [4, 6];

/// Verify App carries the application id as 1 or 4 bytes.
pub const VERIFY_APP_SIZES: [usize; 2] = [1, 4];

/// Set App Metadata: app id (1) + verify start (4) + verify length (4).
pub const SET_APP_METADATA_SIZE: usize = 9;
pub const SET_APP_METADATA_START_OFFSET: usize = 1;
pub const SET_APP_METADATA_LENGTH_OFFSET: usize = 5;

/// Get Metadata: from (u16) + to (u16).
pub const GET_METADATA_SIZE: usize = 4;
pub const GET_METADATA_TO_OFFSET: usize = 2;

/// Accepted Set EI Vector payload sizes.
pub const EI_VECTOR_SIZES: [usize; 3] = [0, 8, 16];
pub const EI_VECTOR_MAX: usize = 16;

// ============================================================================
// Responses
// ============================================================================

/// Size of the Enter response (silicon id, revision, SDK version).
pub const ENTER_RSP_SIZE: usize = 8;
/// Size of the Verify App response (one boolean byte).
pub const VERIFY_APP_RSP_SIZE: usize = 1;

pub const SDK_VERSION_MAJOR: u8 = 4;
pub const SDK_VERSION_MINOR: u8 = 20;
/// Trailing byte of the Enter version block, kept for legacy host tools.
pub const ENTER_RSP_LEGACY_BYTE: u8 = 0x01;

// ============================================================================
// Metadata / Images
// ============================================================================

/// Bytes per application record in the metadata row.
pub const METADATA_BYTES_PER_APP: usize = 8;
/// Offset of the verify length within a record.
pub const METADATA_APP_LENGTH_OFFSET: usize = 4;
/// Size of the CRC guarding the metadata row.
pub const METADATA_CRC_SIZE: usize = 4;

/// Size of the CRC-32C trailer after a basic image.
pub const APP_CRC_TRAILER_SIZE: u32 = 4;
/// Size of an RSA-2048 signature.
pub const RSA_SIGNATURE_SIZE: u32 = 256;
/// Size of the app-size field heading a simplified image.
pub const SIMPLIFIED_APP_SIZE_FIELD: u32 = 4;
/// Offset of the vector table offset field in a Cypress image.
pub const CYPRESS_APP_VT_OFFSET_FIELD: u32 = 0x10;

// ============================================================================
// Timeouts
// ============================================================================

/// Typical per-call receive timeout for `continue_session`, in milliseconds.
pub const DEFAULT_READ_TIMEOUT_MS: u32 = 20;
/// Timeout for response writes, in milliseconds.
pub const TRANSPORT_WRITE_TIMEOUT_MS: u32 = 150;
