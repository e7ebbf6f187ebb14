//! Packet and data checksums.
//!
//! Packets are guarded by either a 16-bit additive checksum or CRC-16/CCITT,
//! selected per engine. NVM payloads, application images and the metadata row
//! are guarded by CRC-32C (Castagnoli).

use serde::{Deserialize, Serialize};

const CRC16_SEED: u16 = 0xFFFF;
const CRC16_POLY_REVERSED: u16 = 0x8408;

const CRC32C_SEED: u32 = 0xFFFF_FFFF;

/// CRC-32C (0x1EDC6F41, reflected) remainders for one nibble.
const CRC32C_NIBBLE_TABLE: [u32; 16] = [
    0x0000_0000, 0x105E_C76F, 0x20BD_8EDE, 0x30E3_49B1,
    0x417B_1DBC, 0x5125_DAD3, 0x61C6_9362, 0x7198_540D,
    0x82F6_3B78, 0x92A8_FC17, 0xA24B_B5A6, 0xB215_72C9,
    0xC38D_26C4, 0xD3D3_E1AB, 0xE330_A81A, 0xF36E_6F75,
];

/// Packet checksum algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketChecksumKind {
    /// Two's complement of the 16-bit byte sum.
    #[default]
    Sum,
    /// CRC-16/CCITT, byte-swapped.
    Crc16,
}

impl PacketChecksumKind {
    /// Checksum over the header and data bytes of a packet.
    pub fn compute(self, bytes: &[u8]) -> u16 {
        match self {
            PacketChecksumKind::Sum => packet_sum(bytes),
            PacketChecksumKind::Crc16 => crc16_ccitt(bytes),
        }
    }
}

/// Basic packet checksum: two's complement of the byte sum, modulo 2^16.
pub fn packet_sum(bytes: &[u8]) -> u16 {
    let sum = bytes
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)));
    (!sum).wrapping_add(1)
}

/// CRC-16/CCITT as used by the packet layer.
///
/// Bits are processed LSB first against the reversed polynomial; the result is
/// complemented and byte-swapped. Empty input yields the complemented seed
/// without the swap.
pub fn crc16_ccitt(bytes: &[u8]) -> u16 {
    if bytes.is_empty() {
        return !CRC16_SEED;
    }

    let mut crc = CRC16_SEED;
    for &byte in bytes {
        let mut tmp = u16::from(byte);
        for _ in 0..8 {
            if (crc & 0x0001) ^ (tmp & 0x0001) != 0 {
                crc = (crc >> 1) ^ CRC16_POLY_REVERSED;
            } else {
                crc >>= 1;
            }
            tmp >>= 1;
        }
    }

    (!crc).swap_bytes()
}

/// Streaming CRC-32C.
///
/// Used where the covered range is read from NVM in chunks.
#[derive(Debug, Clone, Copy)]
pub struct Crc32c {
    state: u32,
}

impl Crc32c {
    pub const fn new() -> Self {
        Self { state: CRC32C_SEED }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        let mut crc = self.state;
        for &b in bytes {
            crc ^= u32::from(b);
            crc = (crc >> 4) ^ CRC32C_NIBBLE_TABLE[(crc & 0xF) as usize];
            crc = (crc >> 4) ^ CRC32C_NIBBLE_TABLE[(crc & 0xF) as usize];
        }
        self.state = crc;
    }

    pub const fn finalize(self) -> u32 {
        !self.state
    }
}

impl Default for Crc32c {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot CRC-32C over `bytes`.
pub fn crc32c(bytes: &[u8]) -> u32 {
    let mut crc = Crc32c::new();
    crc.update(bytes);
    crc.finalize()
}
