//! Packet framing.
//!
//! ```text
//! SOP(0x01) CMD SIZE_LO SIZE_HI DATA[N] CHK_LO CHK_HI EOP(0x17)
//! ```
//!
//! The checksum covers the four header bytes and the data field. Requests
//! carry a command code in `CMD`, responses carry a status byte.

use byteorder::{ByteOrder, LittleEndian};

use super::constants::*;
use super::status::{DfuError, DfuResult, status_code};
use crate::checksum::PacketChecksumKind;

/// A decoded packet borrowing its data from the I/O buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet<'a> {
    /// Command code (requests) or status byte (responses).
    pub code: u8,
    pub data: &'a [u8],
    pub checksum: u16,
}

impl Packet<'_> {
    /// Total size on the wire.
    pub fn wire_len(&self) -> usize {
        self.data.len() + PACKET_OVERHEAD
    }
}

/// Encoder/decoder bound to one checksum algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketCodec {
    checksum: PacketChecksumKind,
}

impl PacketCodec {
    pub const fn new(checksum: PacketChecksumKind) -> Self {
        Self { checksum }
    }

    pub const fn checksum_kind(&self) -> PacketChecksumKind {
        self.checksum
    }

    /// Declared data length of a packet already in `buf`.
    pub fn data_len(buf: &[u8]) -> usize {
        LittleEndian::read_u16(&buf[PACKET_SIZE_IDX..PACKET_DATA_IDX]) as usize
    }

    /// Validate the first `received` bytes of `buf` as a packet.
    ///
    /// The capacity of `buf` bounds the accepted data length as well.
    pub fn decode<'a>(&self, buf: &'a [u8], received: usize) -> DfuResult<Packet<'a>> {
        let received = received.min(buf.len());
        if received < PACKET_MIN_SIZE || buf[PACKET_SOP_IDX] != PACKET_SOP {
            return Err(DfuError::Data);
        }

        let data_len = Self::data_len(buf);
        let total = data_len + PACKET_OVERHEAD;
        if total > received || total > buf.len() {
            return Err(DfuError::Length);
        }

        if buf[eop_index(data_len)] != PACKET_EOP {
            return Err(DfuError::Data);
        }

        let checksum_at = checksum_index(data_len);
        let checksum = LittleEndian::read_u16(&buf[checksum_at..checksum_at + PACKET_CHECKSUM_LEN]);
        if checksum != self.checksum.compute(&buf[..checksum_at]) {
            return Err(DfuError::Checksum);
        }

        Ok(Packet {
            code: buf[PACKET_CMD_IDX],
            data: &buf[PACKET_DATA_IDX..checksum_at],
            checksum,
        })
    }

    /// Frame a packet whose `data_len` data bytes are already in place.
    ///
    /// Returns the total number of bytes to transmit.
    pub fn encode_in_place(&self, buf: &mut [u8], code: u8, data_len: usize) -> DfuResult<usize> {
        let total = data_len + PACKET_OVERHEAD;
        if total > buf.len() || data_len > u16::MAX as usize {
            return Err(DfuError::Length);
        }

        buf[PACKET_SOP_IDX] = PACKET_SOP;
        buf[PACKET_CMD_IDX] = code;
        LittleEndian::write_u16(&mut buf[PACKET_SIZE_IDX..PACKET_DATA_IDX], data_len as u16);

        let checksum_at = checksum_index(data_len);
        let checksum = self.checksum.compute(&buf[..checksum_at]);
        LittleEndian::write_u16(&mut buf[checksum_at..checksum_at + PACKET_CHECKSUM_LEN], checksum);
        buf[eop_index(data_len)] = PACKET_EOP;

        Ok(total)
    }

    /// Frame a packet, copying `payload` into the data field.
    pub fn encode(&self, buf: &mut [u8], code: u8, payload: &[u8]) -> DfuResult<usize> {
        if payload.len() + PACKET_OVERHEAD > buf.len() {
            return Err(DfuError::Length);
        }
        buf[PACKET_DATA_IDX..PACKET_DATA_IDX + payload.len()].copy_from_slice(payload);
        self.encode_in_place(buf, code, payload.len())
    }

    /// Frame a response carrying `status` and `data_len` bytes already in place.
    pub fn encode_response(&self, buf: &mut [u8], status: &DfuResult, data_len: usize) -> DfuResult<usize> {
        self.encode_in_place(buf, status_code(status), data_len)
    }

    /// Build a host request into a fresh vector. Host tooling only.
    pub fn request(&self, code: u8, payload: &[u8]) -> DfuResult<Vec<u8>> {
        let mut buf = vec![0u8; payload.len() + PACKET_OVERHEAD];
        self.encode(&mut buf, code, payload)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> PacketCodec {
        PacketCodec::new(PacketChecksumKind::Sum)
    }

    #[test]
    fn test_response_roundtrip_both_checksums() {
        for kind in [PacketChecksumKind::Sum, PacketChecksumKind::Crc16] {
            let codec = PacketCodec::new(kind);
            let payload = [0xDE, 0xAD, 0xBE, 0xEF, 0x01];
            let mut buf = [0u8; 64];
            buf[PACKET_DATA_IDX..PACKET_DATA_IDX + payload.len()].copy_from_slice(&payload);

            let status: DfuResult = Err(DfuError::Verify);
            let n = codec.encode_response(&mut buf, &status, payload.len()).unwrap();
            assert_eq!(n, payload.len() + PACKET_OVERHEAD);

            let pkt = codec.decode(&buf, n).unwrap();
            assert_eq!(pkt.code, DfuError::Verify.code());
            assert_eq!(pkt.data, &payload);
            assert_eq!(pkt.wire_len(), n);
            assert_eq!(pkt.checksum, kind.compute(&buf[..PACKET_DATA_IDX + payload.len()]));
        }
    }

    #[test]
    fn test_zero_length_sum_checksum() {
        let pkt = codec().request(CMD_EXIT, &[]).unwrap();
        assert_eq!(pkt.len(), PACKET_MIN_SIZE);
        let header_sum: u16 = pkt[..4].iter().map(|&b| b as u16).sum();
        assert_eq!(LittleEndian::read_u16(&pkt[4..6]), header_sum.wrapping_neg());
        assert_eq!(pkt[6], PACKET_EOP);
    }

    #[test]
    fn test_decode_short_or_bad_sop() {
        let pkt = codec().request(CMD_SYNC, &[]).unwrap();
        assert_eq!(codec().decode(&pkt, 6), Err(DfuError::Data));

        let mut bad = pkt.clone();
        bad[0] = 0x02;
        assert_eq!(codec().decode(&bad, bad.len()), Err(DfuError::Data));
    }

    #[test]
    fn test_decode_length_exceeds_received() {
        let pkt = codec().request(CMD_SEND_DATA, &[1, 2, 3, 4]).unwrap();
        assert_eq!(codec().decode(&pkt, pkt.len() - 1), Err(DfuError::Length));
    }

    #[test]
    fn test_decode_length_exceeds_capacity() {
        let mut buf = [0u8; 10];
        buf[0] = PACKET_SOP;
        buf[1] = CMD_SEND_DATA;
        LittleEndian::write_u16(&mut buf[2..4], 8);
        assert_eq!(codec().decode(&buf, 64), Err(DfuError::Length));
    }

    #[test]
    fn test_decode_bad_eop() {
        let mut pkt = codec().request(CMD_SYNC, &[]).unwrap();
        pkt[6] = 0x00;
        assert_eq!(codec().decode(&pkt, pkt.len()), Err(DfuError::Data));
    }

    #[test]
    fn test_decode_bad_checksum() {
        let mut pkt = codec().request(CMD_SEND_DATA, &[9, 9]).unwrap();
        pkt[4] ^= 0x01;
        assert_eq!(codec().decode(&pkt, pkt.len()), Err(DfuError::Checksum));
    }

    #[test]
    fn test_checksum_kinds_are_not_interchangeable() {
        let pkt = PacketCodec::new(PacketChecksumKind::Crc16)
            .request(CMD_ENTER, &[])
            .unwrap();
        assert_eq!(codec().decode(&pkt, pkt.len()), Err(DfuError::Checksum));
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let mut buf = [0u8; 8];
        assert_eq!(codec().encode(&mut buf, CMD_SEND_DATA, &[0; 2]), Err(DfuError::Length));
        assert_eq!(codec().encode(&mut buf, CMD_SEND_DATA, &[0; 1]), Ok(8));
    }
}
