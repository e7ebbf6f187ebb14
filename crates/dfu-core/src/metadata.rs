//! Application registry.
//!
//! One NVM row holds an 8-byte record (verify start, verify length; both
//! little-endian) per application, followed by free space and a CRC-32C over
//! everything but its own last 4 bytes. Records are not to be trusted until the
//! row CRC checks out.

use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;

use crate::checksum::Crc32c;
use crate::config::MetadataLayout;
use crate::nvm::{Nvm, NvmCtl, read_u32};
use crate::protocol::constants::{METADATA_APP_LENGTH_OFFSET, METADATA_BYTES_PER_APP, METADATA_CRC_SIZE};
use crate::protocol::{DfuError, DfuResult};

/// Chunk size used when streaming the row through the CRC.
const VALIDATE_CHUNK: usize = 64;

/// Verified range of one application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppMetadata {
    /// First byte covered by verification.
    pub start: u32,
    /// Number of bytes covered by verification.
    pub length: u32,
}

impl AppMetadata {
    pub fn new(start: u32, length: u32) -> Self {
        Self { start, length }
    }

    /// One past the last verified byte.
    pub fn end(&self) -> u32 {
        self.start.wrapping_add(self.length)
    }

    fn write_to(&self, record: &mut [u8]) {
        LittleEndian::write_u32(&mut record[..METADATA_APP_LENGTH_OFFSET], self.start);
        LittleEndian::write_u32(
            &mut record[METADATA_APP_LENGTH_OFFSET..METADATA_BYTES_PER_APP],
            self.length,
        );
    }

    fn read_from(record: &[u8]) -> Self {
        Self {
            start: LittleEndian::read_u32(&record[..METADATA_APP_LENGTH_OFFSET]),
            length: LittleEndian::read_u32(&record[METADATA_APP_LENGTH_OFFSET..METADATA_BYTES_PER_APP]),
        }
    }
}

/// Reads, validates and updates the metadata row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataManager {
    layout: MetadataLayout,
    max_apps: u8,
}

impl MetadataManager {
    pub fn new(layout: MetadataLayout, max_apps: u8) -> Self {
        Self { layout, max_apps }
    }

    pub fn layout(&self) -> MetadataLayout {
        self.layout
    }

    pub fn max_apps(&self) -> u8 {
        self.max_apps
    }

    fn row_len(&self) -> usize {
        self.layout.length as usize
    }

    fn crc_offset(&self) -> usize {
        self.row_len() - METADATA_CRC_SIZE
    }

    fn record_offset(&self, app: u8) -> DfuResult<usize> {
        if app >= self.max_apps {
            return Err(DfuError::BadParam);
        }
        Ok(app as usize * METADATA_BYTES_PER_APP)
    }

    /// Raw record of `app`. Does not check the row CRC.
    pub fn get_app_metadata<N: Nvm + ?Sized>(&self, nvm: &mut N, app: u8) -> DfuResult<AppMetadata> {
        let offset = self.record_offset(app)?;
        let mut record = [0u8; METADATA_BYTES_PER_APP];
        nvm.read(self.layout.address + offset as u32, &mut record, NvmCtl::empty())?;
        Ok(AppMetadata::read_from(&record))
    }

    /// Check the CRC of a metadata row stored at `address`.
    pub fn validate_at<N: Nvm + ?Sized>(&self, nvm: &mut N, address: u32) -> DfuResult {
        let covered = self.crc_offset();
        let mut crc = Crc32c::new();
        let mut chunk = [0u8; VALIDATE_CHUNK];
        let mut done = 0;
        while done < covered {
            let n = (covered - done).min(VALIDATE_CHUNK);
            nvm.read(address + done as u32, &mut chunk[..n], NvmCtl::empty())?;
            crc.update(&chunk[..n]);
            done += n;
        }

        let stored = read_u32(nvm, address + covered as u32)?;
        let computed = crc.finalize();
        if stored != computed {
            debug!(
                stored = %format!("0x{:08X}", stored),
                computed = %format!("0x{:08X}", computed),
                "Metadata CRC mismatch"
            );
            return Err(DfuError::Verify);
        }
        Ok(())
    }

    /// Check the CRC of the configured metadata row.
    pub fn validate<N: Nvm + ?Sized>(&self, nvm: &mut N) -> DfuResult {
        self.validate_at(nvm, self.layout.address)
    }

    /// Record of `app` from a row whose CRC checks out.
    pub fn get_validated_app_metadata<N: Nvm + ?Sized>(&self, nvm: &mut N, app: u8) -> DfuResult<AppMetadata> {
        self.validate(nvm)?;
        self.get_app_metadata(nvm, app)
    }

    /// Update the record of `app`.
    ///
    /// `scratch` receives the whole row and must be at least a row long. The
    /// row is rewritten (with a fresh CRC) only when the record changed.
    /// Returns whether a write happened.
    pub fn set_app_metadata<N: Nvm + ?Sized>(
        &self,
        nvm: &mut N,
        scratch: &mut [u8],
        app: u8,
        metadata: AppMetadata,
    ) -> DfuResult<bool> {
        let offset = self.record_offset(app)?;
        let row_len = self.row_len();
        if scratch.len() < row_len {
            return Err(DfuError::Length);
        }
        let row = &mut scratch[..row_len];
        nvm.read(self.layout.address, row, NvmCtl::empty())?;

        let record = &mut row[offset..offset + METADATA_BYTES_PER_APP];
        if AppMetadata::read_from(record) == metadata {
            return Ok(false);
        }
        metadata.write_to(record);
        Self::seal(row);

        nvm.write(self.layout.address, row, NvmCtl::empty())?;
        Ok(true)
    }

    /// Copy `out.len()` bytes starting at row offset `from`, after checking
    /// the row CRC.
    pub fn read_range<N: Nvm + ?Sized>(&self, nvm: &mut N, from: usize, out: &mut [u8]) -> DfuResult {
        if from + out.len() > self.row_len() {
            return Err(DfuError::Data);
        }
        self.validate(nvm)?;
        nvm.read(self.layout.address + from as u32, out, NvmCtl::empty())
    }

    /// Build a sealed row image from `records`. Used to lay out a factory image.
    pub fn build_row(&self, records: &[AppMetadata]) -> DfuResult<Vec<u8>> {
        if records.len() > self.max_apps as usize {
            return Err(DfuError::BadParam);
        }
        let mut row = vec![0u8; self.row_len()];
        for (record, chunk) in records.iter().zip(row.chunks_exact_mut(METADATA_BYTES_PER_APP)) {
            record.write_to(chunk);
        }
        Self::seal(&mut row);
        Ok(row)
    }

    fn seal(row: &mut [u8]) {
        let crc_at = row.len() - METADATA_CRC_SIZE;
        let mut crc = Crc32c::new();
        crc.update(&row[..crc_at]);
        LittleEndian::write_u32(&mut row[crc_at..], crc.finalize());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::crc32c;
    use crate::nvm::MemoryNvm;

    const ROW: usize = 64;
    const META_ADDR: u32 = 0x0000_0FC0;

    fn manager() -> MetadataManager {
        MetadataManager::new(
            MetadataLayout {
                address: META_ADDR,
                length: ROW as u32,
            },
            2,
        )
    }

    fn nvm_with_row(records: &[AppMetadata]) -> MemoryNvm {
        let mut nvm = MemoryNvm::new(0, 0x1000, ROW);
        let row = manager().build_row(records).unwrap();
        nvm.load(META_ADDR, &row).unwrap();
        nvm
    }

    #[test]
    fn test_build_row_layout() {
        let row = manager()
            .build_row(&[AppMetadata::new(0x100, 0x200), AppMetadata::new(0x400, 0x80)])
            .unwrap();
        assert_eq!(&row[..8], &[0x00, 0x01, 0, 0, 0x00, 0x02, 0, 0]);
        assert_eq!(&row[8..16], &[0x00, 0x04, 0, 0, 0x80, 0, 0, 0]);
        assert_eq!(LittleEndian::read_u32(&row[ROW - 4..]), crc32c(&row[..ROW - 4]));
    }

    #[test]
    fn test_validate_and_get() {
        let mut nvm = nvm_with_row(&[AppMetadata::new(0x100, 0x200), AppMetadata::new(0x400, 0x80)]);
        let mgr = manager();
        assert_eq!(mgr.validate(&mut nvm), Ok(()));
        assert_eq!(mgr.get_validated_app_metadata(&mut nvm, 1), Ok(AppMetadata::new(0x400, 0x80)));
        assert_eq!(mgr.get_app_metadata(&mut nvm, 2), Err(DfuError::BadParam));
    }

    #[test]
    fn test_any_bit_flip_fails_validation() {
        let mut nvm = nvm_with_row(&[AppMetadata::new(0x100, 0x200), AppMetadata::new(0x400, 0x80)]);
        let mgr = manager();
        let pristine = nvm.contents(META_ADDR, ROW).unwrap().to_vec();

        for byte in [0, 5, 9, 30, ROW - 5, ROW - 1] {
            for bit in [0, 3, 7] {
                let mut row = pristine.clone();
                row[byte] ^= 1 << bit;
                nvm.load(META_ADDR, &row).unwrap();
                assert_eq!(mgr.validate(&mut nvm), Err(DfuError::Verify), "byte {byte} bit {bit}");
                let mut out = [0u8; 8];
                assert_eq!(mgr.read_range(&mut nvm, 0, &mut out), Err(DfuError::Verify));
            }
        }
    }

    #[test]
    fn test_set_rewrites_only_on_change() {
        let mut nvm = nvm_with_row(&[AppMetadata::new(0x100, 0x200)]);
        let mgr = manager();
        let mut scratch = [0u8; 128];

        assert_eq!(
            mgr.set_app_metadata(&mut nvm, &mut scratch, 0, AppMetadata::new(0x100, 0x200)),
            Ok(false)
        );
        assert_eq!(nvm.write_count(), 0);

        assert_eq!(
            mgr.set_app_metadata(&mut nvm, &mut scratch, 1, AppMetadata::new(0x800, 0x40)),
            Ok(true)
        );
        assert_eq!(nvm.write_count(), 1);
        assert_eq!(mgr.validate(&mut nvm), Ok(()));
        assert_eq!(mgr.get_app_metadata(&mut nvm, 0), Ok(AppMetadata::new(0x100, 0x200)));
        assert_eq!(mgr.get_app_metadata(&mut nvm, 1), Ok(AppMetadata::new(0x800, 0x40)));
    }

    #[test]
    fn test_set_needs_room_for_row() {
        let mut nvm = nvm_with_row(&[]);
        let mut scratch = [0u8; ROW - 1];
        assert_eq!(
            manager().set_app_metadata(&mut nvm, &mut scratch, 0, AppMetadata::new(1, 2)),
            Err(DfuError::Length)
        );
    }

    #[test]
    fn test_read_range_bounds() {
        let mut nvm = nvm_with_row(&[AppMetadata::new(0x100, 0x200)]);
        let mgr = manager();
        let mut out = [0u8; 4];
        mgr.read_range(&mut nvm, 4, &mut out).unwrap();
        assert_eq!(out, [0x00, 0x02, 0, 0]);

        let mut too_far = [0u8; 8];
        assert_eq!(mgr.read_range(&mut nvm, ROW - 4, &mut too_far), Err(DfuError::Data));
    }
}
