//! RAM-backed flash model.
//!
//! Behaves like a row-programmed flash part: writes must cover exactly one
//! aligned row, erase clears a row to zero, reads may cover any in-range span.

use std::ops::Range;

use super::traits::{Nvm, NvmCtl};
use crate::protocol::{DfuError, DfuResult};

/// Simulated flash for host tooling and tests.
#[derive(Debug, Clone)]
pub struct MemoryNvm {
    base: u32,
    row_size: usize,
    memory: Vec<u8>,
    writes: usize,
    erases: usize,
}

impl MemoryNvm {
    /// Create `size` bytes of zeroed flash mapped at `base`.
    pub fn new(base: u32, size: usize, row_size: usize) -> Self {
        assert!(row_size > 0, "row size must be non-zero");
        assert!(size % row_size == 0, "size must be a whole number of rows");
        assert!(base as usize % row_size == 0, "base must be row aligned");
        Self {
            base,
            row_size,
            memory: vec![0; size],
            writes: 0,
            erases: 0,
        }
    }

    /// Rows programmed through [`Nvm::write`].
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Rows erased through [`Nvm::write`].
    pub fn erase_count(&self) -> usize {
        self.erases
    }

    /// Place bytes directly, bypassing row rules. Factory programming only.
    pub fn load(&mut self, address: u32, bytes: &[u8]) -> DfuResult {
        let span = self.span(address, bytes.len())?;
        self.memory[span].copy_from_slice(bytes);
        Ok(())
    }

    /// Borrow the current content of a span.
    pub fn contents(&self, address: u32, len: usize) -> DfuResult<&[u8]> {
        let span = self.span(address, len)?;
        Ok(&self.memory[span])
    }

    fn span(&self, address: u32, len: usize) -> DfuResult<Range<usize>> {
        let offset = address.checked_sub(self.base).ok_or(DfuError::Address)? as usize;
        let end = offset.checked_add(len).ok_or(DfuError::Address)?;
        if end > self.memory.len() {
            return Err(DfuError::Address);
        }
        Ok(offset..end)
    }
}

impl Nvm for MemoryNvm {
    fn read(&mut self, address: u32, buffer: &mut [u8], ctl: NvmCtl) -> DfuResult {
        let span = self.span(address, buffer.len())?;
        if ctl.contains(NvmCtl::COMPARE) {
            if self.memory[span] != *buffer {
                return Err(DfuError::Verify);
            }
        } else {
            buffer.copy_from_slice(&self.memory[span]);
        }
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8], ctl: NvmCtl) -> DfuResult {
        if address as usize % self.row_size != 0 {
            return Err(DfuError::Length);
        }
        let erase = ctl.contains(NvmCtl::ERASE);
        if !erase && data.len() != self.row_size {
            return Err(DfuError::Length);
        }

        let span = self.span(address, self.row_size)?;
        if erase {
            self.memory[span].fill(0);
            self.erases += 1;
        } else {
            self.memory[span].copy_from_slice(data);
            self.writes += 1;
        }
        Ok(())
    }
}
