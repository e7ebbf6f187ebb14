//! Non-volatile memory abstraction.
//!
//! The engine never touches flash directly; every access goes through an
//! [`Nvm`] implementation supplied by the device (or [`MemoryNvm`] on a host).
//!
//! [`MemoryNvm`]: super::MemoryNvm

use bitflags::bitflags;

use crate::protocol::DfuResult;

bitflags! {
    /// Control flags passed with every NVM access.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct NvmCtl: u32 {
        /// Read compares the buffer against NVM instead of filling it.
        const COMPARE = 1 << 0;
        /// Write erases the row; the data argument is ignored.
        const ERASE = 1 << 1;
        /// The data came from the host rather than from the device itself.
        const HOST_DATA = 1 << 2;
    }
}

/// Device NVM driver.
///
/// Implementations reject misaligned or oversized writes with
/// `DfuError::Length` and out-of-range addresses with `DfuError::Address`.
/// A compare that finds different content returns `DfuError::Verify`.
pub trait Nvm {
    /// Read `buffer.len()` bytes at `address`, or compare them with
    /// [`NvmCtl::COMPARE`].
    fn read(&mut self, address: u32, buffer: &mut [u8], ctl: NvmCtl) -> DfuResult;

    /// Program `data` at `address`, or erase the row with [`NvmCtl::ERASE`].
    fn write(&mut self, address: u32, data: &[u8], ctl: NvmCtl) -> DfuResult;
}

impl<N: Nvm + ?Sized> Nvm for &mut N {
    fn read(&mut self, address: u32, buffer: &mut [u8], ctl: NvmCtl) -> DfuResult {
        (**self).read(address, buffer, ctl)
    }

    fn write(&mut self, address: u32, data: &[u8], ctl: NvmCtl) -> DfuResult {
        (**self).write(address, data, ctl)
    }
}

/// Read a little-endian `u32` from NVM.
pub fn read_u32<N: Nvm + ?Sized>(nvm: &mut N, address: u32) -> DfuResult<u32> {
    let mut word = [0u8; 4];
    nvm.read(address, &mut word, NvmCtl::empty())?;
    Ok(u32::from_le_bytes(word))
}
