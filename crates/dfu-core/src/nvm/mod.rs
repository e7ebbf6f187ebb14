//! NVM layer module.

pub mod memory;
pub mod traits;

pub use memory::MemoryNvm;
pub use traits::{Nvm, NvmCtl, read_u32};
