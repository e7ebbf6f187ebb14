//! DFU-Core: device-resident firmware update engine.
//!
//! This crate implements the device side of a packet-based DFU protocol:
//! a host streams firmware rows over a byte transport, the engine stages,
//! checks and programs them into NVM, maintains a CRC-protected application
//! metadata row and validates images before control is handed to them.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, status codes, packet framing
//! - **Checksum**: Packet checksums and CRC-32C
//! - **Transport**: Byte transport abstraction (mock for host tooling)
//! - **NVM**: Flash driver abstraction and a RAM-backed model
//! - **Metadata**: Application table with its row CRC
//! - **Verify**: Image validation and trust anchor hooks
//! - **State**: Session state and command handlers
//! - **Events**: Observer pattern for logging and tooling
//! - **Session**: The engine driving one packet per call
//! - **Switch**: Application switching and image copy
//!
//! # Example
//!
//! ```no_run
//! use dfu_core::{DfuEngine, EngineConfig, MemoryNvm, MockTransport, SessionParams};
//!
//! let nvm = MemoryNvm::new(0, 0x1_0000, 256);
//! let mut engine = DfuEngine::new(EngineConfig::default(), MockTransport::new(), nvm)
//!     .expect("invalid configuration");
//!
//! let mut staging = [0u8; 512];
//! let mut packet = [0u8; 600];
//! let mut params = SessionParams::new(&mut staging, &mut packet, 20);
//! let mut state = engine.init(&mut params);
//! let _ = engine.complete(&mut state, &mut params, 300_000);
//! ```

pub mod checksum;
pub mod config;
pub mod events;
pub mod metadata;
pub mod nvm;
pub mod protocol;
pub mod session;
pub mod state;
pub mod switch;
pub mod transport;
pub mod verify;

// Re-exports for convenience
pub use checksum::{Crc32c, PacketChecksumKind, crc32c};
pub use config::{AppFormat, CommandSet, ConfigError, EngineConfig, MetadataLayout, VerifyPolicy};
pub use events::{DfuEvent, DfuObserver, LogLevel, NullObserver, RecordingObserver, TracingObserver};
pub use metadata::{AppMetadata, MetadataManager};
pub use nvm::{MemoryNvm, Nvm, NvmCtl};
pub use protocol::{Command, DfuError, DfuResult, Packet, PacketCodec};
pub use session::{DfuEngine, EncryptionVector, SessionParams, UserCommandHandler, UserCommandReply};
pub use state::SessionState;
pub use switch::{Platform, ResetCause, ResumeAction, SimulatedPlatform, SwitchController, VectorTable, copy_app};
pub use transport::{MockTransport, Transport, TransportError, TransportKind};
pub use verify::{AppVerifier, TocStatus, TrustAnchor};
