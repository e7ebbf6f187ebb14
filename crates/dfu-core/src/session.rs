//! DFU Session - the device-side command dispatcher.
//!
//! The caller owns every buffer ([`SessionParams`]) and the [`SessionState`];
//! the engine owns the transport, the NVM driver and the observer. Each call
//! to [`DfuEngine::continue_session`] reads at most one packet and writes at
//! most one response.

use tracing::{debug, info, warn};

use crate::config::{ConfigError, EngineConfig};
use crate::events::{DfuEvent, DfuObserver, TracingObserver};
use crate::metadata::MetadataManager;
use crate::nvm::Nvm;
use crate::protocol::constants::*;
use crate::protocol::{DfuError, DfuResult, PacketCodec, status_code};
use crate::state::handlers::{HandleResult, HandlerContext, handle_command};
use crate::state::machine::SessionState;
use crate::transport::Transport;
use crate::verify::{AppVerifier, TrustAnchor};

/// Encryption initialization vector slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncryptionVector {
    bytes: [u8; EI_VECTOR_MAX],
    len: usize,
}

impl EncryptionVector {
    /// Replace the vector. `bytes` must not exceed [`EI_VECTOR_MAX`].
    pub fn set(&mut self, bytes: &[u8]) {
        assert!(bytes.len() <= EI_VECTOR_MAX, "vector longer than {} bytes", EI_VECTOR_MAX);
        self.bytes = [0; EI_VECTOR_MAX];
        self.bytes[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// What a user command handler wants sent back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserCommandReply {
    pub status: DfuResult,
    /// Response bytes written to the front of the data field.
    pub len: usize,
    pub respond: bool,
}

impl UserCommandReply {
    pub fn respond(status: DfuResult, len: usize) -> Self {
        Self {
            status,
            len,
            respond: true,
        }
    }

    pub fn silent(status: DfuResult) -> Self {
        Self {
            status,
            len: 0,
            respond: false,
        }
    }
}

/// Handler for command codes from [`USER_CMD_START`] upwards.
pub trait UserCommandHandler {
    /// `data` is the whole data field of the packet buffer; the request
    /// occupies its first `request_len` bytes and the reply is written in place.
    fn handle(&mut self, command: u8, data: &mut [u8], request_len: usize) -> UserCommandReply;
}

/// Caller-owned session resources, passed to every call.
pub struct SessionParams<'a> {
    /// Staging buffer for data accumulated across packets.
    pub data_buffer: &'a mut [u8],
    /// Fill level of `data_buffer`.
    pub data_offset: usize,
    /// Receive/transmit buffer; its length bounds the packet size.
    pub packet_buffer: &'a mut [u8],
    /// Per-call receive timeout in milliseconds.
    pub timeout_ms: u32,
    /// Application named by the last Set App Metadata.
    pub app_id: u8,
    /// Verdict of the last Verify App.
    pub app_verified: bool,
    /// Slot for Set EI Vector; `None` refuses the command.
    pub encryption_vector: Option<EncryptionVector>,
    pub(crate) user_command: Option<&'a mut dyn UserCommandHandler>,
}

impl<'a> SessionParams<'a> {
    /// Bundle the session buffers.
    ///
    /// # Panics
    ///
    /// If either buffer is too small to be usable or the timeout is zero.
    pub fn new(data_buffer: &'a mut [u8], packet_buffer: &'a mut [u8], timeout_ms: u32) -> Self {
        let params = Self {
            data_buffer,
            data_offset: 0,
            packet_buffer,
            timeout_ms,
            app_id: 0,
            app_verified: false,
            encryption_vector: None,
            user_command: None,
        };
        params.check_conventions();
        params
    }

    fn check_conventions(&self) {
        assert!(self.timeout_ms != 0, "session timeout must be non-zero");
        assert!(!self.data_buffer.is_empty(), "staging buffer must not be empty");
        assert!(
            self.packet_buffer.len() >= PACKET_OVERHEAD + ENTER_RSP_SIZE,
            "packet buffer must hold at least {} bytes",
            PACKET_OVERHEAD + ENTER_RSP_SIZE
        );
    }

    /// Route user command codes to `handler`.
    pub fn register_user_command(&mut self, handler: &'a mut dyn UserCommandHandler) {
        self.user_command = Some(handler);
    }

    pub fn unregister_user_command(&mut self) {
        self.user_command = None;
    }

    pub fn has_user_command(&self) -> bool {
        self.user_command.is_some()
    }
}

/// Why no packet could be handed to the dispatcher.
enum ReadError {
    /// The transport delivered nothing usable.
    Link(DfuError),
    /// Bytes arrived but did not form a valid packet.
    Packet(DfuError),
}

/// Result of one served call.
struct Served {
    status: DfuResult,
    link_failed: bool,
}

impl Served {
    fn done(status: DfuResult) -> Self {
        Self {
            status,
            link_failed: false,
        }
    }
}

/// Device-resident DFU engine.
pub struct DfuEngine<T: Transport, N: Nvm, O: DfuObserver = TracingObserver> {
    config: EngineConfig,
    codec: PacketCodec,
    transport: T,
    nvm: N,
    observer: O,
    metadata: MetadataManager,
    verifier: AppVerifier,
}

impl<T: Transport, N: Nvm> DfuEngine<T, N, TracingObserver> {
    /// Create an engine that reports through `tracing`.
    pub fn new(config: EngineConfig, transport: T, nvm: N) -> Result<Self, ConfigError> {
        Self::with_observer(config, transport, nvm, TracingObserver)
    }
}

impl<T: Transport, N: Nvm, O: DfuObserver> DfuEngine<T, N, O> {
    /// Create an engine with a custom observer.
    pub fn with_observer(config: EngineConfig, transport: T, nvm: N, observer: O) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            codec: PacketCodec::new(config.packet_checksum),
            metadata: MetadataManager::new(config.metadata, config.max_apps),
            verifier: AppVerifier::new(config.app_format, config.verify_policy),
            config,
            transport,
            nvm,
            observer,
        })
    }

    /// Install the trust anchor used by secure verification policies.
    pub fn with_trust_anchor(mut self, anchor: Box<dyn TrustAnchor>) -> Self {
        self.verifier.set_trust_anchor(anchor);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn codec(&self) -> PacketCodec {
        self.codec
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn nvm(&self) -> &N {
        &self.nvm
    }

    pub fn nvm_mut(&mut self) -> &mut N {
        &mut self.nvm
    }

    pub fn metadata(&self) -> &MetadataManager {
        &self.metadata
    }

    /// Application this engine is running inside.
    pub fn running_app(&self) -> u8 {
        self.config.running_app
    }

    /// Validate application `app` against its metadata record.
    pub fn validate_app(&mut self, app: u8) -> DfuResult {
        self.verifier.validate_app(&mut self.nvm, &self.metadata, app)
    }

    pub fn into_parts(self) -> (T, N, O) {
        (self.transport, self.nvm, self.observer)
    }

    /// Start a session: clear staging and return the initial state.
    pub fn init(&mut self, params: &mut SessionParams<'_>) -> SessionState {
        params.check_conventions();
        params.data_offset = 0;
        SessionState::None
    }

    /// Serve one packet.
    ///
    /// Returns the status of the command, `Timeout` when nothing arrived
    /// (no response is sent then) and `BadParam` once the session has finished.
    pub fn continue_session(&mut self, state: &mut SessionState, params: &mut SessionParams<'_>) -> DfuResult {
        self.serve(state, params).status
    }

    /// Serve packets until the host sends Exit.
    ///
    /// `budget_ms` is spent by every read the transport could not complete
    /// (timeouts and link failures), in steps of the per-call timeout.
    /// Returns `Timeout` once it runs out.
    pub fn complete(
        &mut self,
        state: &mut SessionState,
        params: &mut SessionParams<'_>,
        budget_ms: u32,
    ) -> DfuResult {
        let mut remaining = budget_ms;
        while *state != SessionState::Finished {
            if !self.serve(state, params).link_failed {
                continue;
            }
            if remaining <= params.timeout_ms {
                info!(budget_ms, "Session timed out");
                return Err(DfuError::Timeout);
            }
            remaining -= params.timeout_ms;
        }
        Ok(())
    }

    fn serve(&mut self, state: &mut SessionState, params: &mut SessionParams<'_>) -> Served {
        params.check_conventions();
        if !state.is_active() {
            debug!(state = %state, "Session is not active");
            return Served::done(Err(DfuError::BadParam));
        }

        let outcome = match self.read_packet(params) {
            Ok((code, data_len)) => {
                self.observer.on_event(&DfuEvent::PacketReceived { code, len: data_len });
                let mut ctx = HandlerContext {
                    nvm: &mut self.nvm,
                    observer: &self.observer,
                    config: &self.config,
                    metadata: &self.metadata,
                    verifier: &mut self.verifier,
                    state: &mut *state,
                    params: &mut *params,
                    data_len,
                };
                let outcome = handle_command(code, &mut ctx);
                self.observer.on_event(&DfuEvent::CommandHandled {
                    code,
                    status: outcome.result(),
                });
                outcome
            }
            Err(ReadError::Link(DfuError::Timeout)) => {
                return Served {
                    status: Err(DfuError::Timeout),
                    link_failed: true,
                };
            }
            Err(ReadError::Link(error)) => {
                self.observer.on_event(&DfuEvent::PacketRejected { error });
                self.send_response(params, &Err(error), 0);
                return Served {
                    status: Err(error),
                    link_failed: true,
                };
            }
            Err(ReadError::Packet(error)) => {
                self.observer.on_event(&DfuEvent::PacketRejected { error });
                HandleResult::status(Err(error))
            }
        };

        if let HandleResult::Respond { status, len } = outcome {
            self.send_response(params, &status, len);
        }
        Served::done(outcome.result())
    }

    fn read_packet(&mut self, params: &mut SessionParams<'_>) -> Result<(u8, usize), ReadError> {
        let received = self
            .transport
            .read(params.packet_buffer, params.timeout_ms)
            .map_err(|e| {
                let status = DfuError::from(e.clone());
                if status != DfuError::Timeout {
                    warn!(error = %e, "Transport read failed");
                }
                ReadError::Link(status)
            })?;
        let packet = self
            .codec
            .decode(params.packet_buffer, received)
            .map_err(ReadError::Packet)?;
        Ok((packet.code, packet.data.len()))
    }

    fn send_response(&mut self, params: &mut SessionParams<'_>, status: &DfuResult, len: usize) {
        let total = match self.codec.encode_response(params.packet_buffer, status, len) {
            Ok(total) => total,
            Err(e) => {
                warn!(error = %e, len, "Response does not fit the packet buffer");
                return;
            }
        };
        match self
            .transport
            .write(&params.packet_buffer[..total], TRANSPORT_WRITE_TIMEOUT_MS)
        {
            Ok(_) => self.observer.on_event(&DfuEvent::ResponseSent {
                status: status_code(status),
                len,
            }),
            Err(e) => warn!(error = %e, "Response write failed"),
        }
    }
}
