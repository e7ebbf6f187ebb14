//! Command handlers - dispatch logic for each command code.
//!
//! This module is split into submodules by functionality:
//! - `control`: Session control (enter, exit, sync, user and unsupported commands)
//! - `data`: Staging and NVM programming (send, program, verify, erase)
//! - `app`: Application registry and verification

mod app;
mod control;
mod data;

use std::fmt;

use tracing::warn;

use crate::config::EngineConfig;
use crate::events::{DfuEvent, DfuObserver, LogLevel};
use crate::metadata::MetadataManager;
use crate::nvm::Nvm;
use crate::protocol::{Command, DfuError, DfuResult, PACKET_DATA_IDX};
use crate::session::SessionParams;
use crate::state::machine::SessionState;
use crate::verify::AppVerifier;

use app::{handle_get_metadata, handle_set_app_metadata, handle_set_ei_vector, handle_verify_app};
use control::{handle_custom, handle_enter, handle_exit, handle_sync, handle_unsupported};
use data::{handle_erase_data, handle_program_data, handle_send_data, handle_verify_data};

/// Result of handling a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleResult {
    /// Send a response carrying `status` and `len` data bytes already placed
    /// in the packet buffer.
    Respond { status: DfuResult, len: usize },
    /// Send nothing back.
    Silent(DfuResult),
}

impl HandleResult {
    /// Respond with `status` and no data.
    pub fn status(status: DfuResult) -> Self {
        HandleResult::Respond { status, len: 0 }
    }

    pub fn result(&self) -> DfuResult {
        match *self {
            HandleResult::Respond { status, .. } | HandleResult::Silent(status) => status,
        }
    }
}

/// Command handler context containing all resources.
pub struct HandlerContext<'a, 'p, N: Nvm, O: DfuObserver> {
    pub nvm: &'a mut N,
    pub observer: &'a O,
    pub config: &'a EngineConfig,
    pub metadata: &'a MetadataManager,
    pub verifier: &'a mut AppVerifier,
    pub state: &'a mut SessionState,
    pub params: &'a mut SessionParams<'p>,
    /// Length of the request data field.
    pub data_len: usize,
}

impl<'a, 'p, N: Nvm, O: DfuObserver> HandlerContext<'a, 'p, N, O> {
    pub(crate) fn emit(&self, event: DfuEvent) {
        self.observer.on_event(&event);
    }

    /// Emit a `Log` event; the message is only formatted when the observer wants it.
    pub(crate) fn log(&self, level: LogLevel, message: fmt::Arguments<'_>) {
        if !self.observer.wants_log(level) {
            return;
        }
        self.emit(DfuEvent::Log {
            level,
            message: message.to_string(),
        });
    }

    /// Request data field.
    pub(crate) fn payload(&self) -> &[u8] {
        &self.params.packet_buffer[PACKET_DATA_IDX..PACKET_DATA_IDX + self.data_len]
    }

    /// Whether an optional command is compiled into this engine.
    fn is_enabled(&self, command: Command) -> bool {
        let commands = &self.config.commands;
        match command {
            Command::VerifyData => commands.verify_data,
            Command::EraseData => commands.erase_data,
            Command::VerifyApp => commands.verify_app,
            Command::SendData | Command::SendDataNoResponse => commands.send_data,
            Command::GetMetadata => commands.get_metadata,
            Command::SetEiVector => commands.set_ei_vector,
            Command::Enter
            | Command::Exit
            | Command::ProgramData
            | Command::Sync
            | Command::SetAppMetadata => true,
        }
    }
}

/// Handle one decoded request and decide what goes back to the host.
pub fn handle_command<N: Nvm, O: DfuObserver>(code: u8, ctx: &mut HandlerContext<'_, '_, N, O>) -> HandleResult {
    match Command::from_code(code) {
        Some(Command::Enter) => handle_enter(ctx),
        Some(Command::Exit) => handle_exit(ctx),
        _ if *ctx.state != SessionState::Updating => {
            warn!(code = %format!("0x{:02X}", code), state = %ctx.state, "Command outside of an update session");
            ctx.log(LogLevel::Warn, format_args!("Unexpected command 0x{:02X} in state {}", code, ctx.state));
            HandleResult::status(Err(DfuError::Cmd))
        }
        Some(cmd) if !ctx.is_enabled(cmd) => handle_unsupported(ctx, code),
        Some(Command::ProgramData) => handle_program_data(ctx),
        Some(Command::VerifyData) => handle_verify_data(ctx),
        Some(Command::EraseData) => handle_erase_data(ctx),
        Some(Command::VerifyApp) => handle_verify_app(ctx),
        Some(Command::SendData) => handle_send_data(ctx, true),
        Some(Command::SendDataNoResponse) => handle_send_data(ctx, false),
        Some(Command::Sync) => handle_sync(ctx),
        Some(Command::SetAppMetadata) => handle_set_app_metadata(ctx),
        Some(Command::GetMetadata) => handle_get_metadata(ctx),
        Some(Command::SetEiVector) => handle_set_ei_vector(ctx),
        None if Command::is_user_code(code)
            && ctx.config.commands.custom_commands
            && ctx.params.has_user_command() =>
        {
            handle_custom(ctx, code)
        }
        None => handle_unsupported(ctx, code),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::checksum::crc32c;
    use crate::config::MetadataLayout;
    use crate::events::RecordingObserver;
    use crate::metadata::AppMetadata;
    use crate::nvm::MemoryNvm;

    pub(crate) const ROW: usize = 64;
    pub(crate) const META_ADDR: u32 = 0x0FC0;
    /// App 0 (the running image) occupies the first KiB.
    pub(crate) const APP0: AppMetadata = AppMetadata {
        start: 0x0000,
        length: 0x03FC,
    };
    pub(crate) const APP1_START: u32 = 0x0400;

    pub(crate) fn test_config() -> EngineConfig {
        EngineConfig {
            product_id: 0x1234_5678,
            silicon_id: 0xE201_1281,
            silicon_rev: 0x11,
            metadata: MetadataLayout {
                address: META_ADDR,
                length: ROW as u32,
            },
            ..Default::default()
        }
    }

    pub(crate) fn test_nvm(config: &EngineConfig, records: &[AppMetadata]) -> MemoryNvm {
        let mut nvm = MemoryNvm::new(0, 0x1000, ROW);
        let row = MetadataManager::new(config.metadata, config.max_apps)
            .build_row(records)
            .unwrap();
        nvm.load(config.metadata.address, &row).unwrap();
        nvm
    }

    /// Everything a handler needs, owned in one place.
    pub(crate) struct Bench {
        pub nvm: MemoryNvm,
        pub observer: RecordingObserver,
        pub config: EngineConfig,
        pub metadata: MetadataManager,
        pub verifier: AppVerifier,
        pub state: SessionState,
        pub staging: Vec<u8>,
        pub packet: Vec<u8>,
    }

    impl Bench {
        pub(crate) fn new(config: EngineConfig, records: &[AppMetadata]) -> Self {
            let nvm = test_nvm(&config, records);
            Self {
                nvm,
                observer: RecordingObserver::new(),
                metadata: MetadataManager::new(config.metadata, config.max_apps),
                verifier: AppVerifier::new(config.app_format, config.verify_policy),
                config,
                state: SessionState::Updating,
                staging: vec![0; ROW * 2],
                packet: vec![0; ROW * 2 + 16],
            }
        }

        pub(crate) fn basic() -> Self {
            Self::new(test_config(), &[APP0])
        }

        /// Run one request through the dispatcher.
        pub(crate) fn run(&mut self, params_offset: &mut usize, code: u8, payload: &[u8]) -> HandleResult {
            let data_len = payload.len();
            self.packet[PACKET_DATA_IDX..PACKET_DATA_IDX + data_len].copy_from_slice(payload);
            let mut params = SessionParams::new(&mut self.staging, &mut self.packet, 20);
            params.data_offset = *params_offset;
            let result = {
                let mut ctx = HandlerContext {
                    nvm: &mut self.nvm,
                    observer: &self.observer,
                    config: &self.config,
                    metadata: &self.metadata,
                    verifier: &mut self.verifier,
                    state: &mut self.state,
                    params: &mut params,
                    data_len,
                };
                handle_command(code, &mut ctx)
            };
            *params_offset = params.data_offset;
            result
        }

        /// Response data left in the packet buffer.
        pub(crate) fn response(&self, len: usize) -> &[u8] {
            &self.packet[PACKET_DATA_IDX..PACKET_DATA_IDX + len]
        }
    }

    /// Program Data payload for one full row.
    pub(crate) fn program_payload(address: u32, row: &[u8]) -> Vec<u8> {
        let mut payload = address.to_le_bytes().to_vec();
        payload.extend_from_slice(&crc32c(row).to_le_bytes());
        payload.extend_from_slice(row);
        payload
    }

    #[test]
    fn test_non_enter_rejected_outside_session() {
        let mut bench = Bench::basic();
        bench.state = SessionState::None;
        let mut offset = 5;

        for code in [0x37, 0x49, 0x35, 0x31, 0x55] {
            let result = bench.run(&mut offset, code, &[1, 2, 3, 4]);
            assert_eq!(result, HandleResult::status(Err(DfuError::Cmd)));
        }
        assert_eq!(offset, 5);
        assert_eq!(bench.state, SessionState::None);
    }

    #[test]
    fn test_disabled_command_is_unsupported() {
        let mut config = test_config();
        config.commands.erase_data = false;
        let mut bench = Bench::new(config, &[APP0]);
        let mut offset = 8;

        let result = bench.run(&mut offset, 0x44, &APP1_START.to_le_bytes());
        assert_eq!(result, HandleResult::status(Err(DfuError::Cmd)));
        assert_eq!(offset, 0);
        assert_eq!(bench.nvm.erase_count(), 0);
    }

    #[test]
    fn test_unknown_code_resets_staging() {
        let mut bench = Bench::basic();
        let mut offset = 12;
        assert_eq!(
            bench.run(&mut offset, 0x20, &[]),
            HandleResult::status(Err(DfuError::Cmd))
        );
        assert_eq!(offset, 0);
    }

    /// Records events but declines log messages.
    struct Quiet(RecordingObserver);

    impl DfuObserver for Quiet {
        fn on_event(&self, event: &DfuEvent) {
            self.0.on_event(event)
        }

        fn wants_log(&self, _level: LogLevel) -> bool {
            false
        }
    }

    #[test]
    fn test_log_events_only_when_wanted() {
        let mut bench = Bench::basic();
        bench.run(&mut 0, 0x20, &[]);
        assert!(bench.observer.events().iter().any(|event| matches!(
            event,
            DfuEvent::Log {
                level: LogLevel::Warn,
                ..
            }
        )));

        let quiet = Quiet(RecordingObserver::new());
        let mut params = SessionParams::new(&mut bench.staging, &mut bench.packet, 20);
        let mut ctx = HandlerContext {
            nvm: &mut bench.nvm,
            observer: &quiet,
            config: &bench.config,
            metadata: &bench.metadata,
            verifier: &mut bench.verifier,
            state: &mut bench.state,
            params: &mut params,
            data_len: 0,
        };
        assert_eq!(handle_command(0x20, &mut ctx), HandleResult::status(Err(DfuError::Cmd)));
        assert!(quiet.0.events().is_empty());
    }
}
