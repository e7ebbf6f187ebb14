//! Session control handlers (enter, exit, sync, user and unsupported commands).

use byteorder::{ByteOrder, LittleEndian};
use tracing::{info, warn};

use crate::events::{DfuObserver, LogLevel};
use crate::nvm::Nvm;
use crate::protocol::constants::*;
use crate::protocol::{DfuError, DfuResult};
use crate::state::machine::SessionState;

use super::{HandleResult, HandlerContext};

/// ENTER - Open an update session.
pub fn handle_enter<N: Nvm, O: DfuObserver>(ctx: &mut HandlerContext<'_, '_, N, O>) -> HandleResult {
    info!("ENTER: Host requests an update session");
    let product_id = ctx.config.product_id;

    let status: DfuResult = match ctx.data_len {
        0 if product_id == 0 => Ok(()),
        0 => Err(DfuError::Length),
        n if ENTER_PRODUCT_ID_SIZES.contains(&n) => {
            let offered = LittleEndian::read_u32(&ctx.payload()[..4]);
            if offered == product_id {
                Ok(())
            } else {
                warn!(offered = %format!("0x{:08X}", offered), "ENTER: Product id mismatch");
                Err(DfuError::Data)
            }
        }
        _ => Err(DfuError::Length),
    };
    if let Err(e) = status {
        ctx.log(LogLevel::Warn, format_args!("Enter refused: {}", e));
        return HandleResult::status(status);
    }

    let rsp = &mut ctx.params.packet_buffer[PACKET_DATA_IDX..PACKET_DATA_IDX + ENTER_RSP_SIZE];
    LittleEndian::write_u32(&mut rsp[..4], ctx.config.silicon_id);
    rsp[4] = ctx.config.silicon_rev;
    rsp[5] = SDK_VERSION_MINOR;
    rsp[6] = SDK_VERSION_MAJOR;
    rsp[7] = ENTER_RSP_LEGACY_BYTE;

    ctx.state.goto_state(SessionState::Updating, ctx.observer);
    ctx.log(LogLevel::Info, format_args!("Update session started"));
    HandleResult::Respond {
        status: Ok(()),
        len: ENTER_RSP_SIZE,
    }
}

/// EXIT - Close the session. The host expects no answer.
pub fn handle_exit<N: Nvm, O: DfuObserver>(ctx: &mut HandlerContext<'_, '_, N, O>) -> HandleResult {
    info!("EXIT: Update session finished");
    ctx.state.goto_state(SessionState::Finished, ctx.observer);
    ctx.log(LogLevel::Info, format_args!("Update session finished"));
    HandleResult::Silent(Ok(()))
}

/// SYNC - Host resynchronizes after an error; drop staged data.
pub fn handle_sync<N: Nvm, O: DfuObserver>(ctx: &mut HandlerContext<'_, '_, N, O>) -> HandleResult {
    info!("SYNC: Staging reset");
    ctx.params.data_offset = 0;
    HandleResult::Silent(Ok(()))
}

/// User-defined command, forwarded to the registered handler.
pub fn handle_custom<N: Nvm, O: DfuObserver>(ctx: &mut HandlerContext<'_, '_, N, O>, code: u8) -> HandleResult {
    info!(code = %format!("0x{:02X}", code), "USER: Forwarding command");
    let data_len = ctx.data_len;
    let params = &mut *ctx.params;
    let room = params.packet_buffer.len() - PACKET_OVERHEAD;
    let Some(handler) = params.user_command.as_deref_mut() else {
        return HandleResult::status(Err(DfuError::Cmd));
    };

    let data = &mut params.packet_buffer[PACKET_DATA_IDX..PACKET_DATA_IDX + room];
    let reply = handler.handle(code, data, data_len);
    if !reply.respond {
        return HandleResult::Silent(reply.status);
    }
    if reply.len > room {
        warn!(len = reply.len, room, "USER: Reply does not fit the packet buffer");
        return HandleResult::status(Err(DfuError::Length));
    }
    HandleResult::Respond {
        status: reply.status,
        len: reply.len,
    }
}

/// Anything not served by this engine.
pub fn handle_unsupported<N: Nvm, O: DfuObserver>(ctx: &mut HandlerContext<'_, '_, N, O>, code: u8) -> HandleResult {
    warn!(code = %format!("0x{:02X}", code), "Unsupported command");
    ctx.log(LogLevel::Warn, format_args!("Unsupported command 0x{:02X}", code));
    ctx.params.data_offset = 0;
    HandleResult::status(Err(DfuError::Cmd))
}

#[cfg(test)]
mod tests {
    use super::super::tests::*;
    use super::*;
    use crate::events::DfuEvent;

    #[test]
    fn test_enter_with_product_id() {
        let mut bench = Bench::basic();
        bench.state = SessionState::None;
        let mut offset = 0;

        let result = bench.run(&mut offset, CMD_ENTER, &0x1234_5678u32.to_le_bytes());
        assert_eq!(result, HandleResult::Respond { status: Ok(()), len: 8 });
        assert_eq!(bench.response(8), &[0x81, 0x12, 0x01, 0xE2, 0x11, 20, 4, 0x01]);
        assert_eq!(bench.state, SessionState::Updating);
        assert!(bench.observer.events().contains(&DfuEvent::StateChanged {
            from: SessionState::None,
            to: SessionState::Updating,
        }));
    }

    #[test]
    fn test_enter_six_byte_form() {
        let mut bench = Bench::basic();
        bench.state = SessionState::None;
        let mut payload = 0x1234_5678u32.to_le_bytes().to_vec();
        payload.extend_from_slice(&[0xAA, 0xBB]);
        let result = bench.run(&mut 0, CMD_ENTER, &payload);
        assert_eq!(result.result(), Ok(()));
    }

    #[test]
    fn test_enter_refusals_keep_state() {
        let mut bench = Bench::basic();
        bench.state = SessionState::None;

        assert_eq!(bench.run(&mut 0, CMD_ENTER, &[]).result(), Err(DfuError::Length));
        assert_eq!(
            bench.run(&mut 0, CMD_ENTER, &0x1234_5679u32.to_le_bytes()).result(),
            Err(DfuError::Data)
        );
        assert_eq!(bench.run(&mut 0, CMD_ENTER, &[0x78, 0x56, 0x34]).result(), Err(DfuError::Length));
        assert_eq!(bench.state, SessionState::None);
    }

    #[test]
    fn test_enter_without_product_id() {
        let mut config = test_config();
        config.product_id = 0;
        let mut bench = Bench::new(config, &[APP0]);
        bench.state = SessionState::None;
        assert_eq!(bench.run(&mut 0, CMD_ENTER, &[]).result(), Ok(()));
        assert_eq!(bench.state, SessionState::Updating);
    }

    #[test]
    fn test_exit_and_sync_are_silent() {
        let mut bench = Bench::basic();
        let mut offset = 30;
        assert_eq!(bench.run(&mut offset, CMD_SYNC, &[]), HandleResult::Silent(Ok(())));
        assert_eq!(offset, 0);

        assert_eq!(bench.run(&mut offset, CMD_EXIT, &[]), HandleResult::Silent(Ok(())));
        assert_eq!(bench.state, SessionState::Finished);
    }
}
