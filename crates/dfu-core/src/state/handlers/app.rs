//! Application registry and verification handlers.

use byteorder::{ByteOrder, LittleEndian};
use tracing::{info, warn};

use crate::events::{DfuEvent, DfuObserver, LogLevel};
use crate::metadata::AppMetadata;
use crate::nvm::Nvm;
use crate::protocol::constants::*;
use crate::protocol::{DfuError, DfuResult};

use super::{HandleResult, HandlerContext};

/// VERIFY APP - Report whether an application image is valid.
///
/// A negative verdict is still a successful command; the verdict travels in
/// the single response byte.
pub fn handle_verify_app<N: Nvm, O: DfuObserver>(ctx: &mut HandlerContext<'_, '_, N, O>) -> HandleResult {
    if !VERIFY_APP_SIZES.contains(&ctx.data_len) {
        return HandleResult::status(Err(DfuError::Length));
    }
    let app = ctx.payload()[0];
    info!(app, "VERIFY APP: Validating application");

    let verdict = if app < ctx.metadata.max_apps() {
        ctx.metadata
            .validate(&mut *ctx.nvm)
            .and_then(|()| ctx.verifier.validate_app(&mut *ctx.nvm, ctx.metadata, app))
    } else {
        Err(DfuError::Verify)
    };

    let valid = match verdict {
        Ok(()) => true,
        Err(DfuError::Verify) => false,
        Err(e) => {
            warn!(app, error = %e, "VERIFY APP: Could not validate");
            return HandleResult::status(Err(e));
        }
    };

    ctx.params.app_verified = valid;
    ctx.params.packet_buffer[PACKET_DATA_IDX] = u8::from(valid);
    ctx.emit(DfuEvent::AppVerified { app, valid });
    HandleResult::Respond {
        status: Ok(()),
        len: VERIFY_APP_RSP_SIZE,
    }
}

/// SET APP METADATA - Register the verified range of an application.
pub fn handle_set_app_metadata<N: Nvm, O: DfuObserver>(ctx: &mut HandlerContext<'_, '_, N, O>) -> HandleResult {
    if ctx.data_len != SET_APP_METADATA_SIZE {
        return HandleResult::status(Err(DfuError::Length));
    }
    let payload = ctx.payload();
    let app = payload[0];
    let record = AppMetadata::new(
        LittleEndian::read_u32(&payload[SET_APP_METADATA_START_OFFSET..SET_APP_METADATA_LENGTH_OFFSET]),
        LittleEndian::read_u32(&payload[SET_APP_METADATA_LENGTH_OFFSET..SET_APP_METADATA_SIZE]),
    );
    info!(
        app,
        start = %format!("0x{:08X}", record.start),
        length = record.length,
        "SET APP METADATA"
    );

    let mut status: DfuResult = Ok(());
    if ctx.config.commands.metadata_writable {
        let scratch = &mut *ctx.params.data_buffer;
        status = match ctx.metadata.set_app_metadata(&mut *ctx.nvm, scratch, app, record) {
            Ok(true) => {
                ctx.emit(DfuEvent::MetadataUpdated {
                    app,
                    start: record.start,
                    length: record.length,
                });
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => {
                ctx.log(LogLevel::Warn, format_args!("Metadata update for app {} failed: {}", app, e));
                Err(e)
            }
        };
    }

    // The selected application is remembered even when the row was not written.
    ctx.params.app_id = app;
    HandleResult::status(status)
}

/// GET METADATA - Return a slice of the metadata row.
pub fn handle_get_metadata<N: Nvm, O: DfuObserver>(ctx: &mut HandlerContext<'_, '_, N, O>) -> HandleResult {
    if ctx.data_len != GET_METADATA_SIZE {
        return HandleResult::status(Err(DfuError::Length));
    }
    let payload = ctx.payload();
    let from = LittleEndian::read_u16(&payload[..GET_METADATA_TO_OFFSET]) as usize;
    let to = LittleEndian::read_u16(&payload[GET_METADATA_TO_OFFSET..GET_METADATA_SIZE]) as usize;
    info!(from, to, "GET METADATA");

    if to < from || (to - from) + PACKET_OVERHEAD > ctx.params.packet_buffer.len() {
        return HandleResult::status(Err(DfuError::Data));
    }

    let len = to - from;
    let out = &mut ctx.params.packet_buffer[PACKET_DATA_IDX..PACKET_DATA_IDX + len];
    match ctx.metadata.read_range(&mut *ctx.nvm, from, out) {
        Ok(()) => HandleResult::Respond { status: Ok(()), len },
        Err(e) => {
            warn!(error = %e, "GET METADATA: Refused");
            HandleResult::status(Err(e))
        }
    }
}

/// SET EI VECTOR - Store the encryption initialization vector.
pub fn handle_set_ei_vector<N: Nvm, O: DfuObserver>(ctx: &mut HandlerContext<'_, '_, N, O>) -> HandleResult {
    let len = ctx.data_len;
    let params = &mut *ctx.params;
    let status = match params.encryption_vector.as_mut() {
        Some(vector) if EI_VECTOR_SIZES.contains(&len) => {
            vector.set(&params.packet_buffer[PACKET_DATA_IDX..PACKET_DATA_IDX + len]);
            info!(len, "SET EI VECTOR: Stored");
            Ok(())
        }
        _ => Err(DfuError::Data),
    };
    HandleResult::status(status)
}
