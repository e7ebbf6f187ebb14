//! Staging and NVM programming handlers (send, program, verify, erase).

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, info, warn};

use crate::checksum::crc32c;
use crate::events::{DfuEvent, DfuObserver, LogLevel};
use crate::nvm::{Nvm, NvmCtl};
use crate::protocol::constants::*;
use crate::protocol::{DfuError, DfuResult};
use crate::session::SessionParams;
use crate::verify::footprint;

use super::{HandleResult, HandlerContext};

/// Append `packet data[from..to]` to the staging buffer.
fn stage(params: &mut SessionParams<'_>, from: usize, to: usize) -> DfuResult {
    let n = to - from;
    let offset = params.data_offset;
    if offset + n > params.data_buffer.len() {
        return Err(DfuError::Length);
    }
    params.data_buffer[offset..offset + n]
        .copy_from_slice(&params.packet_buffer[PACKET_DATA_IDX + from..PACKET_DATA_IDX + to]);
    params.data_offset += n;
    Ok(())
}

/// Parse the address/CRC prefix, stage the trailing bytes and check the CRC
/// of everything staged so far. Returns the target address.
fn stage_checked<N: Nvm, O: DfuObserver>(ctx: &mut HandlerContext<'_, '_, N, O>) -> DfuResult<u32> {
    if ctx.data_len < DATA_PARAMS_SIZE {
        return Err(DfuError::Length);
    }
    let payload = ctx.payload();
    let address = LittleEndian::read_u32(&payload[..DATA_CRC_OFFSET]);
    let crc = LittleEndian::read_u32(&payload[DATA_CRC_OFFSET..DATA_PARAMS_SIZE]);

    stage(ctx.params, DATA_PARAMS_SIZE, ctx.data_len)?;
    let staged = &ctx.params.data_buffer[..ctx.params.data_offset];
    if crc32c(staged) != crc {
        debug!(address = %format!("0x{:08X}", address), len = staged.len(), "Staged data CRC mismatch");
        return Err(DfuError::Checksum);
    }
    Ok(address)
}

/// Refuse writes into the running application, and into golden applications
/// that still verify. Without a valid metadata row nothing may be written.
fn write_guard<N: Nvm, O: DfuObserver>(ctx: &mut HandlerContext<'_, '_, N, O>, address: u32) -> DfuResult {
    let format = ctx.config.app_format;
    let running = ctx.config.running_app;

    if let Err(e) = ctx.metadata.validate(&mut *ctx.nvm) {
        warn!(address = %format!("0x{:08X}", address), error = %e, "Metadata row invalid, write refused");
        return Err(DfuError::Address);
    }

    let image = ctx.metadata.get_app_metadata(&mut *ctx.nvm, running)?;
    if footprint(format, image).contains(&address) {
        warn!(address = %format!("0x{:08X}", address), app = running, "Write into the running application refused");
        return Err(DfuError::Address);
    }

    for &golden in ctx.config.golden_apps.iter().filter(|&&app| app != running) {
        let image = ctx.metadata.get_app_metadata(&mut *ctx.nvm, golden)?;
        if !footprint(format, image).contains(&address) {
            continue;
        }
        return match ctx.verifier.validate_app(&mut *ctx.nvm, ctx.metadata, golden) {
            Ok(()) => {
                warn!(address = %format!("0x{:08X}", address), app = golden, "Write into a valid golden image refused");
                Err(DfuError::Address)
            }
            Err(_) => {
                info!(app = golden, "Golden image does not verify, allowing overwrite");
                Ok(())
            }
        };
    }
    Ok(())
}

fn program_data<N: Nvm, O: DfuObserver>(ctx: &mut HandlerContext<'_, '_, N, O>) -> DfuResult {
    let address = stage_checked(ctx)?;
    write_guard(ctx, address)?;

    let len = ctx.params.data_offset;
    let staged = &mut ctx.params.data_buffer[..len];
    ctx.nvm.write(address, staged, NvmCtl::HOST_DATA)?;
    ctx.nvm
        .read(address, staged, NvmCtl::COMPARE)
        .map_err(|e| if e == DfuError::Verify { DfuError::Data } else { e })?;

    ctx.emit(DfuEvent::RowProgrammed { address, len });
    Ok(())
}

/// PROGRAM DATA - Write the staged row and read it back.
pub fn handle_program_data<N: Nvm, O: DfuObserver>(ctx: &mut HandlerContext<'_, '_, N, O>) -> HandleResult {
    info!("PROGRAM DATA: Writing staged row");
    let status = program_data(ctx);
    ctx.params.data_offset = 0;
    if let Err(e) = status {
        ctx.log(LogLevel::Warn, format_args!("Program Data failed: {}", e));
    }
    HandleResult::status(status)
}

fn verify_data<N: Nvm, O: DfuObserver>(ctx: &mut HandlerContext<'_, '_, N, O>) -> DfuResult {
    let address = stage_checked(ctx)?;
    let len = ctx.params.data_offset;
    ctx.nvm
        .read(address, &mut ctx.params.data_buffer[..len], NvmCtl::COMPARE)
        .map_err(|_| DfuError::Verify)
}

/// VERIFY DATA - Compare the staged row with NVM.
pub fn handle_verify_data<N: Nvm, O: DfuObserver>(ctx: &mut HandlerContext<'_, '_, N, O>) -> HandleResult {
    info!("VERIFY DATA: Comparing staged row");
    let status = verify_data(ctx);
    ctx.params.data_offset = 0;
    HandleResult::status(status)
}

fn erase_data<N: Nvm, O: DfuObserver>(ctx: &mut HandlerContext<'_, '_, N, O>) -> DfuResult {
    if ctx.data_len != ERASE_DATA_SIZE {
        return Err(DfuError::Length);
    }
    let address = LittleEndian::read_u32(ctx.payload());
    write_guard(ctx, address)?;
    ctx.nvm.write(address, &[], NvmCtl::ERASE)?;
    ctx.emit(DfuEvent::RowErased { address });
    Ok(())
}

/// ERASE DATA - Erase one row.
pub fn handle_erase_data<N: Nvm, O: DfuObserver>(ctx: &mut HandlerContext<'_, '_, N, O>) -> HandleResult {
    info!("ERASE DATA: Erasing row");
    let status = erase_data(ctx);
    ctx.params.data_offset = 0;
    HandleResult::status(status)
}

/// SEND DATA - Append to the staging buffer.
pub fn handle_send_data<N: Nvm, O: DfuObserver>(
    ctx: &mut HandlerContext<'_, '_, N, O>,
    respond: bool,
) -> HandleResult {
    debug!(len = ctx.data_len, offset = ctx.params.data_offset, "SEND DATA: Staging");
    let status = stage(ctx.params, 0, ctx.data_len);
    if let Err(e) = status {
        warn!(error = %e, "SEND DATA: Staging buffer overflow");
    }
    if respond {
        HandleResult::status(status)
    } else {
        HandleResult::Silent(status)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::*;
    use super::*;
    use crate::checksum::crc32c;
    use crate::metadata::AppMetadata;

    fn row(seed: u8) -> Vec<u8> {
        (0..ROW).map(|i| seed.wrapping_add(i as u8)).collect()
    }

    #[test]
    fn test_send_send_program_resets_staging() {
        let mut bench = Bench::basic();
        let data = row(0x10);
        let mut offset = 0;

        assert_eq!(bench.run(&mut offset, CMD_SEND_DATA, &data[..24]).result(), Ok(()));
        assert_eq!(bench.run(&mut offset, CMD_SEND_DATA_NO_RSP, &data[24..48]), HandleResult::Silent(Ok(())));
        assert_eq!(offset, 48);

        let mut payload = APP1_START.to_le_bytes().to_vec();
        payload.extend_from_slice(&crc32c(&data).to_le_bytes());
        payload.extend_from_slice(&data[48..]);
        assert_eq!(bench.run(&mut offset, CMD_PROGRAM_DATA, &payload).result(), Ok(()));
        assert_eq!(offset, 0);
        assert_eq!(bench.nvm.contents(APP1_START, ROW).unwrap(), &data[..]);
        assert!(bench.observer.events().contains(&DfuEvent::RowProgrammed {
            address: APP1_START,
            len: ROW,
        }));
    }

    #[test]
    fn test_failed_program_resets_staging_too() {
        let mut bench = Bench::basic();
        let data = row(0x20);
        let mut offset = 0;

        bench.run(&mut offset, CMD_SEND_DATA, &data[..32]);
        let mut payload = APP1_START.to_le_bytes().to_vec();
        payload.extend_from_slice(&(crc32c(&data) ^ 1).to_le_bytes());
        payload.extend_from_slice(&data[32..]);

        assert_eq!(bench.run(&mut offset, CMD_PROGRAM_DATA, &payload).result(), Err(DfuError::Checksum));
        assert_eq!(offset, 0);
        assert_eq!(bench.nvm.write_count(), 0);
    }

    #[test]
    fn test_short_program_is_length() {
        let mut bench = Bench::basic();
        let mut offset = 10;
        assert_eq!(
            bench.run(&mut offset, CMD_PROGRAM_DATA, &[0; 7]).result(),
            Err(DfuError::Length)
        );
        assert_eq!(offset, 0);
    }

    #[test]
    fn test_staging_overflow() {
        let mut bench = Bench::basic();
        let mut offset = 0;
        assert_eq!(bench.run(&mut offset, CMD_SEND_DATA, &[1; 100]).result(), Ok(()));
        assert_eq!(bench.run(&mut offset, CMD_SEND_DATA, &[2; 40]).result(), Err(DfuError::Length));
        assert_eq!(offset, 100);

        let payload = program_payload(APP1_START, &[3; 40]);
        assert_eq!(bench.run(&mut offset, CMD_PROGRAM_DATA, &payload).result(), Err(DfuError::Length));
        assert_eq!(offset, 0);
    }

    #[test]
    fn test_nvm_rejects_partial_row() {
        let mut bench = Bench::basic();
        let payload = program_payload(APP1_START, &[9; 16]);
        assert_eq!(bench.run(&mut 0, CMD_PROGRAM_DATA, &payload).result(), Err(DfuError::Length));
    }

    #[test]
    fn test_running_app_is_protected() {
        let mut bench = Bench::basic();
        let payload = program_payload(0x0000, &row(1));
        assert_eq!(bench.run(&mut 0, CMD_PROGRAM_DATA, &payload).result(), Err(DfuError::Address));
        assert_eq!(
            bench.run(&mut 0, CMD_ERASE_DATA, &0x0380u32.to_le_bytes()).result(),
            Err(DfuError::Address)
        );
        assert_eq!(bench.nvm.write_count() + bench.nvm.erase_count(), 0);
    }

    #[test]
    fn test_corrupt_metadata_blocks_writes() {
        let mut bench = Bench::basic();
        let running = bench.nvm.contents(0, ROW).unwrap().to_vec();
        let byte = bench.nvm.contents(META_ADDR + 1, 1).unwrap()[0];
        bench.nvm.load(META_ADDR + 1, &[byte ^ 0x01]).unwrap();

        let payload = program_payload(0x0000, &[0xEE; ROW]);
        assert_eq!(bench.run(&mut 0, CMD_PROGRAM_DATA, &payload).result(), Err(DfuError::Address));
        assert_eq!(
            bench.run(&mut 0, CMD_ERASE_DATA, &0u32.to_le_bytes()).result(),
            Err(DfuError::Address)
        );
        // Rows outside every image are refused as well.
        let payload = program_payload(APP1_START, &row(3));
        assert_eq!(bench.run(&mut 0, CMD_PROGRAM_DATA, &payload).result(), Err(DfuError::Address));

        assert_eq!(bench.nvm.contents(0, ROW).unwrap(), &running[..]);
        assert_eq!(bench.nvm.write_count() + bench.nvm.erase_count(), 0);
    }

    #[test]
    fn test_verify_data_crc_mismatch() {
        let mut bench = Bench::basic();
        let data = row(0x30);
        bench.nvm.load(APP1_START, &data).unwrap();

        let mut payload = APP1_START.to_le_bytes().to_vec();
        payload.extend_from_slice(&(crc32c(&data) ^ 0x8000_0000).to_le_bytes());
        payload.extend_from_slice(&data);
        let mut offset = 0;
        assert_eq!(bench.run(&mut offset, CMD_VERIFY_DATA, &payload).result(), Err(DfuError::Checksum));
        assert_eq!(offset, 0);
    }

    #[test]
    fn test_golden_write_only_when_golden_is_invalid() {
        let mut config = test_config();
        config.golden_apps = vec![1];
        let image = row(0x40);
        // App 1 is one row: 60 bytes of image and its CRC trailer.
        let golden = AppMetadata::new(APP1_START, (ROW - 4) as u32);
        let mut bench = Bench::new(config, &[APP0, golden]);
        let mut sealed = image[..ROW - 4].to_vec();
        sealed.extend_from_slice(&crc32c(&image[..ROW - 4]).to_le_bytes());
        bench.nvm.load(APP1_START, &sealed).unwrap();

        let payload = program_payload(APP1_START, &row(0x77));
        assert_eq!(bench.run(&mut 0, CMD_PROGRAM_DATA, &payload).result(), Err(DfuError::Address));
        assert_eq!(bench.nvm.contents(APP1_START, ROW).unwrap(), &sealed[..]);

        bench.nvm.load(APP1_START + 3, &[!sealed[3]]).unwrap();
        assert_eq!(bench.run(&mut 0, CMD_PROGRAM_DATA, &payload).result(), Ok(()));
        assert_eq!(bench.nvm.contents(APP1_START, ROW).unwrap(), &row(0x77)[..]);
    }

    #[test]
    fn test_verify_data() {
        let mut bench = Bench::basic();
        let data = row(0x55);
        bench.nvm.load(APP1_START, &data).unwrap();

        let payload = program_payload(APP1_START, &data);
        assert_eq!(bench.run(&mut 0, CMD_VERIFY_DATA, &payload).result(), Ok(()));

        let other = row(0x56);
        let payload = program_payload(APP1_START, &other);
        let mut offset = 0;
        assert_eq!(bench.run(&mut offset, CMD_VERIFY_DATA, &payload).result(), Err(DfuError::Verify));
        assert_eq!(offset, 0);
        assert_eq!(bench.nvm.write_count(), 0);
    }

    #[test]
    fn test_erase() {
        let mut bench = Bench::basic();
        bench.nvm.load(APP1_START, &row(0xF0)).unwrap();

        let mut offset = 16;
        assert_eq!(bench.run(&mut offset, CMD_ERASE_DATA, &[0, 4, 0]).result(), Err(DfuError::Length));
        assert_eq!(offset, 0);

        assert_eq!(bench.run(&mut 0, CMD_ERASE_DATA, &APP1_START.to_le_bytes()).result(), Ok(()));
        assert_eq!(bench.nvm.erase_count(), 1);
        assert!(bench.nvm.contents(APP1_START, ROW).unwrap().iter().all(|&b| b == 0));
    }
}
