use std::path::PathBuf;

use anyhow::{Context, Result, bail, ensure};
use clap::Parser;
use dfu_core::protocol::constants::*;
use dfu_core::{
    AppFormat, AppMetadata, DfuEngine, EngineConfig, MemoryNvm, MetadataManager, MockTransport, PacketCodec,
    ResumeAction, SessionParams, SimulatedPlatform, SwitchController, TracingObserver, Transport, TransportKind,
    crc32c,
};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "DFU engine loopback simulator", long_about = None)]
struct Args {
    /// Engine configuration (TOML). Defaults are used when absent.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective configuration to this path and exit
    #[arg(long)]
    dump_config: Option<PathBuf>,

    /// Raw application image to download
    #[arg(long)]
    image: Option<PathBuf>,

    /// Application slot to program
    #[arg(long, default_value_t = 1)]
    app_id: u8,

    /// Load address of the image (row aligned)
    #[arg(long, value_parser = parse_u32, default_value = "0x8000")]
    address: u32,

    /// Simulated flash size in bytes
    #[arg(long, value_parser = parse_u32, default_value = "0x10000")]
    flash_size: u32,

    /// Simulated flash row size in bytes
    #[arg(long, default_value_t = 256)]
    row_size: usize,

    /// Bytes per Send Data packet
    #[arg(long, default_value_t = 64)]
    chunk: usize,

    /// Schedule and resume into the new image after the session
    #[arg(long)]
    switch: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(&args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => EngineConfig::load_from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(path) = &args.dump_config {
        config.save_to_file(path)?;
        info!(path = %path.display(), "Configuration written");
        return Ok(());
    }

    let Some(image_path) = &args.image else {
        bail!("--image is required unless --dump-config is given");
    };
    let image = std::fs::read(image_path).with_context(|| format!("reading {}", image_path.display()))?;
    ensure!(!image.is_empty(), "image is empty");
    ensure!(
        config.app_format == AppFormat::Basic,
        "the simulator only builds {:?} images",
        AppFormat::Basic
    );
    ensure!(
        args.chunk > 0 && args.chunk <= args.row_size,
        "chunk must be in 1..={}",
        args.row_size
    );
    ensure!(
        args.address > 0 && args.address as usize % args.row_size == 0,
        "address must be a non-zero multiple of the row size"
    );
    ensure!(
        config.metadata.length as usize == args.row_size,
        "metadata row ({} bytes) must span exactly one flash row",
        config.metadata.length
    );
    ensure!(
        args.app_id < config.max_apps && args.app_id != config.running_app,
        "app id {} cannot be updated",
        args.app_id
    );

    let nvm = factory_flash(&config, args)?;
    let host = MockTransport::new();
    let codec = PacketCodec::new(config.packet_checksum);
    let requests = build_requests(&config, codec, &image, args)?;
    let request_count = requests.len();
    for request in &requests {
        host.queue_packet(request);
    }

    let mut engine = DfuEngine::new(config.clone(), host.clone(), nvm)?;
    engine.transport_mut().start(TransportKind::Uart);

    let mut staging = vec![0u8; args.row_size];
    let mut packet = vec![0u8; args.row_size.max(args.chunk + DATA_PARAMS_SIZE) + PACKET_OVERHEAD];
    let mut params = SessionParams::new(&mut staging, &mut packet, DEFAULT_READ_TIMEOUT_MS);
    let mut state = engine.init(&mut params);
    let budget = DEFAULT_READ_TIMEOUT_MS * 10;
    let outcome = engine.complete(&mut state, &mut params, budget);
    engine.transport_mut().stop();

    let failures = report_responses(codec, &host.take_writes());
    info!(
        requests = request_count,
        failures,
        state = %state,
        "Session ended"
    );
    if let Err(e) = outcome {
        bail!("session did not finish: {}", e);
    }
    ensure!(failures == 0, "{} request(s) failed", failures);
    ensure!(params.app_verified, "application {} did not verify", args.app_id);

    if args.switch {
        let controller = SwitchController::new(&config);
        let mut platform = SimulatedPlatform::default();
        controller.execute_app(&mut platform, args.app_id);
        match controller.resume(engine.nvm_mut(), &mut platform, &TracingObserver)? {
            ResumeAction::Switched { app, vector_table } => info!(
                app,
                stack_pointer = %format!("0x{:08X}", vector_table.stack_pointer),
                reset_handler = %format!("0x{:08X}", vector_table.reset_handler),
                "Jumped into application"
            ),
            ResumeAction::Stay => warn!(app = args.app_id, "Switch request was not honoured"),
        }
    }
    Ok(())
}

/// Flash as it leaves the factory: app 0 below `address` and a sealed metadata row.
fn factory_flash(config: &EngineConfig, args: &Args) -> Result<MemoryNvm> {
    let mut nvm = MemoryNvm::new(0, args.flash_size as usize, args.row_size);
    let mut records = vec![AppMetadata::default(); config.max_apps as usize];
    records[config.running_app as usize] = AppMetadata::new(0, args.address - APP_CRC_TRAILER_SIZE);

    let row = MetadataManager::new(config.metadata, config.max_apps).build_row(&records)?;
    nvm.load(config.metadata.address, &row)
        .context("metadata row lies outside the simulated flash")?;
    Ok(nvm)
}

/// Host side of the update: every request the engine should see, in order.
fn build_requests(config: &EngineConfig, codec: PacketCodec, image: &[u8], args: &Args) -> Result<Vec<Vec<u8>>> {
    let mut requests = Vec::new();
    requests.push(codec.request(CMD_ENTER, &config.product_id.to_le_bytes())?);

    let mut body = image.to_vec();
    body.extend_from_slice(&crc32c(image).to_le_bytes());
    body.resize(body.len().div_ceil(args.row_size) * args.row_size, 0);

    for (index, row) in body.chunks(args.row_size).enumerate() {
        let address = args.address + (index * args.row_size) as u32;
        let chunks: Vec<&[u8]> = row.chunks(args.chunk).collect();
        let (last, leading) = chunks.split_last().context("empty row")?;
        for chunk in leading {
            requests.push(codec.request(CMD_SEND_DATA, chunk)?);
        }
        let mut program = address.to_le_bytes().to_vec();
        program.extend_from_slice(&crc32c(row).to_le_bytes());
        program.extend_from_slice(last);
        requests.push(codec.request(CMD_PROGRAM_DATA, &program)?);
    }

    let mut metadata = vec![args.app_id];
    metadata.extend_from_slice(&args.address.to_le_bytes());
    metadata.extend_from_slice(&(image.len() as u32).to_le_bytes());
    requests.push(codec.request(CMD_SET_APP_METADATA, &metadata)?);
    requests.push(codec.request(CMD_VERIFY_APP, &[args.app_id])?);
    requests.push(codec.request(CMD_EXIT, &[])?);
    Ok(requests)
}

/// Log every response and count the failed ones.
fn report_responses(codec: PacketCodec, responses: &[Vec<u8>]) -> usize {
    let mut failures = 0;
    for raw in responses {
        match codec.decode(raw, raw.len()) {
            Ok(packet) if packet.code == 0 => {}
            Ok(packet) => {
                warn!(status = %format!("0x{:02X}", packet.code), "Request failed");
                failures += 1;
            }
            Err(e) => {
                warn!(error = %e, "Malformed response");
                failures += 1;
            }
        }
    }
    failures
}
