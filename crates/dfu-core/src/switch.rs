//! Application switching and image copy.
//!
//! A switch either jumps straight into the target's vector table or goes
//! through a software reset with the target id kept in retained memory; the
//! running application picks the request up in [`SwitchController::resume`].

use tracing::{debug, info, warn};

use crate::config::{AppFormat, EngineConfig};
use crate::events::{DfuEvent, DfuObserver};
use crate::metadata::MetadataManager;
use crate::nvm::{Nvm, NvmCtl, read_u32};
use crate::protocol::constants::{CYPRESS_APP_VT_OFFSET_FIELD, SIMPLIFIED_APP_SIZE_FIELD};
use crate::protocol::{DfuError, DfuResult};

/// Why the device last reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetCause {
    PowerOn,
    External,
    Software,
}

/// Location and first two entries of an application's vector table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorTable {
    pub address: u32,
    pub stack_pointer: u32,
    pub reset_handler: u32,
}

/// Core services needed to hand control to another application.
pub trait Platform {
    fn reset_cause(&self) -> ResetCause;

    /// Switch request kept across a software reset.
    fn load_switch_request(&self) -> u8;

    fn store_switch_request(&mut self, app: u8);

    /// Request a software reset. Does not return on hardware.
    fn software_reset(&mut self);

    /// Load the stack pointer and branch to the reset handler. Does not
    /// return on hardware.
    fn jump(&mut self, vector_table: VectorTable);
}

/// What [`SwitchController::resume`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeAction {
    /// No pending switch, keep running.
    Stay,
    /// Control went to another application.
    Switched { app: u8, vector_table: VectorTable },
}

/// Host-side stand-in for the core: records resets and jumps.
#[derive(Debug, Clone)]
pub struct SimulatedPlatform {
    pub cause: ResetCause,
    pub retained: u8,
    pub resets: usize,
    pub jumps: Vec<VectorTable>,
}

impl SimulatedPlatform {
    pub fn new(cause: ResetCause) -> Self {
        Self {
            cause,
            retained: 0,
            resets: 0,
            jumps: Vec::new(),
        }
    }
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new(ResetCause::PowerOn)
    }
}

impl Platform for SimulatedPlatform {
    fn reset_cause(&self) -> ResetCause {
        self.cause
    }

    fn load_switch_request(&self) -> u8 {
        self.retained
    }

    fn store_switch_request(&mut self, app: u8) {
        self.retained = app;
    }

    fn software_reset(&mut self) {
        self.resets += 1;
        self.cause = ResetCause::Software;
    }

    fn jump(&mut self, vector_table: VectorTable) {
        self.jumps.push(vector_table);
    }
}

/// Switching between the applications listed in the metadata row.
#[derive(Debug, Clone, Copy)]
pub struct SwitchController {
    format: AppFormat,
    metadata: MetadataManager,
}

impl SwitchController {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            format: config.app_format,
            metadata: MetadataManager::new(config.metadata, config.max_apps),
        }
    }

    /// Resolve the vector table of `app` from its metadata record.
    pub fn vector_table<N: Nvm + ?Sized>(&self, nvm: &mut N, app: u8) -> DfuResult<VectorTable> {
        let image = self.metadata.get_validated_app_metadata(nvm, app)?;
        let address = match self.format {
            AppFormat::Basic => image.start,
            AppFormat::Simplified => {
                let base = image.start.wrapping_add(SIMPLIFIED_APP_SIZE_FIELD);
                base.wrapping_add(read_u32(nvm, base)?)
            }
            AppFormat::Cypress => {
                let base = image.start.wrapping_add(CYPRESS_APP_VT_OFFSET_FIELD);
                base.wrapping_add(read_u32(nvm, base)?)
            }
        };
        Ok(VectorTable {
            address,
            stack_pointer: read_u32(nvm, address)?,
            reset_handler: read_u32(nvm, address.wrapping_add(4))?,
        })
    }

    /// Jump into `app` without a reset.
    ///
    /// Only returns on failure, or after the jump on a simulated platform.
    pub fn switch_to_app<N, P, O>(&self, nvm: &mut N, platform: &mut P, observer: &O, app: u8) -> DfuResult<VectorTable>
    where
        N: Nvm + ?Sized,
        P: Platform + ?Sized,
        O: DfuObserver + ?Sized,
    {
        let vector_table = self.vector_table(nvm, app).inspect_err(|e| {
            warn!(app, error = %e, "Cannot switch to application");
        })?;
        info!(
            app,
            vector_table = %format!("0x{:08X}", vector_table.address),
            "Switching to application"
        );
        observer.on_event(&DfuEvent::SwitchRequested { app });
        platform.jump(vector_table);
        Ok(vector_table)
    }

    /// Schedule `app` and reset into it.
    ///
    /// # Panics
    ///
    /// If `app` is not below `max_apps`.
    pub fn execute_app<P: Platform + ?Sized>(&self, platform: &mut P, app: u8) {
        assert!(app < self.metadata.max_apps(), "app {} out of range", app);
        debug!(app, "Scheduling application switch");
        platform.store_switch_request(app);
        platform.software_reset();
    }

    /// Act on a switch scheduled before the last reset.
    ///
    /// Any reset other than a software reset clears the request.
    pub fn resume<N, P, O>(&self, nvm: &mut N, platform: &mut P, observer: &O) -> DfuResult<ResumeAction>
    where
        N: Nvm + ?Sized,
        P: Platform + ?Sized,
        O: DfuObserver + ?Sized,
    {
        if platform.reset_cause() != ResetCause::Software {
            platform.store_switch_request(0);
            return Ok(ResumeAction::Stay);
        }

        let app = platform.load_switch_request();
        if app == 0 || app >= self.metadata.max_apps() {
            return Ok(ResumeAction::Stay);
        }
        let vector_table = self.switch_to_app(nvm, platform, observer, app)?;
        Ok(ResumeAction::Switched { app, vector_table })
    }
}

/// Copy `length` bytes of NVM from `src` to `dest`, one row at a time.
///
/// `scratch` must hold a row. Stops at the first failing row.
pub fn copy_app<N: Nvm + ?Sized>(
    nvm: &mut N,
    scratch: &mut [u8],
    dest: u32,
    src: u32,
    length: u32,
    row_size: usize,
) -> DfuResult {
    if length == 0 || row_size == 0 {
        return Err(DfuError::BadParam);
    }
    if scratch.len() < row_size {
        return Err(DfuError::Length);
    }
    let row = &mut scratch[..row_size];

    let mut offset = 0u32;
    while offset < length {
        nvm.read(src.wrapping_add(offset), row, NvmCtl::empty())?;
        nvm.write(dest.wrapping_add(offset), row, NvmCtl::empty())?;
        offset = offset.saturating_add(row_size as u32);
    }
    debug!(
        dest = %format!("0x{:08X}", dest),
        src = %format!("0x{:08X}", src),
        length,
        "Application copied"
    );
    Ok(())
}
