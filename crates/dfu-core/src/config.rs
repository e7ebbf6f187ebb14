//! Engine configuration.
//!
//! Everything a device build would fix at compile time (checksum algorithm,
//! image format, verification policy, optional commands, memory layout) is
//! carried here and handed to the engine at construction.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checksum::PacketChecksumKind;
use crate::protocol::constants::{METADATA_BYTES_PER_APP, METADATA_CRC_SIZE};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_apps must be in 1..=255, got {0}")]
    InvalidMaxApps(u32),
    #[error("app id {id} out of range (max_apps = {max_apps})")]
    AppOutOfRange { id: u8, max_apps: u8 },
    #[error("metadata row of {length} bytes cannot hold {max_apps} records and a CRC")]
    MetadataTooSmall { length: u32, max_apps: u8 },
    #[error("metadata row length {0} is not a multiple of 4")]
    MetadataMisaligned(u32),
    #[error("verification policy {policy:?} is not available for the {format:?} image format")]
    PolicyFormatMismatch { policy: VerifyPolicy, format: AppFormat },
}

/// Application image layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppFormat {
    /// Vector table at the verify start, CRC-32C trailer after the range.
    #[default]
    Basic,
    /// App-size word, then a vector table offset; signature precedes the range.
    Simplified,
    /// Header with a vector table offset at 0x10; signature follows the range.
    Cypress,
}

/// How an application image is judged valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyPolicy {
    /// CRC-32C over the range against the stored trailer.
    #[default]
    Checksum,
    /// Signature check with the device default public key.
    SecureFast,
    /// TOC and key validation before the signature check.
    SecureFull,
}

impl VerifyPolicy {
    pub fn is_secure(self) -> bool {
        !matches!(self, VerifyPolicy::Checksum)
    }
}

/// Location of the metadata row in NVM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataLayout {
    pub address: u32,
    pub length: u32,
}

impl Default for MetadataLayout {
    fn default() -> Self {
        Self {
            address: 0x0000_FF00,
            length: 0x100,
        }
    }
}

/// Optional commands and features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSet {
    pub verify_data: bool,
    pub erase_data: bool,
    pub verify_app: bool,
    pub send_data: bool,
    pub get_metadata: bool,
    pub set_ei_vector: bool,
    pub custom_commands: bool,
    pub metadata_writable: bool,
}

impl Default for CommandSet {
    fn default() -> Self {
        Self {
            verify_data: true,
            erase_data: true,
            verify_app: true,
            send_data: true,
            get_metadata: true,
            set_ei_vector: false,
            custom_commands: false,
            metadata_writable: true,
        }
    }
}

/// Configuration for one engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Product id demanded by Enter. Zero accepts an Enter without one.
    pub product_id: u32,
    pub silicon_id: u32,
    pub silicon_rev: u8,
    pub packet_checksum: PacketChecksumKind,
    pub app_format: AppFormat,
    pub verify_policy: VerifyPolicy,
    pub max_apps: u8,
    /// Application this engine runs inside; its image is never written.
    pub running_app: u8,
    /// Applications protected while they still verify.
    pub golden_apps: Vec<u8>,
    pub metadata: MetadataLayout,
    pub commands: CommandSet,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            product_id: 0,
            silicon_id: 0,
            silicon_rev: 0,
            packet_checksum: PacketChecksumKind::Sum,
            app_format: AppFormat::Basic,
            verify_policy: VerifyPolicy::Checksum,
            max_apps: 2,
            running_app: 0,
            golden_apps: Vec::new(),
            metadata: MetadataLayout::default(),
            commands: CommandSet::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_apps == 0 {
            return Err(ConfigError::InvalidMaxApps(0));
        }
        for &id in std::iter::once(&self.running_app).chain(self.golden_apps.iter()) {
            if id >= self.max_apps {
                return Err(ConfigError::AppOutOfRange {
                    id,
                    max_apps: self.max_apps,
                });
            }
        }

        let needed = self.max_apps as u32 * METADATA_BYTES_PER_APP as u32 + METADATA_CRC_SIZE as u32;
        if self.metadata.length < needed {
            return Err(ConfigError::MetadataTooSmall {
                length: self.metadata.length,
                max_apps: self.max_apps,
            });
        }
        if self.metadata.length % 4 != 0 {
            return Err(ConfigError::MetadataMisaligned(self.metadata.length));
        }

        let secure_format = !matches!(self.app_format, AppFormat::Basic);
        if self.verify_policy.is_secure() != secure_format {
            return Err(ConfigError::PolicyFormatMismatch {
                policy: self.verify_policy,
                format: self.app_format,
            });
        }
        Ok(())
    }
}
