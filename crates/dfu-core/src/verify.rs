//! Application image verification.
//!
//! Checksum policy: CRC-32C over the verified range against the little-endian
//! trailer right after it. Secure policies hand the range and its signature to
//! a [`TrustAnchor`], which owns the actual cryptography.

use std::ops::Range;

use tracing::{debug, warn};

use crate::checksum::Crc32c;
use crate::config::{AppFormat, VerifyPolicy};
use crate::metadata::{AppMetadata, MetadataManager};
use crate::nvm::{Nvm, NvmCtl, read_u32};
use crate::protocol::constants::{APP_CRC_TRAILER_SIZE, RSA_SIGNATURE_SIZE};
use crate::protocol::{DfuError, DfuResult};

/// Chunk size used when streaming an image through the CRC.
const VERIFY_CHUNK: usize = 64;

/// Index of the public key object pointer within the TOC.
pub const TOC_PUBLIC_KEY_INDEX: u32 = 9;
/// Offset of the key material within a public key object.
pub const PUBLIC_KEY_OFFSET: u32 = 8;

/// Outcome of validating the table of contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TocStatus {
    Empty,
    Invalid,
    Valid { address: u32 },
}

/// Boot-ROM services behind secure verification.
pub trait TrustAnchor {
    /// Address of the device default public key.
    fn default_public_key(&self) -> u32;

    /// Validate the table of contents.
    fn validate_toc(&mut self) -> TocStatus;

    /// Whether the key at `key` is acceptable under the TOC at `toc`.
    fn is_valid_key(&mut self, toc: u32, key: u32) -> bool;

    /// Check the signature at `signature` over `length` bytes at `start`.
    fn verify_app(&mut self, start: u32, length: u32, signature: u32, key: u32) -> bool;
}

/// Range of NVM an image occupies, including its trailer or signature.
pub fn footprint(format: AppFormat, image: AppMetadata) -> Range<u32> {
    match format {
        AppFormat::Basic => image.start..image.end().saturating_add(APP_CRC_TRAILER_SIZE),
        AppFormat::Cypress => image.start..image.end().saturating_add(RSA_SIGNATURE_SIZE),
        AppFormat::Simplified => image.start.saturating_sub(RSA_SIGNATURE_SIZE)..image.end(),
    }
}

/// Where the signature of `image` lives.
fn signature_address(format: AppFormat, image: AppMetadata) -> Option<u32> {
    match format {
        AppFormat::Simplified => image.start.checked_sub(RSA_SIGNATURE_SIZE),
        AppFormat::Basic | AppFormat::Cypress => image.start.checked_add(image.length),
    }
}

/// Decides whether an application image may be trusted.
pub struct AppVerifier {
    format: AppFormat,
    policy: VerifyPolicy,
    anchor: Option<Box<dyn TrustAnchor>>,
}

impl AppVerifier {
    pub fn new(format: AppFormat, policy: VerifyPolicy) -> Self {
        Self {
            format,
            policy,
            anchor: None,
        }
    }

    pub fn with_trust_anchor(mut self, anchor: Box<dyn TrustAnchor>) -> Self {
        self.anchor = Some(anchor);
        self
    }

    pub fn set_trust_anchor(&mut self, anchor: Box<dyn TrustAnchor>) {
        self.anchor = Some(anchor);
    }

    pub fn format(&self) -> AppFormat {
        self.format
    }

    pub fn policy(&self) -> VerifyPolicy {
        self.policy
    }

    /// Validate application `app` as described by its metadata record.
    ///
    /// The record is taken as stored; callers that must not trust a corrupt
    /// row validate it first.
    pub fn validate_app<N: Nvm + ?Sized>(
        &mut self,
        nvm: &mut N,
        metadata: &MetadataManager,
        app: u8,
    ) -> DfuResult {
        let image = metadata.get_app_metadata(nvm, app)?;
        let result = self.validate_image(nvm, image);
        debug!(app, valid = result.is_ok(), "Application validated");
        result
    }

    /// Validate the image covering `image`.
    pub fn validate_image<N: Nvm + ?Sized>(&mut self, nvm: &mut N, image: AppMetadata) -> DfuResult {
        match self.policy {
            VerifyPolicy::Checksum => Self::verify_checksum(nvm, image),
            VerifyPolicy::SecureFast | VerifyPolicy::SecureFull => self.verify_signature(nvm, image),
        }
    }

    fn verify_checksum<N: Nvm + ?Sized>(nvm: &mut N, image: AppMetadata) -> DfuResult {
        let trailer = image.start.checked_add(image.length).ok_or(DfuError::Verify)?;

        let mut crc = Crc32c::new();
        let mut chunk = [0u8; VERIFY_CHUNK];
        let mut address = image.start;
        while address < trailer {
            let n = ((trailer - address) as usize).min(VERIFY_CHUNK);
            nvm.read(address, &mut chunk[..n], NvmCtl::empty())
                .map_err(|_| DfuError::Verify)?;
            crc.update(&chunk[..n]);
            address += n as u32;
        }

        let stored = read_u32(nvm, trailer).map_err(|_| DfuError::Verify)?;
        if stored != crc.finalize() {
            return Err(DfuError::Verify);
        }
        Ok(())
    }

    fn verify_signature<N: Nvm + ?Sized>(&mut self, nvm: &mut N, image: AppMetadata) -> DfuResult {
        let Some(anchor) = self.anchor.as_mut() else {
            warn!("Secure verification requested without a trust anchor");
            return Err(DfuError::Verify);
        };
        let signature = signature_address(self.format, image).ok_or(DfuError::Verify)?;

        let key = match self.policy {
            VerifyPolicy::SecureFull => {
                let toc = match anchor.validate_toc() {
                    TocStatus::Valid { address } => address,
                    status => {
                        debug!(?status, "TOC rejected");
                        return Err(DfuError::Verify);
                    }
                };
                let key_object = read_u32(nvm, toc.wrapping_add(4 * TOC_PUBLIC_KEY_INDEX)).map_err(|_| DfuError::Verify)?;
                let key = key_object.wrapping_add(PUBLIC_KEY_OFFSET);
                if !anchor.is_valid_key(toc, key) {
                    return Err(DfuError::Verify);
                }
                key
            }
            _ => anchor.default_public_key(),
        };

        if anchor.verify_app(image.start, image.length, signature, key) {
            Ok(())
        } else {
            Err(DfuError::Verify)
        }
    }
}
