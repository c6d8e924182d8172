//! Image packer: wraps a raw payload into a bootable application image

use ota_core::descriptor::{ContentHash, DescriptorError, FirmwareDescriptor};
use ota_core::header::{IMAGE_DIGEST_LEN, IMAGE_HEADER_SIZE, append_image_digest, encode_header};
use thiserror::Error;

/// Packer errors
#[derive(Error, Debug)]
pub enum PackError {
    /// Version or other descriptor field rejected
    #[error("invalid image descriptor: {0}")]
    Descriptor(#[from] DescriptorError),

    /// Empty payload
    #[error("payload is empty")]
    EmptyPayload,
}

/// Identity written into the packed header
#[derive(Debug, Clone)]
pub struct PackOptions {
    /// Version label
    pub version: String,
    /// Project name
    pub project_name: String,
    /// Anti-rollback security version
    pub security_version: u32,
}

/// A packed image and the descriptor its header carries
#[derive(Debug, Clone)]
pub struct PackedImage {
    /// Header, payload and trailing SHA-256
    pub bytes: Vec<u8>,
    /// Descriptor written into the header
    pub descriptor: FirmwareDescriptor,
}

/// Pack `payload` as `header || payload || sha256(header || payload)`.
///
/// The content hash in the header is the SHA-256 of the payload.
pub fn pack_image(payload: &[u8], options: &PackOptions) -> Result<PackedImage, PackError> {
    if payload.is_empty() {
        return Err(PackError::EmptyPayload);
    }
    let descriptor = FirmwareDescriptor::new(
        options.version.clone(),
        ContentHash::of(payload),
        options.security_version,
    )?;

    let mut bytes = Vec::with_capacity(
        IMAGE_HEADER_SIZE
            .saturating_add(payload.len())
            .saturating_add(IMAGE_DIGEST_LEN),
    );
    bytes.extend_from_slice(&encode_header(&descriptor, &options.project_name));
    bytes.extend_from_slice(payload);
    append_image_digest(&mut bytes);

    Ok(PackedImage { bytes, descriptor })
}
