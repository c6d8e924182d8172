//! Application image header parsing and encoding
//!
//! An application image starts with a 24-byte image header and an 8-byte
//! segment header, followed by the application descriptor. Only the first
//! [`IMAGE_HEADER_SIZE`] bytes are needed to identify the firmware.

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::descriptor::{ContentHash, DescriptorError, FirmwareDescriptor, HASH_LEN};
use crate::error::OtaError;
use crate::transport::ImageStream;

/// First byte of every application image
pub const IMAGE_MAGIC: u8 = 0xE9;

/// Magic word opening the application descriptor
pub const APP_DESC_MAGIC: u32 = 0xABCD_5432;

/// Offset of the application descriptor within the image
pub const APP_DESC_OFFSET: usize = 32;

/// Bytes needed to extract a [`FirmwareDescriptor`]
pub const IMAGE_HEADER_SIZE: usize = 288;

/// Length of the SHA-256 digest appended to a packed image
pub const IMAGE_DIGEST_LEN: usize = 32;

const SECURE_VERSION_OFFSET: usize = 36;
const VERSION_OFFSET: usize = 48;
const PROJECT_NAME_OFFSET: usize = 80;
const ELF_SHA256_OFFSET: usize = 176;
const TEXT_FIELD_LEN: usize = 32;

// Image header fields written by the encoder
const SEGMENT_COUNT_OFFSET: usize = 1;
const WP_PIN_OFFSET: usize = 8;
const SEGMENT_LEN_OFFSET: usize = 28;
const WP_PIN_DISABLED: u8 = 0xEE;
const APP_DESC_LEN: u32 = 256;

/// Errors raised while inspecting an image header
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    /// Stream ended before the header was complete
    #[error("header truncated: needed {needed} bytes, got {available}")]
    Truncated {
        /// Bytes required
        needed: usize,
        /// Bytes available
        available: usize,
    },

    /// First byte is not the image magic
    #[error("bad image magic 0x{0:02x}")]
    BadImageMagic(u8),

    /// Application descriptor magic mismatch
    #[error("bad application descriptor magic 0x{0:08x}")]
    BadDescriptorMagic(u32),

    /// Version field is not valid UTF-8
    #[error("version field is not valid UTF-8")]
    VersionNotUtf8,

    /// Descriptor fields rejected
    #[error("invalid descriptor: {0}")]
    Descriptor(#[from] DescriptorError),

    /// Appended image digest does not match the image
    #[error("image digest mismatch: expected {expected}, computed {computed}")]
    DigestMismatch {
        /// Digest stored at the end of the image
        expected: String,
        /// Digest of the image body
        computed: String,
    },
}

/// Header bytes consumed from a stream together with the descriptor they carry
#[derive(Debug, Clone)]
pub struct InspectedHeader {
    /// Candidate firmware identity
    pub descriptor: FirmwareDescriptor,
    /// Every byte read while inspecting; these open the image on disk
    pub prefix: Vec<u8>,
}

fn field<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N], HeaderError> {
    let end = offset.saturating_add(N);
    buf.get(offset..end)
        .and_then(|s| <[u8; N]>::try_from(s).ok())
        .ok_or(HeaderError::Truncated {
            needed: end,
            available: buf.len(),
        })
}

fn nul_terminated(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    bytes.get(..end).unwrap_or_default()
}

fn check_image_magic(buf: &[u8]) -> Result<(), HeaderError> {
    match buf.first() {
        Some(&IMAGE_MAGIC) | None => Ok(()),
        Some(&other) => Err(HeaderError::BadImageMagic(other)),
    }
}

fn check_desc_magic(buf: &[u8]) -> Result<(), HeaderError> {
    match field::<4>(buf, APP_DESC_OFFSET) {
        Ok(raw) => {
            let magic = u32::from_le_bytes(raw);
            if magic == APP_DESC_MAGIC {
                Ok(())
            } else {
                Err(HeaderError::BadDescriptorMagic(magic))
            }
        }
        // not enough bytes yet
        Err(_) => Ok(()),
    }
}

/// Parse a firmware descriptor from the leading bytes of an image
pub fn parse_descriptor(buf: &[u8]) -> Result<FirmwareDescriptor, HeaderError> {
    if buf.len() < IMAGE_HEADER_SIZE {
        return Err(HeaderError::Truncated {
            needed: IMAGE_HEADER_SIZE,
            available: buf.len(),
        });
    }
    check_image_magic(buf)?;
    check_desc_magic(buf)?;

    let security_version = u32::from_le_bytes(field::<4>(buf, SECURE_VERSION_OFFSET)?);
    let version_raw = field::<TEXT_FIELD_LEN>(buf, VERSION_OFFSET)?;
    let version = std::str::from_utf8(nul_terminated(&version_raw))
        .map_err(|_utf8| HeaderError::VersionNotUtf8)?;
    let hash = field::<HASH_LEN>(buf, ELF_SHA256_OFFSET)?;

    Ok(FirmwareDescriptor::new(
        version,
        ContentHash::from_bytes(hash),
        security_version,
    )?)
}

fn put(buf: &mut [u8], offset: usize, bytes: &[u8]) {
    if let Some(dst) = buf.get_mut(offset..offset.saturating_add(bytes.len())) {
        dst.copy_from_slice(bytes);
    }
}

/// Encode a minimal single-segment image header carrying `descriptor`.
///
/// `project_name` is truncated to the 32-byte field.
pub fn encode_header(descriptor: &FirmwareDescriptor, project_name: &str) -> [u8; IMAGE_HEADER_SIZE] {
    let mut buf = [0u8; IMAGE_HEADER_SIZE];
    put(&mut buf, 0, &[IMAGE_MAGIC]);
    put(&mut buf, SEGMENT_COUNT_OFFSET, &[1]);
    put(&mut buf, WP_PIN_OFFSET, &[WP_PIN_DISABLED]);
    put(&mut buf, SEGMENT_LEN_OFFSET, &APP_DESC_LEN.to_le_bytes());

    put(&mut buf, APP_DESC_OFFSET, &APP_DESC_MAGIC.to_le_bytes());
    put(
        &mut buf,
        SECURE_VERSION_OFFSET,
        &descriptor.security_version().to_le_bytes(),
    );
    put(&mut buf, VERSION_OFFSET, descriptor.version().as_bytes());

    let name = project_name.as_bytes();
    put(
        &mut buf,
        PROJECT_NAME_OFFSET,
        name.get(..TEXT_FIELD_LEN.min(name.len())).unwrap_or_default(),
    );
    put(&mut buf, ELF_SHA256_OFFSET, descriptor.content_hash().as_bytes());
    buf
}

/// Append the SHA-256 of `image` to it
pub fn append_image_digest(image: &mut Vec<u8>) {
    let digest = Sha256::digest(image.as_slice());
    image.extend_from_slice(&digest);
}

/// Check the trailing SHA-256 of a packed image and return the image
/// without it
pub fn verify_image_digest(image: &[u8]) -> Result<&[u8], HeaderError> {
    let minimum = IMAGE_HEADER_SIZE.saturating_add(IMAGE_DIGEST_LEN);
    if image.len() < minimum {
        return Err(HeaderError::Truncated {
            needed: minimum,
            available: image.len(),
        });
    }
    let (body, stored) = image.split_at(image.len().saturating_sub(IMAGE_DIGEST_LEN));
    let computed = Sha256::digest(body);
    if computed.as_slice() != stored {
        return Err(HeaderError::DigestMismatch {
            expected: hex::encode(stored),
            computed: hex::encode(computed),
        });
    }
    Ok(body)
}

/// Read just enough of `stream` to extract the candidate descriptor.
///
/// Bad magic is reported as soon as the offending bytes arrive, without
/// waiting for the rest of the header.
pub async fn extract_descriptor<S>(stream: &mut S) -> Result<InspectedHeader, OtaError>
where
    S: ImageStream + ?Sized,
{
    let mut prefix = Vec::with_capacity(IMAGE_HEADER_SIZE);

    while prefix.len() < IMAGE_HEADER_SIZE {
        match stream.read_next_chunk().await? {
            Some(chunk) => prefix.extend_from_slice(&chunk),
            None => {
                return Err(HeaderError::Truncated {
                    needed: IMAGE_HEADER_SIZE,
                    available: prefix.len(),
                }
                .into());
            }
        }
        check_image_magic(&prefix)?;
        check_desc_magic(&prefix)?;
    }

    let descriptor = parse_descriptor(&prefix)?;
    debug!(
        version = descriptor.version(),
        hash = %descriptor.content_hash(),
        secure_version = descriptor.security_version(),
        prefix_len = prefix.len(),
        "Inspected image header"
    );
    Ok(InspectedHeader { descriptor, prefix })
}
