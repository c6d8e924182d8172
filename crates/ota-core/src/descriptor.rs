//! Firmware identity as carried in an image header

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Maximum length of the version string in bytes
pub const MAX_VERSION_LEN: usize = 32;

/// Length of the content hash in bytes
pub const HASH_LEN: usize = 32;

/// 32-byte digest identifying the content of a firmware image
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; HASH_LEN]);

impl ContentHash {
    /// Wrap raw digest bytes
    pub const fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// SHA-256 of `data`
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Lowercase hex rendering
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

/// Errors constructing a [`FirmwareDescriptor`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    /// Version does not fit the header field
    #[error("version is {len} bytes, at most {MAX_VERSION_LEN} allowed")]
    VersionTooLong {
        /// Actual byte length
        len: usize,
    },

    /// Version would be cut short by the header's NUL padding
    #[error("version contains a NUL byte")]
    VersionContainsNul,
}

/// Identity of one firmware image: version, content hash and security version.
///
/// Immutable once constructed. Two descriptors are compared field by field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FirmwareDescriptor {
    version: String,
    content_hash: ContentHash,
    security_version: u32,
}

impl FirmwareDescriptor {
    /// Build a descriptor, checking the version fits the header layout
    pub fn new(
        version: impl Into<String>,
        content_hash: ContentHash,
        security_version: u32,
    ) -> Result<Self, DescriptorError> {
        let version = version.into();
        if version.len() > MAX_VERSION_LEN {
            return Err(DescriptorError::VersionTooLong { len: version.len() });
        }
        if version.contains('\0') {
            return Err(DescriptorError::VersionContainsNul);
        }
        Ok(Self {
            version,
            content_hash,
            security_version,
        })
    }

    /// Version label
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Content hash
    pub fn content_hash(&self) -> &ContentHash {
        &self.content_hash
    }

    /// Anti-rollback security version
    pub fn security_version(&self) -> u32 {
        self.security_version
    }
}

impl std::fmt::Display for FirmwareDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (hash {}, secure_version {})",
            self.version, self.content_hash, self.security_version
        )
    }
}
