//! File-backed A/B slot platform.
//!
//! Layout under the data directory:
//!
//! ```text
//! slot_a.bin
//! slot_b.bin
//! otadata.json   { "active": "A", "security_floor": 0 }
//! ```
//!
//! `otadata.json` is the boot pointer. It is replaced with a
//! write-temp-then-rename so a crash leaves either the old or the new
//! pointer, never a mix.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ota_core::header::{parse_descriptor, verify_image_digest};
use ota_core::{FirmwareDescriptor, Slot, StorageError, platform::SlotStorage};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const OTADATA_FILE: &str = "otadata.json";

/// Boot pointer and anti-rollback floor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtaData {
    /// Slot the device boots from
    pub active: Slot,
    /// Lowest security version the device accepts
    pub security_floor: u32,
}

/// A/B slots stored as files
#[derive(Debug)]
pub struct FileSlotStorage {
    dir: PathBuf,
    capacity: u64,
    otadata: OtaData,
    writer: Option<tokio::fs::File>,
    written: u64,
}

impl FileSlotStorage {
    /// Default slot capacity
    pub const DEFAULT_CAPACITY: u64 = 4 * 1024 * 1024;

    /// Open the slot directory, creating it and a fresh boot pointer if needed
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let otadata_path = dir.join(OTADATA_FILE);
        let otadata = match tokio::fs::read_to_string(&otadata_path).await {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                let otadata = OtaData::default();
                write_otadata(&dir, &otadata).await?;
                otadata
            }
            Err(e) => return Err(e.into()),
        };

        debug!(dir = %dir.display(), active = %otadata.active, "Opened slot storage");
        Ok(Self {
            dir,
            capacity: Self::DEFAULT_CAPACITY,
            otadata,
            writer: None,
            written: 0,
        })
    }

    /// Limit the size of each slot
    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Slot the device boots from
    pub fn active_slot(&self) -> Slot {
        self.otadata.active
    }

    /// Current boot pointer
    pub fn otadata(&self) -> OtaData {
        self.otadata
    }

    /// Path of a slot file
    pub fn slot_path(&self, slot: Slot) -> PathBuf {
        self.dir.join(format!("slot_{}.bin", slot.label()))
    }

    /// Write a factory image into the active slot if that slot is empty.
    ///
    /// Returns whether the image was installed.
    pub async fn install_factory_image(&mut self, image: &[u8]) -> Result<bool, StorageError> {
        let path = self.slot_path(self.otadata.active);
        if tokio::fs::try_exists(&path).await? {
            return Ok(false);
        }
        let body = verify_image_digest(image).map_err(|e| StorageError::Rejected(e.to_string()))?;
        let desc = parse_descriptor(body).map_err(|e| StorageError::Rejected(e.to_string()))?;

        tokio::fs::write(&path, image).await?;
        info!(slot = %self.otadata.active, version = desc.version(), "Installed factory image");
        Ok(true)
    }

    async fn validate_inactive(&self) -> Result<FirmwareDescriptor, StorageError> {
        let image = tokio::fs::read(self.slot_path(self.otadata.active.other())).await?;
        let body =
            verify_image_digest(&image).map_err(|e| StorageError::Rejected(e.to_string()))?;
        let desc = parse_descriptor(body).map_err(|e| StorageError::Rejected(e.to_string()))?;

        if desc.security_version() < self.otadata.security_floor {
            return Err(StorageError::Rejected(format!(
                "security version {} below floor {}",
                desc.security_version(),
                self.otadata.security_floor
            )));
        }
        Ok(desc)
    }
}

async fn write_otadata(dir: &Path, otadata: &OtaData) -> Result<(), StorageError> {
    let tmp = dir.join(format!("{OTADATA_FILE}.tmp"));
    let content = serde_json::to_vec_pretty(otadata)?;

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(&content).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp, dir.join(OTADATA_FILE)).await?;
    Ok(())
}

#[async_trait]
impl SlotStorage for FileSlotStorage {
    async fn running_descriptor(&self) -> Result<FirmwareDescriptor, StorageError> {
        let image = tokio::fs::read(self.slot_path(self.otadata.active)).await?;
        parse_descriptor(&image).map_err(|e| StorageError::Metadata(e.to_string()))
    }

    fn security_version_floor(&self) -> u32 {
        self.otadata.security_floor
    }

    async fn prepare_inactive(&mut self, size_hint: Option<u64>) -> Result<(), StorageError> {
        if let Some(size) = size_hint
            && size > self.capacity
        {
            return Err(StorageError::CapacityExceeded {
                size,
                capacity: self.capacity,
            });
        }

        let slot = self.otadata.active.other();
        self.writer = Some(tokio::fs::File::create(self.slot_path(slot)).await?);
        self.written = 0;
        debug!(%slot, size_hint = ?size_hint, "Erased inactive slot");
        Ok(())
    }

    async fn write_chunk(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        let total = self
            .written
            .saturating_add(u64::try_from(bytes.len()).unwrap_or(u64::MAX));
        if total > self.capacity {
            return Err(StorageError::CapacityExceeded {
                size: total,
                capacity: self.capacity,
            });
        }

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| StorageError::InvalidState("inactive slot not prepared".to_string()))?;
        writer.write_all(bytes).await?;
        self.written = total;
        Ok(())
    }

    async fn validate_and_activate(&mut self) -> Result<(), StorageError> {
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| StorageError::InvalidState("inactive slot not prepared".to_string()))?;
        writer.flush().await?;
        writer.sync_all().await?;
        drop(writer);

        let desc = self.validate_inactive().await?;

        let next = OtaData {
            active: self.otadata.active.other(),
            security_floor: self.otadata.security_floor.max(desc.security_version()),
        };
        write_otadata(&self.dir, &next).await?;
        self.otadata = next;

        info!(
            slot = %next.active,
            version = desc.version(),
            security_floor = next.security_floor,
            "Activated new firmware slot"
        );
        Ok(())
    }

    async fn discard_inactive(&mut self) -> Result<(), StorageError> {
        self.writer = None;
        self.written = 0;
        let path = self.slot_path(self.otadata.active.other());
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove inactive slot");
                Err(e.into())
            }
        }
    }
}
