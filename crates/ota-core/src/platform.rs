//! Platform services used by the update core: slot storage and restart

use async_trait::async_trait;

use crate::descriptor::FirmwareDescriptor;
use crate::error::StorageError;

/// A/B slot storage.
///
/// Destructive operations only ever target the inactive slot. The active
/// slot changes only inside [`SlotStorage::validate_and_activate`], as a
/// single atomic switch.
#[async_trait]
pub trait SlotStorage: Send {
    /// Descriptor of the running firmware, read from the active slot
    async fn running_descriptor(&self) -> Result<FirmwareDescriptor, StorageError>;

    /// Current anti-rollback floor. Never decreases.
    fn security_version_floor(&self) -> u32;

    /// Erase the inactive slot and open it for writing
    async fn prepare_inactive(&mut self, size_hint: Option<u64>) -> Result<(), StorageError>;

    /// Append bytes to the inactive slot
    async fn write_chunk(&mut self, bytes: &[u8]) -> Result<(), StorageError>;

    /// Validate the written image and make it the boot target
    async fn validate_and_activate(&mut self) -> Result<(), StorageError>;

    /// Drop whatever was written to the inactive slot
    async fn discard_inactive(&mut self) -> Result<(), StorageError>;
}

/// Device restart primitive
#[async_trait]
pub trait Restart: Send + Sync {
    /// Restart the device into the active slot
    async fn restart(&self);
}
