//! Convenience re-exports for common OTA types

pub use crate::commit::{CommitManager, CommitState, UpdateOutcome};
pub use crate::config::{ConfigError, OtaConfig};
pub use crate::descriptor::{ContentHash, DescriptorError, FirmwareDescriptor};
pub use crate::error::{ErrorKind, OtaError, StorageError};
pub use crate::header::{
    HeaderError, IMAGE_DIGEST_LEN, IMAGE_HEADER_SIZE, InspectedHeader, append_image_digest,
    encode_header, extract_descriptor, parse_descriptor, verify_image_digest,
};
pub use crate::orchestrator::{CheckStatus, UpdateOrchestrator, UpdateTask};
pub use crate::platform::{Restart, SlotStorage};
pub use crate::policy::{PolicyConfig, PolicyDecision, RejectReason, SkipReason, evaluate};
pub use crate::slot::Slot;
pub use crate::transport::{FetchRequest, ImageStream, Transport};
