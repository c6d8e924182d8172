//! Over-the-air firmware update core
//!
//! This crate contains the device-side update logic that takes a remote,
//! possibly corrupt firmware image and turns it into a verified, bootable
//! slot without ever leaving the device unable to boot:
//! - Header inspection before any body byte is trusted
//! - Version, content-hash and anti-rollback policy gates
//! - A/B slot writes with abort at every stage
//! - A bounded-wait orchestrator that runs each attempt as its own task
//!
//! # Architecture
//!
//! - [`transport`]: the image fetching seam ([`transport::Transport`])
//! - [`header`]: application image header parsing and encoding
//! - [`descriptor`]: firmware identity
//! - [`policy`]: proceed / skip / reject decisions
//! - [`platform`]: slot storage and restart seams
//! - [`commit`]: the staged-write state machine
//! - [`orchestrator`]: task spawning, completion signalling and restart
//! - [`config`]: runtime configuration
//! - [`error`]: error types
//!
//! # Safety
//!
//! Destructive storage operations only target the inactive slot. The active
//! slot changes once, inside [`platform::SlotStorage::validate_and_activate`],
//! after the full image has been received and validated.
//!
//! # Example
//!
//! ```ignore
//! use ota_core::prelude::*;
//!
//! # async fn example(transport: impl Transport + 'static, storage: impl SlotStorage + 'static, restarter: impl Restart + 'static) -> anyhow::Result<()> {
//! let config = OtaConfig::load_from_path("ota.json").await?;
//! let orchestrator = UpdateOrchestrator::new(config, transport, storage, restarter);
//!
//! match orchestrator.check_for_update().await {
//!     CheckStatus::Completed(UpdateOutcome::Succeeded) => println!("Restart pending"),
//!     status => println!("No update applied: {status:?}"),
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod commit;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod header;
pub mod orchestrator;
pub mod platform;
pub mod policy;
pub mod prelude;
pub mod slot;
pub mod transport;

pub use commit::{CommitManager, CommitState, UpdateOutcome};
pub use config::OtaConfig;
pub use descriptor::{ContentHash, FirmwareDescriptor};
pub use error::{ErrorKind, OtaError, StorageError};
pub use orchestrator::{CheckStatus, UpdateOrchestrator};
pub use slot::Slot;
