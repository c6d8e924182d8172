//! Device-side OTA update agent
//!
//! Runs the update core on a host machine, with slots stored as files:
//! - [`platform`]: file-backed A/B slot storage
//! - [`restart`]: restart requests delivered to the boot loop
//! - [`network`]: update host reachability probe
//! - [`agent`]: the boot loop
//! - [`logging`]: subscriber setup for the binary

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod agent;
pub mod logging;
pub mod network;
pub mod platform;
pub mod restart;

pub use agent::{AgentOptions, AgentSummary, run};
pub use platform::{FileSlotStorage, OtaData};
pub use restart::ChannelRestarter;
