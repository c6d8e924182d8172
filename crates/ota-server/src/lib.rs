//! Development tooling for OTA updates
//!
//! - [`server`]: serves one firmware image over HTTP, with single-range support
//! - [`pack`]: builds application images from raw payloads

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod pack;
pub mod server;

pub use pack::{PackError, PackOptions, PackedImage, pack_image};
pub use server::{RunningServer, ServerConfig, router, start};
