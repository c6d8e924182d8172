//! HTTPS transport for OTA firmware images
//!
//! Implements [`ota_core::transport::Transport`] on top of `reqwest` with
//! rustls. Two fetch modes are supported:
//! - a single streaming GET, and
//! - successive `Range` requests of bounded size, with the total length
//!   taken from `Content-Range`. A server that answers `200 OK` to a range
//!   request is streamed in full instead.
//!
//! Plaintext `http://` URLs are refused unless the request explicitly
//! allows them.

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]

mod error;
mod range;
mod transport;

pub use transport::{HttpStream, HttpTransport};
