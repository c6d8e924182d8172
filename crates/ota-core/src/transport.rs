//! Transport abstraction for fetching firmware images

use std::time::Duration;

use async_trait::async_trait;

use crate::error::OtaError;

/// Parameters for opening an image stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Image URL
    pub url: String,
    /// Receive timeout applied to connecting and to every read
    pub timeout: Duration,
    /// When set, fetch the image with range requests of at most this many bytes
    pub max_request_size: Option<usize>,
    /// Accept `http://` URLs
    pub allow_plaintext_http: bool,
}

/// A stream of image bytes delivered in chunks
#[async_trait]
pub trait ImageStream: Send {
    /// Image length announced by the server, if any
    fn content_length(&self) -> Option<u64>;

    /// Next chunk of the image, or `None` at end of stream.
    ///
    /// May suspend until data arrives or the receive timeout elapses.
    async fn read_next_chunk(&mut self) -> Result<Option<Vec<u8>>, OtaError>;
}

/// Opens image streams. Implementations must not retry internally.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Stream type produced by [`Transport::open`]
    type Stream: ImageStream;

    /// Connect to `request.url` and return a stream positioned at byte 0
    async fn open(&self, request: &FetchRequest) -> Result<Self::Stream, OtaError>;
}
