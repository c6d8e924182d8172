//! reqwest-backed [`Transport`]

use std::time::Duration;

use async_trait::async_trait;
use ota_core::OtaError;
use ota_core::transport::{FetchRequest, ImageStream, Transport};
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, info, warn};

use crate::error::{body_error, request_error};
use crate::range::{content_range_total, range_header};

/// Fetches firmware images over HTTPS.
///
/// Connections are kept alive between range requests by the underlying
/// client. Failures are never retried.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Build a transport with a rustls client and the webpki root store
    pub fn new() -> Result<Self, OtaError> {
        let client = Client::builder()
            .user_agent(concat!("ota-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OtaError::TlsFailure(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Use a preconfigured client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn get(
        &self,
        url: &str,
        timeout: Duration,
        range: Option<String>,
    ) -> Result<Response, OtaError> {
        let mut builder = self.client.get(url);
        if let Some(range) = range {
            builder = builder.header(RANGE, range);
        }

        match tokio::time::timeout(timeout, builder.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(request_error(&e, url)),
            Err(_elapsed) => Err(OtaError::TransportTimeout(format!(
                "{url}: no response within {}ms",
                timeout.as_millis()
            ))),
        }
    }
}

fn status_error(url: &str, status: StatusCode) -> OtaError {
    OtaError::TransportUnreachable(format!(
        "{url}: server returned {} - {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown")
    ))
}

#[derive(Debug)]
enum Mode {
    /// One streaming response carries the whole image
    Whole,
    /// Successive range requests of at most `chunk` bytes
    Ranged { next_offset: u64, chunk: u64 },
}

/// Image stream over one or more HTTP responses
#[derive(Debug)]
pub struct HttpStream {
    transport: HttpTransport,
    url: String,
    timeout: Duration,
    response: Option<Response>,
    response_bytes: u64,
    content_length: Option<u64>,
    mode: Mode,
}

impl HttpStream {
    /// Whether the stream is using range requests
    pub fn is_ranged(&self) -> bool {
        matches!(self.mode, Mode::Ranged { .. })
    }

    async fn next_range(&mut self) -> Result<bool, OtaError> {
        let Mode::Ranged { next_offset, chunk } = self.mode else {
            return Ok(false);
        };
        let Some(total) = self.content_length else {
            return Ok(false);
        };
        if next_offset >= total {
            return Ok(false);
        }

        let len = chunk.min(total.saturating_sub(next_offset));
        let response = self
            .transport
            .get(&self.url, self.timeout, Some(range_header(next_offset, len)))
            .await?;
        if response.status() != StatusCode::PARTIAL_CONTENT {
            return Err(OtaError::TransportIo(format!(
                "{}: expected 206 for range at {next_offset}, got {}",
                self.url,
                response.status()
            )));
        }

        debug!(offset = next_offset, len, total, "Requested image range");
        self.response = Some(response);
        self.response_bytes = 0;
        Ok(true)
    }
}

#[async_trait]
impl ImageStream for HttpStream {
    fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    async fn read_next_chunk(&mut self) -> Result<Option<Vec<u8>>, OtaError> {
        loop {
            if let Some(response) = self.response.as_mut() {
                let chunk = match tokio::time::timeout(self.timeout, response.chunk()).await {
                    Ok(Ok(chunk)) => chunk,
                    Ok(Err(e)) => return Err(body_error(&e)),
                    Err(_elapsed) => {
                        return Err(OtaError::TransportTimeout(format!(
                            "{}: no data within {}ms",
                            self.url,
                            self.timeout.as_millis()
                        )));
                    }
                };

                match chunk {
                    Some(bytes) if !bytes.is_empty() => {
                        let len = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
                        self.response_bytes = self.response_bytes.saturating_add(len);
                        if let Mode::Ranged { next_offset, .. } = &mut self.mode {
                            *next_offset = next_offset.saturating_add(len);
                        }
                        return Ok(Some(bytes.to_vec()));
                    }
                    Some(_) => continue,
                    None => {
                        self.response = None;
                        if self.is_ranged() && self.response_bytes == 0 {
                            return Err(OtaError::TransportIo(format!(
                                "{}: empty range response",
                                self.url
                            )));
                        }
                    }
                }
            }

            if !self.next_range().await? {
                return Ok(None);
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    type Stream = HttpStream;

    async fn open(&self, request: &FetchRequest) -> Result<HttpStream, OtaError> {
        let url = request.url.as_str();
        if url.starts_with("http://") {
            if !request.allow_plaintext_http {
                return Err(OtaError::TlsFailure(format!(
                    "{url}: plaintext HTTP refused; enable allow_plaintext_http to permit it"
                )));
            }
            warn!(url, "Fetching firmware over plaintext HTTP; this is NOT secure");
        }

        let first_range = request
            .max_request_size
            .map(|max| range_header(0, u64::try_from(max).unwrap_or(u64::MAX)));
        let response = self.get(url, request.timeout, first_range).await?;
        let status = response.status();

        let (content_length, mode) = match (status, request.max_request_size) {
            (StatusCode::PARTIAL_CONTENT, Some(max)) => {
                let Some(total) = response
                    .headers()
                    .get(CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(content_range_total)
                else {
                    // the image length is unknown, so the end of the image could not be detected
                    return Err(OtaError::TransportIo(format!(
                        "{url}: partial response without a total length in Content-Range"
                    )));
                };
                let chunk = u64::try_from(max).unwrap_or(u64::MAX).max(1);
                (
                    Some(total),
                    Mode::Ranged {
                        next_offset: 0,
                        chunk,
                    },
                )
            }
            (StatusCode::PARTIAL_CONTENT, None) => {
                return Err(OtaError::TransportIo(format!(
                    "{url}: unrequested partial response"
                )));
            }
            (s, Some(_)) if s.is_success() => {
                info!(url, status = s.as_u16(), "Server ignored range request; streaming whole image");
                (response.content_length(), Mode::Whole)
            }
            (s, None) if s.is_success() => (response.content_length(), Mode::Whole),
            (s, _) => return Err(status_error(url, s)),
        };

        debug!(url, content_length = ?content_length, ?mode, "Opened image stream");
        Ok(HttpStream {
            transport: self.clone(),
            url: url.to_string(),
            timeout: request.timeout,
            response: Some(response),
            response_bytes: 0,
            content_length,
            mode,
        })
    }
}
