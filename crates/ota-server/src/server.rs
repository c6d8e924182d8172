//! Development HTTP server serving a single firmware image.
//!
//! GET and HEAD on the configured path return the image. Any other path
//! is 404; an unreadable image is 500. A single `Range` is honored so
//! range-request clients can be exercised.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::{debug, error, info};

const NOT_FOUND_BODY: &str = "<!DOCTYPE html><html><head></head><body>404: File not found</body></html>";
const SERVER_ERROR_BODY: &str =
    "<!DOCTYPE html><html><head></head><body>500: Internal Server Error</body></html>";

/// Server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// File served as the image
    pub binary_file: PathBuf,
    /// Request path of the image, e.g. `ota.bin` or `/ota.bin`
    pub http_filename: String,
    /// Listen address
    pub addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            binary_file: PathBuf::from("a.bin"),
            http_filename: "ota.bin".to_string(),
            addr: SocketAddr::from(([0, 0, 0, 0], 8070)),
        }
    }
}

#[derive(Clone)]
struct ServerState {
    binary_file: Arc<PathBuf>,
}

/// A requested byte range, resolved against the image length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// Inclusive `start..=end`
    Satisfiable {
        /// First byte
        start: usize,
        /// Last byte, inclusive
        end: usize,
    },
    /// Outside the image
    Unsatisfiable,
}

/// Parse a single-range `Range` header against an image of `len` bytes.
///
/// Returns `None` when the header should be ignored (unknown unit,
/// multiple ranges or malformed), in which case the full image is served.
pub fn parse_range(value: &str, len: usize) -> Option<ByteRange> {
    let spec = value.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (first, last) = spec.split_once('-')?;
    let (first, last) = (first.trim(), last.trim());

    let (start, end) = if first.is_empty() {
        // suffix range: the final `n` bytes
        let suffix: usize = last.parse().ok()?;
        if suffix == 0 {
            return Some(ByteRange::Unsatisfiable);
        }
        (len.saturating_sub(suffix), len.saturating_sub(1))
    } else {
        let start: usize = first.parse().ok()?;
        let end = if last.is_empty() {
            len.saturating_sub(1)
        } else {
            let end: usize = last.parse().ok()?;
            if end < start {
                return None;
            }
            end.min(len.saturating_sub(1))
        };
        (start, end)
    };

    if len == 0 || start >= len {
        return Some(ByteRange::Unsatisfiable);
    }
    Some(ByteRange::Satisfiable { start, end })
}

/// Build the router serving `binary_file` at `http_filename`
pub fn router(binary_file: PathBuf, http_filename: &str) -> Router {
    let route = format!("/{}", http_filename.trim_start_matches('/'));
    let state = ServerState {
        binary_file: Arc::new(binary_file),
    };

    Router::new()
        .route(&route, get(image_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

/// A server running in the background
#[derive(Debug)]
pub struct RunningServer {
    /// Bound address
    pub addr: SocketAddr,
    /// Serving task
    pub handle: tokio::task::JoinHandle<()>,
}

/// Bind and serve in a background task
pub async fn start(config: ServerConfig) -> Result<RunningServer> {
    let app = router(config.binary_file.clone(), &config.http_filename);

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("Failed to bind image server on {}", config.addr))?;
    let addr = listener
        .local_addr()
        .context("Failed to read bound address")?;

    info!(
        file = %config.binary_file.display(),
        path = %config.http_filename,
        %addr,
        "Serving firmware image"
    );

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Image server error: {}", e);
        }
    });

    Ok(RunningServer { addr, handle })
}

async fn image_handler(State(state): State<ServerState>, headers: HeaderMap) -> Response {
    let data = match tokio::fs::read(state.binary_file.as_ref()).await {
        Ok(data) => data,
        Err(e) => {
            error!(file = %state.binary_file.display(), "Error opening binary file: {}", e);
            return html(StatusCode::INTERNAL_SERVER_ERROR, SERVER_ERROR_BODY);
        }
    };
    let len = data.len();

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_range(v, len));

    match range {
        None => {
            debug!(len, "Serving full image");
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "application/octet-stream"),
                    (header::ACCEPT_RANGES, "bytes"),
                ],
                data,
            )
                .into_response()
        }
        Some(ByteRange::Satisfiable { start, end }) => {
            debug!(start, end, len, "Serving image range");
            let body = data.get(start..=end).unwrap_or_default().to_vec();
            (
                StatusCode::PARTIAL_CONTENT,
                [
                    (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                    (header::CONTENT_RANGE, format!("bytes {start}-{end}/{len}")),
                ],
                body,
            )
                .into_response()
        }
        Some(ByteRange::Unsatisfiable) => (
            StatusCode::RANGE_NOT_SATISFIABLE,
            [(header::CONTENT_RANGE, format!("bytes */{len}"))],
        )
            .into_response(),
    }
}

async fn not_found_handler() -> Response {
    html(StatusCode::NOT_FOUND, NOT_FOUND_BODY)
}

fn html(status: StatusCode, body: &'static str) -> Response {
    (status, [(header::CONTENT_TYPE, "text/html")], body).into_response()
}
