//! Mapping of HTTP client failures onto OTA error kinds

use std::error::Error as StdError;

use ota_core::OtaError;

/// Whether any error in the source chain looks like a TLS failure.
///
/// rustls surfaces handshake and certificate problems as `InvalidData`
/// I/O errors once wrapped by the connector.
fn is_tls_error(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>()
            && io.kind() == std::io::ErrorKind::InvalidData
        {
            return true;
        }
        let message = e.to_string().to_ascii_lowercase();
        if ["certificate", "tls", "handshake"]
            .iter()
            .any(|needle| message.contains(needle))
        {
            return true;
        }
        current = e.source();
    }
    false
}

/// Classify a failure to obtain a response
pub(crate) fn request_error(err: &reqwest::Error, url: &str) -> OtaError {
    if err.is_timeout() {
        OtaError::TransportTimeout(format!("{url}: {err}"))
    } else if is_tls_error(err) {
        OtaError::TlsFailure(format!("{url}: {err}"))
    } else {
        OtaError::TransportUnreachable(format!("{url}: {err}"))
    }
}

/// Classify a failure while reading a response body
pub(crate) fn body_error(err: &reqwest::Error) -> OtaError {
    if err.is_timeout() {
        OtaError::TransportTimeout(err.to_string())
    } else {
        OtaError::TransportIo(err.to_string())
    }
}
