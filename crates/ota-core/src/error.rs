//! Error types for OTA update operations

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::header::HeaderError;

/// Closed set of reasons an update attempt can terminate without committing.
///
/// Every attempt that does not reach `Committed` or `Skipped` ends with
/// exactly one of these. None of them is retried inside the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The update server could not be reached or refused the request
    TransportUnreachable,
    /// The transport did not produce data within the receive timeout
    TransportTimeout,
    /// A secure channel could not be established
    TlsFailure,
    /// Reading image bytes from an open stream failed
    TransportIo,
    /// The image header was truncated or had an invalid layout
    MalformedHeader,
    /// The candidate security version is below the device floor
    SecurityVersionTooLow,
    /// The received length did not match the declared length
    IncompleteImage,
    /// The written image failed structural or cryptographic validation
    ValidationFailed,
    /// Writing to the inactive slot failed
    StorageWriteFailure,
    /// The attempt was cancelled externally
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::TransportUnreachable => "transport unreachable",
            ErrorKind::TransportTimeout => "transport timeout",
            ErrorKind::TlsFailure => "TLS failure",
            ErrorKind::TransportIo => "transport I/O error",
            ErrorKind::MalformedHeader => "malformed header",
            ErrorKind::SecurityVersionTooLow => "security version too low",
            ErrorKind::IncompleteImage => "incomplete image",
            ErrorKind::ValidationFailed => "validation failed",
            ErrorKind::StorageWriteFailure => "storage write failure",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Errors that terminate an update attempt
#[derive(Error, Debug)]
pub enum OtaError {
    /// Update server unreachable
    #[error("Update server unreachable: {0}")]
    TransportUnreachable(String),

    /// Transport timed out
    #[error("Transport timed out: {0}")]
    TransportTimeout(String),

    /// TLS failure
    #[error("TLS failure: {0}")]
    TlsFailure(String),

    /// Stream read failure
    #[error("Transport I/O error: {0}")]
    TransportIo(String),

    /// Invalid image header
    #[error("Malformed image header: {0}")]
    MalformedHeader(#[from] HeaderError),

    /// Anti-rollback floor violated
    #[error("Security version {candidate} is below the device floor {floor}")]
    SecurityVersionTooLow {
        /// Security version declared by the candidate image
        candidate: u32,
        /// Floor currently enforced by the platform
        floor: u32,
    },

    /// Received length does not match the declared length
    #[error("Incomplete image: received {received} of {expected} declared bytes")]
    IncompleteImage {
        /// Bytes received from the transport
        received: u64,
        /// Bytes declared by the server
        expected: u64,
    },

    /// Image validation failed
    #[error("Image validation failed: {0}")]
    ValidationFailed(String),

    /// Inactive slot write failed
    #[error("Storage write failed: {0}")]
    StorageWriteFailure(String),

    /// Operation cancelled
    #[error("Update cancelled")]
    Cancelled,
}

impl OtaError {
    /// Map this error onto the closed set of terminal reasons
    pub fn kind(&self) -> ErrorKind {
        match self {
            OtaError::TransportUnreachable(_) => ErrorKind::TransportUnreachable,
            OtaError::TransportTimeout(_) => ErrorKind::TransportTimeout,
            OtaError::TlsFailure(_) => ErrorKind::TlsFailure,
            OtaError::TransportIo(_) => ErrorKind::TransportIo,
            OtaError::MalformedHeader(_) => ErrorKind::MalformedHeader,
            OtaError::SecurityVersionTooLow { .. } => ErrorKind::SecurityVersionTooLow,
            OtaError::IncompleteImage { .. } => ErrorKind::IncompleteImage,
            OtaError::ValidationFailed(_) => ErrorKind::ValidationFailed,
            OtaError::StorageWriteFailure(_) => ErrorKind::StorageWriteFailure,
            OtaError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Errors reported by a slot storage backend
#[derive(Error, Debug)]
pub enum StorageError {
    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend refused the operation in its current state
    #[error("Invalid storage state: {0}")]
    InvalidState(String),

    /// The image does not fit in the slot
    #[error("Image of {size} bytes exceeds slot capacity of {capacity} bytes")]
    CapacityExceeded {
        /// Requested or written size
        size: u64,
        /// Slot capacity
        capacity: u64,
    },

    /// The platform rejected the image
    #[error("Image rejected: {0}")]
    Rejected(String),

    /// Slot metadata could not be read
    #[error("Slot metadata unavailable: {0}")]
    Metadata(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Metadata(e.to_string())
    }
}
