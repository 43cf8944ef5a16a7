//! Unified error handling for the significant-locations library.
//!
//! Every fallible operation returns [`Result`], so failures from the GPS source,
//! the attachment store or the clustering primitives surface to the caller
//! instead of producing a partial location list.

use std::fmt;

/// Unified error type for significant-location operations.
#[derive(Debug, Clone)]
pub enum LocationError {
    /// The GPS source could not be read
    GpsSource { subject_id: String, message: String },
    /// The attachment store could not be read or written
    AttachmentStore {
        subject_id: String,
        key: String,
        message: String,
    },
    /// A stored or received document could not be (de)serialized
    Serialization { message: String },
    /// A clustering primitive rejected its input or parameters
    Clustering { message: String },
    /// The requested window is malformed
    InvalidWindow { start: i64, end: i64 },
    /// Configuration error
    ConfigError { message: String },
    /// Persistence/storage error
    PersistenceError { message: String },
    /// HTTP/API error
    HttpError {
        message: String,
        status_code: Option<u16>,
    },
    /// Generic internal error
    Internal { message: String },
}

impl fmt::Display for LocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationError::GpsSource {
                subject_id,
                message,
            } => {
                write!(f, "GPS source failed for '{}': {}", subject_id, message)
            }
            LocationError::AttachmentStore {
                subject_id,
                key,
                message,
            } => {
                write!(
                    f,
                    "Attachment '{}' for '{}' unavailable: {}",
                    key, subject_id, message
                )
            }
            LocationError::Serialization { message } => {
                write!(f, "Serialization error: {}", message)
            }
            LocationError::Clustering { message } => {
                write!(f, "Clustering failed: {}", message)
            }
            LocationError::InvalidWindow { start, end } => {
                write!(f, "Invalid window: start {} is after end {}", start, end)
            }
            LocationError::ConfigError { message } => {
                write!(f, "Configuration error: {}", message)
            }
            LocationError::PersistenceError { message } => {
                write!(f, "Persistence error: {}", message)
            }
            LocationError::HttpError {
                message,
                status_code,
            } => {
                if let Some(code) = status_code {
                    write!(f, "HTTP error ({}): {}", code, message)
                } else {
                    write!(f, "HTTP error: {}", message)
                }
            }
            LocationError::Internal { message } => {
                write!(f, "Internal error: {}", message)
            }
        }
    }
}

impl std::error::Error for LocationError {}

impl From<serde_json::Error> for LocationError {
    fn from(e: serde_json::Error) -> Self {
        LocationError::Serialization {
            message: e.to_string(),
        }
    }
}

#[cfg(feature = "persistence")]
impl From<rusqlite::Error> for LocationError {
    fn from(e: rusqlite::Error) -> Self {
        LocationError::PersistenceError {
            message: e.to_string(),
        }
    }
}

/// Result type alias for significant-location operations.
pub type Result<T> = std::result::Result<T, LocationError>;

/// Extension trait for converting Option to LocationError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a configuration error.
    fn ok_or_config(self, message: &str) -> Result<T>;

    /// Convert Option to Result with generic internal error.
    fn ok_or_internal(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_config(self, message: &str) -> Result<T> {
        self.ok_or_else(|| LocationError::ConfigError {
            message: message.to_string(),
        })
    }

    fn ok_or_internal(self, message: &str) -> Result<T> {
        self.ok_or_else(|| LocationError::Internal {
            message: message.to_string(),
        })
    }
}
