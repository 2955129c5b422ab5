//! Error taxonomy for the mapping core.
//!
//! Recovery semantics:
//! - `Configuration` is fatal at startup; the service must refuse to
//!   become ready rather than serve against a broken index.
//! - `Encoding` is recovered per item (a degraded `MappingResult`).
//! - `IndexUnavailable` means "service not ready", distinct from
//!   "no match found".
//! - `Persistence` is recoverable when read-only operation is acceptable.
//! - `Validation` is surfaced immediately, no partial processing.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MapperError {
    /// Model or reference data failed to load at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A single item failed to embed.
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// The search index was never built.
    #[error("nearest-neighbor index not available")]
    IndexUnavailable,

    /// A database write or read failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Bad request input: empty name, unsupported file extension,
    /// missing required correction fields.
    #[error("validation error: {0}")]
    Validation(String),

    /// Correction/approval attempted against a record in a status that
    /// does not allow it.
    #[error("invalid status transition: {0}")]
    InvalidTransition(String),

    /// Certification record does not exist.
    #[error("certification record not found: {0}")]
    NotFound(uuid::Uuid),
}

impl From<sqlx::Error> for MapperError {
    fn from(e: sqlx::Error) -> Self {
        MapperError::Persistence(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MapperError>;
