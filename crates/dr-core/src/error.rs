//! Unified error type for docrelay.
//!
//! All crates funnel their failures into [`Error`], which carries enough context
//! for API handlers to derive an HTTP status code via [`Error::http_status`]
//! and for workers to record a readable failure on the job record.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Unified error type covering all failure modes in docrelay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Request data failed validation at admission.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The upload exceeds the configured size limit.
    #[error("Payload too large: limit is {limit} bytes")]
    PayloadTooLarge {
        /// The configured limit.
        limit: usize,
    },

    /// A local artifact could not be written or removed.
    #[error("Storage error at {}: {source}", path.display())]
    Storage {
        /// The artifact path involved.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A conversion engine is not installed or did not answer its probe.
    #[error("{engine}: engine unavailable")]
    EngineUnavailable {
        /// Name of the engine.
        engine: String,
    },

    /// An engine invocation exceeded its wall-clock budget and was killed.
    #[error("{engine}: timeout after {}s", after.as_secs())]
    ConversionTimeout {
        /// Name of the engine.
        engine: String,
        /// The timeout that expired.
        after: Duration,
    },

    /// An engine ran to completion but did not produce a usable artifact.
    #[error("{engine}: conversion failed: {message}")]
    ConversionFailure {
        /// Name of the engine.
        engine: String,
        /// Human-readable error description.
        message: String,
    },

    /// Every eligible engine was tried (or none was available).
    #[error("Conversion failed: {0}")]
    Conversion(String),

    /// The callback destination could not be reached or rejected the upload.
    #[error("Delivery error after {attempts} attempt(s): {message}")]
    Delivery {
        /// Number of attempts made.
        attempts: u32,
        /// Human-readable error description.
        message: String,
    },

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "job").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Configuration could not be parsed.
    #[error("Config error: {0}")]
    Config(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for broken internal invariants (scheduling bugs).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::PayloadTooLarge { .. } => 413,
            Error::NotFound { .. } => 404,
            Error::Storage { .. } => 500,
            Error::EngineUnavailable { .. } => 503,
            Error::ConversionTimeout { .. } => 504,
            Error::ConversionFailure { .. } => 502,
            Error::Conversion(_) => 502,
            Error::Delivery { .. } => 502,
            Error::Config(_) => 500,
            Error::Io { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Short machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::PayloadTooLarge { .. } => "payload_too_large",
            Error::NotFound { .. } => "not_found",
            Error::Storage { .. } => "storage_error",
            Error::EngineUnavailable { .. } => "engine_unavailable",
            Error::ConversionTimeout { .. } => "conversion_timeout",
            Error::ConversionFailure { .. } => "conversion_failure",
            Error::Conversion(_) => "conversion_error",
            Error::Delivery { .. } => "delivery_error",
            Error::Config(_) => "config_error",
            Error::Io { .. } => "io_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Storage`].
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Storage {
            path: path.into(),
            source,
        }
    }

    /// Convenience constructor for [`Error::ConversionFailure`].
    pub fn conversion_failure(engine: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConversionFailure {
            engine: engine.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
