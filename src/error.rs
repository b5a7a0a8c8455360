//! Error types for the near cache
//!
//! Provides unified error handling using thiserror.
//!
//! A cache miss is not an error: lookups return `Option`. The variants here
//! cover the outcomes a caller has to act on.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Near Cache Error Enum ==
/// Unified error type for the near cache.
#[derive(Error, Debug)]
pub enum NearCacheError {
    /// The data accessor failed to load a value from the remote map
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// A key or value could not be encoded or decoded
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// The snapshot sink or source failed
    #[error("Persistence I/O failed: {0}")]
    PersistenceIo(#[from] std::io::Error),

    /// A snapshot file could not be decoded
    #[error("Corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    /// The configuration is not usable
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// A persist or restore was cancelled between batches
    #[error("Operation cancelled")]
    Cancelled,

    /// The cache has been closed
    #[error("Near cache is closed")]
    Closed,
}

// == IntoResponse Implementation ==
impl IntoResponse for NearCacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            NearCacheError::Fetch(_) => StatusCode::BAD_GATEWAY,
            NearCacheError::Serialization(_) | NearCacheError::CorruptSnapshot(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            NearCacheError::PersistenceIo(_) => StatusCode::INTERNAL_SERVER_ERROR,
            NearCacheError::Configuration(_) => StatusCode::BAD_REQUEST,
            NearCacheError::Cancelled | NearCacheError::Closed => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the near cache.
pub type Result<T> = std::result::Result<T, NearCacheError>;
