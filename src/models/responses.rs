//! Response DTOs for the operator API

use serde::Serialize;

use crate::cache::NearCacheStats;
use crate::persistence::PersistReport;

/// Response body for GET /stats
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Cache name from the configuration
    pub name: String,
    /// Current number of entries
    pub size: usize,
    /// hits / (hits + misses), 0 without lookups
    pub hit_ratio: f64,
    #[serde(flatten)]
    pub stats: NearCacheStats,
}

impl StatsResponse {
    pub fn new(name: impl Into<String>, size: usize, stats: NearCacheStats) -> Self {
        Self {
            name: name.into(),
            size,
            hit_ratio: stats.hit_ratio(),
            stats,
        }
    }
}

/// Response body for GET /health
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// "healthy", or "closed" once the cache shut down
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self::with_status("healthy")
    }

    pub fn closed() -> Self {
        Self::with_status("closed")
    }

    fn with_status(status: &str) -> Self {
        Self {
            status: status.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Response body for DELETE /entries
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub message: String,
    pub cleared: usize,
}

impl ClearResponse {
    pub fn new(cleared: usize) -> Self {
        Self {
            message: format!("Cleared {} entries", cleared),
            cleared,
        }
    }
}

/// Response body for POST /persist
#[derive(Debug, Clone, Serialize)]
pub struct PersistResponse {
    pub message: String,
    #[serde(flatten)]
    pub report: PersistReport,
}

impl From<PersistReport> for PersistResponse {
    fn from(report: PersistReport) -> Self {
        Self {
            message: format!("Persisted {} keys", report.keys),
            report,
        }
    }
}

/// Response body for POST /restore
#[derive(Debug, Clone, Serialize)]
pub struct RestoreResponse {
    pub message: String,
    pub restored: usize,
}

impl RestoreResponse {
    pub fn new(restored: usize) -> Self {
        Self {
            message: format!("Restored {} keys", restored),
            restored,
        }
    }
}
