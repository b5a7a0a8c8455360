//! Expiration Policy Module
//!
//! Time-to-live and max-idle rules.

use crate::config::NearCacheConfig;

/// Expiration timestamp of an entry that never expires by time.
pub const NEVER_EXPIRES: u64 = u64::MAX;

// == Expiration Policy ==
/// Computes when an entry stops being servable.
///
/// `expiration = min(creation + ttl, last_access + max_idle)`, recomputed
/// on every access.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpirationPolicy {
    ttl_ms: Option<u64>,
    max_idle_ms: Option<u64>,
}

impl ExpirationPolicy {
    pub fn new(ttl_ms: Option<u64>, max_idle_ms: Option<u64>) -> Self {
        Self {
            ttl_ms,
            max_idle_ms,
        }
    }

    pub fn from_config(config: &NearCacheConfig) -> Self {
        Self::new(
            config.time_to_live.map(|d| d.as_millis() as u64),
            config.max_idle.map(|d| d.as_millis() as u64),
        )
    }

    /// True when either limit is configured.
    pub fn is_enabled(&self) -> bool {
        self.ttl_ms.is_some() || self.max_idle_ms.is_some()
    }

    pub fn expiration_time(&self, creation_time: u64, last_access_time: u64) -> u64 {
        let by_ttl = self
            .ttl_ms
            .map_or(NEVER_EXPIRES, |ttl| creation_time.saturating_add(ttl));
        let by_idle = self
            .max_idle_ms
            .map_or(NEVER_EXPIRES, |idle| last_access_time.saturating_add(idle));
        by_ttl.min(by_idle)
    }

    /// An entry is expired strictly after its expiration time.
    pub fn is_expired(expiration_time: u64, now: u64) -> bool {
        now > expiration_time
    }
}
