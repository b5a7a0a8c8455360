//! Configuration Module
//!
//! Near cache settings. Immutable once a cache has been built from them.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NearCacheError, Result};

// == Eviction Policy Kind ==
/// Which entries to give up when the cache is over capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EvictionPolicyKind {
    /// Reject new keys once full
    None,
    /// Least recently used
    Lru,
    /// Least frequently used
    Lfu,
    /// Sampled random
    Random,
}

impl FromStr for EvictionPolicyKind {
    type Err = NearCacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "lru" => Ok(Self::Lru),
            "lfu" => Ok(Self::Lfu),
            "random" => Ok(Self::Random),
            other => Err(NearCacheError::Configuration(format!(
                "unknown eviction policy '{}'",
                other
            ))),
        }
    }
}

// == In-Memory Format ==
/// How values are held in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InMemoryFormat {
    /// Decoded objects, returned by cloning
    Object,
    /// Encoded bytes, decoded on every read
    Binary,
}

impl FromStr for InMemoryFormat {
    type Err = NearCacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "object" => Ok(Self::Object),
            "binary" => Ok(Self::Binary),
            other => Err(NearCacheError::Configuration(format!(
                "unknown in-memory format '{}'",
                other
            ))),
        }
    }
}

// == Persistence Config ==
/// Snapshot settings for warm restarts.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistenceConfig {
    pub enabled: bool,
    /// Snapshot file location
    pub file_path: Option<PathBuf>,
    /// Number of batches encoded or decoded concurrently
    pub parallelism: usize,
    /// Keys handled per batch
    pub batch_size: usize,
    /// Upper bound on keys written by a single persist, None = all
    pub max_keys: Option<usize>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            file_path: None,
            parallelism: 2,
            batch_size: 1024,
            max_keys: None,
        }
    }
}

/// Near cache configuration parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct NearCacheConfig {
    /// Name used in logs
    pub name: String,
    /// Maximum number of entries
    pub max_size: usize,
    /// Maximum estimated memory cost in bytes, None = unbounded.
    /// Binary values are charged their length; object values their
    /// encoded length, measured through the value serializer on put.
    pub max_memory_cost: Option<u64>,
    pub eviction_policy: EvictionPolicyKind,
    /// Minimum share of the current entries evicted per batch, in percent
    pub eviction_batch_percentage: u8,
    /// Entries sampled per victim under RANDOM
    pub eviction_sample_size: usize,
    pub time_to_live: Option<Duration>,
    pub max_idle: Option<Duration>,
    pub in_memory_format: InMemoryFormat,
    /// Keep an encoded copy of every key
    pub serialize_keys: bool,
    /// Listen for remote invalidations
    pub invalidate_on_change: bool,
    pub expiration_sweep_interval: Duration,
    pub reconciliation_interval: Duration,
    /// Bound of the invalidation event queue
    pub invalidation_queue_capacity: usize,
    pub persistence: PersistenceConfig,
}

impl Default for NearCacheConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_size: 10_000,
            max_memory_cost: None,
            eviction_policy: EvictionPolicyKind::Lru,
            eviction_batch_percentage: 10,
            eviction_sample_size: 15,
            time_to_live: None,
            max_idle: None,
            in_memory_format: InMemoryFormat::Object,
            serialize_keys: false,
            invalidate_on_change: true,
            expiration_sweep_interval: Duration::from_secs(5),
            reconciliation_interval: Duration::from_secs(60),
            invalidation_queue_capacity: 1024,
            persistence: PersistenceConfig::default(),
        }
    }
}

impl NearCacheConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Creates a config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `NEAR_CACHE_NAME` (default: default)
    /// - `NEAR_CACHE_MAX_SIZE` (default: 10000)
    /// - `NEAR_CACHE_MAX_MEMORY_COST` bytes (default: unbounded)
    /// - `NEAR_CACHE_EVICTION_POLICY` none|lru|lfu|random (default: lru)
    /// - `NEAR_CACHE_TTL_MS`, `NEAR_CACHE_MAX_IDLE_MS` (default: unset)
    /// - `NEAR_CACHE_IN_MEMORY_FORMAT` object|binary (default: object)
    /// - `NEAR_CACHE_SWEEP_INTERVAL_MS` (default: 5000)
    /// - `NEAR_CACHE_RECONCILIATION_INTERVAL_MS` (default: 60000)
    /// - `NEAR_CACHE_PERSISTENCE_FILE` enables persistence when set
    ///
    /// Unparseable values fall back to their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let persistence_file = env::var("NEAR_CACHE_PERSISTENCE_FILE").ok().map(PathBuf::from);

        Self {
            name: env::var("NEAR_CACHE_NAME").unwrap_or(defaults.name),
            max_size: parse_env("NEAR_CACHE_MAX_SIZE").unwrap_or(defaults.max_size),
            max_memory_cost: parse_env("NEAR_CACHE_MAX_MEMORY_COST"),
            eviction_policy: parse_env("NEAR_CACHE_EVICTION_POLICY")
                .unwrap_or(defaults.eviction_policy),
            time_to_live: parse_env("NEAR_CACHE_TTL_MS").map(Duration::from_millis),
            max_idle: parse_env("NEAR_CACHE_MAX_IDLE_MS").map(Duration::from_millis),
            in_memory_format: parse_env("NEAR_CACHE_IN_MEMORY_FORMAT")
                .unwrap_or(defaults.in_memory_format),
            expiration_sweep_interval: parse_env("NEAR_CACHE_SWEEP_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.expiration_sweep_interval),
            reconciliation_interval: parse_env("NEAR_CACHE_RECONCILIATION_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconciliation_interval),
            persistence: PersistenceConfig {
                enabled: persistence_file.is_some(),
                file_path: persistence_file,
                ..defaults.persistence
            },
            ..defaults
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_max_memory_cost(mut self, bytes: u64) -> Self {
        self.max_memory_cost = Some(bytes);
        self
    }

    pub fn with_eviction_policy(mut self, policy: EvictionPolicyKind) -> Self {
        self.eviction_policy = policy;
        self
    }

    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    pub fn with_max_idle(mut self, max_idle: Duration) -> Self {
        self.max_idle = Some(max_idle);
        self
    }

    pub fn with_in_memory_format(mut self, format: InMemoryFormat) -> Self {
        self.in_memory_format = format;
        self
    }

    pub fn with_serialize_keys(mut self, serialize_keys: bool) -> Self {
        self.serialize_keys = serialize_keys;
        self
    }

    pub fn with_persistence(mut self, persistence: PersistenceConfig) -> Self {
        self.persistence = persistence;
        self
    }

    // == Validate ==
    /// Rejects settings a cache cannot be built from.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(NearCacheError::Configuration(format!("{}: {}", self.name, msg)));

        if self.max_size == 0 {
            return fail("max_size must be greater than zero");
        }
        if self.max_memory_cost == Some(0) {
            return fail("max_memory_cost must be greater than zero when set");
        }
        if self.eviction_batch_percentage == 0 || self.eviction_batch_percentage > 100 {
            return fail("eviction_batch_percentage must be within 1..=100");
        }
        if self.eviction_sample_size == 0 {
            return fail("eviction_sample_size must be greater than zero");
        }
        if self.expiration_sweep_interval.is_zero() {
            return fail("expiration_sweep_interval must be greater than zero");
        }
        if self.reconciliation_interval.is_zero() {
            return fail("reconciliation_interval must be greater than zero");
        }
        if self.invalidation_queue_capacity == 0 {
            return fail("invalidation_queue_capacity must be greater than zero");
        }
        if self.persistence.parallelism == 0 {
            return fail("persistence parallelism must be greater than zero");
        }
        if self.persistence.batch_size == 0 {
            return fail("persistence batch_size must be greater than zero");
        }
        if self.persistence.enabled && self.persistence.file_path.is_none() {
            return fail("persistence is enabled but no file path is set");
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
