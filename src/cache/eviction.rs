//! Eviction Policy Module
//!
//! Victim selection when the cache is over capacity.
//!
//! Ordering is derived from per-entry access metadata (logical access
//! stamp, hit count, insertion order) collected at eviction time, so entries
//! never hold links into an eviction list.

use std::cmp::Ordering;

use crate::config::{EvictionPolicyKind, NearCacheConfig};

// == Eviction Candidate ==
/// Access metadata of one entry, as seen when a batch is chosen.
#[derive(Debug, Clone)]
pub struct EvictionCandidate<K> {
    pub key: K,
    /// Logical stamp of the latest access, unique per store
    pub last_access: u64,
    pub hits: u64,
    pub insertion_order: u64,
}

// == Eviction Policy ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Never evict; new keys are not admitted once full
    None,
    /// Oldest access first, earliest insertion on ties
    Lru,
    /// Fewest hits first, oldest access on ties
    Lfu,
    /// Each victim is the least recently used of a uniform sample
    Random { sample_size: usize },
}

impl EvictionPolicy {
    pub fn from_config(config: &NearCacheConfig) -> Self {
        match config.eviction_policy {
            EvictionPolicyKind::None => Self::None,
            EvictionPolicyKind::Lru => Self::Lru,
            EvictionPolicyKind::Lfu => Self::Lfu,
            EvictionPolicyKind::Random => Self::Random {
                sample_size: config.eviction_sample_size.max(1),
            },
        }
    }

    /// Whether a full cache makes room for new keys.
    pub fn evicts(&self) -> bool {
        !matches!(self, Self::None)
    }

    // == Select Victims ==
    /// Picks up to `count` keys to evict, in eviction order.
    pub fn select_victims<K>(&self, mut candidates: Vec<EvictionCandidate<K>>, count: usize) -> Vec<K> {
        let count = count.min(candidates.len());
        if count == 0 {
            return Vec::new();
        }

        match self {
            Self::None => Vec::new(),
            Self::Lru => {
                candidates.sort_unstable_by(lru_order);
                candidates.into_iter().take(count).map(|c| c.key).collect()
            }
            Self::Lfu => {
                candidates.sort_unstable_by(lfu_order);
                candidates.into_iter().take(count).map(|c| c.key).collect()
            }
            Self::Random { sample_size } => sample_victims(candidates, count, *sample_size),
        }
    }
}

fn lru_order<K>(a: &EvictionCandidate<K>, b: &EvictionCandidate<K>) -> Ordering {
    a.last_access
        .cmp(&b.last_access)
        .then_with(|| a.insertion_order.cmp(&b.insertion_order))
}

fn lfu_order<K>(a: &EvictionCandidate<K>, b: &EvictionCandidate<K>) -> Ordering {
    a.hits.cmp(&b.hits).then_with(|| lru_order(a, b))
}

/// Draws `sample_size` candidates with replacement and evicts the least
/// recently used of them, once per victim.
fn sample_victims<K>(mut candidates: Vec<EvictionCandidate<K>>, count: usize, sample_size: usize) -> Vec<K> {
    let mut victims = Vec::with_capacity(count);

    while victims.len() < count && !candidates.is_empty() {
        let len = candidates.len();
        let mut worst = fastrand::usize(..len);
        for _ in 1..sample_size.min(len) {
            let pick = fastrand::usize(..len);
            if lru_order(&candidates[pick], &candidates[worst]) == Ordering::Less {
                worst = pick;
            }
        }
        victims.push(candidates.swap_remove(worst).key);
    }

    victims
}
