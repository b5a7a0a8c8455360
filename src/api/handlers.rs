//! API Handlers
//!
//! HTTP request handlers for each operator endpoint.

use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, Json};
use tracing::info;

use crate::cache::NearCacheStats;
use crate::error::{NearCacheError, Result};
use crate::models::{ClearResponse, HealthResponse, PersistResponse, RestoreResponse, StatsResponse};
use crate::near_cache::NearCache;
use crate::persistence::PersistReport;

/// Key and value independent view of a near cache, as needed by operators.
#[async_trait]
pub trait CacheAdmin: Send + Sync {
    fn name(&self) -> &str;
    fn size(&self) -> usize;
    fn stats(&self) -> NearCacheStats;
    fn reset_stats(&self);
    fn clear(&self) -> usize;
    fn is_closed(&self) -> bool;
    fn persistence_enabled(&self) -> bool;
    async fn persist(&self) -> Result<PersistReport>;
    async fn restore(&self) -> Result<usize>;
}

#[async_trait]
impl<K, V> CacheAdmin for NearCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.config().name
    }

    fn size(&self) -> usize {
        NearCache::size(self)
    }

    fn stats(&self) -> NearCacheStats {
        NearCache::stats(self)
    }

    fn reset_stats(&self) {
        NearCache::reset_stats(self)
    }

    fn clear(&self) -> usize {
        NearCache::clear(self)
    }

    fn is_closed(&self) -> bool {
        NearCache::is_closed(self)
    }

    fn persistence_enabled(&self) -> bool {
        self.config().persistence.enabled
    }

    async fn persist(&self) -> Result<PersistReport> {
        NearCache::persist(self).await
    }

    async fn restore(&self) -> Result<usize> {
        NearCache::restore(self).await
    }
}

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<dyn CacheAdmin>,
}

impl AppState {
    pub fn new(cache: Arc<dyn CacheAdmin>) -> Self {
        Self { cache }
    }
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let cache = &state.cache;
    Json(StatsResponse::new(cache.name(), cache.size(), cache.stats()))
}

/// Handler for DELETE /stats
pub async fn reset_stats_handler(State(state): State<AppState>) -> StatusCode {
    state.cache.reset_stats();
    info!(name = state.cache.name(), "Statistics reset by operator");
    StatusCode::NO_CONTENT
}

/// Handler for DELETE /entries
pub async fn clear_handler(State(state): State<AppState>) -> Json<ClearResponse> {
    let cleared = state.cache.clear();
    info!(name = state.cache.name(), cleared, "Near cache cleared by operator");
    Json(ClearResponse::new(cleared))
}

/// Handler for POST /persist
pub async fn persist_handler(State(state): State<AppState>) -> Result<Json<PersistResponse>> {
    ensure_persistence(&state)?;
    let report = state.cache.persist().await?;
    Ok(Json(report.into()))
}

/// Handler for POST /restore
pub async fn restore_handler(State(state): State<AppState>) -> Result<Json<RestoreResponse>> {
    ensure_persistence(&state)?;
    let restored = state.cache.restore().await?;
    Ok(Json(RestoreResponse::new(restored)))
}

/// Handler for GET /health
///
/// Answers 503 once the cache has been closed.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    if state.cache.is_closed() {
        (StatusCode::SERVICE_UNAVAILABLE, Json(HealthResponse::closed()))
    } else {
        (StatusCode::OK, Json(HealthResponse::healthy()))
    }
}

fn ensure_persistence(state: &AppState) -> Result<()> {
    if state.cache.persistence_enabled() {
        Ok(())
    } else {
        Err(NearCacheError::Configuration(format!(
            "persistence is not enabled for {}",
            state.cache.name()
        )))
    }
}
