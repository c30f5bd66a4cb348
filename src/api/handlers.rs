//! API Handlers
//!
//! HTTP request handlers for each admin endpoint of the hosted cache.

use axum::{
    extract::{Path, State},
    Json,
};

use crate::cache::{CacheOptions, MemoryCache};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    AddRequest, AddResponse, DeleteResponse, GetResponse, HealthResponse, SetRequest, SetResponse,
    StatsResponse, TrimRequest, TrimResponse,
};

/// Application state shared across all handlers.
///
/// `MemoryCache` is itself a shared handle with per-shard locking, so the
/// state needs no outer lock.
#[derive(Clone)]
pub struct AppState {
    pub cache: MemoryCache<String>,
}

impl AppState {
    /// Creates a new AppState around an existing cache.
    pub fn new(cache: MemoryCache<String>) -> Self {
        Self { cache }
    }

    /// Creates a new AppState from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let cache = MemoryCache::with_options(&config.cache_name, config.cache_options())?;
        Ok(Self::new(cache))
    }

    /// State around a fresh cache built with `options`, for tests and embedding.
    pub fn with_options(name: &str, options: CacheOptions) -> Result<Self> {
        Ok(Self::new(MemoryCache::with_options(name, options)?))
    }
}

/// Handler for PUT /set
///
/// Stores a key-value pair, replacing any previous value.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidArgument(error_msg));
    }

    let policy = req.policy.to_policy(state.cache.now())?;
    state.cache.set(&req.key, req.value, policy)?;

    Ok(Json(SetResponse::new(req.key)))
}

/// Handler for POST /add
///
/// Inserts only when the key holds no live entry; otherwise reports the
/// value already stored.
pub async fn add_handler(
    State(state): State<AppState>,
    Json(req): Json<AddRequest>,
) -> Result<Json<AddResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidArgument(error_msg));
    }

    let policy = req.policy.to_policy(state.cache.now())?;
    let existing = state.cache.add_or_get_existing(&req.key, req.value, policy)?;

    Ok(Json(AddResponse::new(req.key, existing)))
}

/// Handler for GET /get/:key
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    let value = state
        .cache
        .get(&key)?
        .ok_or_else(|| CacheError::NotFound(key.clone()))?;

    Ok(Json(GetResponse::new(key, value)))
}

/// Handler for DELETE /del/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let value = state
        .cache
        .remove(&key)?
        .ok_or_else(|| CacheError::NotFound(key.clone()))?;

    Ok(Json(DeleteResponse::new(key, value)))
}

/// Handler for POST /trim
pub async fn trim_handler(
    State(state): State<AppState>,
    Json(req): Json<TrimRequest>,
) -> Result<Json<TrimResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidArgument(error_msg));
    }

    let trimmed = state.cache.trim(req.percent)?;
    Ok(Json(TrimResponse {
        percent: req.percent,
        trimmed,
    }))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::new(state.cache.name(), state.cache.stats()))
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    if state.cache.is_disposed() {
        Json(HealthResponse::disposed())
    } else {
        Json(HealthResponse::healthy())
    }
}
