//! HTTP JSON surface over the balance engine.
//!
//! The registry lives behind a lock and is only ever replaced whole (on
//! `POST /registry/:year`); every read reconciles against the snapshot it
//! sees, through the fingerprint-keyed report cache.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use water_client::domain::{Period, RawRow};

use crate::{
    cache::{fingerprint_records, ReconcileCache},
    hierarchy::{self, NetworkNode},
    registry::{MeterRegistry, NormalizeStats, PeriodLookupError},
    report::{self, BalanceReport, MeterReading, ReportSettings, TrendPoint, ZoneConsumption},
};

/// Type filter value meaning "no filter", as sent by dashboard selectors.
const ALL_TYPES: &str = "All Types";

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

struct LoadedRegistry {
    registry: MeterRegistry,
    fingerprint: blake3::Hash,
    loaded_at_unix: i64,
}

impl LoadedRegistry {
    fn new(registry: MeterRegistry) -> Self {
        Self {
            fingerprint: fingerprint_records(&registry.records),
            loaded_at_unix: time::OffsetDateTime::now_utc().unix_timestamp(),
            registry,
        }
    }

    fn period_or_latest(&self, requested: Option<&str>) -> Result<Period, ApiError> {
        self.registry.resolve_period(requested).map_err(ApiError::from)
    }
}

impl From<PeriodLookupError> for ApiError {
    fn from(e: PeriodLookupError) -> Self {
        match e {
            PeriodLookupError::Invalid(_) => ApiError::BadRequest(e.to_string()),
            PeriodLookupError::OutsideYear { .. } | PeriodLookupError::NoReadings(_) => {
                ApiError::NotFound(e.to_string())
            }
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    loaded: Arc<RwLock<LoadedRegistry>>,
    settings: Arc<ReportSettings>,
    cache: Arc<Mutex<ReconcileCache>>,
}

impl AppState {
    pub fn new(registry: MeterRegistry, settings: ReportSettings, cache_entries: usize) -> Self {
        Self {
            loaded: Arc::new(RwLock::new(LoadedRegistry::new(registry))),
            settings: Arc::new(settings),
            cache: Arc::new(Mutex::new(ReconcileCache::new(cache_entries))),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/balance/:period", get(balance))
        .route("/trend", get(trend))
        .route("/consumption/zones", get(consumption_by_zone))
        .route("/zones/:zone/meters", get(zone_meters))
        .route("/network", get(network))
        .route("/registry/:year", post(replace_registry))
        .with_state(state)
}

pub async fn serve(bind_addr: &str, state: AppState) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid server bind address '{bind_addr}': {e}"))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "water balance service listening");
    axum::serve(listener, build_router(state).into_make_service()).await?;
    Ok(())
}

fn count_request(route: &'static str) {
    metrics::counter!("water_http_requests_total", "route" => route).increment(1);
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    year: i32,
    meters: usize,
    periods: Vec<Period>,
    loaded_at_unix: i64,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    count_request("health");
    let loaded = state.loaded.read().await;
    Json(HealthResponse {
        ok: true,
        year: loaded.registry.year,
        meters: loaded.registry.records.len(),
        periods: loaded.registry.available_periods(),
        loaded_at_unix: loaded.loaded_at_unix,
    })
}

async fn balance(
    State(state): State<AppState>,
    Path(period): Path<String>,
) -> Result<Json<BalanceReport>, ApiError> {
    count_request("balance");
    let loaded = state.loaded.read().await;
    let period = loaded.period_or_latest(Some(&period))?;

    let report = state.cache.lock().await.get_or_build(
        loaded.fingerprint,
        &loaded.registry.records,
        period,
        &state.settings,
    );
    Ok(Json(report.as_ref().clone()))
}

async fn trend(State(state): State<AppState>) -> Json<Vec<TrendPoint>> {
    count_request("trend");
    let loaded = state.loaded.read().await;
    Json(report::trend(
        &loaded.registry.records,
        loaded.registry.year,
        &state.settings.exclusions,
    ))
}

#[derive(Debug, Deserialize)]
struct ZoneConsumptionQuery {
    period: Option<String>,
    #[serde(rename = "type")]
    meter_type: Option<String>,
}

async fn consumption_by_zone(
    State(state): State<AppState>,
    Query(q): Query<ZoneConsumptionQuery>,
) -> Result<Json<Vec<ZoneConsumption>>, ApiError> {
    count_request("consumption_by_zone");
    let loaded = state.loaded.read().await;
    let period = loaded.period_or_latest(q.period.as_deref())?;
    let type_filter = q.meter_type.as_deref().filter(|t| *t != ALL_TYPES);

    Ok(Json(report::consumption_by_zone(
        &loaded.registry.records,
        period,
        type_filter,
        &state.settings.exclusions,
    )))
}

#[derive(Debug, Deserialize)]
struct PeriodQuery {
    period: Option<String>,
}

async fn zone_meters(
    State(state): State<AppState>,
    Path(zone): Path<String>,
    Query(q): Query<PeriodQuery>,
) -> Result<Json<Vec<MeterReading>>, ApiError> {
    count_request("zone_meters");
    let loaded = state.loaded.read().await;
    let period = loaded.period_or_latest(q.period.as_deref())?;

    if !hierarchy::zones_of(&loaded.registry.records).contains(&zone) {
        return Err(ApiError::NotFound(format!("unknown zone '{zone}'")));
    }
    Ok(Json(report::zone_meters(&loaded.registry.records, &zone, period)))
}

async fn network(State(state): State<AppState>) -> Result<Json<NetworkNode>, ApiError> {
    count_request("network");
    let loaded = state.loaded.read().await;
    hierarchy::network_tree(&loaded.registry.records)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("registry has no L1 meter".to_string()))
}

#[derive(Debug, Serialize)]
struct RegistryLoaded {
    year: i32,
    meters: usize,
    #[serde(flatten)]
    stats: NormalizeStats,
}

async fn replace_registry(
    State(state): State<AppState>,
    Path(year): Path<i32>,
    Json(rows): Json<Vec<RawRow>>,
) -> Result<Json<RegistryLoaded>, ApiError> {
    count_request("replace_registry");
    if !(2000..2100).contains(&year) {
        return Err(ApiError::BadRequest(format!("year {year} out of range")));
    }

    let registry = MeterRegistry::from_raw_rows(&rows, year);
    let response = RegistryLoaded {
        year,
        meters: registry.records.len(),
        stats: registry.stats,
    };

    *state.loaded.write().await = LoadedRegistry::new(registry);
    state.cache.lock().await.clear();
    tracing::info!(year, meters = response.meters, "registry replaced");

    Ok(Json(response))
}
