pub mod config;
pub mod error;
pub mod gender;
pub mod github;
pub mod metrics;
pub mod pagination;
pub mod querier;
pub mod transport;

#[cfg(test)]
mod testing;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use config::{AppConfig, RepoId};
use error::MetricsError;
use metrics::{BusFactor, CodeReview, Contributor, ContributorGender, DailyCount, LinesChanged};
use querier::MetricsQuerier;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Bus factor threshold used when the request does not name one.
pub const DEFAULT_BUS_FACTOR_THRESHOLD: f64 = 50.0;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

/// Shared application state accessible to all request handlers.
pub struct AppState {
    /// Service computing repository metrics.
    pub querier: MetricsQuerier,
}

impl AppState {
    /// Initializes the application state, including the metrics querier.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let querier = MetricsQuerier::new(&config)?;
        Ok(Self { querier })
    }
}

#[derive(Debug, Deserialize)]
pub struct BusFactorParams {
    /// Percentage of commits the contributors must cover.
    pub threshold: Option<f64>,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/repos/{owner}/{repo}/closed-issues", get(get_closed_issues))
        .route("/api/repos/{owner}/{repo}/code-commits", get(get_code_commits))
        .route("/api/repos/{owner}/{repo}/contributors", get(get_contributors))
        .route(
            "/api/repos/{owner}/{repo}/lines-of-code-changed",
            get(get_lines_of_code_changed),
        )
        .route("/api/repos/{owner}/{repo}/open-issues", get(get_open_issues))
        .route("/api/repos/{owner}/{repo}/bus-factor", get(get_bus_factor))
        .route(
            "/api/repos/{owner}/{repo}/contributors-gender",
            get(get_contributors_gender),
        )
        .route("/api/repos/{owner}/{repo}/code-reviews", get(get_code_reviews))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "repo-health",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn get_closed_issues(
    Path(repo_id): Path<RepoId>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<DailyCount>> {
    respond(&repo_id, "closed-issues", state.querier.closed_issues(&repo_id).await)
}

pub async fn get_code_commits(
    Path(repo_id): Path<RepoId>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<DailyCount>> {
    respond(&repo_id, "code-commits", state.querier.code_commits(&repo_id).await)
}

pub async fn get_contributors(
    Path(repo_id): Path<RepoId>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<Contributor>> {
    respond(&repo_id, "contributors", state.querier.contributors(&repo_id).await)
}

pub async fn get_lines_of_code_changed(
    Path(repo_id): Path<RepoId>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<LinesChanged>> {
    respond(
        &repo_id,
        "lines-of-code-changed",
        state.querier.lines_of_code_changed(&repo_id).await,
    )
}

pub async fn get_open_issues(
    Path(repo_id): Path<RepoId>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<DailyCount>> {
    respond(&repo_id, "open-issues", state.querier.open_issues(&repo_id).await)
}

pub async fn get_bus_factor(
    Path(repo_id): Path<RepoId>,
    Query(params): Query<BusFactorParams>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<BusFactor> {
    let threshold = params.threshold.unwrap_or(DEFAULT_BUS_FACTOR_THRESHOLD);
    respond(
        &repo_id,
        "bus-factor",
        state.querier.bus_factor(&repo_id, threshold).await,
    )
}

pub async fn get_contributors_gender(
    Path(repo_id): Path<RepoId>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<ContributorGender>> {
    respond(
        &repo_id,
        "contributors-gender",
        state.querier.contributors_gender(&repo_id).await,
    )
}

pub async fn get_code_reviews(
    Path(repo_id): Path<RepoId>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<CodeReview>> {
    respond(&repo_id, "code-reviews", state.querier.code_reviews(&repo_id).await)
}

fn respond<T>(repo_id: &RepoId, metric: &str, result: Result<T, MetricsError>) -> ApiResult<T> {
    match result {
        Ok(rows) => {
            tracing::debug!(repo_id = %repo_id, metric, "Returning metric");
            Ok(Json(rows))
        }
        Err(e) => {
            tracing::error!("Failed to compute {} for {}: {}", metric, repo_id, e);
            Err(error_response(&e))
        }
    }
}

/// Maps a metric failure to the status code and message returned to API clients.
pub fn error_response(error: &MetricsError) -> (StatusCode, String) {
    match error {
        MetricsError::RateLimited { .. } => (
            StatusCode::TOO_MANY_REQUESTS,
            "GitHub Rate Limit Exceeded".to_string(),
        ),
        _ if error.upstream_status() == Some(404) => (
            StatusCode::NOT_FOUND,
            "Repository Not Found".to_string(),
        ),
        MetricsError::RefNotFound { .. } => (StatusCode::NOT_FOUND, error.to_string()),
        MetricsError::InvalidThreshold(_) => (StatusCode::BAD_REQUEST, error.to_string()),
        MetricsError::InsufficientData(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, error.to_string())
        }
        MetricsError::StatsPending { .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            "GitHub is still computing statistics, retry later".to_string(),
        ),
        MetricsError::Transport { .. }
        | MetricsError::Status { .. }
        | MetricsError::Schema { .. }
        | MetricsError::Shape { .. }
        | MetricsError::GraphQl { .. } => {
            (StatusCode::BAD_GATEWAY, "Upstream GitHub Error".to_string())
        }
        MetricsError::Config(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error".to_string(),
        ),
    }
}
