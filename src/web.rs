use crate::{
    app::App,
    config::RetrievalConfig,
    context::CategoryGraph,
    errors::MatchError,
    semantic::{Match, RetrievalService, ScoreBreakdown},
};
use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;

#[derive(Clone)]
pub struct SharedState {
    pub service: Arc<RetrievalService>,
    pub context: Arc<CategoryGraph>,
    pub retrieval: RetrievalConfig,
}

impl SharedState {
    pub fn from_app(app: &App) -> Self {
        Self {
            service: app.service.clone(),
            context: Arc::new(app.context.clone()),
            retrieval: app.config.retrieval.clone(),
        }
    }
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/index", post(index_item))
        .route("/search", post(search))
        .route("/items/total", get(total))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(Arc::new(state))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                log::error!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::warn!("shutting down");
}

async fn start_app(app: App, listen: String) -> anyhow::Result<()> {
    let state = SharedState::from_app(&app);
    let service = state.service.clone();

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    log::info!("listening on {listen}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tokio::task::block_in_place(move || service.save_snapshot())?;

    Ok(())
}

pub fn start_daemon(app: App, listen: String) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_app(app, listen))
}

#[derive(Debug)]
struct HttpError(MatchError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        if !self.0.is_client_error() {
            log::error!("{:?}", self.0);
        }

        let status = match &self.0 {
            MatchError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            MatchError::DuplicateId(_) => StatusCode::CONFLICT,
            MatchError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<MatchError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

async fn health(State(state): State<Arc<SharedState>>) -> Json<serde_json::Value> {
    let service = state.service.clone();
    let items = tokio::task::block_in_place(move || service.len());

    Json(json!({
        "status": "online",
        "module": "lostfound",
        "items": items,
        "model": state.service.model_name(),
    }))
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexRequest {
    pub id: String,
    pub description: String,
    pub category: String,
}

#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub assigned_id: String,
    pub position: usize,
    pub status: &'static str,
}

async fn index_item(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<IndexRequest>,
) -> Result<Json<IndexResponse>, HttpError> {
    log::debug!("payload: {payload:?}");

    let service = state.service.clone();
    let added = tokio::task::block_in_place(move || {
        service.add_item(&payload.id, &payload.description, &payload.category)
    })?;

    Ok(Json(IndexResponse {
        assigned_id: added.assigned_id,
        position: added.position,
        status: "indexed",
    }))
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub text: String,
    pub category: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct MatchResponse {
    pub id: String,
    pub description: String,
    pub category: String,
    pub score: f32,
    pub reason: String,
    pub score_breakdown: ScoreBreakdown,
}

impl From<Match> for MatchResponse {
    fn from(m: Match) -> Self {
        Self {
            reason: m.score_breakdown.reason(),
            id: m.id,
            description: m.description,
            category: m.category,
            score: m.score,
            score_breakdown: m.score_breakdown,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub matches: Vec<MatchResponse>,
    pub total_matches: usize,
    pub inferred_context: Vec<String>,
}

async fn search(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, HttpError> {
    log::debug!("payload: {payload:?}");

    let limit = payload
        .limit
        .unwrap_or(state.retrieval.default_limit)
        .min(state.retrieval.max_limit);

    let inferred_context = payload
        .category
        .as_deref()
        .map(|category| state.context.related(category))
        .unwrap_or_default();

    let service = state.service.clone();
    let matches = tokio::task::block_in_place(move || {
        service.search(&payload.text, payload.category.as_deref(), limit)
    })?;

    let matches: Vec<MatchResponse> = matches.into_iter().map(Into::into).collect();

    Ok(Json(SearchResponse {
        total_matches: matches.len(),
        matches,
        inferred_context,
    }))
}

async fn total(State(state): State<Arc<SharedState>>) -> Json<serde_json::Value> {
    let service = state.service.clone();
    let total = tokio::task::block_in_place(move || service.len());

    Json(json!({ "total": total }))
}
