//! Axum HTTP surface: map view, issue feed, manual trigger and run stats.

use std::future::Future;
use std::sync::Arc;

use askama::Template;
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use civic_core::TargetCity;
use civic_storage::IssueStore;
use civic_sync::BatchRunner;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub const CRATE_NAME: &str = "civic-web";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn IssueStore>,
    pub runner: Arc<dyn BatchRunner>,
    pub city: TargetCity,
}

impl AppState {
    pub fn new(store: Arc<dyn IssueStore>, runner: Arc<dyn BatchRunner>, city: TargetCity) -> Self {
        Self {
            store,
            runner,
            city,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebConfig {
    pub port: u16,
}

impl WebConfig {
    pub fn from_env() -> Self {
        let port = std::env::var("CIVIC_WEB_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5002);
        Self { port }
    }
}

#[derive(Template)]
#[template(path = "map.html")]
struct MapTemplate {
    city: String,
    latitude: f64,
    longitude: f64,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/get_issues", get(issues_handler))
        .route("/manual_batch", get(manual_batch_handler))
        .route("/stats", get(stats_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

pub async fn serve<F>(state: AppState, config: WebConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "serving civic issue radar");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    render_html(MapTemplate {
        city: state.city.name.clone(),
        latitude: state.city.center.latitude,
        longitude: state.city.center.longitude,
    })
}

async fn issues_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.list_all().await {
        Ok(issues) => Json(issues).into_response(),
        Err(err) => json_error(anyhow::Error::new(err).context("loading issues")),
    }
}

/// Runs one batch inline. A batch already in flight yields 0, still a success.
async fn manual_batch_handler(State(state): State<Arc<AppState>>) -> Response {
    let processed = state.runner.run_batch(state.runner.default_target()).await;
    Json(json!({
        "message": format!("Processed {processed} posts"),
        "status": "success",
    }))
    .into_response()
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.runner.stats()).into_response()
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => {
            error!(error = %err, "template render failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(format!("Server error: {err}")),
            )
                .into_response()
        }
    }
}

fn json_error(err: anyhow::Error) -> Response {
    error!(error = %format!("{err:#}"), "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "status": "error", "message": format!("{err:#}") })),
    )
        .into_response()
}
