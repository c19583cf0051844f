//! HTTP adapter: brackets every request with `begin_work`/`end_work`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::page::SiteLifecycle;
use crate::coordinator::ReloadCoordinator;
use crate::loader::UnitOrigin;
use crate::{AppError, Result};

/// Coordinator type served by the HTTP adapter.
pub type SiteCoordinator = ReloadCoordinator<SiteLifecycle>;

/// Per-unit entry in the `/status` response.
#[derive(Debug, Serialize)]
struct UnitStatus {
    name: String,
    origin: &'static str,
    path: Option<String>,
    digest: String,
    loaded_at: DateTime<Utc>,
}

/// Body of the `/status` response.
#[derive(Debug, Serialize)]
struct StatusBody {
    generation: u64,
    started_at: DateTime<Utc>,
    units: Vec<UnitStatus>,
    watching: bool,
    changed: bool,
    background: bool,
}

fn failure(err: &AppError) -> Response {
    error!(%err, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
}

async fn index(State(coordinator): State<SiteCoordinator>) -> Response {
    let work = match coordinator.begin_work().await {
        Ok(work) => work,
        Err(err) => return failure(&err),
    };
    let html = work.instance().html.clone();
    coordinator.end_work(work).await;
    Html(html).into_response()
}

async fn status(State(coordinator): State<SiteCoordinator>) -> Response {
    let work = match coordinator.begin_work().await {
        Ok(work) => work,
        Err(err) => return failure(&err),
    };

    let generation = work.generation();
    let loader = generation.loader();
    let units = loader
        .units()
        .iter()
        .map(|unit| UnitStatus {
            name: unit.name().to_owned(),
            origin: match unit.origin() {
                UnitOrigin::Local { .. } => "local",
                UnitOrigin::Delegated => "delegated",
            },
            path: unit.path().map(|path| path.display().to_string()),
            digest: unit.digest().to_owned(),
            loaded_at: unit.loaded_at(),
        })
        .collect();
    let body = StatusBody {
        generation: generation.id(),
        started_at: generation.started_at(),
        units,
        watching: loader.is_watching_anything(),
        changed: loader.has_changed(),
        background: coordinator.is_background_running(),
    };

    coordinator.end_work(work).await;
    Json(body).into_response()
}

/// Build the router: `/` serves the site, `/status` describes the live
/// generation, `/health` answers `ok`.
pub fn router(coordinator: SiteCoordinator) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/status", get(status))
        .route("/health", get(|| async { "ok" }))
        .with_state(coordinator)
}

/// Serve the router on `listener` until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Io` if the server fails.
pub async fn serve_http(
    coordinator: SiteCoordinator,
    listener: TcpListener,
    ct: CancellationToken,
) -> Result<()> {
    let addr = listener
        .local_addr()
        .map_err(|err| AppError::Io(format!("listener has no local address: {err}")))?;
    info!(%addr, "starting HTTP host adapter");

    axum::serve(listener, router(coordinator))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Io(format!("http server error: {err}")))?;

    info!("HTTP host adapter shut down");
    Ok(())
}
