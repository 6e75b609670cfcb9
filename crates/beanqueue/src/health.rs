//! The `/healthz` HTTP endpoint.
//!
//! Reports whether this worker's own row still reads `RUNNING`. A worker that
//! has been reaped as dead by a peer (or never made it into the table) is
//! unhealthy even if its process is still up and the database is reachable.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use beanqueue_core::WorkerState;
use serde::Serialize;
use uuid::Uuid;

struct HealthState {
    pool: sqlx::PgPool,
    worker_id: Uuid,
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    worker_id: Uuid,
}

/// Build a router exposing `GET /healthz`, backed by `pool` and reporting on
/// the worker identified by `worker_id`.
pub fn router(pool: sqlx::PgPool, worker_id: Uuid) -> Router {
    let state = Arc::new(HealthState { pool, worker_id });

    Router::new()
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let worker_id = state.worker_id;

    match crate::worker_service::get_worker(&state.pool, worker_id).await {
        Ok(Some(worker)) if worker.state == WorkerState::Running => (
            StatusCode::OK,
            Json(HealthBody {
                status: "ok",
                worker_id,
            }),
        ),
        Ok(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(HealthBody {
                status: "unavailable",
                worker_id,
            }),
        ),
        Err(err) => {
            tracing::error!(error = %err, "health check failed to reach the database");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(HealthBody {
                    status: "unavailable",
                    worker_id,
                }),
            )
        }
    }
}

/// Serve the health router on `interface:port` until `shutdown` resolves.
pub async fn serve(
    pool: sqlx::PgPool,
    worker_id: Uuid,
    interface: &str,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = format!("{interface}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(addr = %addr, "health endpoint listening");

    axum::serve(listener, router(pool, worker_id))
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
