//! `GET /healthz` reports the owning worker's own liveness, not merely
//! whether the database is reachable.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use beanqueue::health;
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

async fn get_healthz(pool: PgPool, worker_id: Uuid) -> (StatusCode, Value) {
    let router = health::router(pool, worker_id);
    let response = router
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&body).unwrap();

    (status, body)
}

#[sqlx::test(migrations = "../beanqueue/migrations")]
async fn healthz_is_ok_while_the_worker_is_running(pool: PgPool) -> anyhow::Result<()> {
    let worker_id = Uuid::new_v4();
    sqlx::query("INSERT INTO bq_workers (id, name, channels) VALUES ($1, 'w', '{default}')")
        .bind(worker_id)
        .execute(&pool)
        .await?;

    let (status, body) = get_healthz(pool, worker_id).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["worker_id"], worker_id.to_string());

    Ok(())
}

#[sqlx::test(migrations = "../beanqueue/migrations")]
async fn healthz_is_unavailable_once_the_worker_is_not_running(pool: PgPool) -> anyhow::Result<()> {
    let worker_id = Uuid::new_v4();
    sqlx::query("INSERT INTO bq_workers (id, name, channels, state) VALUES ($1, 'w', '{default}', 'shutdown')")
        .bind(worker_id)
        .execute(&pool)
        .await?;

    let (status, body) = get_healthz(pool, worker_id).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], "unavailable");

    Ok(())
}

#[sqlx::test(migrations = "../beanqueue/migrations")]
async fn healthz_is_unavailable_for_an_unknown_worker(pool: PgPool) -> anyhow::Result<()> {
    let (status, _body) = get_healthz(pool, Uuid::new_v4()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    Ok(())
}
