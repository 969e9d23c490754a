//! Operational routes: health, readiness, pool stats, version.

use crate::connector::Connector;
use crate::pool::PoolStats;
use crate::provision::DatabaseAdmin;
use crate::state::TenantRouter;
use crate::store::TenantDirectory;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyBody {
    status: &'static str,
    registry: &'static str,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

async fn ready<C, D, A>(
    State(router): State<Arc<TenantRouter<C, D, A>>>,
) -> Result<Json<ReadyBody>, (StatusCode, Json<ReadyBody>)>
where
    C: Connector,
    D: TenantDirectory + 'static,
    A: DatabaseAdmin + 'static,
{
    if let Err(e) = router.directory().ping().await {
        tracing::warn!(error = %e, "registry not reachable");
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyBody {
                status: "degraded",
                registry: "unavailable",
            }),
        ));
    }
    Ok(Json(ReadyBody {
        status: "ok",
        registry: "ok",
    }))
}

async fn pool_stats<C, D, A>(State(router): State<Arc<TenantRouter<C, D, A>>>) -> Json<PoolStats>
where
    C: Connector,
    D: TenantDirectory + 'static,
    A: DatabaseAdmin + 'static,
{
    Json(router.stats().await)
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// GET /health, /ready (registry check), /pool (pool stats), /version.
pub fn common_routes<C, D, A>(router: Arc<TenantRouter<C, D, A>>) -> Router
where
    C: Connector,
    D: TenantDirectory + 'static,
    A: DatabaseAdmin + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready::<C, D, A>))
        .route("/pool", get(pool_stats::<C, D, A>))
        .route("/version", get(version))
        .with_state(router)
}
