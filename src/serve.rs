/// Liveness endpoint: a tiny HTTP surface that keeps hosting platforms
/// convinced the process is healthy. Not part of the locking contract.
use chrono::{DateTime, Utc};

use crate::config::ServeConfig;

#[cfg(feature = "serve")]
#[derive(Clone)]
struct AppState {
    started_at: DateTime<Utc>,
}

#[cfg(feature = "serve")]
pub async fn run(
    config: &ServeConfig,
    started_at: DateTime<Utc>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(AppState { started_at });

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!("liveness endpoint listening on {local_addr}");

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(feature = "serve")]
fn router(state: AppState) -> axum::Router {
    use axum::routing::get;
    use tower_http::cors::CorsLayer;

    axum::Router::new()
        .route("/", get(alive))
        .route("/healthz", get(healthz))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

#[cfg(feature = "serve")]
async fn alive() -> &'static str {
    "threadlock is alive"
}

#[cfg(feature = "serve")]
async fn healthz(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::Json<serde_json::Value> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds();
    axum::Json(serde_json::json!({
        "ok": true,
        "started_at": state.started_at,
        "uptime_secs": uptime_secs,
    }))
}
