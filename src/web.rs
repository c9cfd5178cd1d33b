//! Router assembly and HTTP middleware.

use std::sync::Arc;

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{auth, logs, system, updates};
use crate::app_state::AppState;

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn security_headers(req: Request, next: Next) -> Response {
    let mut res = next.run(req).await;
    let headers = res.headers_mut();
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    res
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        layer.allow_origin(parsed)
    }
}

/// The full API surface, mounted under `/api` apart from the webhook.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.cors_origins);
    Router::new()
        // Auth
        .route("/api/verify-admin", post(auth::verify_admin))
        .route(
            "/api/toggle-session-cleanup",
            post(auth::toggle_session_cleanup),
        )
        .route("/api/rotate-api-key", post(auth::rotate_api_key))
        // Updates and rollback
        .route("/api/update-service", post(updates::update_service))
        .route("/api/rollback-service", post(updates::rollback_service))
        .route("/api/rollback-status", get(updates::rollback_status))
        .route("/api/rollback-list", get(updates::rollback_list))
        .route("/api/batch-update", post(updates::batch_update))
        .route("/api/master-update", post(updates::master_update))
        .route("/api/updates", get(updates::updates))
        .route("/api/check-updates", get(updates::check_updates))
        .route("/api/jobs", get(updates::list_jobs))
        .route("/api/jobs/{id}", get(updates::get_job))
        // Maintenance
        .route("/api/migrate", post(system::migrate))
        .route("/api/clear-db", post(system::clear_db))
        .route("/api/vacuum", get(system::vacuum))
        .route("/api/clear-logs", get(system::clear_logs))
        .route("/api/changelog", get(system::changelog))
        // Catalog, theme, observability
        .route("/api/services", get(system::services))
        .route("/api/theme", get(system::get_theme).post(system::set_theme))
        .route("/api/containers", get(system::containers))
        .route("/api/metrics", get(system::metrics))
        .route("/api/logs", get(logs::logs))
        .route("/api/events", get(logs::events))
        // Webhook and liveness
        .route("/watchtower", post(system::watchtower))
        .route("/healthz", get(healthz))
        .layer(axum::middleware::from_fn(security_headers))
        .layer(cors)
        .with_state(state)
}
