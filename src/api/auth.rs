//! Authentication endpoints: admin login, session cleanup, key rotation.

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};

use crate::api_errors::AppError;
use crate::app_state::AppState;
use crate::security;

#[derive(Deserialize)]
pub struct VerifyAdminReq {
    password: String,
}

#[derive(Serialize)]
pub struct VerifyAdminResp {
    success: bool,
    token: String,
    cleanup: bool,
}

#[axum::debug_handler]
pub async fn verify_admin(
    State(st): State<Arc<AppState>>,
    Json(req): Json<VerifyAdminReq>,
) -> Result<Json<VerifyAdminResp>, AppError> {
    let issued = st.sessions.verify_password(&req.password)?;
    st.sink.info("auth", "admin login", None);
    Ok(Json(VerifyAdminResp {
        success: true,
        token: issued.token,
        cleanup: issued.cleanup_enabled,
    }))
}

#[derive(Deserialize)]
pub struct ToggleCleanupReq {
    enabled: bool,
}

#[derive(Serialize)]
pub struct ToggleCleanupResp {
    success: bool,
    enabled: bool,
}

#[axum::debug_handler]
pub async fn toggle_session_cleanup(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ToggleCleanupReq>,
) -> Result<Json<ToggleCleanupResp>, AppError> {
    security::require_admin(&st.sessions, &headers, None)?;
    let enabled = st.sessions.toggle_cleanup(req.enabled)?;
    st.sink.info(
        "auth",
        format!("session cleanup {}", if enabled { "enabled" } else { "disabled" }),
        None,
    );
    Ok(Json(ToggleCleanupResp {
        success: true,
        enabled,
    }))
}

#[derive(Deserialize)]
pub struct RotateKeyReq {
    new_key: String,
}

#[derive(Serialize)]
pub struct RotateKeyResp {
    success: bool,
}

#[axum::debug_handler]
pub async fn rotate_api_key(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RotateKeyReq>,
) -> Result<Json<RotateKeyResp>, AppError> {
    security::require_admin(&st.sessions, &headers, None)?;
    st.sessions.rotate_api_key(&req.new_key)?;
    st.sink.info("auth", "api key rotated", None);
    Ok(Json(RotateKeyResp { success: true }))
}
