//! Update and rollback endpoints.
//!
//! Mutating operations return an acceptance with a job id immediately;
//! progress is read back through `/jobs` and the deployment log.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api_errors::AppError;
use crate::app_state::AppState;
use crate::input_validator::require_service_name;
use crate::rollback::RollbackState;
use crate::security;
use crate::updater;

#[derive(Deserialize)]
pub struct UpdateServiceReq {
    service: String,
}

#[derive(Serialize)]
pub struct JobAcceptedResp {
    success: bool,
    message: String,
    job_id: String,
}

#[axum::debug_handler]
pub async fn update_service(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<UpdateServiceReq>,
) -> Result<Json<JobAcceptedResp>, AppError> {
    security::require_admin(&st.sessions, &headers, None)?;
    let service = require_service_name(&req.service)?;
    let job = updater::spawn_update_job(st.clone(), service.clone())?;
    Ok(Json(JobAcceptedResp {
        success: true,
        message: format!("update of {service} started"),
        job_id: job.id,
    }))
}

#[derive(Deserialize)]
pub struct RollbackReq {
    service: String,
    #[serde(default)]
    hash: Option<String>,
}

#[axum::debug_handler]
pub async fn rollback_service(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RollbackReq>,
) -> Result<Json<JobAcceptedResp>, AppError> {
    security::require_admin(&st.sessions, &headers, None)?;
    let service = require_service_name(&req.service)?;
    // No history file means nothing to roll back to; fail before the job.
    if !st.config.rollback_file(&service).exists() {
        return Err(AppError::not_found(format!(
            "no rollback history for {service}"
        )));
    }
    let job = updater::spawn_rollback_job(st.clone(), service.clone(), req.hash)?;
    Ok(Json(JobAcceptedResp {
        success: true,
        message: format!("rollback of {service} started"),
        job_id: job.id,
    }))
}

#[derive(Deserialize)]
pub struct ServiceQuery {
    service: String,
}

#[axum::debug_handler]
pub async fn rollback_status(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<ServiceQuery>,
) -> Result<Json<Value>, AppError> {
    security::require_authenticated(&st.sessions, &headers, None)?;
    let service = require_service_name(&q.service)?;
    let available = st.config.rollback_file(&service).exists();
    Ok(Json(json!({ "available": available })))
}

#[axum::debug_handler]
pub async fn rollback_list(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<ServiceQuery>,
) -> Result<Json<Value>, AppError> {
    security::require_authenticated(&st.sessions, &headers, None)?;
    let service = require_service_name(&q.service)?;
    let history = match RollbackState::load(&st.config.rollback_file(&service))? {
        Some(state) => state.display_history(),
        None => Vec::new(),
    };
    Ok(Json(json!({ "history": history })))
}

#[derive(Deserialize)]
pub struct BatchUpdateReq {
    services: Vec<String>,
}

#[axum::debug_handler]
pub async fn batch_update(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<BatchUpdateReq>,
) -> Result<Json<JobAcceptedResp>, AppError> {
    security::require_admin(&st.sessions, &headers, None)?;
    let services: Vec<String> = req
        .services
        .iter()
        .map(|s| require_service_name(s))
        .collect::<Result<_, _>>()?;
    if services.is_empty() {
        return Err(AppError::bad_request("no services supplied"));
    }
    let count = services.len();
    let job = updater::spawn_batch_update_job(st.clone(), services)?;
    Ok(Json(JobAcceptedResp {
        success: true,
        message: format!("batch update of {count} services started"),
        job_id: job.id,
    }))
}

#[axum::debug_handler]
pub async fn master_update(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<JobAcceptedResp>, AppError> {
    security::require_admin(&st.sessions, &headers, None)?;
    let job = updater::spawn_master_update_job(st.clone())?;
    Ok(Json(JobAcceptedResp {
        success: true,
        message: "master update started".to_string(),
        job_id: job.id,
    }))
}

#[axum::debug_handler]
pub async fn updates(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    security::require_authenticated(&st.sessions, &headers, None)?;
    let updates = updater::updates_report(&st.config).await?;
    Ok(Json(json!({ "updates": updates })))
}

#[axum::debug_handler]
pub async fn check_updates(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<JobAcceptedResp>, AppError> {
    security::require_admin(&st.sessions, &headers, None)?;
    let job = updater::spawn_check_updates_job(st.clone())?;
    Ok(Json(JobAcceptedResp {
        success: true,
        message: "update check started".to_string(),
        job_id: job.id,
    }))
}

#[axum::debug_handler]
pub async fn list_jobs(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    security::require_authenticated(&st.sessions, &headers, None)?;
    Ok(Json(json!({ "jobs": st.jobs.list()? })))
}

#[axum::debug_handler]
pub async fn get_job(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    security::require_authenticated(&st.sessions, &headers, None)?;
    let job = st
        .jobs
        .get(&id)?
        .ok_or_else(|| AppError::not_found(format!("job not found: {id}")))?;
    Ok(Json(serde_json::to_value(job).map_err(|e| {
        AppError::internal(format!("serialize job: {e}"))
    })?))
}
