//! Maintenance and read endpoints: migrations, catalog, theme,
//! containers, metrics, webhook.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::api_errors::AppError;
use crate::app_state::AppState;
use crate::catalog::{self, ServiceCatalog};
use crate::file_store;
use crate::input_validator::require_service_name;
use crate::process::{run_command, RunOptions};
use crate::security::{self, Role};
use crate::sources;
use crate::updater;

const MAINTENANCE_TIMEOUT_SECS: u64 = 120;

#[derive(Deserialize)]
pub struct MaintenanceQuery {
    service: String,
    #[serde(default)]
    backup: Option<String>,
}

/// Shared shape of the synchronous maintenance routes: run the script,
/// answer `{success, output}` or `{error}` instead of propagating.
async fn run_maintenance(
    st: &AppState,
    headers: &HeaderMap,
    service: &str,
    action: &str,
    backup: Option<&str>,
) -> Result<Json<Value>, AppError> {
    security::require_admin(&st.sessions, headers, None)?;
    let service = require_service_name(service)?;
    let mut args = vec![service.as_str(), action];
    if let Some(backup) = backup {
        args.push(if backup == "yes" { "yes" } else { "no" });
    }
    match updater::run_migrate_script(&st.config, &args, MAINTENANCE_TIMEOUT_SECS).await {
        Ok(out) => {
            st.sink
                .info("maintenance", format!("{action} complete"), Some(&service));
            Ok(Json(json!({ "success": true, "output": out.stdout })))
        }
        Err(err) => {
            st.sink
                .error("maintenance", format!("{action} failed: {err}"), Some(&service));
            Ok(Json(json!({ "error": err.to_string() })))
        }
    }
}

#[axum::debug_handler]
pub async fn migrate(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<MaintenanceQuery>,
) -> Result<Json<Value>, AppError> {
    run_maintenance(&st, &headers, &q.service, "migrate", q.backup.as_deref()).await
}

#[axum::debug_handler]
pub async fn clear_db(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<MaintenanceQuery>,
) -> Result<Json<Value>, AppError> {
    // The host script's verb for a database reset is "clear".
    run_maintenance(&st, &headers, &q.service, "clear", q.backup.as_deref()).await
}

#[axum::debug_handler]
pub async fn vacuum(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<MaintenanceQuery>,
) -> Result<Json<Value>, AppError> {
    run_maintenance(&st, &headers, &q.service, "vacuum", None).await
}

#[axum::debug_handler]
pub async fn clear_logs(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<MaintenanceQuery>,
) -> Result<Json<Value>, AppError> {
    run_maintenance(&st, &headers, &q.service, "clear-logs", None).await
}

#[derive(Deserialize)]
pub struct ServiceQuery {
    service: String,
}

#[axum::debug_handler]
pub async fn changelog(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<ServiceQuery>,
) -> Result<Json<Value>, AppError> {
    security::require_authenticated(&st.sessions, &headers, None)?;
    let service = require_service_name(&q.service)?;
    let repo = st.config.source_dir(&service);
    if sources::has_repo(&repo) {
        let lines = sources::local_changelog(&repo).await?;
        return Ok(Json(json!({ "changelog": lines })));
    }
    let cat = ServiceCatalog::load(&st.config.services_file());
    let repo_url = cat
        .get(&service)
        .and_then(|e| e.repo.clone())
        .ok_or_else(|| AppError::not_found(format!("no source information for {service}")))?;
    let releases = sources::upstream_releases(&repo_url).await?;
    Ok(Json(json!({ "releases": releases })))
}

#[axum::debug_handler]
pub async fn services(State(st): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let cat = ServiceCatalog::load(&st.config.services_file());
    Ok(Json(cat.to_document()))
}

#[axum::debug_handler]
pub async fn get_theme(State(st): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    Ok(Json(catalog::load_theme(&st.config.theme_file())))
}

#[axum::debug_handler]
pub async fn set_theme(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(theme): Json<Value>,
) -> Result<Json<Value>, AppError> {
    security::require_admin(&st.sessions, &headers, None)?;
    if !theme.is_object() {
        return Err(AppError::bad_request("theme must be an object"));
    }
    file_store::write_json_atomic(&st.config.theme_file(), &theme)?;

    // The host-side scripts read these through the secrets file.
    let secrets = crate::secrets_store::SecretsStore::new(st.config.secrets_file());
    let mut updates = BTreeMap::new();
    if let Some(strategy) = theme.get("update_strategy").and_then(Value::as_str) {
        updates.insert(
            "UPDATE_STRATEGY".to_string(),
            crate::input_validator::sanitize_strategy(strategy),
        );
    }
    if let Some(backup) = theme.get("rollback_backup").and_then(Value::as_bool) {
        updates.insert("ROLLBACK_BACKUP".to_string(), backup.to_string());
    }
    if !updates.is_empty() {
        secrets.merge(&updates)?;
    }
    st.sink.info("config", "theme updated", None);
    Ok(Json(json!({ "success": true })))
}

#[axum::debug_handler]
pub async fn containers(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let role = security::resolve_role(&st.sessions, &headers, None)?;
    let out = run_command(
        &[
            "docker",
            "ps",
            "-a",
            "--no-trunc",
            "--format",
            "{{.Names}}\t{{.ID}}\t{{.Labels}}",
        ],
        RunOptions::default().checked(),
    )
    .await?;
    let containers = parse_container_listing(
        &out.stdout,
        &st.config.container_prefix,
        role == Role::Guest,
    );
    Ok(Json(json!({ "containers": containers })))
}

/// One row per prefixed container: full id (redacted for guests) and a
/// `hardened` flag from the `io.dhi.hardened=true` image label.
fn parse_container_listing(listing: &str, prefix: &str, redact_ids: bool) -> Map<String, Value> {
    let mut containers = Map::new();
    for line in listing.lines() {
        let mut fields = line.split('\t');
        let (Some(name), Some(id)) = (fields.next(), fields.next()) else {
            continue;
        };
        if !name.starts_with(prefix) {
            continue;
        }
        let service = name.strip_prefix(prefix).unwrap_or(name);
        let labels = fields.next().unwrap_or("");
        let hardened = labels.contains("io.dhi.hardened=true");
        // Guests can see what runs, not the container ids.
        let id = if redact_ids { "" } else { id.trim() };
        containers.insert(
            service.to_string(),
            json!({ "id": id, "hardened": hardened }),
        );
    }
    containers
}

#[cfg(test)]
mod tests {
    use super::parse_container_listing;

    const LISTING: &str = "hub-redlib\tsha256aaa\tio.dhi.hardened=true,maintainer=x\n\
                           hub-searxng\tsha256bbb\tmaintainer=y\n\
                           unrelated\tsha256ccc\tio.dhi.hardened=true\n";

    #[test]
    fn listing_is_filtered_by_prefix_and_flags_hardened_labels() {
        let parsed = parse_container_listing(LISTING, "hub-", false);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["redlib"]["id"], "sha256aaa");
        assert_eq!(parsed["redlib"]["hardened"], true);
        assert_eq!(parsed["searxng"]["hardened"], false);
        assert!(!parsed.contains_key("unrelated"));
    }

    #[test]
    fn guest_rows_carry_no_container_ids() {
        let parsed = parse_container_listing(LISTING, "hub-", true);
        assert_eq!(parsed["redlib"]["id"], "");
        assert_eq!(parsed["redlib"]["hardened"], true);
    }
}

#[axum::debug_handler]
pub async fn metrics(State(st): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    st.metrics.mark_read();
    let latest = st.metrics.latest()?;
    Ok(Json(json!({ "metrics": latest })))
}

#[derive(Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    token: Option<String>,
}

/// Watchtower webhook. The payload is recorded; nothing is acted on.
#[axum::debug_handler]
pub async fn watchtower(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<TokenQuery>,
    body: String,
) -> Result<Json<Value>, AppError> {
    security::require_admin(&st.sessions, &headers, q.token.as_deref())?;
    let summary = if body.chars().count() > 512 {
        let head: String = body.chars().take(512).collect();
        format!("{head}...")
    } else {
        body
    };
    st.sink
        .info("watchtower", format!("webhook: {summary}"), None);
    Ok(Json(json!({ "success": true })))
}
