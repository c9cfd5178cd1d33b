//! Update orchestration
//!
//! The update pipeline runs as a detached background job: checkpoint,
//! backup, source refresh, rebuild, migrate. Only a failed rebuild fails
//! the job; every other step is advisory and a partially applied update
//! is an accepted end state, surfaced through the deployment log and the
//! job record. Jobs against the same service are serialized by the
//! registry's per-service locks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::warn;

use crate::app_state::AppState;
use crate::catalog::{self, ServiceCatalog};
use crate::config::HubConfig;
use crate::errors::{HubError, HubResult};
use crate::file_store;
use crate::jobs::{Job, JobStatus};
use crate::log_sink::LogSink;
use crate::process::{run_command, CommandOutput, RunOptions};
use crate::rollback;
use crate::sources;

const BACKUP_TIMEOUT_SECS: u64 = 120;
const MIGRATE_TIMEOUT_SECS: u64 = 120;
const PULL_TIMEOUT_SECS: u64 = 300;
const UP_TIMEOUT_SECS: u64 = 600;
const MASTER_BACKUP_TIMEOUT_SECS: u64 = 300;
const MASTER_UP_TIMEOUT_SECS: u64 = 1200;

/// Run `migrate.sh` with the given arguments. Callers choose whether a
/// failure matters; the script missing entirely is always an error.
pub async fn run_migrate_script(
    config: &HubConfig,
    args: &[&str],
    timeout_secs: u64,
) -> HubResult<CommandOutput> {
    if !config.migrate_script.exists() {
        return Err(HubError::external_tool(
            "migrate.sh",
            "maintenance script not present",
        ));
    }
    let script = config.migrate_script.to_string_lossy().to_string();
    let mut argv = vec!["bash", script.as_str()];
    argv.extend_from_slice(args);
    run_command(&argv, RunOptions::default().timeout(timeout_secs).checked()).await
}

/// Strategy for one service: env base, theme override, catalog
/// constraint.
pub fn resolve_service_strategy(config: &HubConfig, service: &str) -> String {
    let theme = catalog::load_theme(&config.theme_file());
    let cat = ServiceCatalog::load(&config.services_file());
    catalog::resolve_strategy(&config.update_strategy, &theme, cat.get(service))
}

/// Source repos present on disk.
pub fn source_repos(config: &HubConfig) -> Vec<(String, PathBuf)> {
    let mut repos = Vec::new();
    let Ok(entries) = std::fs::read_dir(&config.sources_dir) else {
        return repos;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if sources::has_repo(&path) {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                repos.push((name.to_string(), path.clone()));
            }
        }
    }
    repos.sort();
    repos
}

async fn refresh_source(
    config: &HubConfig,
    sink: &LogSink,
    service: &str,
    repo: &Path,
    strategy: &str,
) -> HubResult<()> {
    sources::fetch_all(repo).await?;
    let source_ref = sources::select_ref(repo, strategy).await?;
    sources::checkout(repo, &source_ref).await?;
    sink.info(
        "update",
        format!("source at {}", source_ref.name()),
        Some(service),
    );
    if config.patches_script.exists() {
        let script = config.patches_script.to_string_lossy().to_string();
        if let Err(err) = run_command(
            &["bash", script.as_str(), service],
            RunOptions::default().timeout(MIGRATE_TIMEOUT_SECS).checked(),
        )
        .await
        {
            sink.warning("update", format!("patch hook failed: {err}"), Some(service));
        }
    }
    Ok(())
}

/// The update pipeline for one service. Returns `Err` only when the
/// rebuild itself failed.
pub async fn run_update_pipeline(state: &AppState, job_id: &str, service: &str) -> HubResult<()> {
    let config = &*state.config;
    let sink = &*state.sink;
    let jobs = &*state.jobs;

    let strategy = resolve_service_strategy(config, service);
    sink.info(
        "update",
        format!("update started, strategy {strategy}"),
        Some(service),
    );

    jobs.set_status(job_id, JobStatus::Step("checkpoint".into()))?;
    if let Err(err) = rollback::record_checkpoint(config, service).await {
        sink.warning(
            "update",
            format!("rollback checkpoint failed: {err}"),
            Some(service),
        );
    }

    jobs.set_status(job_id, JobStatus::Step("backup".into()))?;
    if config.migrate_script.exists() {
        match run_migrate_script(config, &[service, "backup"], BACKUP_TIMEOUT_SECS).await {
            Ok(_) => sink.info("update", "backup complete", Some(service)),
            Err(err) => sink.warning("update", format!("backup failed: {err}"), Some(service)),
        }
    }

    jobs.set_status(job_id, JobStatus::Step("source".into()))?;
    let repo = config.source_dir(service);
    if sources::has_repo(&repo) {
        if let Err(err) = refresh_source(config, sink, service, &repo, &strategy).await {
            sink.warning(
                "update",
                format!("source refresh failed: {err}"),
                Some(service),
            );
        }
    }

    jobs.set_status(job_id, JobStatus::Step("rebuild".into()))?;
    let compose = config.compose_file.to_string_lossy().to_string();
    if let Err(err) = run_command(
        &["docker", "compose", "-f", compose.as_str(), "pull", service],
        RunOptions::default().timeout(PULL_TIMEOUT_SECS).checked(),
    )
    .await
    {
        sink.warning("update", format!("image pull failed: {err}"), Some(service));
    }
    if let Err(err) = run_command(
        &[
            "docker", "compose", "-f", compose.as_str(), "up", "-d", "--build", service,
        ],
        RunOptions::default().timeout(UP_TIMEOUT_SECS).checked(),
    )
    .await
    {
        sink.error("update", format!("rebuild failed: {err}"), Some(service));
        return Err(err);
    }

    jobs.set_status(job_id, JobStatus::Step("migrate".into()))?;
    if config.migrate_script.exists() {
        match run_migrate_script(config, &[service, "migrate", "no"], MIGRATE_TIMEOUT_SECS).await {
            Ok(_) => sink.info("update", "migration complete", Some(service)),
            Err(err) => sink.warning("update", format!("migration failed: {err}"), Some(service)),
        }
    }

    sink.success("update", "update complete", Some(service));
    Ok(())
}

fn finish_job(state: &AppState, job_id: &str, result: HubResult<()>) {
    let status = match &result {
        Ok(()) => JobStatus::Succeeded,
        Err(err) => {
            if let Err(set_err) = state.jobs.set_detail(job_id, err.to_string()) {
                warn!(%set_err, "could not record job detail");
            }
            JobStatus::Failed
        }
    };
    if let Err(err) = state.jobs.set_status(job_id, status) {
        warn!(%err, "could not record job status");
    }
}

/// Accept an update request: create the job, detach the pipeline.
pub fn spawn_update_job(state: Arc<AppState>, service: String) -> HubResult<Job> {
    let job = state.jobs.create("update", Some(&service))?;
    let job_id = job.id.clone();
    tokio::spawn(async move {
        let lock = match state.jobs.service_lock(&service) {
            Ok(lock) => lock,
            Err(err) => {
                warn!(%err, service, "could not acquire service lock");
                finish_job(&state, &job_id, Err(err));
                return;
            }
        };
        let _guard = lock.lock().await;
        if state
            .jobs
            .set_status(&job_id, JobStatus::Running)
            .is_err()
        {
            return;
        }
        let result = run_update_pipeline(&state, &job_id, &service).await;
        finish_job(&state, &job_id, result);
    });
    Ok(job)
}

/// Accept a rollback request. The handler has already confirmed the
/// history file exists; target resolution and replay happen in the job.
pub fn spawn_rollback_job(
    state: Arc<AppState>,
    service: String,
    target: Option<String>,
) -> HubResult<Job> {
    let job = state.jobs.create("rollback", Some(&service))?;
    let job_id = job.id.clone();
    tokio::spawn(async move {
        let lock = match state.jobs.service_lock(&service) {
            Ok(lock) => lock,
            Err(err) => {
                warn!(%err, service, "could not acquire service lock");
                finish_job(&state, &job_id, Err(err));
                return;
            }
        };
        let _guard = lock.lock().await;
        let _ = state.jobs.set_status(&job_id, JobStatus::Running);
        let result =
            rollback::run_rollback(&state.config, &state.sink, &service, target.as_deref()).await;
        finish_job(&state, &job_id, result);
    });
    Ok(job)
}

/// Sequential updates over a caller-supplied service list, one job.
pub fn spawn_batch_update_job(state: Arc<AppState>, services: Vec<String>) -> HubResult<Job> {
    let job = state.jobs.create("batch-update", None)?;
    let job_id = job.id.clone();
    tokio::spawn(async move {
        let _ = state.jobs.set_status(&job_id, JobStatus::Running);
        let mut failures = Vec::new();
        for service in &services {
            let lock = match state.jobs.service_lock(service) {
                Ok(lock) => lock,
                Err(err) => {
                    warn!(%err, service, "could not acquire service lock");
                    failures.push(service.clone());
                    continue;
                }
            };
            let _guard = lock.lock().await;
            if run_update_pipeline(&state, &job_id, service).await.is_err() {
                failures.push(service.clone());
            }
        }
        let result = if failures.is_empty() {
            Ok(())
        } else {
            Err(HubError::internal(format!(
                "failed services: {}",
                failures.join(", ")
            )))
        };
        finish_job(&state, &job_id, result);
    });
    Ok(job)
}

/// Full-stack update: backup everything, fetch every source repo, one
/// compose rebuild of the whole bundle.
pub fn spawn_master_update_job(state: Arc<AppState>) -> HubResult<Job> {
    let job = state.jobs.create("master-update", None)?;
    let job_id = job.id.clone();
    tokio::spawn(async move {
        let config = &*state.config;
        let sink = &*state.sink;
        let _ = state.jobs.set_status(&job_id, JobStatus::Running);
        sink.info("update", "master update started", None);

        let _ = state
            .jobs
            .set_status(&job_id, JobStatus::Step("backup".into()));
        if config.migrate_script.exists() {
            match run_migrate_script(config, &["all", "backup-all"], MASTER_BACKUP_TIMEOUT_SECS)
                .await
            {
                Ok(_) => sink.info("update", "full backup complete", None),
                Err(err) => sink.warning("update", format!("full backup failed: {err}"), None),
            }
        }

        let _ = state
            .jobs
            .set_status(&job_id, JobStatus::Step("fetch".into()));
        for (service, repo) in source_repos(config) {
            if let Err(err) = sources::fetch_all(&repo).await {
                sink.warning("update", format!("fetch failed: {err}"), Some(&service));
            }
        }

        let _ = state
            .jobs
            .set_status(&job_id, JobStatus::Step("rebuild".into()));
        let compose = config.compose_file.to_string_lossy().to_string();
        let result = run_command(
            &["docker", "compose", "-f", compose.as_str(), "up", "-d", "--build"],
            RunOptions::default().timeout(MASTER_UP_TIMEOUT_SECS).checked(),
        )
        .await
        .map(|_| ());
        match &result {
            Ok(()) => sink.success("update", "master update complete", None),
            Err(err) => sink.error("update", format!("master update failed: {err}"), None),
        }
        finish_job(&state, &job_id, result);
    });
    Ok(job)
}

/// Background fetch over every source repo so `GET /updates` has fresh
/// tracking data.
pub fn spawn_check_updates_job(state: Arc<AppState>) -> HubResult<Job> {
    let job = state.jobs.create("check-updates", None)?;
    let job_id = job.id.clone();
    tokio::spawn(async move {
        let _ = state.jobs.set_status(&job_id, JobStatus::Running);
        for (service, repo) in source_repos(&state.config) {
            if let Err(err) = sources::fetch_all(&repo).await {
                state
                    .sink
                    .warning("update", format!("fetch failed: {err}"), Some(&service));
            }
        }
        finish_job(&state, &job_id, Ok(()));
    });
    Ok(job)
}

/// Pending updates: source repos behind their upstream, merged with the
/// image update report maintained by the host's image checker (entries
/// whose key starts with `_` are bookkeeping and skipped).
pub async fn updates_report(config: &HubConfig) -> HubResult<Map<String, Value>> {
    let mut updates = Map::new();
    for (service, repo) in source_repos(config) {
        if sources::is_behind(&repo).await {
            // The dashboard matches on this exact string.
            updates.insert(service, Value::String("Update Available".to_string()));
        }
    }
    let image_file = config.image_updates_file();
    if image_file.exists() {
        match file_store::read_json::<Value>(&image_file) {
            Ok(Value::Object(map)) => {
                for (key, value) in map {
                    if !key.starts_with('_') {
                        updates.insert(key, value);
                    }
                }
            }
            Ok(_) => warn!("image update report is not an object"),
            Err(err) => warn!(%err, "unreadable image update report"),
        }
    }
    Ok(updates)
}
