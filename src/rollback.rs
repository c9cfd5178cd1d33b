//! Rollback checkpoints and the rollback engine
//!
//! Before an update touches a service, its current git revision and
//! container image id are prepended to `rollback_<service>.json`.
//! Rolling back replays one of those checkpoints: source services get a
//! forced checkout and rebuild, image services get the historic image
//! re-tagged over the configured name. Rollback is a one-way escape
//! hatch; it does not checkpoint the state it is leaving.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::config::HubConfig;
use crate::errors::{HubError, HubResult};
use crate::file_store;
use crate::log_sink::LogSink;
use crate::process::{run_command, RunOptions};

pub const MAX_HISTORY: usize = 5;
const UP_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// `rollback_<service>.json`: newest checkpoint first, at most five.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackState {
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub history: Vec<RollbackEntry>,
}

impl RollbackState {
    /// Load the document; `None` when the service has no history file.
    pub fn load(path: &Path) -> HubResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        file_store::read_json(path).map(Some)
    }

    pub fn save(&self, path: &Path) -> HubResult<()> {
        file_store::write_json_atomic(path, self)
    }

    /// Prepend a checkpoint and evict the oldest past the cap.
    pub fn record(&mut self, entry: RollbackEntry) {
        self.hash = entry.hash.clone().or_else(|| entry.image.clone());
        self.history.insert(0, entry);
        self.history.truncate(MAX_HISTORY);
    }

    /// Entry matching the supplied id against hash or image; no id
    /// targets the newest checkpoint.
    pub fn find(&self, id: Option<&str>) -> Option<&RollbackEntry> {
        match id {
            None => self.history.first(),
            Some(id) => self.history.iter().find(|e| {
                e.hash.as_deref() == Some(id) || e.image.as_deref() == Some(id)
            }),
        }
    }

    /// History for display; image-only entries mirror the image into
    /// `hash` so the dashboard always has an id column.
    pub fn display_history(&self) -> Vec<serde_json::Value> {
        self.history
            .iter()
            .map(|e| {
                json!({
                    "timestamp": e.timestamp,
                    "hash": e.hash.clone().or_else(|| e.image.clone()),
                    "image": e.image,
                })
            })
            .collect()
    }
}

/// Capture the current revision and image for a service, best-effort.
/// Failures to read either half are logged and leave that half empty.
pub async fn capture_checkpoint(config: &HubConfig, service: &str) -> RollbackEntry {
    let repo = config.source_dir(service);
    let hash = if crate::sources::has_repo(&repo) {
        crate::sources::head_revision(&repo).await
    } else {
        None
    };
    let container = config.container_name(service);
    let image = match run_command(
        &["docker", "inspect", "--format", "{{.Image}}", &container],
        RunOptions::default().checked(),
    )
    .await
    {
        Ok(out) => {
            let id = out.stdout.trim().to_string();
            (!id.is_empty()).then_some(id)
        }
        Err(err) => {
            warn!(service, %err, "could not read container image id");
            None
        }
    };
    RollbackEntry {
        timestamp: Utc::now(),
        hash,
        image,
    }
}

/// Record a checkpoint in the service's history file.
pub async fn record_checkpoint(config: &HubConfig, service: &str) -> HubResult<()> {
    let entry = capture_checkpoint(config, service).await;
    let path = config.rollback_file(service);
    let mut state = RollbackState::load(&path)?.unwrap_or_default();
    state.record(entry);
    state.save(&path)
}

/// The background half of a rollback. The handler has already verified
/// the history file exists; everything from here is surfaced through
/// the deployment log and the job record.
pub async fn run_rollback(
    config: &HubConfig,
    sink: &LogSink,
    service: &str,
    target: Option<&str>,
) -> HubResult<()> {
    let path = config.rollback_file(service);
    let state = RollbackState::load(&path)?
        .ok_or_else(|| HubError::not_found("rollback history", service))?;
    let entry = state
        .find(target)
        .ok_or_else(|| HubError::not_found("rollback target", target.unwrap_or("latest")))?
        .clone();

    let mut restored_source = false;
    if let Some(hash) = entry.hash.as_deref() {
        let repo = config.source_dir(service);
        if crate::sources::has_repo(&repo) {
            run_command(
                &["git", "checkout", "-f", hash],
                RunOptions::in_dir(&repo).checked(),
            )
            .await?;
            restored_source = true;
            sink.info("rollback", format!("checked out {hash}"), Some(service));
        }
    }

    if let Some(image) = entry.image.as_deref() {
        match restore_image(config, service, image).await {
            Ok(name) => sink.info(
                "rollback",
                format!("re-tagged {image} as {name}"),
                Some(service),
            ),
            Err(err) => {
                // A source restore can still succeed without the tag.
                sink.warning(
                    "rollback",
                    format!("image re-tag failed: {err}"),
                    Some(service),
                );
            }
        }
    }

    let compose_file = config.compose_file.to_string_lossy().to_string();
    let mut argv = vec!["docker", "compose", "-f", compose_file.as_str(), "up", "-d"];
    if restored_source {
        argv.push("--build");
    }
    argv.push(service);
    run_command(&argv, RunOptions::default().timeout(UP_TIMEOUT_SECS).checked()).await?;
    sink.success("rollback", "service restarted on rollback target", Some(service));
    Ok(())
}

/// Tag a historic image over the name the compose file expects.
async fn restore_image(config: &HubConfig, service: &str, image: &str) -> HubResult<String> {
    let container = config.container_name(service);
    let out = run_command(
        &["docker", "inspect", "--format", "{{.Config.Image}}", &container],
        RunOptions::default().checked(),
    )
    .await?;
    let name = out.stdout.trim().to_string();
    if name.is_empty() {
        return Err(HubError::external_tool(
            "docker",
            "container has no configured image name",
        ));
    }
    run_command(&["docker", "tag", image, &name], RunOptions::default().checked()).await?;
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(hash: Option<&str>, image: Option<&str>) -> RollbackEntry {
        RollbackEntry {
            timestamp: Utc::now(),
            hash: hash.map(str::to_string),
            image: image.map(str::to_string),
        }
    }

    #[test]
    fn history_is_newest_first_and_capped() {
        let mut state = RollbackState::default();
        for i in 0..7 {
            state.record(entry(Some(&format!("hash{i}")), None));
        }
        assert_eq!(state.history.len(), MAX_HISTORY);
        assert_eq!(state.history[0].hash.as_deref(), Some("hash6"));
        // hash0 and hash1 were evicted
        assert_eq!(state.history.last().unwrap().hash.as_deref(), Some("hash2"));
        assert_eq!(state.hash.as_deref(), Some("hash6"));
    }

    #[test]
    fn find_matches_hash_or_image_and_defaults_to_newest() {
        let mut state = RollbackState::default();
        state.record(entry(Some("abc"), None));
        state.record(entry(None, Some("sha256:img")));

        assert_eq!(
            state.find(None).unwrap().image.as_deref(),
            Some("sha256:img")
        );
        assert_eq!(state.find(Some("abc")).unwrap().hash.as_deref(), Some("abc"));
        assert_eq!(
            state.find(Some("sha256:img")).unwrap().image.as_deref(),
            Some("sha256:img")
        );
        assert!(state.find(Some("missing")).is_none());
    }

    #[test]
    fn image_only_entries_mirror_hash_for_display() {
        let mut state = RollbackState::default();
        state.record(entry(None, Some("sha256:img")));
        let display = state.display_history();
        assert_eq!(display[0]["hash"], "sha256:img");
        assert_eq!(display[0]["image"], "sha256:img");
    }

    #[test]
    fn load_distinguishes_missing_from_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("rollback_none.json");
        assert!(RollbackState::load(&missing).unwrap().is_none());

        let bad = dir.path().join("rollback_bad.json");
        std::fs::write(&bad, b"{broken").unwrap();
        assert!(RollbackState::load(&bad).is_err());
    }

    #[test]
    fn save_and_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollback_svc.json");
        let mut state = RollbackState::default();
        state.record(entry(Some("abc"), Some("sha256:img")));
        state.save(&path).unwrap();
        let loaded = RollbackState::load(&path).unwrap().unwrap();
        assert_eq!(loaded.hash.as_deref(), Some("abc"));
        assert_eq!(loaded.history.len(), 1);
    }
}
