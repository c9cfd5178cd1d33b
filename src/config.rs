// Purpose: Centralized runtime configuration for the Privacy Hub API.
// All paths are settable through the environment so tests can point the
// whole control plane at a scratch directory.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::{HubError, HubResult};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    pub app_name: String,
    pub container_prefix: String,
    pub port: u16,

    // Paths
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub sources_dir: PathBuf,
    pub log_file: PathBuf,
    pub db_dir: PathBuf,
    pub compose_file: PathBuf,
    pub migrate_script: PathBuf,
    pub patches_script: PathBuf,

    // Auth
    pub hub_api_key: Option<String>,
    pub admin_password: Option<String>,

    // Update behavior
    pub update_strategy: String,
    pub cors_origins: Vec<String>,
}

impl HubConfig {
    /// Build configuration from the process environment.
    pub fn from_env() -> HubResult<Self> {
        let config_dir = PathBuf::from(env_or("HUB_CONFIG_DIR", "/app"));
        let data_dir = PathBuf::from(env_or("HUB_DATA_DIR", "/app/data"));

        let port = env_or("HUB_PORT", "55555")
            .parse::<u16>()
            .map_err(|_| HubError::config("HUB_PORT must be a valid port number"))?;

        let cors_raw = env_or("HUB_CORS_ORIGINS", "*");
        let cors_origins: Vec<String> = cors_raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            app_name: env_or("APP_NAME", "privacy-hub"),
            container_prefix: env_or("CONTAINER_PREFIX", "hub-"),
            port,
            sources_dir: PathBuf::from(env_or("HUB_SOURCES_DIR", "/app/sources")),
            log_file: std::env::var("HUB_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| config_dir.join("deployment.log")),
            db_dir: std::env::var("HUB_DB_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("store")),
            compose_file: std::env::var("HUB_COMPOSE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| config_dir.join("docker-compose.yml")),
            migrate_script: PathBuf::from(env_or(
                "HUB_MIGRATE_SCRIPT",
                "/usr/local/bin/migrate.sh",
            )),
            patches_script: std::env::var("HUB_PATCHES_SCRIPT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| config_dir.join("patches.sh")),
            hub_api_key: std::env::var("HUB_API_KEY").ok().filter(|k| !k.is_empty()),
            admin_password: std::env::var("ADMIN_PASS_RAW")
                .ok()
                .filter(|p| !p.is_empty()),
            update_strategy: env_or("UPDATE_STRATEGY", "stable"),
            cors_origins,
            config_dir,
            data_dir,
        })
    }

    pub fn services_file(&self) -> PathBuf {
        self.config_dir.join("services.json")
    }

    pub fn theme_file(&self) -> PathBuf {
        self.config_dir.join("theme.json")
    }

    pub fn sessions_file(&self) -> PathBuf {
        self.data_dir.join("sessions.json")
    }

    pub fn secrets_file(&self) -> PathBuf {
        self.config_dir.join(".secrets")
    }

    pub fn rollback_file(&self, service: &str) -> PathBuf {
        self.data_dir.join(format!("rollback_{service}.json"))
    }

    pub fn image_updates_file(&self) -> PathBuf {
        self.data_dir.join("image_updates.json")
    }

    pub fn source_dir(&self, service: &str) -> PathBuf {
        self.sources_dir.join(service)
    }

    /// Container name as the orchestrator sees it.
    pub fn container_name(&self, service: &str) -> String {
        format!("{}{}", self.container_prefix, service)
    }
}

#[cfg(test)]
impl HubConfig {
    /// Config rooted in a scratch directory for tests.
    pub fn for_tests(root: &std::path::Path) -> Self {
        Self {
            app_name: "privacy-hub".into(),
            container_prefix: "hub-".into(),
            port: 0,
            config_dir: root.to_path_buf(),
            data_dir: root.join("data"),
            sources_dir: root.join("src-repos"),
            log_file: root.join("data").join("deployment.log"),
            db_dir: root.join("data").join("hub-db"),
            compose_file: root.join("docker-compose.yml"),
            migrate_script: root.join("migrate.sh"),
            patches_script: root.join("patches.sh"),
            hub_api_key: Some("testkeytestkey01".into()),
            admin_password: Some("hunter2-admin".into()),
            update_strategy: "stable".into(),
            cors_origins: vec!["*".into()],
        }
    }
}
