//! Shared application state handed to every handler and worker.

use std::sync::Arc;

use crate::config::HubConfig;
use crate::errors::HubResult;
use crate::jobs::JobRegistry;
use crate::log_sink::LogSink;
use crate::metrics::MetricsStore;
use crate::sessions::SessionManager;

pub struct AppState {
    pub config: Arc<HubConfig>,
    pub sessions: Arc<SessionManager>,
    pub sink: Arc<LogSink>,
    pub metrics: Arc<MetricsStore>,
    pub jobs: Arc<JobRegistry>,
    pub db: sled::Db,
}

impl AppState {
    pub fn new(config: HubConfig) -> HubResult<Self> {
        let config = Arc::new(config);
        let db = sled::open(&config.db_dir)?;
        let sessions = Arc::new(SessionManager::new(&config));
        let sink = Arc::new(LogSink::new(config.log_file.clone(), db.clone())?);
        let metrics = Arc::new(MetricsStore::new(db.clone(), &config.container_prefix)?);
        let jobs = Arc::new(JobRegistry::new());
        Ok(Self {
            config,
            sessions,
            sink,
            metrics,
            jobs,
            db,
        })
    }

    /// Spawn the periodic workers. Handles are detached; the workers
    /// live as long as the process.
    pub fn spawn_workers(self: &Arc<Self>) {
        crate::sessions::spawn_sweeper(self.sessions.clone());
        crate::metrics::spawn_metrics_sampler(self.metrics.clone());
        crate::log_sink::spawn_log_sync(self.sink.clone());
    }
}

#[cfg(test)]
impl AppState {
    /// State rooted in a scratch directory, no workers.
    pub fn for_tests(root: &std::path::Path) -> Self {
        let config = Arc::new(HubConfig::for_tests(root));
        let db = sled::Config::new()
            .path(root.join("db"))
            .temporary(true)
            .open()
            .unwrap();
        let sessions = Arc::new(SessionManager::new(&config));
        let sink = Arc::new(LogSink::new(config.log_file.clone(), db.clone()).unwrap());
        let metrics = Arc::new(MetricsStore::new(db.clone(), &config.container_prefix).unwrap());
        Self {
            config,
            sessions,
            sink,
            metrics,
            jobs: Arc::new(JobRegistry::new()),
            db,
        }
    }
}
