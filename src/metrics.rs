//! Container resource metrics
//!
//! A sampler shells out to `docker stats` and stores per-container CPU
//! and memory rows in the sled `metrics` tree. Sampling is demand-gated:
//! it only runs while somebody has read `/metrics` within the last
//! minute, so an idle dashboard costs nothing. Rows older than an hour
//! are pruned on each tick.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{HubError, HubResult};
use crate::process::{run_command, RunOptions};

pub const METRICS_TREE: &str = "metrics";
pub const SAMPLE_INTERVAL_SECS: u64 = 30;
const ACTIVITY_WINDOW: Duration = Duration::from_secs(60);
const RETENTION_SECS: i64 = 3600;
const STATS_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSample {
    pub timestamp: DateTime<Utc>,
    pub container: String,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub memory_limit_mb: f64,
}

pub struct MetricsStore {
    tree: sled::Tree,
    db: sled::Db,
    container_prefix: String,
    last_read: Mutex<Option<Instant>>,
}

/// "12.34%" -> 12.34
fn parse_cpu_percent(raw: &str) -> Option<f64> {
    raw.trim().trim_end_matches('%').parse().ok()
}

/// "1.5GiB" / "512MiB" / "900KiB" / "64B" -> megabytes.
fn parse_size_mb(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit() && c != '.')?;
    let value: f64 = raw[..split].parse().ok()?;
    let unit = raw[split..].trim();
    let mb = match unit {
        "GiB" | "GB" => value * 1024.0,
        "MiB" | "MB" => value,
        "KiB" | "kB" | "KB" => value / 1024.0,
        "B" => value / (1024.0 * 1024.0),
        _ => return None,
    };
    Some(mb)
}

/// "1.5GiB / 7.6GiB" -> (used_mb, limit_mb)
fn parse_mem_usage(raw: &str) -> Option<(f64, f64)> {
    let (used, limit) = raw.split_once('/')?;
    Some((parse_size_mb(used)?, parse_size_mb(limit)?))
}

impl MetricsStore {
    pub fn new(db: sled::Db, container_prefix: &str) -> HubResult<Self> {
        let tree = db.open_tree(METRICS_TREE)?;
        Ok(Self {
            tree,
            db,
            container_prefix: container_prefix.to_string(),
            last_read: Mutex::new(None),
        })
    }

    /// Called by the read endpoint; keeps the sampler alive.
    pub fn mark_read(&self) {
        if let Ok(mut guard) = self.last_read.lock() {
            *guard = Some(Instant::now());
        }
    }

    pub(crate) fn recently_read(&self) -> bool {
        match self.last_read.lock() {
            Ok(guard) => guard
                .map(|at| at.elapsed() < ACTIVITY_WINDOW)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    fn insert(&self, sample: &MetricsSample) -> HubResult<()> {
        let key = self.db.generate_id()?.to_be_bytes();
        let value = serde_json::to_vec(sample)
            .map_err(|e| HubError::serialization("metrics sample", e))?;
        self.tree.insert(key, value)?;
        Ok(())
    }

    /// Latest retained sample per container.
    pub fn latest(&self) -> HubResult<BTreeMap<String, MetricsSample>> {
        let mut latest = BTreeMap::new();
        for item in self.tree.iter().rev() {
            let (_, value) = item?;
            let sample: MetricsSample = match serde_json::from_slice(&value) {
                Ok(s) => s,
                Err(_) => continue,
            };
            latest
                .entry(sample.container.clone())
                .or_insert(sample);
        }
        Ok(latest)
    }

    /// One `docker stats` pass. Unparseable rows are skipped.
    pub async fn sample_once(&self) -> HubResult<usize> {
        let output = run_command(
            &[
                "docker",
                "stats",
                "--no-stream",
                "--format",
                "{{.Name}}\t{{.CPUPerc}}\t{{.MemUsage}}",
            ],
            RunOptions::default().timeout(STATS_TIMEOUT_SECS).checked(),
        )
        .await?;

        let now = Utc::now();
        let mut inserted = 0usize;
        for line in output.stdout.lines() {
            let mut fields = line.split('\t');
            let (Some(name), Some(cpu), Some(mem)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            let container = name
                .strip_prefix(&self.container_prefix)
                .unwrap_or(name)
                .to_string();
            let Some(cpu_percent) = parse_cpu_percent(cpu) else {
                continue;
            };
            let Some((memory_mb, memory_limit_mb)) = parse_mem_usage(mem) else {
                continue;
            };
            self.insert(&MetricsSample {
                timestamp: now,
                container,
                cpu_percent,
                memory_mb,
                memory_limit_mb,
            })?;
            inserted += 1;
        }
        Ok(inserted)
    }

    /// One sampler tick: without a recent reader nothing runs at all,
    /// otherwise sample and prune.
    pub async fn sample_if_active(&self) -> HubResult<Option<usize>> {
        if !self.recently_read() {
            return Ok(None);
        }
        let inserted = self.sample_once().await?;
        self.prune()?;
        Ok(Some(inserted))
    }

    /// Drop samples older than the retention window.
    pub fn prune(&self) -> HubResult<usize> {
        let cutoff = Utc::now() - chrono::Duration::seconds(RETENTION_SECS);
        let mut removed = 0usize;
        for item in self.tree.iter() {
            let (key, value) = item?;
            let stale = match serde_json::from_slice::<MetricsSample>(&value) {
                Ok(sample) => sample.timestamp < cutoff,
                // Rows we can no longer parse are dead weight.
                Err(_) => true,
            };
            if stale {
                self.tree.remove(key)?;
                removed += 1;
            } else {
                // Keys are monotonic, the rest is newer.
                break;
            }
        }
        Ok(removed)
    }
}

/// Demand-gated sampler loop.
pub fn spawn_metrics_sampler(store: Arc<MetricsStore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SAMPLE_INTERVAL_SECS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match store.sample_if_active().await {
                Ok(None) => {}
                Ok(Some(count)) => debug!(count, "sampled container metrics"),
                Err(err) => warn!(%err, "metrics sampling failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_docker_sizes_to_megabytes() {
        assert_eq!(parse_size_mb("1.5GiB"), Some(1536.0));
        assert_eq!(parse_size_mb("512MiB"), Some(512.0));
        assert_eq!(parse_size_mb("1024KiB"), Some(1.0));
        assert_eq!(parse_size_mb("0B"), Some(0.0));
        assert_eq!(parse_size_mb("weird"), None);
    }

    #[test]
    fn parses_mem_usage_pair() {
        let (used, limit) = parse_mem_usage("256MiB / 2GiB").unwrap();
        assert_eq!(used, 256.0);
        assert_eq!(limit, 2048.0);
        assert!(parse_mem_usage("no-slash").is_none());
    }

    #[test]
    fn parses_cpu_percent() {
        assert_eq!(parse_cpu_percent("12.34%"), Some(12.34));
        assert_eq!(parse_cpu_percent("0.00%"), Some(0.0));
        assert_eq!(parse_cpu_percent("n/a"), None);
    }

    fn store(dir: &tempfile::TempDir) -> MetricsStore {
        let db = sled::Config::new()
            .path(dir.path().join("db"))
            .temporary(true)
            .open()
            .unwrap();
        MetricsStore::new(db, "hub-").unwrap()
    }

    #[test]
    fn latest_returns_newest_row_per_container() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        for cpu in [1.0, 2.0, 3.0] {
            store
                .insert(&MetricsSample {
                    timestamp: Utc::now(),
                    container: "redlib".into(),
                    cpu_percent: cpu,
                    memory_mb: 100.0,
                    memory_limit_mb: 2048.0,
                })
                .unwrap();
        }
        let latest = store.latest().unwrap();
        assert_eq!(latest["redlib"].cpu_percent, 3.0);
    }

    #[tokio::test]
    async fn tick_without_a_recent_reader_samples_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        // Nobody has read /metrics, so the tick is a no-op.
        assert!(!store.recently_read());
        assert_eq!(store.sample_if_active().await.unwrap(), None);
        assert!(store.latest().unwrap().is_empty());
    }

    #[test]
    fn a_read_keeps_the_sampler_active_for_a_window() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.mark_read();
        assert!(store.recently_read());
    }

    #[test]
    fn prune_drops_samples_past_retention() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store
            .insert(&MetricsSample {
                timestamp: Utc::now() - chrono::Duration::hours(2),
                container: "old".into(),
                cpu_percent: 1.0,
                memory_mb: 1.0,
                memory_limit_mb: 1.0,
            })
            .unwrap();
        store
            .insert(&MetricsSample {
                timestamp: Utc::now(),
                container: "fresh".into(),
                cpu_percent: 1.0,
                memory_mb: 1.0,
                memory_limit_mb: 1.0,
            })
            .unwrap();
        assert_eq!(store.prune().unwrap(), 1);
        let latest = store.latest().unwrap();
        assert!(!latest.contains_key("old"));
        assert!(latest.contains_key("fresh"));
    }
}
