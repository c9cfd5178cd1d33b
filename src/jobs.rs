//! Background job registry
//!
//! Every long-running operation (update, rollback, batch, fetch) is
//! recorded as a `Job` the polling endpoints can read. Jobs are held in
//! memory only; the durable record of what happened is the deployment
//! log. The registry also hands out per-service async locks so two jobs
//! never touch the same service concurrently.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::{HubError, HubResult};

/// Retained job records; older ones are evicted.
const MAX_JOBS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "step")]
pub enum JobStatus {
    Queued,
    Running,
    Step(String),
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub detail: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Jobs {
    by_id: BTreeMap<String, Job>,
    order: Vec<String>,
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<Jobs>,
    service_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> HubResult<std::sync::MutexGuard<'_, Jobs>> {
        self.jobs.lock().map_err(|_| HubError::MutexPoisoned {
            resource: "job registry".into(),
        })
    }

    /// Record a new queued job and return it.
    pub fn create(&self, kind: &str, service: Option<&str>) -> HubResult<Job> {
        let job = Job {
            id: Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            service: service.map(str::to_string),
            status: JobStatus::Queued,
            detail: String::new(),
            started_at: Utc::now(),
            finished_at: None,
        };
        let mut jobs = self.lock()?;
        jobs.order.push(job.id.clone());
        jobs.by_id.insert(job.id.clone(), job.clone());
        while jobs.order.len() > MAX_JOBS {
            let evicted = jobs.order.remove(0);
            jobs.by_id.remove(&evicted);
        }
        Ok(job)
    }

    /// Update a job's status; terminal states stamp `finished_at`.
    pub fn set_status(&self, id: &str, status: JobStatus) -> HubResult<()> {
        let mut jobs = self.lock()?;
        if let Some(job) = jobs.by_id.get_mut(id) {
            if status.is_terminal() {
                job.finished_at = Some(Utc::now());
            }
            job.status = status;
        }
        Ok(())
    }

    pub fn set_detail(&self, id: &str, detail: impl Into<String>) -> HubResult<()> {
        let mut jobs = self.lock()?;
        if let Some(job) = jobs.by_id.get_mut(id) {
            job.detail = detail.into();
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> HubResult<Option<Job>> {
        Ok(self.lock()?.by_id.get(id).cloned())
    }

    /// All retained jobs, newest first.
    pub fn list(&self) -> HubResult<Vec<Job>> {
        let jobs = self.lock()?;
        Ok(jobs
            .order
            .iter()
            .rev()
            .filter_map(|id| jobs.by_id.get(id).cloned())
            .collect())
    }

    /// Async lock serializing jobs against one service. Callers hold the
    /// guard for the whole pipeline.
    pub fn service_lock(&self, service: &str) -> HubResult<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self.service_locks.lock().map_err(|_| HubError::MutexPoisoned {
            resource: "service locks".into(),
        })?;
        Ok(locks
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_lifecycle_is_tracked() {
        let registry = JobRegistry::new();
        let job = registry.create("update", Some("redlib")).unwrap();
        assert_eq!(job.status, JobStatus::Queued);

        registry.set_status(&job.id, JobStatus::Running).unwrap();
        registry
            .set_status(&job.id, JobStatus::Step("backup".into()))
            .unwrap();
        registry.set_status(&job.id, JobStatus::Succeeded).unwrap();

        let stored = registry.get(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Succeeded);
        assert!(stored.finished_at.is_some());
    }

    #[test]
    fn list_is_newest_first_and_bounded() {
        let registry = JobRegistry::new();
        for i in 0..(MAX_JOBS + 5) {
            registry.create("update", Some(&format!("svc{i}"))).unwrap();
        }
        let jobs = registry.list().unwrap();
        assert_eq!(jobs.len(), MAX_JOBS);
        assert_eq!(jobs[0].service.as_deref(), Some(&*format!("svc{}", MAX_JOBS + 4)));
    }

    #[tokio::test]
    async fn same_service_shares_one_lock() {
        let registry = JobRegistry::new();
        let a = registry.service_lock("redlib").unwrap();
        let b = registry.service_lock("redlib").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let _held = a.lock().await;
        assert!(b.try_lock().is_err());
    }
}
