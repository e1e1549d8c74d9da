//! Background work: scheduled reminders and reports, and on-demand exports.
//!
//! On-demand jobs are tracked in a [`JobRegistry`] so the HTTP surface can
//! hand out a handle immediately and answer status queries later.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, error, info};
use uuid::Uuid;

pub mod schedule;
pub mod tasks;

/// Progress of a tracked job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Still running.
    Pending,
    /// Finished without error.
    Success,
    /// Finished with an error; details are in the logs.
    Failed,
}

/// How long a finished job's status stays queryable.
pub const JOB_RETENTION: Duration = Duration::from_secs(60 * 60);

#[derive(Clone, Copy, Debug)]
struct Tracked {
    status: JobStatus,
    settled_at: Option<Instant>,
}

impl Tracked {
    fn expired(&self, now: Instant, retention: Duration) -> bool {
        self.settled_at
            .is_some_and(|at| now.saturating_duration_since(at) >= retention)
    }
}

/// Handles of spawned jobs and their current status.
///
/// Finished jobs are forgotten once [`JOB_RETENTION`] (or the retention
/// given to [`JobRegistry::with_retention`]) has passed; running jobs are
/// always kept.
#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<DashMap<Uuid, Tracked>>,
    retention: Duration,
}

impl Default for JobRegistry {
    fn default() -> Self { Self::with_retention(JOB_RETENTION) }
}

impl JobRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Create an empty registry that keeps finished jobs for `retention`.
    #[must_use]
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            retention,
        }
    }

    /// Run `task` on its own Tokio task and return its handle.
    ///
    /// Expired entries are pruned first.
    pub fn spawn<F>(&self, name: &'static str, task: F) -> Uuid
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.prune();
        let id = Uuid::new_v4();
        self.jobs.insert(
            id,
            Tracked {
                status: JobStatus::Pending,
                settled_at: None,
            },
        );
        let jobs = Arc::clone(&self.jobs);
        tokio::spawn(async move {
            let status = match task.await {
                Ok(()) => {
                    info!(job = name, %id, "job finished");
                    JobStatus::Success
                }
                Err(err) => {
                    error!(job = name, %id, error = %format!("{err:#}"), "job failed");
                    JobStatus::Failed
                }
            };
            jobs.insert(
                id,
                Tracked {
                    status,
                    settled_at: Some(Instant::now()),
                },
            );
        });
        id
    }

    /// Status of the job with handle `id`, if it was spawned here and has
    /// not expired.
    #[must_use]
    pub fn status(&self, id: &Uuid) -> Option<JobStatus> {
        let now = Instant::now();
        self.jobs
            .get(id)
            .map(|entry| *entry.value())
            .filter(|job| !job.expired(now, self.retention))
            .map(|job| job.status)
    }

    fn prune(&self) {
        let now = Instant::now();
        let before = self.jobs.len();
        self.jobs.retain(|_, job| !job.expired(now, self.retention));
        let pruned = before.saturating_sub(self.jobs.len());
        if pruned > 0 {
            debug!(pruned, "expired job entries dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use rstest::rstest;

    use super::*;

    async fn settled(registry: &JobRegistry, id: Uuid) -> Option<JobStatus> {
        for _ in 0..100 {
            match registry.status(&id) {
                Some(JobStatus::Pending) => tokio::time::sleep(Duration::from_millis(10)).await,
                other => return other,
            }
        }
        registry.status(&id)
    }

    #[rstest]
    #[tokio::test]
    async fn finished_jobs_report_outcome() {
        let registry = JobRegistry::new();
        let ok = registry.spawn("ok", async { Ok(()) });
        let failed = registry.spawn("failing", async { Err(anyhow!("boom")) });

        assert_eq!(settled(&registry, ok).await, Some(JobStatus::Success));
        assert_eq!(settled(&registry, failed).await, Some(JobStatus::Failed));
    }

    #[rstest]
    #[tokio::test]
    async fn running_job_is_pending() {
        let registry = JobRegistry::new();
        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        let id = registry.spawn("blocked", async move {
            wait.await?;
            Ok(())
        });
        assert_eq!(registry.status(&id), Some(JobStatus::Pending));
        release.send(()).expect("job still waiting");
        assert_eq!(settled(&registry, id).await, Some(JobStatus::Success));
    }

    #[rstest]
    #[tokio::test]
    async fn finished_jobs_expire_after_retention() {
        let registry = JobRegistry::with_retention(Duration::from_millis(200));
        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        let running = registry.spawn("blocked", async move {
            wait.await?;
            Ok(())
        });
        let done = registry.spawn("ok", async { Ok(()) });
        assert_eq!(settled(&registry, done).await, Some(JobStatus::Success));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(registry.status(&done), None);
        assert_eq!(registry.status(&running), Some(JobStatus::Pending));

        let next = registry.spawn("next", async { Ok(()) });
        assert_eq!(registry.jobs.len(), 2);
        assert_eq!(settled(&registry, next).await, Some(JobStatus::Success));

        release.send(()).expect("job still waiting");
        assert_eq!(settled(&registry, running).await, Some(JobStatus::Success));
    }

    #[test]
    fn unknown_handles_have_no_status() {
        assert_eq!(JobRegistry::new().status(&Uuid::new_v4()), None);
    }

    #[test]
    fn status_serialises_lowercase() {
        let json = serde_json::to_value(JobStatus::Success).expect("encode");
        assert_eq!(json, "success");
    }
}
