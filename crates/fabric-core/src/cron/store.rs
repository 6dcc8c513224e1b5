//! Facade over [`crate::store::Store`] for cron jobs and runs (component H).

use crate::clock::now_ms;
use crate::error::Result;
use crate::model::{CronJob, CronRun, RunStatus};
use crate::store::Store;

const JOBS_TABLE: &str = "cron_jobs";
const RUNS_TABLE: &str = "cron_runs";

#[derive(Default, Clone, Copy)]
pub struct ListRunsOpts {
    pub limit: Option<usize>,
    pub status: Option<RunStatus>,
    pub since_ms: Option<i64>,
}

#[derive(Clone)]
pub struct CronStore {
    store: Store,
}

impl CronStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Escape hatch for callers that need to touch a table this facade
    /// doesn't expose (e.g. clearing `heartbeat_config` when a heartbeat's
    /// cron job is deleted).
    pub fn store_ref(&self) -> &Store {
        &self.store
    }

    pub async fn put_job(&self, job: &CronJob) -> Result<()> {
        let value = serde_json::to_value(job).expect("CronJob always serializes");
        self.store.put(JOBS_TABLE, &job.id, value).await
    }

    pub async fn get_job(&self, id: &str) -> Option<CronJob> {
        self.store
            .get(JOBS_TABLE, id)
            .await
            .and_then(|v| serde_json::from_value(v).ok())
    }

    pub async fn delete_job(&self, id: &str) -> Result<()> {
        self.store.delete(JOBS_TABLE, id).await
    }

    /// All jobs, sorted by `created_at_ms` descending.
    pub async fn list_jobs(&self) -> Vec<CronJob> {
        let mut jobs: Vec<CronJob> = self
            .store
            .list(JOBS_TABLE)
            .await
            .into_iter()
            .filter_map(|(_, v)| serde_json::from_value(v).ok())
            .collect();
        jobs.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
        jobs
    }

    pub async fn list_enabled(&self) -> Vec<CronJob> {
        self.list_jobs().await.into_iter().filter(|j| j.enabled).collect()
    }

    pub async fn list_due(&self) -> Vec<CronJob> {
        let now = now_ms();
        self.list_enabled()
            .await
            .into_iter()
            .filter(|j| j.next_run_at_ms.map(|t| t <= now).unwrap_or(false))
            .collect()
    }

    pub async fn put_run(&self, run: &CronRun) -> Result<()> {
        let value = serde_json::to_value(run).expect("CronRun always serializes");
        self.store.put(RUNS_TABLE, &run.id, value).await
    }

    pub async fn get_run(&self, id: &str) -> Option<CronRun> {
        self.store
            .get(RUNS_TABLE, id)
            .await
            .and_then(|v| serde_json::from_value(v).ok())
    }

    async fn all_runs(&self) -> Vec<CronRun> {
        self.store
            .list(RUNS_TABLE)
            .await
            .into_iter()
            .filter_map(|(_, v)| serde_json::from_value(v).ok())
            .collect()
    }

    /// Runs for `job_id`, filtered and sorted newest-first. Filters
    /// compose; `limit` is applied last.
    pub async fn list_runs(&self, job_id: &str, opts: ListRunsOpts) -> Vec<CronRun> {
        let mut runs: Vec<CronRun> = self
            .all_runs()
            .await
            .into_iter()
            .filter(|r| r.job_id == job_id)
            .filter(|r| opts.status.map(|s| r.status == s).unwrap_or(true))
            .filter(|r| opts.since_ms.map(|since| r.started_at_ms >= since).unwrap_or(true))
            .collect();
        runs.sort_by(|a, b| b.started_at_ms.cmp(&a.started_at_ms));
        if let Some(limit) = opts.limit {
            runs.truncate(limit);
        }
        runs
    }

    pub async fn list_all_runs(&self, opts: ListRunsOpts) -> Vec<CronRun> {
        let mut runs: Vec<CronRun> = self
            .all_runs()
            .await
            .into_iter()
            .filter(|r| opts.status.map(|s| r.status == s).unwrap_or(true))
            .filter(|r| opts.since_ms.map(|since| r.started_at_ms >= since).unwrap_or(true))
            .collect();
        runs.sort_by(|a, b| b.started_at_ms.cmp(&a.started_at_ms));
        if let Some(limit) = opts.limit {
            runs.truncate(limit);
        }
        runs
    }

    pub async fn active_runs(&self, job_id: &str) -> Vec<CronRun> {
        self.all_runs()
            .await
            .into_iter()
            .filter(|r| r.job_id == job_id && r.status.is_active())
            .collect()
    }

    /// Keep only the newest `keep_per_job` runs per job, deleting the rest.
    pub async fn cleanup_old_runs(&self, keep_per_job: usize) -> Result<usize> {
        let all = self.all_runs().await;
        let mut by_job: std::collections::HashMap<String, Vec<CronRun>> = Default::default();
        for run in all {
            by_job.entry(run.job_id.clone()).or_default().push(run);
        }
        let mut deleted = 0;
        for runs in by_job.values_mut() {
            runs.sort_by(|a, b| b.started_at_ms.cmp(&a.started_at_ms));
            for run in runs.iter().skip(keep_per_job) {
                self.store.delete(RUNS_TABLE, &run.id).await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{default_timeout_ms, default_timezone, TriggeredBy};

    fn make_job(id: &str, created_at_ms: i64) -> CronJob {
        CronJob {
            id: id.to_string(),
            name: format!("job-{id}"),
            schedule: "*/5 * * * *".to_string(),
            enabled: true,
            agent_id: "a".to_string(),
            session_key: "agent:a:main".to_string(),
            prompt: "do thing".to_string(),
            timezone: default_timezone(),
            jitter_sec: 0,
            timeout_ms: default_timeout_ms(),
            created_at_ms,
            updated_at_ms: created_at_ms,
            last_run_at_ms: None,
            next_run_at_ms: None,
            meta: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn list_jobs_sorted_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let cs = CronStore::new(Store::new(dir.path()));
        cs.put_job(&make_job("1", 100)).await.unwrap();
        cs.put_job(&make_job("2", 200)).await.unwrap();
        let jobs = cs.list_jobs().await;
        assert_eq!(jobs[0].id, "2");
        assert_eq!(jobs[1].id, "1");
    }

    #[tokio::test]
    async fn list_due_filters_by_next_run_and_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let cs = CronStore::new(Store::new(dir.path()));
        let mut due = make_job("due", 1);
        due.next_run_at_ms = Some(1);
        let mut not_due = make_job("not_due", 1);
        not_due.next_run_at_ms = Some(now_ms() + 1_000_000);
        let mut disabled = make_job("disabled", 1);
        disabled.enabled = false;
        disabled.next_run_at_ms = Some(1);
        cs.put_job(&due).await.unwrap();
        cs.put_job(&not_due).await.unwrap();
        cs.put_job(&disabled).await.unwrap();

        let due_list = cs.list_due().await;
        assert_eq!(due_list.len(), 1);
        assert_eq!(due_list[0].id, "due");
    }

    #[tokio::test]
    async fn cleanup_old_runs_keeps_newest_n() {
        let dir = tempfile::tempdir().unwrap();
        let cs = CronStore::new(Store::new(dir.path()));
        for i in 0..5 {
            let mut run = CronRun::new(format!("r{i}"), "job1".into(), TriggeredBy::Schedule, i);
            run.finish(RunStatus::Completed, i + 1);
            cs.put_run(&run).await.unwrap();
        }
        let deleted = cs.cleanup_old_runs(2).await.unwrap();
        assert_eq!(deleted, 3);
        let remaining = cs.list_runs("job1", ListRunsOpts::default()).await;
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].id, "r4");
    }
}
