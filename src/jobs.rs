//! Queued automation runs with observable status.
//!
//! A dispatch registers a job and hands it to a single worker, so only one
//! run at a time touches the shared browser profile.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::automation::{RunExecutor, RunSummary};
use crate::config::JobsConfig;
use crate::trigger::TriggerRecord;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed(String),
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed(_))
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "Pending"),
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Succeeded => write!(f, "Succeeded"),
            JobStatus::Failed(e) => write!(f, "Failed: {}", e),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct JobEntry {
    pub id: u64,
    pub symbol: String,
    pub status: JobStatus,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub summary: Option<RunSummary>,
}

pub struct JobRegistry {
    jobs: RwLock<HashMap<u64, JobEntry>>,
    next_id: AtomicU64,
    max_finished: usize,
}

impl JobRegistry {
    pub fn new(max_finished: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_finished,
        }
    }

    /// Register a pending job and return its ID.
    pub async fn register(&self, symbol: &str) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = JobEntry {
            id,
            symbol: symbol.to_string(),
            status: JobStatus::Pending,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            summary: None,
        };
        self.jobs.write().await.insert(id, entry);
        id
    }

    pub async fn start(&self, job_id: u64) {
        let mut jobs = self.jobs.write().await;
        if let Some(entry) = jobs.get_mut(&job_id) {
            entry.status = JobStatus::Running;
            entry.started_at = Some(Utc::now());
        }
    }

    pub async fn succeed(&self, job_id: u64, summary: RunSummary) {
        let mut jobs = self.jobs.write().await;
        if let Some(entry) = jobs.get_mut(&job_id) {
            entry.status = JobStatus::Succeeded;
            entry.finished_at = Some(Utc::now());
            entry.summary = Some(summary);
        }
        Self::cleanup_locked(&mut jobs, self.max_finished);
    }

    pub async fn fail(&self, job_id: u64, error: &str) {
        let mut jobs = self.jobs.write().await;
        if let Some(entry) = jobs.get_mut(&job_id) {
            entry.status = JobStatus::Failed(error.to_string());
            entry.finished_at = Some(Utc::now());
        }
        Self::cleanup_locked(&mut jobs, self.max_finished);
    }

    pub async fn get(&self, job_id: u64) -> Option<JobEntry> {
        self.jobs.read().await.get(&job_id).cloned()
    }

    /// All known jobs, sorted by ID.
    pub async fn list(&self) -> Vec<JobEntry> {
        let jobs = self.jobs.read().await;
        let mut entries: Vec<JobEntry> = jobs.values().cloned().collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    /// Remove oldest finished jobs when count exceeds max_finished.
    fn cleanup_locked(jobs: &mut HashMap<u64, JobEntry>, max_finished: usize) {
        let mut finished: Vec<u64> = jobs
            .iter()
            .filter(|(_, e)| e.status.is_finished())
            .map(|(&id, _)| id)
            .collect();

        if finished.len() <= max_finished {
            return;
        }

        finished.sort();
        let to_remove = finished.len() - max_finished;
        for &id in finished.iter().take(to_remove) {
            jobs.remove(&id);
        }
    }
}

/// Front of the queue: registers jobs and feeds the worker.
#[derive(Clone)]
pub struct JobQueue {
    registry: Arc<JobRegistry>,
    sender: mpsc::Sender<(u64, TriggerRecord)>,
}

impl JobQueue {
    /// Spawn the worker. It runs until every `JobQueue` clone is dropped.
    pub fn start(executor: Arc<dyn RunExecutor>, config: &JobsConfig) -> (Self, JoinHandle<()>) {
        let registry = Arc::new(JobRegistry::new(config.max_finished));
        let (sender, mut receiver) = mpsc::channel::<(u64, TriggerRecord)>(config.queue_capacity.max(1));

        let worker_registry = Arc::clone(&registry);
        let handle = tokio::spawn(async move {
            while let Some((job_id, record)) = receiver.recv().await {
                worker_registry.start(job_id).await;
                info!(job_id, "Automation run started");
                match executor.execute(record).await {
                    Ok(summary) => {
                        info!(
                            job_id,
                            failed_steps = summary.step_failures.len(),
                            "Automation run finished"
                        );
                        worker_registry.succeed(job_id, summary).await;
                    }
                    Err(e) => {
                        let reason = format!("{:#}", e);
                        error!(job_id, error = %reason, "Automation run failed");
                        worker_registry.fail(job_id, &reason).await;
                    }
                }
            }
            info!("Job worker stopped");
        });

        (Self { registry, sender }, handle)
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Queue a run for `record`. Fails when the queue is full or closed.
    pub async fn submit(&self, record: TriggerRecord, symbol: &str) -> anyhow::Result<u64> {
        let job_id = self.registry.register(symbol).await;
        if let Err(e) = self.sender.try_send((job_id, record)) {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "job queue is full",
                mpsc::error::TrySendError::Closed(_) => "job worker is not running",
            };
            self.registry.fail(job_id, reason).await;
            anyhow::bail!("{}", reason);
        }
        info!(job_id, symbol, "Automation run queued");
        Ok(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Waits for a release signal, then succeeds unless the symbol is "FAIL".
    struct GatedExecutor {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl RunExecutor for GatedExecutor {
        async fn execute(&self, record: TriggerRecord) -> anyhow::Result<RunSummary> {
            self.gate.notified().await;
            if record.symbol.as_deref() == Some("FAIL") {
                anyhow::bail!("credential fetch returned 401");
            }
            Ok(RunSummary {
                symbol: record.symbol.unwrap_or_default(),
                ..Default::default()
            })
        }
    }

    fn record(symbol: &str) -> TriggerRecord {
        TriggerRecord {
            jwt_token: Some("t".into()),
            symbol: Some(symbol.into()),
            ..Default::default()
        }
    }

    async fn wait_for(queue: &JobQueue, id: u64, pred: impl Fn(&JobStatus) -> bool) -> JobEntry {
        for _ in 0..200 {
            if let Some(entry) = queue.registry().get(id).await {
                if pred(&entry.status) {
                    return entry;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} never reached expected status", id);
    }

    #[tokio::test]
    async fn test_job_lifecycle_pending_running_succeeded() {
        let gate = Arc::new(Notify::new());
        let (queue, _worker) = JobQueue::start(
            Arc::new(GatedExecutor { gate: gate.clone() }),
            &JobsConfig::default(),
        );

        let first = queue.submit(record("GOLD"), "GOLD").await.unwrap();
        let second = queue.submit(record("BTCUSD"), "BTCUSD").await.unwrap();

        wait_for(&queue, first, |s| *s == JobStatus::Running).await;
        assert_eq!(
            queue.registry().get(second).await.unwrap().status,
            JobStatus::Pending
        );

        gate.notify_one();
        let done = wait_for(&queue, first, |s| s.is_finished()).await;
        assert_eq!(done.status, JobStatus::Succeeded);
        assert_eq!(done.summary.unwrap().symbol, "GOLD");
        assert!(done.started_at.is_some() && done.finished_at.is_some());

        wait_for(&queue, second, |s| *s == JobStatus::Running).await;
        gate.notify_one();
        wait_for(&queue, second, |s| *s == JobStatus::Succeeded).await;
    }

    #[tokio::test]
    async fn test_failed_run_records_reason() {
        let gate = Arc::new(Notify::new());
        let (queue, _worker) = JobQueue::start(
            Arc::new(GatedExecutor { gate: gate.clone() }),
            &JobsConfig::default(),
        );
        let id = queue.submit(record("FAIL"), "FAIL").await.unwrap();
        wait_for(&queue, id, |s| *s == JobStatus::Running).await;
        gate.notify_one();
        let entry = wait_for(&queue, id, |s| s.is_finished()).await;
        assert_eq!(
            entry.status,
            JobStatus::Failed("credential fetch returned 401".into())
        );
    }

    #[tokio::test]
    async fn test_cleanup_keeps_newest_finished() {
        let registry = JobRegistry::new(2);
        let mut ids = Vec::new();
        for i in 0..4 {
            let id = registry.register(&format!("S{}", i)).await;
            registry.succeed(id, RunSummary::default()).await;
            ids.push(id);
        }
        let running = registry.register("LIVE").await;
        registry.start(running).await;

        let listed: Vec<u64> = registry.list().await.into_iter().map(|e| e.id).collect();
        assert_eq!(listed, vec![ids[2], ids[3], running]);
    }

    #[tokio::test]
    async fn test_status_serializes_with_reason() {
        let value = serde_json::to_value(JobStatus::Failed("boom".into())).unwrap();
        assert_eq!(value, serde_json::json!({"state": "failed", "reason": "boom"}));
        let value = serde_json::to_value(JobStatus::Pending).unwrap();
        assert_eq!(value, serde_json::json!({"state": "pending"}));
    }

    #[tokio::test]
    async fn test_unknown_job_is_none() {
        let registry = JobRegistry::new(5);
        assert!(registry.get(42).await.is_none());
    }
}
