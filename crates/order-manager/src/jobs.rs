//! Background Job Queue
//!
//! Long bulk operations (recomputing SL/TP for every position, for example)
//! run off the tick path on a fixed worker pool. Callers get an id back
//! immediately and poll it.
//!
//! ```text
//! submit() ──► QUEUED ──► worker ──► RUNNING ──┬──► DONE   (result JSON)
//!                                              └──► FAILED (error, panic, timeout)
//! ```
//!
//! Each job runs in its own task, so a panicking job is recorded as failed
//! and the worker that picked it up carries on.

use crate::error::{Error, Result};
use async_trait::async_trait;
use log::{error, info, warn};
use sentinel_core::Timestamp;
use sentinel_ports::Clock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;

/// A unit of background work
#[async_trait]
pub trait Job: Send + 'static {
    /// Short kind label, used in the job id
    fn kind(&self) -> &str;

    /// Run to completion, reporting progress. An `Err` marks the job failed.
    async fn run(self: Box<Self>, progress: JobProgress) -> std::result::Result<Value, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Running => 1,
            JobStatus::Done | JobStatus::Failed => 2,
        }
    }
}

/// Pollable view of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub kind: String,
    pub status: JobStatus,
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub progress_pct: f64,
    pub current_item: Option<String>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

/// Job queue configuration
#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    pub workers: usize,
    /// Retained job records; finished jobs are evicted oldest first
    pub history_limit: usize,
    /// Jobs running longer than this are failed
    pub job_timeout: Duration,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            history_limit: 100,
            job_timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Default)]
struct JobTable {
    records: HashMap<String, JobRecord>,
    /// Submission order, oldest first
    order: VecDeque<String>,
}

impl JobTable {
    fn insert(&mut self, record: JobRecord, limit: usize) {
        while self.records.len() >= limit.max(1) {
            let oldest_finished = self
                .order
                .iter()
                .position(|id| self.records.get(id).is_some_and(|r| r.status.is_finished()));
            match oldest_finished {
                Some(idx) => {
                    if let Some(id) = self.order.remove(idx) {
                        self.records.remove(&id);
                    }
                }
                // Only active jobs left; never evict those
                None => break,
            }
        }
        self.order.push_back(record.id.clone());
        self.records.insert(record.id.clone(), record);
    }

    /// Status only moves forward
    fn advance(&mut self, id: &str, next: JobStatus, at: Timestamp) -> bool {
        let Some(record) = self.records.get_mut(id) else {
            return false;
        };
        if next.rank() <= record.status.rank() {
            return false;
        }
        record.status = next;
        match next {
            JobStatus::Running => record.started_at = Some(at),
            JobStatus::Done | JobStatus::Failed => {
                record.completed_at = Some(at);
                record.current_item = None;
            }
            JobStatus::Queued => {}
        }
        true
    }
}

struct Shared {
    table: RwLock<JobTable>,
    clock: Arc<dyn Clock>,
    config: JobQueueConfig,
}

/// Progress handle passed to a running job
#[derive(Clone)]
pub struct JobProgress {
    id: String,
    shared: Arc<Shared>,
}

impl JobProgress {
    pub fn job_id(&self) -> &str {
        &self.id
    }

    pub async fn set_total(&self, total: usize) {
        let mut table = self.shared.table.write().await;
        if let Some(record) = table.records.get_mut(&self.id) {
            record.total = total;
            record.progress_pct = pct(record.processed, total);
        }
    }

    pub async fn begin_item(&self, item: &str) {
        let mut table = self.shared.table.write().await;
        if let Some(record) = table.records.get_mut(&self.id) {
            record.current_item = Some(item.to_string());
        }
    }

    pub async fn finish_item(&self, ok: bool) {
        let mut table = self.shared.table.write().await;
        if let Some(record) = table.records.get_mut(&self.id) {
            record.processed += 1;
            if ok {
                record.succeeded += 1;
            } else {
                record.failed += 1;
            }
            record.progress_pct = pct(record.processed, record.total);
        }
    }
}

fn pct(done: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        (done as f64 / total as f64 * 100.0).min(100.0)
    }
}

struct Queued {
    id: String,
    job: Box<dyn Job>,
}

pub struct JobQueue {
    shared: Arc<Shared>,
    sender: std::sync::Mutex<Option<mpsc::UnboundedSender<Queued>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counter: AtomicU64,
}

impl JobQueue {
    /// Create the queue and start its worker pool. Must be called inside a
    /// tokio runtime.
    pub fn new(config: JobQueueConfig, clock: Arc<dyn Clock>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Queued>();
        let rx = Arc::new(Mutex::new(rx));
        let worker_count = config.workers.max(1);
        let shared = Arc::new(Shared {
            table: RwLock::new(JobTable::default()),
            clock,
            config,
        });

        let workers = (0..worker_count)
            .map(|n| tokio::spawn(worker_loop(n, rx.clone(), shared.clone())))
            .collect();

        Self {
            shared,
            sender: std::sync::Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            counter: AtomicU64::new(0),
        }
    }

    /// Queue a job and return its id without waiting for it to start
    pub async fn submit(&self, job: Box<dyn Job>) -> Result<String> {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let now = self.shared.clock.now();
        let kind = job.kind().to_string();
        let id = format!("{}_{}_{}", kind, now.timestamp(), seq);

        let record = JobRecord {
            id: id.clone(),
            kind,
            status: JobStatus::Queued,
            total: 0,
            processed: 0,
            succeeded: 0,
            failed: 0,
            progress_pct: 0.0,
            current_item: None,
            result: None,
            error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        };
        self.shared
            .table
            .write()
            .await
            .insert(record, self.shared.config.history_limit);

        let sent = {
            let sender = self
                .sender
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match sender.as_ref() {
                Some(tx) => tx.send(Queued { id: id.clone(), job }).is_ok(),
                None => false,
            }
        };

        if !sent {
            let mut table = self.shared.table.write().await;
            if table.advance(&id, JobStatus::Failed, now) {
                if let Some(record) = table.records.get_mut(&id) {
                    record.error = Some("job queue is shut down".to_string());
                }
            }
            return Err(Error::QueueClosed);
        }

        info!("[JOBS] Queued {}", id);
        Ok(id)
    }

    pub async fn get_job(&self, id: &str) -> Option<JobRecord> {
        self.shared.table.read().await.records.get(id).cloned()
    }

    /// Most recent jobs first
    pub async fn recent_jobs(&self, limit: usize) -> Vec<JobRecord> {
        let table = self.shared.table.read().await;
        table
            .order
            .iter()
            .rev()
            .filter_map(|id| table.records.get(id).cloned())
            .take(limit)
            .collect()
    }

    /// Queued and running jobs, oldest first
    pub async fn active_jobs(&self) -> Vec<JobRecord> {
        let table = self.shared.table.read().await;
        table
            .order
            .iter()
            .filter_map(|id| table.records.get(id))
            .filter(|r| !r.status.is_finished())
            .cloned()
            .collect()
    }

    /// Stop accepting jobs. Workers drain what is already queued, then exit.
    pub async fn close(&self) {
        let taken = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if taken.is_some() {
            info!("[JOBS] Queue closed");
        }
    }

    /// Close and wait for the workers to exit
    pub async fn shutdown(&self) {
        self.close().await;
        let handles: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(
    n: usize,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Queued>>>,
    shared: Arc<Shared>,
) {
    loop {
        let next = { rx.lock().await.recv().await };
        let Some(Queued { id, job }) = next else {
            break;
        };

        let started = shared.clock.now();
        if !shared
            .table
            .write()
            .await
            .advance(&id, JobStatus::Running, started)
        {
            warn!("[JOBS] worker {} skipping {}: not queued", n, id);
            continue;
        }

        let progress = JobProgress {
            id: id.clone(),
            shared: shared.clone(),
        };
        let limit = shared.config.job_timeout;
        let handle = tokio::spawn(async move { tokio::time::timeout(limit, job.run(progress)).await });

        let (status, result, failure) = match handle.await {
            Ok(Ok(Ok(value))) => (JobStatus::Done, Some(value), None),
            Ok(Ok(Err(message))) => (JobStatus::Failed, None, Some(message)),
            Ok(Err(_)) => (
                JobStatus::Failed,
                None,
                Some(format!("timed out after {}s", limit.as_secs())),
            ),
            Err(join_error) => (
                JobStatus::Failed,
                None,
                Some(format!("job panicked: {}", join_error)),
            ),
        };

        let finished = shared.clock.now();
        let mut table = shared.table.write().await;
        if table.advance(&id, status, finished) {
            if let Some(record) = table.records.get_mut(&id) {
                record.result = result;
                record.error = failure.clone();
            }
        }
        drop(table);

        match failure {
            Some(message) => error!("[JOBS] {} failed: {}", id, message),
            None => info!("[JOBS] {} done", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_clock::ManualClock;
    use serde_json::json;

    struct Sleep {
        millis: u64,
        items: usize,
    }

    #[async_trait]
    impl Job for Sleep {
        fn kind(&self) -> &str {
            "sleep"
        }

        async fn run(self: Box<Self>, progress: JobProgress) -> std::result::Result<Value, String> {
            progress.set_total(self.items).await;
            for i in 0..self.items {
                progress.begin_item(&format!("item{}", i)).await;
                tokio::time::sleep(Duration::from_millis(self.millis)).await;
                progress.finish_item(true).await;
            }
            Ok(json!({ "items": self.items }))
        }
    }

    struct Fails;

    #[async_trait]
    impl Job for Fails {
        fn kind(&self) -> &str {
            "fails"
        }

        async fn run(self: Box<Self>, _progress: JobProgress) -> std::result::Result<Value, String> {
            Err("exchange unavailable".to_string())
        }
    }

    struct Panics;

    #[async_trait]
    impl Job for Panics {
        fn kind(&self) -> &str {
            "panics"
        }

        async fn run(self: Box<Self>, _progress: JobProgress) -> std::result::Result<Value, String> {
            panic!("boom");
        }
    }

    fn queue(config: JobQueueConfig) -> JobQueue {
        JobQueue::new(config, ManualClock::new(None))
    }

    async fn wait_finished(queue: &JobQueue, id: &str) -> JobRecord {
        loop {
            if let Some(record) = queue.get_job(id).await {
                if record.status.is_finished() {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_job_runs_to_done_with_progress() {
        let queue = queue(JobQueueConfig::default());
        let id = queue
            .submit(Box::new(Sleep { millis: 1, items: 3 }))
            .await
            .unwrap();
        assert!(id.starts_with("sleep_"));

        let record = wait_finished(&queue, &id).await;
        assert_eq!(record.status, JobStatus::Done);
        assert_eq!(record.processed, 3);
        assert_eq!(record.progress_pct, 100.0);
        assert_eq!(record.result, Some(json!({ "items": 3 })));
        assert!(record.started_at.is_some());
        assert!(record.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_failure_and_panic_are_recorded() {
        let queue = queue(JobQueueConfig {
            workers: 1,
            ..Default::default()
        });
        let failed = queue.submit(Box::new(Fails)).await.unwrap();
        let panicked = queue.submit(Box::new(Panics)).await.unwrap();
        let after = queue
            .submit(Box::new(Sleep { millis: 1, items: 1 }))
            .await
            .unwrap();

        let record = wait_finished(&queue, &failed).await;
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("exchange unavailable"));

        let record = wait_finished(&queue, &panicked).await;
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.error.unwrap().contains("panicked"));

        // The single worker survived the panic
        assert_eq!(wait_finished(&queue, &after).await.status, JobStatus::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_job() {
        let queue = queue(JobQueueConfig {
            job_timeout: Duration::from_secs(1),
            ..Default::default()
        });
        let id = queue
            .submit(Box::new(Sleep { millis: 5_000, items: 1 }))
            .await
            .unwrap();

        let record = wait_finished(&queue, &id).await;
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_history_evicts_oldest_finished() {
        let queue = queue(JobQueueConfig {
            history_limit: 3,
            ..Default::default()
        });
        let mut ids = Vec::new();
        for _ in 0..3 {
            let id = queue.submit(Box::new(Fails)).await.unwrap();
            wait_finished(&queue, &id).await;
            ids.push(id);
        }
        let newest = queue.submit(Box::new(Fails)).await.unwrap();

        assert!(queue.get_job(&ids[0]).await.is_none());
        let recent = queue.recent_jobs(10).await;
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].id, newest);
    }

    #[test]
    fn test_status_never_moves_backwards() {
        let now = chrono::Utc::now();
        let mut table = JobTable::default();
        table.insert(
            JobRecord {
                id: "x_1_1".to_string(),
                kind: "x".to_string(),
                status: JobStatus::Queued,
                total: 0,
                processed: 0,
                succeeded: 0,
                failed: 0,
                progress_pct: 0.0,
                current_item: None,
                result: None,
                error: None,
                created_at: now,
                started_at: None,
                completed_at: None,
            },
            10,
        );
        assert!(table.advance("x_1_1", JobStatus::Running, now));
        assert!(table.advance("x_1_1", JobStatus::Done, now));
        assert!(!table.advance("x_1_1", JobStatus::Running, now));
        assert!(!table.advance("x_1_1", JobStatus::Failed, now));
    }

    #[tokio::test]
    async fn test_submit_after_close_is_rejected() {
        let queue = queue(JobQueueConfig::default());
        queue.close().await;
        assert_eq!(queue.submit(Box::new(Fails)).await, Err(Error::QueueClosed));
    }
}
