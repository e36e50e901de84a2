use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::api::JobApi;
use crate::downloader::{DownloadStatus, JobStore};
use crate::errors::Result;

/// Delay between two status checks of the same job.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub const RETRY_LINE: &str = "Retrying download...";
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// How a poll loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Completed,
    Failed(String),
    /// The backend reported the job as cancelled.
    Cancelled,
    /// The local record was deleted or already terminal, e.g. cancelled
    /// by the user while the loop was running.
    Detached,
    /// The local store rejected a write; the record is left as it was.
    StoreError(String),
}

struct PollTask {
    handle: JoinHandle<()>,
    outcome: watch::Receiver<Option<PollOutcome>>,
}

impl PollTask {
    fn is_running(&self) -> bool {
        !self.handle.is_finished() && self.outcome.borrow().is_none()
    }
}

/// Drives one status-polling task per in-flight job and writes what the
/// backend reports into the local store.
pub struct JobSynchronizer {
    api: Arc<dyn JobApi>,
    store: JobStore,
    pollers: Arc<Mutex<HashMap<String, PollTask>>>,
    poll_interval: Duration,
}

impl JobSynchronizer {
    pub fn new(api: Arc<dyn JobApi>, store: JobStore) -> Self {
        Self::with_poll_interval(api, store, POLL_INTERVAL)
    }

    pub fn with_poll_interval(api: Arc<dyn JobApi>, store: JobStore, poll_interval: Duration) -> Self {
        Self {
            api,
            store,
            pollers: Arc::new(Mutex::new(HashMap::new())),
            poll_interval,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Start polling `job_id` unless a loop for it is already running.
    /// Returns whether a new loop was spawned.
    pub async fn start_polling(&self, job_id: &str) -> bool {
        let mut pollers = self.pollers.lock().await;
        pollers.retain(|_, task| task.is_running());

        if pollers.contains_key(job_id) {
            return false;
        }

        pollers.insert(job_id.to_string(), self.spawn_poller(job_id));
        true
    }

    /// Replace whatever loop exists for `job_id` with a fresh one.
    async fn restart_polling(&self, job_id: &str) {
        let mut pollers = self.pollers.lock().await;
        if let Some(previous) = pollers.remove(job_id) {
            previous.handle.abort();
        }
        pollers.insert(job_id.to_string(), self.spawn_poller(job_id));
    }

    fn spawn_poller(&self, job_id: &str) -> PollTask {
        let (tx, outcome) = watch::channel(None);
        let api = self.api.clone();
        let store = self.store.clone();
        let job_id = job_id.to_string();
        let interval = self.poll_interval;

        info!("Polling job {}", job_id);
        let handle = tokio::spawn(async move {
            let result = poll_job(api.as_ref(), &store, &job_id, interval).await;
            debug!("Poll loop for {} ended: {:?}", job_id, result);
            let _ = tx.send(Some(result));
        });

        PollTask { handle, outcome }
    }

    /// Start loops for every pending/processing job in the store.
    pub async fn resume_active(&self) -> Result<usize> {
        let active = self.store.list_active().await?;
        let mut started = 0;
        for record in &active {
            if self.start_polling(&record.job_id).await {
                started += 1;
            }
        }
        if started > 0 {
            info!("Resumed polling for {} active job(s)", started);
        }
        Ok(started)
    }

    pub async fn is_polling(&self, job_id: &str) -> bool {
        self.pollers
            .lock()
            .await
            .get(job_id)
            .map(PollTask::is_running)
            .unwrap_or(false)
    }

    pub async fn active_count(&self) -> usize {
        self.pollers
            .lock()
            .await
            .values()
            .filter(|task| task.is_running())
            .count()
    }

    /// Failed → pending and poll the same job id again. The job is not
    /// resubmitted to the backend. Returns `false` (and does nothing) for
    /// any job that is not currently failed.
    pub async fn retry(&self, job_id: &str) -> Result<bool> {
        if !self.store.reset_for_retry(job_id, RETRY_LINE).await? {
            debug!("Retry ignored for {}: not in failed state", job_id);
            return Ok(false);
        }
        info!("Retrying job {}", job_id);
        self.restart_polling(job_id).await;
        Ok(true)
    }

    /// Local-only cancel. The backend is not told and a running loop is
    /// not aborted; its next write finds the record terminal and it stops.
    pub async fn cancel(&self, job_id: &str) -> Result<bool> {
        let changed = self.store.mark_cancelled(job_id).await?;
        if changed {
            info!("Cancelled job {}", job_id);
        }
        Ok(changed)
    }

    /// Wait for the loop of `job_id` to end. `None` if no loop is tracked
    /// or it was aborted.
    pub async fn wait_for(&self, job_id: &str) -> Option<PollOutcome> {
        let mut outcome = {
            let pollers = self.pollers.lock().await;
            pollers.get(job_id)?.outcome.clone()
        };
        let result = outcome.wait_for(Option::is_some).await.ok()?.clone();
        result
    }

    /// Wait until every loop tracked right now has ended.
    pub async fn wait_idle(&self) {
        let receivers: Vec<watch::Receiver<Option<PollOutcome>>> = {
            let pollers = self.pollers.lock().await;
            pollers.values().map(|task| task.outcome.clone()).collect()
        };

        futures::future::join_all(receivers.into_iter().map(|mut rx| async move {
            let _ = rx.wait_for(Option::is_some).await;
        }))
        .await;
    }

    /// Abort every loop. Records keep their last written state.
    pub async fn stop_all(&self) {
        let mut pollers = self.pollers.lock().await;
        for (_, task) in pollers.drain() {
            task.handle.abort();
        }
    }
}

/// One job's status loop. Ends on a terminal remote state, on the first
/// failed request, or when the local record stops accepting updates.
pub async fn poll_job(
    api: &dyn JobApi,
    store: &JobStore,
    job_id: &str,
    interval: Duration,
) -> PollOutcome {
    loop {
        let response = match api.get_job_status(job_id).await {
            Ok(response) => response,
            Err(e) => {
                let message = format!("Failed to fetch status: {}", e);
                warn!("Job {}: {}", job_id, message);
                return match store.update_failed(job_id, &message).await {
                    Ok(true) => PollOutcome::Failed(message),
                    Ok(false) => detached(store, job_id),
                    Err(e) => PollOutcome::StoreError(e.to_string()),
                };
            }
        };

        debug!(
            "Job {}: {} {:.0}% {}",
            job_id,
            response.status,
            response.progress * 100.0,
            response.current_line
        );

        match response.status {
            DownloadStatus::Completed => {
                let result_file = response.result_file.unwrap_or_default();
                info!("Job {} completed: {}", job_id, result_file);
                return match store
                    .update_completed(job_id, response.progress, &response.current_line, &result_file)
                    .await
                {
                    Ok(true) => PollOutcome::Completed,
                    Ok(false) => detached(store, job_id),
                    Err(e) => PollOutcome::StoreError(e.to_string()),
                };
            }
            DownloadStatus::Failed => {
                let error = response
                    .error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
                info!("Job {} failed: {}", job_id, error);
                return match store.update_failed(job_id, &error).await {
                    Ok(true) => PollOutcome::Failed(error),
                    Ok(false) => detached(store, job_id),
                    Err(e) => PollOutcome::StoreError(e.to_string()),
                };
            }
            status => {
                match store
                    .update_progress(job_id, status, response.progress, &response.current_line)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => return detached(store, job_id),
                    Err(e) => {
                        warn!("Job {}: could not record progress: {}", job_id, e);
                        return PollOutcome::StoreError(e.to_string());
                    }
                }
                if status == DownloadStatus::Cancelled {
                    return PollOutcome::Cancelled;
                }
            }
        }

        tokio::time::sleep(interval).await;
    }
}

/// The record went terminal or vanished behind our back, possibly from
/// another process sharing the database file. Live queries in this
/// process never saw that write, so wake them to re-read.
fn detached(store: &JobStore, job_id: &str) -> PollOutcome {
    debug!("Job {} no longer accepts updates, stopping", job_id);
    store.touch();
    PollOutcome::Detached
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::api::{
        DownloadRequest, DownloadResponse, HealthStatus, JobProgressResponse, Platform, Quality,
        TrackMetadata,
    };
    use crate::downloader::JobRecord;
    use crate::errors::AppError;

    /// Scripted backend: each status call pops the next reply; the last
    /// reply repeats once the script is exhausted.
    pub(crate) struct ScriptedApi {
        replies: StdMutex<VecDeque<Result<JobProgressResponse>>>,
        last: StdMutex<Option<JobProgressResponse>>,
        pub(crate) status_calls: StdMutex<usize>,
        pub(crate) metadata: Option<TrackMetadata>,
        pub(crate) job_id: String,
        pub(crate) submitted: StdMutex<Vec<DownloadRequest>>,
        /// When set, `start_download` answers 500 with this detail.
        pub(crate) reject_submit: Option<String>,
    }

    impl ScriptedApi {
        pub(crate) fn new(replies: Vec<Result<JobProgressResponse>>) -> Self {
            Self {
                replies: StdMutex::new(replies.into()),
                last: StdMutex::new(None),
                status_calls: StdMutex::new(0),
                metadata: None,
                job_id: "job-1".to_string(),
                submitted: StdMutex::new(Vec::new()),
                reject_submit: None,
            }
        }

        pub(crate) fn calls(&self) -> usize {
            *self.status_calls.lock().unwrap()
        }
    }

    pub(crate) fn reply(status: &str, progress: f32, line: &str) -> Result<JobProgressResponse> {
        Ok(JobProgressResponse {
            job_id: None,
            status: DownloadStatus::from_str_lossy(status),
            progress,
            current_line: line.to_string(),
            error: None,
            result_file: None,
        })
    }

    pub(crate) fn completed(file: &str) -> Result<JobProgressResponse> {
        let mut response = reply("completed", 1.0, "Download completed")?;
        response.result_file = Some(file.to_string());
        Ok(response)
    }

    pub(crate) fn status_error() -> Result<JobProgressResponse> {
        Err(AppError::remote(503, "connection reset"))
    }

    #[async_trait::async_trait]
    impl JobApi for ScriptedApi {
        async fn health(&self) -> Result<HealthStatus> {
            Ok(HealthStatus::new())
        }

        async fn fetch_metadata(&self, platform: Platform, id: &str) -> Result<TrackMetadata> {
            self.metadata
                .clone()
                .ok_or_else(|| AppError::remote(404, format!("{} {} not found", platform, id)))
        }

        async fn start_download(&self, request: &DownloadRequest) -> Result<DownloadResponse> {
            self.submitted.lock().unwrap().push(request.clone());
            if let Some(detail) = &self.reject_submit {
                return Err(AppError::remote(500, detail.clone()));
            }
            Ok(DownloadResponse {
                job_id: self.job_id.clone(),
                status: Some("started".to_string()),
                message: None,
            })
        }

        async fn get_job_status(&self, _job_id: &str) -> Result<JobProgressResponse> {
            *self.status_calls.lock().unwrap() += 1;
            let next = self.replies.lock().unwrap().pop_front();
            match next {
                Some(Ok(response)) => {
                    *self.last.lock().unwrap() = Some(response.clone());
                    Ok(response)
                }
                Some(Err(e)) => Err(e),
                None => self
                    .last
                    .lock()
                    .unwrap()
                    .clone()
                    .ok_or_else(|| AppError::remote(404, "Job not found")),
            }
        }
    }

    pub(crate) async fn seeded_store(job_id: &str) -> JobStore {
        let store = JobStore::open_in_memory().await.unwrap();
        let record = JobRecord::new_pending(
            job_id,
            "https://youtube.com/watch?v=1",
            Quality::M4a320,
            Platform::Youtube,
            None,
        );
        store.put(&record).await.unwrap();
        store
    }

    fn sync(api: Arc<ScriptedApi>, store: JobStore) -> JobSynchronizer {
        JobSynchronizer::with_poll_interval(api, store, Duration::from_millis(5))
    }

    #[tokio::test]
    async fn processing_then_completed_is_recorded() {
        let api = Arc::new(ScriptedApi::new(vec![
            reply("processing", 0.3, "Downloading"),
            completed("x.m4a"),
        ]));
        let store = seeded_store("job-1").await;
        let sync = sync(api.clone(), store.clone());

        assert!(sync.start_polling("job-1").await);
        assert_eq!(sync.wait_for("job-1").await, Some(PollOutcome::Completed));

        let record = store.get("job-1").await.unwrap().unwrap();
        assert_eq!(record.status, DownloadStatus::Completed);
        assert_eq!(record.progress, 1.0);
        assert_eq!(record.result_file.as_deref(), Some("x.m4a"));
        assert!(record.error.is_none());
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test]
    async fn status_error_fails_after_one_attempt() {
        let api = Arc::new(ScriptedApi::new(vec![status_error(), status_error()]));
        let store = seeded_store("job-1").await;
        let sync = sync(api.clone(), store.clone());

        sync.start_polling("job-1").await;
        let outcome = sync.wait_for("job-1").await;
        assert!(matches!(outcome, Some(PollOutcome::Failed(_))));

        let record = store.get("job-1").await.unwrap().unwrap();
        assert_eq!(record.status, DownloadStatus::Failed);
        let error = record.error.unwrap();
        assert!(error.starts_with("Failed to fetch status:"));
        assert!(error.contains("connection reset"));
        assert!(record.result_file.is_none());
        assert_eq!(api.calls(), 1);
    }

    #[tokio::test]
    async fn remote_failure_without_message_uses_default() {
        let api = Arc::new(ScriptedApi::new(vec![reply("failed", 0.2, "Error")]));
        let store = seeded_store("job-1").await;
        let sync = sync(api, store.clone());

        sync.start_polling("job-1").await;
        assert_eq!(
            sync.wait_for("job-1").await,
            Some(PollOutcome::Failed(UNKNOWN_ERROR.to_string()))
        );
        let record = store.get("job-1").await.unwrap().unwrap();
        assert_eq!(record.error.as_deref(), Some(UNKNOWN_ERROR));
    }

    #[tokio::test]
    async fn unknown_remote_status_keeps_polling_as_pending() {
        let api = Arc::new(ScriptedApi::new(vec![
            reply("warming_up", 0.0, "Queued"),
            completed("y.opus"),
        ]));
        let store = seeded_store("job-1").await;
        let mut live = store.subscribe_status(DownloadStatus::Completed);
        assert!(live.next().await.unwrap().is_empty());

        let sync = sync(api.clone(), store.clone());
        sync.start_polling("job-1").await;

        let done = live.next().await.unwrap();
        let done = if done.is_empty() { live.next().await.unwrap() } else { done };
        assert_eq!(done[0].result_file.as_deref(), Some("y.opus"));
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test]
    async fn second_start_is_ignored_while_running() {
        let api = Arc::new(ScriptedApi::new(vec![reply("processing", 0.1, "Working")]));
        let store = seeded_store("job-1").await;
        let sync = JobSynchronizer::with_poll_interval(api, store, Duration::from_secs(60));

        assert!(sync.start_polling("job-1").await);
        assert!(!sync.start_polling("job-1").await);
        assert!(sync.is_polling("job-1").await);
        assert_eq!(sync.active_count().await, 1);

        sync.stop_all().await;
        assert!(!sync.is_polling("job-1").await);
    }

    #[tokio::test]
    async fn cancel_wins_over_running_loop() {
        let api = Arc::new(ScriptedApi::new(vec![reply("processing", 0.5, "Working")]));
        let store = seeded_store("job-1").await;
        let sync = sync(api, store.clone());

        sync.start_polling("job-1").await;
        assert!(sync.cancel("job-1").await.unwrap());
        assert_eq!(sync.wait_for("job-1").await, Some(PollOutcome::Detached));

        let record = store.get("job-1").await.unwrap().unwrap();
        assert_eq!(record.status, DownloadStatus::Cancelled);
        assert_eq!(record.current_line, "Download cancelled");
    }

    #[tokio::test]
    async fn deleted_job_is_not_resurrected() {
        let api = Arc::new(ScriptedApi::new(vec![reply("processing", 0.5, "Working")]));
        let store = seeded_store("job-1").await;
        let sync = sync(api, store.clone());

        sync.start_polling("job-1").await;
        store.delete("job-1").await.unwrap();
        assert_eq!(sync.wait_for("job-1").await, Some(PollOutcome::Detached));
        assert!(store.get("job-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remote_cancelled_ends_loop() {
        let api = Arc::new(ScriptedApi::new(vec![reply("cancelled", 0.0, "Cancelled")]));
        let store = seeded_store("job-1").await;
        let sync = sync(api.clone(), store.clone());

        sync.start_polling("job-1").await;
        assert_eq!(sync.wait_for("job-1").await, Some(PollOutcome::Cancelled));
        assert_eq!(
            store.get("job-1").await.unwrap().unwrap().status,
            DownloadStatus::Cancelled
        );
        assert_eq!(api.calls(), 1);
    }

    #[tokio::test]
    async fn retry_resumes_polling_failed_job() {
        let api = Arc::new(ScriptedApi::new(vec![
            status_error(),
            reply("processing", 0.6, "Converting"),
            completed("z.m4a"),
        ]));
        let store = seeded_store("job-1").await;
        let sync = sync(api.clone(), store.clone());

        sync.start_polling("job-1").await;
        sync.wait_for("job-1").await;
        assert_eq!(store.get("job-1").await.unwrap().unwrap().status, DownloadStatus::Failed);

        assert!(sync.retry("job-1").await.unwrap());
        assert_eq!(sync.wait_for("job-1").await, Some(PollOutcome::Completed));

        let record = store.get("job-1").await.unwrap().unwrap();
        assert_eq!(record.status, DownloadStatus::Completed);
        assert!(record.error.is_none());
        assert_eq!(api.calls(), 3);
        assert!(api.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn retry_is_noop_unless_failed() {
        let api = Arc::new(ScriptedApi::new(vec![completed("a.m4a")]));
        let store = seeded_store("job-1").await;
        let sync = sync(api.clone(), store.clone());

        assert!(!sync.retry("job-1").await.unwrap());
        assert_eq!(store.get("job-1").await.unwrap().unwrap().status, DownloadStatus::Pending);
        assert_eq!(api.calls(), 0);

        sync.start_polling("job-1").await;
        sync.wait_for("job-1").await;
        assert!(!sync.retry("job-1").await.unwrap());
        assert_eq!(store.get("job-1").await.unwrap().unwrap().status, DownloadStatus::Completed);
    }

    #[tokio::test]
    async fn resume_active_skips_terminal_jobs() {
        let api = Arc::new(ScriptedApi::new(vec![completed("a.m4a")]));
        let store = seeded_store("live").await;
        let mut done = JobRecord::new_pending("done", "u", Quality::Best, Platform::Youtube, None);
        done.status = DownloadStatus::Completed;
        done.result_file = Some("old.m4a".to_string());
        store.put(&done).await.unwrap();

        let sync = sync(api, store.clone());
        assert_eq!(sync.resume_active().await.unwrap(), 1);
        sync.wait_idle().await;
        assert_eq!(store.get("live").await.unwrap().unwrap().status, DownloadStatus::Completed);
        assert_eq!(store.get("done").await.unwrap().unwrap().result_file.as_deref(), Some("old.m4a"));
    }
}
