use std::sync::Arc;

use log::warn;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::downloader::{JobRecord, JobSynchronizer};
use crate::errors::Result;
use crate::views::{to_items, DownloadItem};

/// Live list of pending/processing jobs. Every snapshot makes sure each
/// listed job has a poll loop.
pub struct ActiveDownloads {
    sync: Arc<JobSynchronizer>,
    items: watch::Receiver<Vec<DownloadItem>>,
    task: JoinHandle<()>,
}

impl ActiveDownloads {
    pub async fn new(sync: Arc<JobSynchronizer>) -> Result<Self> {
        let mut live = sync.store().subscribe_active();
        let initial = live.next().await?;
        ensure_polling(&sync, &initial).await;

        let (tx, items) = watch::channel(to_items(initial));
        let poller = sync.clone();
        let task = tokio::spawn(async move {
            loop {
                let records = match live.next().await {
                    Ok(records) => records,
                    Err(e) => {
                        warn!("Active downloads refresh failed: {}", e);
                        continue;
                    }
                };
                ensure_polling(&poller, &records).await;
                if tx.send(to_items(records)).is_err() {
                    break;
                }
            }
        });

        Ok(Self { sync, items, task })
    }

    pub fn items(&self) -> Vec<DownloadItem> {
        self.items.borrow().clone()
    }

    /// Wait for the next published list.
    pub async fn changed(&mut self) -> Option<Vec<DownloadItem>> {
        self.items.changed().await.ok()?;
        Some(self.items.borrow_and_update().clone())
    }

    pub async fn retry(&self, job_id: &str) -> Result<bool> {
        self.sync.retry(job_id).await
    }

    pub async fn cancel(&self, job_id: &str) -> Result<bool> {
        self.sync.cancel(job_id).await
    }
}

impl Drop for ActiveDownloads {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn ensure_polling(sync: &JobSynchronizer, records: &[JobRecord]) {
    for record in records {
        sync.start_polling(&record.job_id).await;
    }
}
