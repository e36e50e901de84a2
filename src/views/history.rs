use log::{info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::downloader::{DownloadStatus, JobStore};
use crate::errors::Result;
use crate::views::{to_items, DownloadItem};

/// Live list of every job, newest first.
pub struct History {
    store: JobStore,
    items: watch::Receiver<Vec<DownloadItem>>,
    task: JoinHandle<()>,
}

impl History {
    pub async fn new(store: JobStore) -> Result<Self> {
        let mut live = store.subscribe_all();
        let (tx, items) = watch::channel(to_items(live.next().await?));

        let task = tokio::spawn(async move {
            loop {
                match live.next().await {
                    Ok(records) => {
                        if tx.send(to_items(records)).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("History refresh failed: {}", e),
                }
            }
        });

        Ok(Self { store, items, task })
    }

    pub fn items(&self) -> Vec<DownloadItem> {
        self.items.borrow().clone()
    }

    pub async fn changed(&mut self) -> Option<Vec<DownloadItem>> {
        self.items.changed().await.ok()?;
        Some(self.items.borrow_and_update().clone())
    }

    pub fn filter_by_status(&self, status: Option<DownloadStatus>) -> Vec<DownloadItem> {
        filter_by_status(&self.items.borrow(), status)
    }

    pub fn search(&self, query: &str) -> Vec<DownloadItem> {
        search(&self.items.borrow(), query)
    }

    pub async fn delete(&self, job_id: &str) -> Result<bool> {
        let deleted = self.store.delete(job_id).await?;
        if deleted {
            info!("Deleted job {} from history", job_id);
        }
        Ok(deleted)
    }

    pub async fn clear_all(&self) -> Result<u64> {
        let removed = self.store.clear().await?;
        info!("Cleared {} job(s) from history", removed);
        Ok(removed)
    }
}

impl Drop for History {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// `None` keeps everything.
pub fn filter_by_status(items: &[DownloadItem], status: Option<DownloadStatus>) -> Vec<DownloadItem> {
    match status {
        Some(status) => items.iter().filter(|i| i.status == status).cloned().collect(),
        None => items.to_vec(),
    }
}

/// Case-insensitive substring match on title or artist. A blank query
/// keeps everything.
pub fn search(items: &[DownloadItem], query: &str) -> Vec<DownloadItem> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return items.to_vec();
    }
    items
        .iter()
        .filter(|i| i.title.to_lowercase().contains(&query) || i.artist.to_lowercase().contains(&query))
        .cloned()
        .collect()
}
