pub mod active;
pub mod history;
pub mod home;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::{Platform, Quality};
use crate::downloader::{DownloadStatus, JobRecord};
use crate::utils::format_progress;

pub use active::ActiveDownloads;
pub use history::History;
pub use home::{HomeState, HomeViewModel};

/// What a list row shows for one job.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DownloadItem {
    pub job_id: String,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub cover_image_url: Option<String>,
    pub quality: Quality,
    pub platform: Platform,
    pub status: DownloadStatus,
    pub progress: f32,
    pub current_line: String,
    pub error: Option<String>,
    pub result_file: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl DownloadItem {
    pub fn progress_text(&self) -> String {
        format_progress(self.progress)
    }

    /// One-line summary used by the terminal front end.
    pub fn summary(&self) -> String {
        let detail = match self.status {
            DownloadStatus::Completed => self.result_file.clone().unwrap_or_default(),
            DownloadStatus::Failed => self.error.clone().unwrap_or_default(),
            _ => self.current_line.clone(),
        };
        format!(
            "{} {} - {} [{} {}] {}",
            self.job_id,
            self.artist,
            self.title,
            self.status,
            self.progress_text(),
            detail
        )
    }
}

impl From<JobRecord> for DownloadItem {
    fn from(record: JobRecord) -> Self {
        Self {
            job_id: record.job_id,
            title: record.title,
            artist: record.artist,
            album: record.album,
            cover_image_url: record.cover_image_url,
            quality: record.quality,
            platform: record.platform,
            status: record.status,
            progress: record.progress,
            current_line: record.current_line,
            error: record.error,
            result_file: record.result_file,
            timestamp: record.timestamp,
        }
    }
}

pub(crate) fn to_items(records: Vec<JobRecord>) -> Vec<DownloadItem> {
    records.into_iter().map(DownloadItem::from).collect()
}
