pub mod manager;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::{Platform, Quality, TrackMetadata};

pub use manager::JobSynchronizer;
pub use store::{JobStore, LiveQuery};

/// Placeholder for title/artist when no metadata was fetched.
pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum DownloadStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadStatus {
    pub const ALL: [DownloadStatus; 5] = [
        DownloadStatus::Pending,
        DownloadStatus::Processing,
        DownloadStatus::Completed,
        DownloadStatus::Failed,
        DownloadStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Processing => "processing",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Cancelled => "cancelled",
        }
    }

    /// Unrecognized values map to `Pending`, never to an error.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => DownloadStatus::Pending,
            "processing" => DownloadStatus::Processing,
            "completed" => DownloadStatus::Completed,
            "failed" => DownloadStatus::Failed,
            "cancelled" => DownloadStatus::Cancelled,
            _ => DownloadStatus::Pending,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed | DownloadStatus::Failed | DownloadStatus::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

impl From<String> for DownloadStatus {
    fn from(s: String) -> Self {
        DownloadStatus::from_str_lossy(&s)
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A download job as kept in local history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
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
    pub download_url: String,
    pub timestamp: DateTime<Utc>,
}

impl JobRecord {
    /// Fresh `Pending` record for a job the backend just accepted.
    pub fn new_pending(
        job_id: impl Into<String>,
        download_url: impl Into<String>,
        quality: Quality,
        platform: Platform,
        metadata: Option<&TrackMetadata>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            title: metadata
                .map(|m| m.title.clone())
                .unwrap_or_else(|| UNKNOWN.to_string()),
            artist: metadata
                .map(TrackMetadata::artist_line)
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| UNKNOWN.to_string()),
            album: metadata.and_then(|m| m.album.clone()),
            cover_image_url: metadata.and_then(|m| m.thumbnail_url.clone()),
            quality,
            platform: metadata.map(|m| m.platform).unwrap_or(platform),
            status: DownloadStatus::Pending,
            progress: 0.0,
            current_line: "Download started".to_string(),
            error: None,
            result_file: None,
            download_url: download_url.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_and_falls_back() {
        for status in DownloadStatus::ALL {
            assert_eq!(DownloadStatus::from_str_lossy(status.as_str()), status);
        }
        assert_eq!(DownloadStatus::from_str_lossy("COMPLETED"), DownloadStatus::Completed);
        assert_eq!(DownloadStatus::from_str_lossy("paused"), DownloadStatus::Pending);
        assert_eq!(DownloadStatus::from_str_lossy(""), DownloadStatus::Pending);
    }

    #[test]
    fn terminal_states() {
        assert!(!DownloadStatus::Pending.is_terminal());
        assert!(!DownloadStatus::Processing.is_terminal());
        assert!(DownloadStatus::Completed.is_terminal());
        assert!(DownloadStatus::Failed.is_terminal());
        assert!(DownloadStatus::Cancelled.is_terminal());
    }

    #[test]
    fn new_pending_uses_metadata_or_placeholders() {
        let bare = JobRecord::new_pending("j1", "https://youtu.be/x", Quality::Best, Platform::Youtube, None);
        assert_eq!(bare.title, UNKNOWN);
        assert_eq!(bare.artist, UNKNOWN);
        assert_eq!(bare.status, DownloadStatus::Pending);
        assert_eq!(bare.current_line, "Download started");

        let meta = TrackMetadata {
            id: "abc".to_string(),
            title: "Song".to_string(),
            artists: vec!["A".to_string(), "B".to_string()],
            album: Some("Album".to_string()),
            thumbnail_url: Some("https://img".to_string()),
            duration: None,
            platform: Platform::Spotify,
        };
        let rich = JobRecord::new_pending(
            "j2",
            "https://open.spotify.com/track/abc",
            Quality::M4a320,
            Platform::Youtube,
            Some(&meta),
        );
        assert_eq!(rich.title, "Song");
        assert_eq!(rich.artist, "A, B");
        assert_eq!(rich.cover_image_url.as_deref(), Some("https://img"));
        assert_eq!(rich.platform, Platform::Spotify);
    }
}
