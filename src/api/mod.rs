pub mod client;
pub mod http_pool;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::downloader::DownloadStatus;
use crate::errors::{AppError, Result};

pub use client::ApiClient;

/// Source platform of a submitted URL.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Spotify,
    JioSaavn,
    Youtube,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Spotify => "spotify",
            Platform::JioSaavn => "jiosaavn",
            Platform::Youtube => "youtube",
        }
    }

    /// Lenient parse used for stored rows; anything unknown is YouTube.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "spotify" => Platform::Spotify,
            "jiosaavn" => Platform::JioSaavn,
            _ => Platform::Youtube,
        }
    }

    /// Only Spotify and JioSaavn have a metadata endpoint.
    pub fn has_metadata_endpoint(self) -> bool {
        !matches!(self, Platform::Youtube)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output quality preset understood by the backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Quality {
    #[default]
    #[serde(rename = "m4a_320")]
    M4a320,
    #[serde(rename = "opus_160")]
    Opus160,
    #[serde(rename = "best")]
    Best,
}

impl Quality {
    pub fn as_str(self) -> &'static str {
        match self {
            Quality::M4a320 => "m4a_320",
            Quality::Opus160 => "opus_160",
            Quality::Best => "best",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Quality::M4a320 => "M4A 320kbps",
            Quality::Opus160 => "Opus 160kbps",
            Quality::Best => "Best available",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

impl FromStr for Quality {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "m4a_320" | "m4a" => Ok(Quality::M4a320),
            "opus_160" | "opus" => Ok(Quality::Opus160),
            "best" => Ok(Quality::Best),
            other => Err(AppError::Validation(format!(
                "Unknown quality: {}. Valid qualities: m4a_320, opus_160, best",
                other
            ))),
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackMetadata {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default, alias = "thumbnail_url")]
    pub thumbnail_url: Option<String>,
    /// Seconds.
    #[serde(default)]
    pub duration: Option<u64>,
    pub platform: Platform,
}

impl TrackMetadata {
    pub fn artist_line(&self) -> String {
        self.artists.join(", ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    pub quality: Quality,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TrackMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    #[serde(alias = "job_id")]
    pub job_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Snapshot of a remote job as reported by `GET /api/job/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressResponse {
    #[serde(default, alias = "job_id")]
    pub job_id: Option<String>,
    #[serde(default)]
    pub status: DownloadStatus,
    #[serde(default)]
    pub progress: f32,
    #[serde(default, alias = "current_line")]
    pub current_line: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, alias = "result_file")]
    pub result_file: Option<String>,
}

pub type HealthStatus = HashMap<String, serde_json::Value>;

/// Request/response surface of the download backend. No retries here.
#[async_trait::async_trait]
pub trait JobApi: Send + Sync {
    async fn health(&self) -> Result<HealthStatus>;
    async fn fetch_metadata(&self, platform: Platform, id: &str) -> Result<TrackMetadata>;
    async fn start_download(&self, request: &DownloadRequest) -> Result<DownloadResponse>;
    async fn get_job_status(&self, job_id: &str) -> Result<JobProgressResponse>;
}
