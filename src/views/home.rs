use std::sync::Arc;

use log::{debug, info};

use crate::api::{DownloadRequest, JobApi, Platform, Quality, TrackMetadata};
use crate::downloader::{JobRecord, JobSynchronizer};
use crate::utils::{detect_platform, extract_id_from_url};

pub const EMPTY_URL_ERROR: &str = "Please enter a URL";
pub const YOUTUBE_METADATA_ERROR: &str =
    "YouTube metadata fetching not supported. Please proceed with download.";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HomeState {
    pub url: String,
    pub selected_quality: Quality,
    pub metadata: Option<TrackMetadata>,
    pub detected_platform: Option<Platform>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub download_started: bool,
    pub job_id: Option<String>,
}

/// Submission screen: URL entry, optional metadata preview, start.
pub struct HomeViewModel {
    api: Arc<dyn JobApi>,
    sync: Arc<JobSynchronizer>,
    state: HomeState,
}

impl HomeViewModel {
    pub fn new(api: Arc<dyn JobApi>, sync: Arc<JobSynchronizer>) -> Self {
        Self {
            api,
            sync,
            state: HomeState::default(),
        }
    }

    pub fn state(&self) -> &HomeState {
        &self.state
    }

    pub fn update_url(&mut self, url: &str) {
        self.state.url = url.to_string();
        self.state.error = None;
    }

    pub fn update_quality(&mut self, quality: Quality) {
        self.state.selected_quality = quality;
    }

    pub async fn fetch_metadata(&mut self) {
        let url = self.state.url.trim().to_string();
        if url.is_empty() {
            self.state.error = Some(EMPTY_URL_ERROR.to_string());
            return;
        }

        self.state.is_loading = true;
        self.state.error = None;

        let platform = detect_platform(&url);
        if !platform.has_metadata_endpoint() {
            self.state.is_loading = false;
            self.state.error = Some(YOUTUBE_METADATA_ERROR.to_string());
            return;
        }

        let id = extract_id_from_url(&url, platform);
        debug!("Fetching {} metadata for {}", platform, id);
        match self.api.fetch_metadata(platform, &id).await {
            Ok(metadata) => {
                self.state.metadata = Some(metadata);
                self.state.detected_platform = Some(platform);
                self.state.error = None;
            }
            Err(e) => {
                self.state.error = Some(format!("Failed to fetch metadata: {}", e));
            }
        }
        self.state.is_loading = false;
    }

    /// Submit the URL, store a pending record and start polling it.
    pub async fn start_download(&mut self) {
        let url = self.state.url.trim().to_string();
        if url.is_empty() {
            self.state.error = Some(EMPTY_URL_ERROR.to_string());
            return;
        }

        self.state.is_loading = true;
        self.state.error = None;

        let quality = self.state.selected_quality;
        let request = DownloadRequest {
            url: url.clone(),
            quality,
            metadata: self.state.metadata.clone(),
        };

        let response = match self.api.start_download(&request).await {
            Ok(response) => response,
            Err(e) => {
                self.state.is_loading = false;
                self.state.error = Some(format!("Failed to start download: {}", e));
                return;
            }
        };

        let record = JobRecord::new_pending(
            response.job_id.clone(),
            url.as_str(),
            quality,
            detect_platform(&url),
            request.metadata.as_ref(),
        );
        if let Err(e) = self.sync.store().put(&record).await {
            self.state.is_loading = false;
            self.state.error = Some(format!("Failed to start download: {}", e));
            return;
        }

        info!("Started job {} for {}", response.job_id, url);
        self.sync.start_polling(&response.job_id).await;

        self.state.is_loading = false;
        self.state.download_started = true;
        self.state.job_id = Some(response.job_id);
        self.state.error = None;
    }

    pub fn clear_error(&mut self) {
        self.state.error = None;
    }

    /// Back to a blank form, keeping the chosen quality.
    pub fn reset_after_download(&mut self) {
        self.state = HomeState {
            selected_quality: self.state.selected_quality,
            ..HomeState::default()
        };
    }
}
