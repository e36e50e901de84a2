use log::debug;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::api::http_pool::HttpPool;
use crate::api::{
    DownloadRequest, DownloadResponse, HealthStatus, JobApi, JobProgressResponse, Platform,
    TrackMetadata,
};
use crate::config::{normalize_base_url, AppConfig};
use crate::errors::{AppError, Result};

/// HTTP client for the download backend.
#[derive(Debug, Clone)]
pub struct ApiClient {
    pool: HttpPool,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str, pool: HttpPool) -> Result<Self> {
        let normalized = normalize_base_url(base_url);
        let base_url = Url::parse(&normalized)
            .map_err(|e| AppError::Validation(format!("Invalid base URL '{}': {}", base_url, e)))?;
        Ok(Self { pool, base_url })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(&config.base_url, HttpPool::from_config(config)?)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| AppError::Validation(format!("Invalid endpoint '{}': {}", path, e)))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        debug!("🌐 [API] GET {}", url);
        let response = self.pool.get_client().get(url).send().await?;
        read_json(response).await
    }
}

#[async_trait::async_trait]
impl JobApi for ApiClient {
    async fn health(&self) -> Result<HealthStatus> {
        self.get_json("").await
    }

    async fn fetch_metadata(&self, platform: Platform, id: &str) -> Result<TrackMetadata> {
        if !platform.has_metadata_endpoint() {
            return Err(AppError::Unsupported(format!(
                "{} has no metadata endpoint",
                platform
            )));
        }
        let path = format!(
            "api/metadata/{}/{}",
            platform.as_str(),
            urlencoding::encode(id)
        );
        self.get_json(&path).await
    }

    async fn start_download(&self, request: &DownloadRequest) -> Result<DownloadResponse> {
        let url = self.endpoint("api/download")?;
        debug!("🌐 [API] POST {} ({}, {})", url, request.url, request.quality);
        let response = self
            .pool
            .get_client()
            .post(url)
            .json(request)
            .send()
            .await?;
        read_json(response).await
    }

    async fn get_job_status(&self, job_id: &str) -> Result<JobProgressResponse> {
        let path = format!("api/job/{}", urlencoding::encode(job_id));
        self.get_json(&path).await
    }
}

/// Decode a 2xx JSON body; anything else becomes `AppError::Remote`.
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(AppError::remote(status.as_u16(), error_message(status, &body)));
    }
    if body.trim().is_empty() {
        return Err(AppError::remote(status.as_u16(), "Empty response body"));
    }

    serde_json::from_str(&body).map_err(|e| {
        AppError::remote(status.as_u16(), format!("Unreadable response body: {}", e))
    })
}

/// Prefer the backend's `detail` field, fall back to the reason phrase.
fn error_message(status: StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("detail").cloned());

    match detail {
        Some(serde_json::Value::String(detail)) if !detail.is_empty() => detail,
        Some(serde_json::Value::Null) | None => status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string(),
        Some(other) => other.to_string(),
    }
}
