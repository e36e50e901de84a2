use url::Url;

use crate::errors::{AppError, Result};

/// Checks on user-typed input before it reaches the backend or the store.
#[derive(Debug, Default, Clone, Copy)]
pub struct InputValidator;

impl InputValidator {
    pub fn new() -> Self {
        Self
    }

    /// A track URL: http(s) with a host. The platform is not checked here;
    /// anything unrecognised is submitted as YouTube.
    pub fn validate_url(&self, url: &str) -> Result<()> {
        let url = url.trim();
        if url.is_empty() {
            return Err(AppError::Validation("URL cannot be empty".to_string()));
        }

        let parsed_url =
            Url::parse(url).map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;

        if !matches!(parsed_url.scheme(), "http" | "https") {
            return Err(AppError::Validation(format!(
                "Unsupported scheme: {}. Use http or https",
                parsed_url.scheme()
            )));
        }

        parsed_url
            .host_str()
            .ok_or_else(|| AppError::Validation("URL must have a host".to_string()))?;

        Ok(())
    }

    /// Job ids are opaque backend strings, but they end up in a URL path.
    pub fn validate_job_id(&self, job_id: &str) -> Result<()> {
        if job_id.trim().is_empty() {
            return Err(AppError::Validation("Job id cannot be empty".to_string()));
        }

        if job_id.len() > 128 {
            return Err(AppError::Validation("Job id too long (max 128 characters)".to_string()));
        }

        if job_id.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(AppError::Validation(
                "Job id cannot contain whitespace or control characters".to_string(),
            ));
        }

        Ok(())
    }

    pub fn validate_search_query(&self, query: &str) -> Result<()> {
        if query.len() > 500 {
            return Err(AppError::Validation(
                "Search query too long (max 500 characters)".to_string(),
            ));
        }
        Ok(())
    }
}
