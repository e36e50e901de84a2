pub mod api;
pub mod commands;
pub mod config;
pub mod downloader;
pub mod errors;
pub mod security;
pub mod utils;
pub mod views;

pub use api::{ApiClient, JobApi, Platform, Quality, TrackMetadata};
pub use downloader::{DownloadStatus, JobRecord, JobStore, JobSynchronizer};
pub use errors::{AppError, Result};
