use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::info;

use crate::api::{ApiClient, JobApi, Quality};
use crate::config::AppConfig;
use crate::downloader::{DownloadStatus, JobStore, JobSynchronizer};
use crate::security::InputValidator;
use crate::utils::{detect_platform, extract_id_from_url, format_duration};
use crate::views::{ActiveDownloads, DownloadItem, History, HomeViewModel};

/// Everything a command needs, built once per process.
pub struct AppState {
    pub config: AppConfig,
    pub api: Arc<dyn JobApi>,
    pub store: JobStore,
    pub sync: Arc<JobSynchronizer>,
    pub validator: InputValidator,
}

impl AppState {
    pub async fn build(config: AppConfig) -> anyhow::Result<Self> {
        let api: Arc<dyn JobApi> =
            Arc::new(ApiClient::from_config(&config).context("Failed to build API client")?);
        let db_path = config.database_path();
        let store = JobStore::open(&db_path)
            .await
            .with_context(|| format!("Failed to open download history at {:?}", db_path))?;
        Ok(Self::with_parts(config, api, store))
    }

    pub fn with_parts(config: AppConfig, api: Arc<dyn JobApi>, store: JobStore) -> Self {
        let sync = Arc::new(JobSynchronizer::new(api.clone(), store.clone()));
        Self {
            config,
            api,
            store,
            sync,
            validator: InputValidator::new(),
        }
    }
}

pub async fn health(state: &AppState) -> anyhow::Result<()> {
    let status = state
        .api
        .health()
        .await
        .with_context(|| format!("Backend at {} is not reachable", state.config.base_url))?;
    println!("Backend at {} is up", state.config.base_url);
    let mut keys: Vec<_> = status.keys().collect();
    keys.sort();
    for key in keys {
        println!("  {}: {}", key, status[key]);
    }
    Ok(())
}

pub async fn metadata(state: &AppState, url: &str) -> anyhow::Result<()> {
    state.validator.validate_url(url)?;
    let mut home = HomeViewModel::new(state.api.clone(), state.sync.clone());
    home.update_url(url);
    home.fetch_metadata().await;

    if let Some(error) = &home.state().error {
        bail!("{}", error);
    }
    if let Some(metadata) = &home.state().metadata {
        println!("Title:    {}", metadata.title);
        println!("Artists:  {}", metadata.artist_line());
        if let Some(album) = &metadata.album {
            println!("Album:    {}", album);
        }
        if let Some(duration) = metadata.duration {
            println!("Duration: {}", format_duration(duration));
        }
        println!("Platform: {}", metadata.platform);
        println!(
            "Track id: {}",
            extract_id_from_url(url.trim(), detect_platform(url))
        );
    }
    Ok(())
}

pub async fn download(
    state: &AppState,
    url: &str,
    quality: Option<Quality>,
    with_metadata: bool,
    wait: bool,
) -> anyhow::Result<()> {
    state.validator.validate_url(url)?;

    let mut home = HomeViewModel::new(state.api.clone(), state.sync.clone());
    home.update_url(url);
    home.update_quality(quality.unwrap_or(state.config.default_quality));

    if with_metadata && detect_platform(url).has_metadata_endpoint() {
        home.fetch_metadata().await;
        if let Some(error) = home.state().error.clone() {
            // Metadata is optional; the backend resolves it on its own.
            println!("{}", error);
            home.clear_error();
        }
    }

    home.start_download().await;
    if let Some(error) = &home.state().error {
        bail!("{}", error);
    }

    let job_id = home.state().job_id.clone().unwrap_or_default();
    println!(
        "Started job {} ({})",
        job_id,
        home.state().selected_quality.label()
    );

    if wait {
        follow_job(state, &job_id).await?;
    } else {
        println!("Run `spowlo watch` to follow its progress");
    }
    home.reset_after_download();
    Ok(())
}

/// Resume polling for every active job and render until none remain.
pub async fn watch(state: &AppState) -> anyhow::Result<()> {
    state.sync.resume_active().await?;
    let mut active = ActiveDownloads::new(state.sync.clone()).await?;
    let mut items = active.items();
    if items.is_empty() {
        println!("No active downloads");
        return Ok(());
    }

    let multi = MultiProgress::new();
    let mut bars: HashMap<String, ProgressBar> = HashMap::new();

    loop {
        for item in &items {
            let bar = bars
                .entry(item.job_id.clone())
                .or_insert_with(|| multi.add(new_bar(&item.title)));
            update_bar(bar, item);
        }

        let finished: Vec<String> = bars
            .keys()
            .filter(|id| !items.iter().any(|item| &item.job_id == *id))
            .cloned()
            .collect();
        for job_id in finished {
            if let Some(bar) = bars.remove(&job_id) {
                let record = state.store.get(&job_id).await?;
                finish_bar(&bar, record.map(DownloadItem::from).as_ref());
            }
        }

        if items.is_empty() {
            break;
        }

        tokio::select! {
            next = active.changed() => match next {
                Some(next) => items = next,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, jobs keep their last known state");
                break;
            }
        }
    }
    Ok(())
}

pub async fn history(
    state: &AppState,
    status: Option<DownloadStatus>,
    search: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let history = History::new(state.store.clone()).await?;
    let mut items = history.filter_by_status(status);
    if let Some(query) = search {
        state.validator.validate_search_query(query)?;
        items = crate::views::history::search(&items, query);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }
    if items.is_empty() {
        println!("No downloads");
    }
    for item in &items {
        println!(
            "{}  {}",
            item.timestamp.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"),
            item.summary()
        );
    }
    Ok(())
}

pub async fn retry(state: &AppState, job_id: &str) -> anyhow::Result<()> {
    state.validator.validate_job_id(job_id)?;
    if !state.sync.retry(job_id).await? {
        bail!("Job {} is not in a failed state", job_id);
    }
    println!("Retrying job {}", job_id);
    follow_job(state, job_id).await
}

pub async fn cancel(state: &AppState, job_id: &str) -> anyhow::Result<()> {
    state.validator.validate_job_id(job_id)?;
    if state.sync.cancel(job_id).await? {
        println!("Cancelled job {}", job_id);
    } else {
        println!("No job {}", job_id);
    }
    Ok(())
}

pub async fn delete(state: &AppState, job_id: &str) -> anyhow::Result<()> {
    state.validator.validate_job_id(job_id)?;
    let history = History::new(state.store.clone()).await?;
    if history.delete(job_id).await? {
        println!("Deleted job {}", job_id);
    } else {
        println!("No job {}", job_id);
    }
    Ok(())
}

pub async fn clear(state: &AppState) -> anyhow::Result<()> {
    let history = History::new(state.store.clone()).await?;
    let removed = history.clear_all().await?;
    println!("Removed {} download(s)", removed);
    Ok(())
}

pub async fn count(state: &AppState) -> anyhow::Result<()> {
    println!("{}", state.store.count().await?);
    Ok(())
}

/// Render one job's progress until it reaches a terminal state.
async fn follow_job(state: &AppState, job_id: &str) -> anyhow::Result<()> {
    state.sync.start_polling(job_id).await;
    let mut live = state.store.subscribe_all();
    let mut bar: Option<ProgressBar> = None;

    loop {
        let next = tokio::select! {
            next = live.next() => next?,
            _ = tokio::signal::ctrl_c() => {
                info!("Stopped following {}, it will resume on the next `watch`", job_id);
                return Ok(());
            }
        };

        let item = next
            .into_iter()
            .find(|record| record.job_id == job_id)
            .map(DownloadItem::from);
        let bar = bar.get_or_insert_with(|| {
            new_bar(item.as_ref().map(|i| i.title.as_str()).unwrap_or(job_id))
        });

        match item {
            Some(item) if item.status.is_active() => update_bar(bar, &item),
            Some(item) => {
                finish_bar(bar, Some(&item));
                if item.status == DownloadStatus::Failed {
                    bail!("{}", item.error.unwrap_or_default());
                }
                return Ok(());
            }
            None => {
                finish_bar(bar, None);
                return Ok(());
            }
        }
    }
}

fn new_bar(title: &str) -> ProgressBar {
    let bar = ProgressBar::new(100);
    let style = ProgressStyle::with_template("{prefix:20!} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    bar.set_style(style);
    bar.set_prefix(title.to_string());
    bar.enable_steady_tick(Duration::from_millis(200));
    bar
}

fn update_bar(bar: &ProgressBar, item: &DownloadItem) {
    bar.set_prefix(format!("{} - {}", item.artist, item.title));
    bar.set_position((item.progress.clamp(0.0, 1.0) * 100.0).round() as u64);
    bar.set_message(item.current_line.clone());
}

fn finish_bar(bar: &ProgressBar, item: Option<&DownloadItem>) {
    let message = match item {
        Some(item) => match item.status {
            DownloadStatus::Completed => {
                bar.set_position(100);
                format!("done: {}", item.result_file.clone().unwrap_or_default())
            }
            DownloadStatus::Failed => format!("failed: {}", item.error.clone().unwrap_or_default()),
            status => status.to_string(),
        },
        None => "removed".to_string(),
    };
    bar.finish_with_message(message);
}

pub fn parse_status(s: &str) -> Result<DownloadStatus, String> {
    DownloadStatus::ALL
        .into_iter()
        .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
        .ok_or_else(|| {
            format!(
                "unknown status '{}', expected one of: pending, processing, completed, failed, cancelled",
                s
            )
        })
}

pub fn parse_quality(s: &str) -> Result<Quality, String> {
    s.parse::<Quality>().map_err(|e| e.to_string())
}
