use clap::{Parser, Subcommand};
use log::LevelFilter;

use spowlo::commands::{self, parse_quality, parse_status, AppState};
use spowlo::config::AppConfig;
use spowlo::{DownloadStatus, Quality};

#[derive(Parser)]
#[command(name = "spowlo")]
#[command(version)]
#[command(about = "Submit music downloads to a spowlo backend and track them locally")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Backend base URL, overrides the config file and SPOWLO_BASE_URL
    #[arg(long, global = true, value_name = "URL")]
    base_url: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Check that the backend is reachable
    Health,

    /// Show track metadata for a Spotify or JioSaavn URL
    Metadata { url: String },

    /// Submit a URL for download
    #[command(alias = "dl")]
    Download {
        url: String,

        /// m4a_320, opus_160 or best
        #[arg(short, long, value_parser = parse_quality)]
        quality: Option<Quality>,

        /// Skip the metadata lookup before submitting
        #[arg(long)]
        no_metadata: bool,

        /// Follow the job until it finishes
        #[arg(short, long)]
        wait: bool,
    },

    /// Resume polling of active jobs and show their progress
    Watch,

    /// List past downloads, newest first
    History {
        #[arg(short, long, value_parser = parse_status)]
        status: Option<DownloadStatus>,

        /// Case-insensitive match on title or artist
        #[arg(long)]
        search: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Poll a failed job again
    Retry { job_id: String },

    /// Mark a job as cancelled locally
    Cancel { job_id: String },

    /// Remove a job from history
    Delete { job_id: String },

    /// Remove every job from history
    Clear,

    /// Number of jobs in history
    Count,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .parse_default_env()
        .init();

    let mut config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load configuration: {}", e);
            AppConfig::default()
        }
    };
    if let Some(base_url) = &cli.base_url {
        config.set_base_url(base_url);
    }
    log::debug!("Using backend {}", config.base_url);

    let state = AppState::build(config).await?;

    let result = match &cli.command {
        Command::Health => commands::health(&state).await,
        Command::Metadata { url } => commands::metadata(&state, url).await,
        Command::Download {
            url,
            quality,
            no_metadata,
            wait,
        } => commands::download(&state, url, *quality, !no_metadata, *wait).await,
        Command::Watch => commands::watch(&state).await,
        Command::History {
            status,
            search,
            json,
        } => commands::history(&state, *status, search.as_deref(), *json).await,
        Command::Retry { job_id } => commands::retry(&state, job_id).await,
        Command::Cancel { job_id } => commands::cancel(&state, job_id).await,
        Command::Delete { job_id } => commands::delete(&state, job_id).await,
        Command::Clear => commands::clear(&state).await,
        Command::Count => commands::count(&state).await,
    };

    state.sync.stop_all().await;
    state.store.close().await;
    result
}
