use clap::{Parser, Subcommand};

use crate::constants::{DEFAULT_HF_REPO, DEFAULT_HF_SNAPSHOT_PATH, DEFAULT_PUBLISH_PATH, HF_BASE};

const DEFAULT_DATA_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/data");

#[derive(Parser, Debug)]
#[command(name = "biologics-helper")]
#[command(about = "PBS biologics prescriber helper (cascading filters over a refreshed dataset)", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load the cached snapshot, refresh it on a schedule, and serve the filter API.
    Serve(ServeArgs),
    /// Fetch the latest dataset once and persist it (no server).
    Refresh(RefreshArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct SourceArgs {
    /// Data directory (downloads, persisted snapshot, meta.json).
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: String,

    /// Snapshot URL (.parquet or .csv). Overrides the --hf-* location when set.
    #[arg(long)]
    pub source_url: Option<String>,

    /// Hugging Face dataset repo the snapshot is fetched from.
    #[arg(long, default_value = DEFAULT_HF_REPO)]
    pub hf_repo: String,

    /// Hugging Face revision (branch/tag/commit).
    #[arg(long, default_value = "main")]
    pub hf_revision: String,

    /// Snapshot file path inside the Hugging Face repo.
    #[arg(long, default_value = DEFAULT_HF_SNAPSHOT_PATH)]
    pub hf_path_in_repo: String,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, default_value_t = 120)]
    pub request_timeout_secs: u64,

    /// Max attempts for transient download failures (429/5xx, connection errors).
    #[arg(long, default_value_t = 5)]
    pub max_retries: u32,
}

impl SourceArgs {
    pub fn resolved_url(&self) -> String {
        match self.source_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => hf_resolve_url(&self.hf_repo, &self.hf_revision, &self.hf_path_in_repo),
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct PublishArgs {
    /// Hugging Face token. Upload only happens when --publish-repo-id is also set.
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    pub hf_token: Option<String>,

    /// Hugging Face repo id to publish each fetched snapshot to.
    #[arg(long)]
    pub publish_repo_id: Option<String>,

    /// Hugging Face repo type.
    #[arg(long, default_value = "dataset")]
    pub publish_repo_type: String,

    /// Destination path for the snapshot in the Hugging Face repo.
    #[arg(long, default_value = DEFAULT_PUBLISH_PATH)]
    pub publish_path_in_repo: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub publish: PublishArgs,

    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, default_value_t = 8787)]
    pub port: u16,

    /// Hours between scheduled refreshes.
    #[arg(long, default_value_t = 24)]
    pub refresh_interval_hours: u64,

    /// Upper bound in seconds for one fetch (all retries included).
    #[arg(long, default_value_t = 600)]
    pub fetch_timeout_secs: u64,

    /// Upper bound in seconds for writing the snapshot and the optional hub upload.
    #[arg(long, default_value_t = 600)]
    pub persist_timeout_secs: u64,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RefreshArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub publish: PublishArgs,

    /// Upper bound in seconds for one fetch (all retries included).
    #[arg(long, default_value_t = 600)]
    pub fetch_timeout_secs: u64,

    /// Upper bound in seconds for writing the snapshot and the optional hub upload.
    #[arg(long, default_value_t = 600)]
    pub persist_timeout_secs: u64,
}

pub fn hf_resolve_url(repo: &str, rev: &str, path_in_repo: &str) -> String {
    format!("{HF_BASE}/{repo}/resolve/{rev}/{path_in_repo}")
}
