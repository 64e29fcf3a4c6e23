use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow};
use futures_util::StreamExt;
use reqwest::header::{HeaderValue, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;

use crate::cli::SourceArgs;
use crate::constants::{MAX_BACKOFF, USER_AGENT};
use crate::loader::load_snapshot_file;
use crate::record::Record;
use crate::storage::{StoragePaths, tmp_path};

/// Produces the latest full record set from upstream.
pub trait RecordSource: Send + Sync + 'static {
    /// Human-readable location, used in logs and `meta.json`.
    fn describe(&self) -> String;

    fn fetch_latest(&self) -> impl Future<Output = anyhow::Result<Vec<Record>>> + Send;
}

/// Downloads a snapshot file over HTTP and parses it.
pub struct HttpSnapshotSource {
    client: Client,
    url: String,
    dest: PathBuf,
    max_retries: u32,
}

impl HttpSnapshotSource {
    pub fn new(client: Client, url: String, dest: PathBuf, max_retries: u32) -> Self {
        Self {
            client,
            url,
            dest,
            max_retries,
        }
    }

    pub fn from_args(opts: &SourceArgs, paths: &StoragePaths) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(opts.request_timeout_secs.max(1)))
            .build()
            .context("Failed creating HTTP client")?;
        let url = opts.resolved_url();
        let dest = paths.download_dir.join(file_name_from_url(&url)?);
        Ok(Self::new(client, url, dest, opts.max_retries))
    }
}

impl RecordSource for HttpSnapshotSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn fetch_latest(&self) -> anyhow::Result<Vec<Record>> {
        download_with_retries(&self.client, &self.url, &self.dest, self.max_retries).await?;

        let dest = self.dest.clone();
        tokio::task::spawn_blocking(move || load_snapshot_file(&dest))
            .await
            .context("snapshot parse task failed")?
    }
}

/// Last path segment of `url`, without query string or fragment.
pub fn file_name_from_url(url: &str) -> anyhow::Result<String> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let trimmed = without_query.trim().trim_end_matches('/');
    let file_name = trimmed
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && !name.contains(':'))
        .context("Could not derive filename from URL")?;
    Ok(file_name.to_string())
}

pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

pub fn parse_retry_after(value: Option<&HeaderValue>) -> Option<Duration> {
    let value = value?.to_str().ok()?.trim();
    let secs = value.parse::<u64>().ok()?;
    Some(Duration::from_secs(secs))
}

pub fn truncate_for_log(text: &str) -> String {
    let trimmed = text.trim();
    let max_len = 300usize;
    if trimmed.len() <= max_len {
        return trimmed.to_string();
    }
    let mut cut = max_len;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &trimmed[..cut])
}

async fn download_with_retries(
    client: &Client,
    url: &str,
    dest: &Path,
    max_retries: u32,
) -> anyhow::Result<()> {
    let attempts = max_retries.max(1);
    let mut backoff = Duration::from_secs(1);

    for attempt in 1..=attempts {
        match client.get(url).send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    return stream_to_file(resp, url, dest).await;
                }

                let retry_after = parse_retry_after(resp.headers().get(RETRY_AFTER));
                let body = resp.text().await.unwrap_or_default();
                if is_retryable_status(status) && attempt < attempts {
                    tracing::warn!(
                        "GET {url} returned {status} (attempt {attempt}/{attempts}); retrying"
                    );
                    tokio::time::sleep(retry_after.unwrap_or(backoff).min(MAX_BACKOFF)).await;
                    backoff = (backoff + backoff).min(MAX_BACKOFF);
                    continue;
                }

                return Err(anyhow!(
                    "Download failed ({}) for {} after {} attempt(s). Body: {}",
                    status,
                    url,
                    attempt,
                    truncate_for_log(&body)
                ));
            }
            Err(err) => {
                if attempt == attempts {
                    return Err(anyhow!("GET {url} failed after {attempts} attempt(s): {err}"));
                }
                tracing::warn!("GET {url} failed (attempt {attempt}/{attempts}): {err}");
                tokio::time::sleep(backoff).await;
                backoff = (backoff + backoff).min(MAX_BACKOFF);
            }
        }
    }

    Err(anyhow!("Unexpected download flow for {url}"))
}

async fn stream_to_file(resp: reqwest::Response, url: &str, dest: &Path) -> anyhow::Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create {}", parent.display()))?;
    }

    tracing::info!("Downloading {} -> {}", url, dest.display());
    let tmp = tmp_path(dest, "part");
    let mut file = tokio::fs::File::create(&tmp)
        .await
        .with_context(|| format!("create {}", tmp.display()))?;

    let mut downloaded: u64 = 0;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.with_context(|| format!("read body chunk from {url}"))?;
        downloaded += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp, dest)
        .await
        .with_context(|| format!("rename {} -> {}", tmp.display(), dest.display()))?;
    tracing::info!("Downloaded {} KiB from {}", downloaded / 1024, url);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_ignores_query_and_fragment() {
        assert_eq!(
            file_name_from_url("https://hf.co/d/resolve/main/data/train.parquet?download=true")
                .unwrap(),
            "train.parquet"
        );
        assert_eq!(
            file_name_from_url("https://example.org/pbs.csv#top").unwrap(),
            "pbs.csv"
        );
        assert!(file_name_from_url("https://").is_err());
    }

    #[test]
    fn retry_after_seconds() {
        let v = HeaderValue::from_static(" 7 ");
        assert_eq!(parse_retry_after(Some(&v)), Some(Duration::from_secs(7)));
        let date = HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(parse_retry_after(Some(&date)), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = "é".repeat(400);
        let out = truncate_for_log(&long);
        assert!(out.ends_with("..."));
        assert!(out.len() <= 303);
    }

    #[tokio::test]
    async fn unreachable_host_fails_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let client = Client::builder()
            .timeout(Duration::from_millis(500))
            .build()
            .unwrap();
        let source = HttpSnapshotSource::new(
            client,
            "http://127.0.0.1:9/records.csv".to_string(),
            dir.path().join("records.csv"),
            1,
        );
        assert!(source.fetch_latest().await.is_err());
        assert!(!dir.path().join("records.csv").exists());
    }
}
