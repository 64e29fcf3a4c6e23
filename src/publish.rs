use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use csv::Writer;
use tokio::process::Command;

use crate::cli::PublishArgs;
use crate::loader::REQUIRED_COLUMNS;
use crate::record::Record;
use crate::storage::{SnapshotMeta, StoragePaths, tmp_path};
use crate::store::now_unix_seconds;

/// Durably stores a freshly fetched record set before it goes live.
pub trait SnapshotSink: Send + Sync + 'static {
    fn persist(
        &self,
        records: &[Record],
        source: &str,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

#[derive(Debug, Clone)]
pub struct HubTarget {
    pub token: String,
    pub repo_id: String,
    pub repo_type: String,
    pub path_in_repo: String,
}

/// Writes `snapshot/records.csv` + `meta.json`, then optionally uploads the CSV to the hub.
pub struct SnapshotPublisher {
    snapshot_csv: PathBuf,
    meta_path: PathBuf,
    hub: Option<HubTarget>,
}

impl SnapshotPublisher {
    pub fn new(paths: &StoragePaths, hub: Option<HubTarget>) -> Self {
        Self {
            snapshot_csv: paths.snapshot_csv.clone(),
            meta_path: paths.meta_path.clone(),
            hub,
        }
    }

    pub fn from_args(opts: &PublishArgs, paths: &StoragePaths) -> anyhow::Result<Self> {
        let hub = match opts.publish_repo_id.as_deref() {
            None => None,
            Some(repo_id) => {
                let token = opts
                    .hf_token
                    .clone()
                    .context("Hub publish requested but HF_TOKEN / --hf-token was not provided")?;
                Some(HubTarget {
                    token,
                    repo_id: repo_id.to_string(),
                    repo_type: opts.publish_repo_type.clone(),
                    path_in_repo: opts.publish_path_in_repo.clone(),
                })
            }
        };
        Ok(Self::new(paths, hub))
    }
}

impl SnapshotSink for SnapshotPublisher {
    async fn persist(&self, records: &[Record], source: &str) -> anyhow::Result<()> {
        let owned = records.to_vec();
        let meta = SnapshotMeta {
            source: source.to_string(),
            record_count: records.len(),
            persisted_at_unix: now_unix_seconds(),
        };
        let snapshot_csv = self.snapshot_csv.clone();
        let meta_path = self.meta_path.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            write_snapshot_csv(&owned, &snapshot_csv)?;
            meta.write(&meta_path)
        })
        .await
        .context("snapshot write task failed")??;
        tracing::info!(
            "Wrote {} records to {}",
            records.len(),
            self.snapshot_csv.display()
        );

        if let Some(hub) = &self.hub {
            upload_file_to_hf(&self.snapshot_csv, hub).await?;
        }
        Ok(())
    }
}

/// Writes the snapshot to a temp file and renames it into place, so a crash never leaves a
/// truncated cache behind.
pub fn write_snapshot_csv(records: &[Record], output_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed creating snapshot directory {}", parent.display()))?;
    }

    let tmp = tmp_path(output_path, "tmp");
    let mut writer = Writer::from_path(&tmp)
        .with_context(|| format!("Failed creating temp snapshot CSV {}", tmp.display()))?;
    writer
        .write_record(REQUIRED_COLUMNS)
        .context("Failed writing snapshot CSV header")?;

    for record in records {
        let year = record.schedule_year.to_string();
        writer
            .write_record([
                record.drug.as_str(),
                record.brand.as_str(),
                record.formulation.as_str(),
                record.indication.as_str(),
                record.treatment_phase.as_str(),
                record.hospital_type.as_str(),
                record.pbs_code.as_str(),
                record.streamlined_code.as_deref().unwrap_or(""),
                record.authority_method.as_str(),
                if record.online_application { "true" } else { "false" },
                year.as_str(),
                record.schedule_month.as_str(),
            ])
            .with_context(|| format!("Failed writing snapshot row for {}", record.pbs_code))?;
    }
    writer.flush().context("Failed flushing snapshot CSV")?;
    drop(writer);

    std::fs::rename(&tmp, output_path).with_context(|| {
        format!(
            "Failed moving temp snapshot {} to {}",
            tmp.display(),
            output_path.display()
        )
    })?;
    Ok(())
}

async fn upload_file_to_hf(local_file: &Path, hub: &HubTarget) -> anyhow::Result<()> {
    tracing::info!(
        "Uploading {} -> hf://{}/{} ({})",
        local_file.display(),
        hub.repo_id,
        hub.path_in_repo,
        hub.repo_type
    );

    let python = r#"
import os
import sys

try:
    from huggingface_hub import HfApi
except ImportError:
    print("huggingface_hub is required. Install with: pip install huggingface_hub", file=sys.stderr)
    sys.exit(1)

api = HfApi(token=os.environ["HF_TOKEN"])
api.upload_file(
    path_or_fileobj=os.environ["HF_LOCAL_FILE"],
    path_in_repo=os.environ["HF_PATH_IN_REPO"],
    repo_id=os.environ["HF_REPO_ID"],
    repo_type=os.environ["HF_REPO_TYPE"],
    commit_message="Refresh PBS biologics snapshot",
)
"#;

    let status = Command::new("python3")
        .arg("-c")
        .arg(python)
        .env("HF_TOKEN", &hub.token)
        .env("HF_LOCAL_FILE", local_file.to_string_lossy().to_string())
        .env("HF_PATH_IN_REPO", &hub.path_in_repo)
        .env("HF_REPO_ID", &hub.repo_id)
        .env("HF_REPO_TYPE", &hub.repo_type)
        .kill_on_drop(true)
        .status()
        .await
        .context("Failed starting python3 for Hugging Face upload")?;

    if !status.success() {
        bail!("Hugging Face upload failed for {}", local_file.display());
    }
    Ok(())
}
