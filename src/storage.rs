use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct StoragePaths {
    pub download_dir: PathBuf,
    pub snapshot_dir: PathBuf,
    pub snapshot_csv: PathBuf,
    pub meta_path: PathBuf,
}

impl StoragePaths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir: PathBuf = data_dir.into();
        let download_dir = data_dir.join("download");
        let snapshot_dir = data_dir.join("snapshot");
        let snapshot_csv = snapshot_dir.join("records.csv");
        let meta_path = data_dir.join("meta.json");

        Self {
            download_dir,
            snapshot_dir,
            snapshot_csv,
            meta_path,
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.download_dir)?;
        std::fs::create_dir_all(&self.snapshot_dir)?;
        Ok(())
    }
}

/// Provenance of the last persisted snapshot, written next to it as `meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub source: String,
    pub record_count: usize,
    pub persisted_at_unix: i64,
}

impl SnapshotMeta {
    pub fn read(path: &Path) -> Option<Self> {
        if !file_present_nonempty(path) {
            return None;
        }
        let s = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&s).ok()
    }

    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        let body = serde_json::to_string_pretty(self).context("serialize snapshot meta")?;
        write_atomically(path, body.as_bytes())
    }
}

pub fn file_present_nonempty(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(m) => m.is_file() && m.len() > 0,
        Err(_) => false,
    }
}

/// Sibling path used while a file is being written, renamed over the target when complete.
pub fn tmp_path(dest: &Path, suffix: &str) -> PathBuf {
    let fname = dest
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("download");
    dest.with_file_name(format!("{fname}.{suffix}"))
}

fn write_atomically(dest: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let tmp = tmp_path(dest, "tmp");
    std::fs::write(&tmp, bytes).with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, dest)
        .with_context(|| format!("rename {} -> {}", tmp.display(), dest.display()))?;
    Ok(())
}
