use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::dataset::Dataset;
use crate::record::Record;

/// Where the active dataset came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotOrigin {
    Empty,
    StartupCache,
    Refresh,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotInfo {
    pub generation: u64,
    pub origin: SnapshotOrigin,
    pub record_count: usize,
    pub loaded_at_unix: i64,
}

/// A dataset together with the metadata describing it; swapped as one unit.
#[derive(Debug)]
pub struct Snapshot {
    pub dataset: Dataset,
    pub info: SnapshotInfo,
}

/// Holds the active dataset. Readers never block; `replace` publishes a whole new snapshot with a
/// single pointer swap.
pub struct DatasetStore {
    current: ArcSwap<Snapshot>,
}

impl DatasetStore {
    pub fn new() -> Self {
        let empty = Snapshot {
            dataset: Dataset::empty(),
            info: SnapshotInfo {
                generation: 0,
                origin: SnapshotOrigin::Empty,
                record_count: 0,
                loaded_at_unix: now_unix_seconds(),
            },
        };
        Self {
            current: ArcSwap::from_pointee(empty),
        }
    }

    /// The active snapshot. Holding the returned `Arc` pins that version even if a refresh
    /// swaps in a newer one meanwhile.
    pub fn get(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn snapshot_info(&self) -> SnapshotInfo {
        self.current.load().info.clone()
    }

    /// Builds a dataset from `records` and makes it the active one.
    pub fn replace(&self, records: Vec<Record>, origin: SnapshotOrigin) -> SnapshotInfo {
        let dataset = Dataset::new(records);
        // Single writer: the refresh loop is the only caller outside startup.
        let generation = self.current.load().info.generation + 1;
        let info = SnapshotInfo {
            generation,
            origin,
            record_count: dataset.len(),
            loaded_at_unix: now_unix_seconds(),
        };
        self.current.store(Arc::new(Snapshot {
            dataset,
            info: info.clone(),
        }));
        info
    }
}

impl Default for DatasetStore {
    fn default() -> Self {
        Self::new()
    }
}

pub fn now_unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
