use std::time::Duration;

pub const HF_BASE: &str = "https://huggingface.co/datasets";
pub const DEFAULT_HF_REPO: &str = "cmcmaster/rheumatology-biologics-dataset";
pub const DEFAULT_HF_SNAPSHOT_PATH: &str = "data/train-00000-of-00001.parquet";
pub const DEFAULT_PUBLISH_PATH: &str = "data/records.csv";

/// Public PBS page for a single item; the item code is appended.
pub const PBS_ITEM_URL_BASE: &str = "https://www.pbs.gov.au/medicine/item";

pub const USER_AGENT: &str = "biologics-helper/0.1";

pub const MAX_BACKOFF: Duration = Duration::from_secs(60);
