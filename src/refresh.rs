//! Fetch → persist → swap, once eagerly and then on a fixed period.
//!
//! A failed cycle is logged and leaves the active dataset untouched; the next tick tries again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::cli::RefreshArgs;
use crate::publish::{SnapshotPublisher, SnapshotSink};
use crate::source::{HttpSnapshotSource, RecordSource};
use crate::storage::StoragePaths;
use crate::store::{DatasetStore, SnapshotInfo, SnapshotOrigin};

#[derive(Debug)]
pub enum CycleOutcome {
    Replaced(SnapshotInfo),
    /// Another cycle was still running.
    Skipped,
}

pub struct Refresher<S, P> {
    source: S,
    sink: P,
    store: Arc<DatasetStore>,
    fetch_timeout: Duration,
    persist_timeout: Duration,
    in_flight: AtomicBool,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<S: RecordSource, P: SnapshotSink> Refresher<S, P> {
    pub fn new(
        source: S,
        sink: P,
        store: Arc<DatasetStore>,
        fetch_timeout: Duration,
        persist_timeout: Duration,
    ) -> Self {
        Self {
            source,
            sink,
            store,
            fetch_timeout,
            persist_timeout,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<DatasetStore> {
        &self.store
    }

    /// One full refresh. Errors are returned to the caller; the store is only touched on
    /// success.
    pub async fn run_cycle(&self) -> anyhow::Result<CycleOutcome> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Ok(CycleOutcome::Skipped);
        }
        let _guard = InFlight(&self.in_flight);

        let source = self.source.describe();
        tracing::info!("Refreshing dataset from {source}");

        let records = tokio::time::timeout(self.fetch_timeout, self.source.fetch_latest())
            .await
            .map_err(|_| anyhow!("fetch timed out after {:?}", self.fetch_timeout))?
            .with_context(|| format!("fetch from {source}"))?;
        if records.is_empty() {
            bail!("fetch from {source} returned no records; keeping current dataset");
        }

        // A hung upload must not hold the in-flight guard forever.
        tokio::time::timeout(self.persist_timeout, self.sink.persist(&records, &source))
            .await
            .map_err(|_| anyhow!("persist timed out after {:?}", self.persist_timeout))?
            .context("persist snapshot")?;

        let info = self.store.replace(records, SnapshotOrigin::Refresh);
        Ok(CycleOutcome::Replaced(info))
    }

    /// `run_cycle` with failures logged instead of returned. Never panics the caller.
    pub async fn tick(&self) -> Option<SnapshotInfo> {
        match self.run_cycle().await {
            Ok(CycleOutcome::Replaced(info)) => {
                tracing::info!(
                    "Dataset updated: {} records (generation {})",
                    info.record_count,
                    info.generation
                );
                Some(info)
            }
            Ok(CycleOutcome::Skipped) => {
                tracing::warn!("Refresh already in progress; skipping this tick");
                None
            }
            Err(e) => {
                tracing::error!("Refresh failed, keeping current dataset: {e:#}");
                None
            }
        }
    }

    /// Runs `tick` every `period`, starting one period from now, until `shutdown` flips to true
    /// or its sender is dropped. Shutdown also abandons a cycle that is still running; the
    /// store is only replaced at the very end of a cycle, so nothing is left half-applied.
    pub fn spawn(
        self: &Arc<Self>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let me = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                let stop = tokio::select! {
                    _ = interval.tick() => {
                        tokio::select! {
                            _ = me.tick() => false,
                            _ = shutdown_requested(&mut shutdown) => true,
                        }
                    }
                    _ = shutdown_requested(&mut shutdown) => true,
                };
                if stop {
                    tracing::info!("Refresh scheduler stopped");
                    break;
                }
            }
        })
    }
}

/// Completes once shutdown is signalled or the sender is gone. A change back to false keeps
/// waiting.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if shutdown.changed().await.is_err() || *shutdown.borrow_and_update() {
            return;
        }
    }
}

/// `refresh` subcommand: one cycle, failures reported as a non-zero exit.
pub async fn run(opts: RefreshArgs) -> anyhow::Result<()> {
    let paths = StoragePaths::new(&opts.source.data_dir);
    paths.ensure_dirs().context("create data directories")?;

    let source = HttpSnapshotSource::from_args(&opts.source, &paths)?;
    let sink = SnapshotPublisher::from_args(&opts.publish, &paths)?;
    let refresher = Refresher::new(
        source,
        sink,
        Arc::new(DatasetStore::new()),
        Duration::from_secs(opts.fetch_timeout_secs.max(1)),
        Duration::from_secs(opts.persist_timeout_secs.max(1)),
    );

    match refresher.run_cycle().await? {
        CycleOutcome::Replaced(info) => {
            tracing::info!(
                "Fetched and persisted {} records to {}",
                info.record_count,
                paths.snapshot_csv.display()
            );
        }
        CycleOutcome::Skipped => bail!("a refresh was already in progress"),
    }
    Ok(())
}
