use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{Form, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

use crate::cli::ServeArgs;
use crate::dataset::FieldOptions;
use crate::filter::{FilterError, SearchOutcome, Selection, match_records, narrow};
use crate::loader::load_snapshot_file;
use crate::publish::SnapshotPublisher;
use crate::record::Record;
use crate::refresh::Refresher;
use crate::source::{HttpSnapshotSource, RecordSource};
use crate::storage::{SnapshotMeta, StoragePaths, file_present_nonempty};
use crate::store::{DatasetStore, SnapshotInfo, SnapshotOrigin};

pub const NO_RESULTS_MESSAGE: &str = "No results found.";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<DatasetStore>,
    pub source: String,
    pub meta_path: Option<std::path::PathBuf>,
}

pub async fn run(opts: ServeArgs) -> anyhow::Result<()> {
    let paths = StoragePaths::new(&opts.source.data_dir);
    paths.ensure_dirs().context("create data directories")?;

    let store = Arc::new(DatasetStore::new());
    warm_start(&store, &paths).await;

    let source = HttpSnapshotSource::from_args(&opts.source, &paths)?;
    let source_label = source.describe();
    let sink = SnapshotPublisher::from_args(&opts.publish, &paths)?;
    let refresher = Arc::new(Refresher::new(
        source,
        sink,
        Arc::clone(&store),
        Duration::from_secs(opts.fetch_timeout_secs.max(1)),
        Duration::from_secs(opts.persist_timeout_secs.max(1)),
    ));

    // Eager first refresh so a fresh deploy has data before it takes traffic.
    refresher.tick().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let period = Duration::from_secs(opts.refresh_interval_hours.max(1) * 60 * 60);
    let scheduler = refresher.spawn(period, shutdown_rx);

    let state = AppState {
        store,
        source: source_label,
        meta_path: Some(paths.meta_path.clone()),
    };

    let addr: SocketAddr = format!("{}:{}", opts.host, opts.port)
        .parse()
        .context("parse host:port")?;

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received Ctrl-C, shutting down");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    scheduler.await.context("refresh scheduler task")?;
    Ok(())
}

/// Loads the last persisted snapshot, if any, so the API has data while the first fetch runs.
async fn warm_start(store: &DatasetStore, paths: &StoragePaths) {
    if !file_present_nonempty(&paths.snapshot_csv) {
        tracing::info!(
            "No cached snapshot at {}; starting empty",
            paths.snapshot_csv.display()
        );
        return;
    }

    let path = paths.snapshot_csv.clone();
    let loaded = tokio::task::spawn_blocking(move || load_snapshot_file(&path)).await;
    match loaded {
        Ok(Ok(records)) => {
            let info = store.replace(records, SnapshotOrigin::StartupCache);
            tracing::info!("Loaded {} cached records", info.record_count);
        }
        Ok(Err(e)) => tracing::error!("Ignoring unreadable cached snapshot: {e:#}"),
        Err(e) => tracing::error!("Cached snapshot load task failed: {e}"),
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(api_health))
        .route("/api/stats", get(api_stats))
        .route("/api/options", get(api_options))
        .route("/api/search", get(api_search_query).post(api_search_form))
        .layer(cors)
        .with_state(state)
}

struct ApiError(FilterError);

impl From<FilterError> for ApiError {
    fn from(e: FilterError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.0.to_string() });
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

async fn api_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    source: String,
    snapshot: SnapshotInfo,
    persisted: Option<SnapshotMeta>,
}

async fn api_stats(State(st): State<AppState>) -> impl IntoResponse {
    Json(StatsResponse {
        source: st.source.clone(),
        snapshot: st.store.snapshot_info(),
        persisted: st.meta_path.as_deref().and_then(SnapshotMeta::read),
    })
}

#[derive(Debug, Serialize)]
struct OptionsResponse {
    selection: BTreeMap<&'static str, String>,
    options: FieldOptions,
}

fn echo_selection(selection: &Selection) -> BTreeMap<&'static str, String> {
    selection
        .constraints()
        .map(|(f, v)| (f.name(), v.to_string()))
        .collect()
}

/// Cascading dropdown state; with no parameters this is the reset form.
async fn api_options(
    State(st): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<OptionsResponse>, ApiError> {
    let selection = Selection::from_pairs(params)?;
    let snapshot = st.store.get();
    Ok(Json(OptionsResponse {
        options: narrow(&snapshot.dataset, &selection),
        selection: echo_selection(&selection),
    }))
}

#[derive(Debug, Serialize)]
struct SearchRecord<'a> {
    #[serde(flatten)]
    record: &'a Record,
    pbs_url: String,
}

#[derive(Debug, Serialize)]
struct SearchResponse<'a> {
    total: usize,
    records: Vec<SearchRecord<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
}

async fn api_search_query(
    State(st): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    search(&st, params)
}

async fn api_search_form(
    State(st): State<AppState>,
    Form(params): Form<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    search(&st, params)
}

fn search(st: &AppState, params: Vec<(String, String)>) -> Result<Response, ApiError> {
    let selection = Selection::from_pairs(params)?;
    let snapshot = st.store.get();
    let outcome = match_records(&snapshot.dataset, &selection);
    let message = match outcome {
        SearchOutcome::NoResults => Some(NO_RESULTS_MESSAGE),
        SearchOutcome::Found(_) => None,
    };
    let body = SearchResponse {
        total: outcome.len(),
        records: outcome
            .records()
            .iter()
            .map(|&record| SearchRecord {
                record,
                pbs_url: record.pbs_url(),
            })
            .collect(),
        message,
    };
    Ok(Json(body).into_response())
}
