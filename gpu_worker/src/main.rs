use ap_queue::{QueueClient, QueueError, TRANSCRIBE_QUEUE};
use ap_storage::BlobStore;
use serde::Deserialize;
use std::path::PathBuf;
use types::{FailedJob, TranscribeJob};

mod inference;
mod process;

use inference::{ClassificationEngine, TranscriptionEngine};
use process::GpuContext;

// How long a pop waits for the next item while assembling a micro-batch.
const ASSEMBLY_WAIT_SECS: f64 = 5.0;

#[derive(Deserialize, Debug, Clone)]
struct Config {
    blob_endpoint: String,
    blob_access_key: String,
    blob_secret_key: String,
    blob_bucket: String,

    queue_host: String,
    #[serde(default = "default_queue_port")]
    queue_port: u16,

    db_host: String,
    #[serde(default = "default_db_port")]
    db_port: u16,
    db_name: String,
    db_user: String,
    db_password: String,

    #[serde(default = "default_scratch_root")]
    scratch_root: PathBuf,
    #[serde(default = "default_models_root")]
    models_root: PathBuf,
    #[serde(default = "default_micro_batch")]
    gpu_micro_batch: usize,
    #[serde(default)]
    delete_archive_on_finalise: bool,
}

fn default_queue_port() -> u16 {
    6379
}

fn default_db_port() -> u16 {
    5432
}

fn default_scratch_root() -> PathBuf {
    PathBuf::from("/data/scratch")
}

fn default_models_root() -> PathBuf {
    PathBuf::from("/mnt/models")
}

fn default_micro_batch() -> usize {
    32
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ap_app::init_tracing();

    let config: Config = ap_app::load_config()?;

    // Model load dominates startup and can take minutes; readiness is
    // entering the pop loop.
    tracing::info!("initialising inference engines");
    let transcriber = TranscriptionEngine::load(&config.models_root)?;
    let classifier = ClassificationEngine::load(&config.models_root)?;
    match inference::resident_memory_mb() {
        Some(mb) => tracing::info!("models loaded, resident memory: {mb} MB"),
        None => tracing::info!("models loaded"),
    }

    let database_url = ap_db::database_url(
        &config.db_host,
        config.db_port,
        &config.db_name,
        &config.db_user,
        &config.db_password,
    );
    let pool = ap_db::create_pool(&database_url).await?;
    ap_db::check_connectivity(&pool).await?;

    let store = BlobStore::connect(
        &config.blob_endpoint,
        &config.blob_access_key,
        &config.blob_secret_key,
        &config.blob_bucket,
    )
    .await;
    store.check_connectivity().await?;

    let mut queue = QueueClient::connect(&config.queue_host, config.queue_port)?;

    std::fs::create_dir_all(&config.scratch_root)?;

    let shutdown = ap_app::shutdown::watch();

    let ctx = GpuContext {
        pool: &pool,
        store: &store,
        scratch_root: &config.scratch_root,
        delete_archive_on_finalise: config.delete_archive_on_finalise,
    };

    tracing::info!("gpu worker started, waiting for transcribe jobs");

    while !shutdown.is_requested() {
        let batch = match collect_micro_batch(&mut queue, config.gpu_micro_batch, &shutdown) {
            Ok(batch) => batch,
            Err(error) => {
                tracing::warn!("queue pop failed: {error}; reconnecting");
                match QueueClient::connect(&config.queue_host, config.queue_port) {
                    Ok(reconnected) => queue = reconnected,
                    Err(connect_error) => {
                        tracing::error!("queue reconnect failed: {connect_error}")
                    }
                }
                continue;
            }
        };

        if batch.is_empty() {
            continue;
        }

        tracing::info!("processing micro-batch of {} clips", batch.len());

        let mut succeeded = 0;
        let mut failed = 0;
        for job in &batch {
            if process::process_item(&ctx, &mut queue, &transcriber, &classifier, job).await {
                succeeded += 1;
            } else {
                failed += 1;
            }
        }

        tracing::info!("micro-batch complete: {succeeded} succeeded, {failed} failed");
    }

    tracing::info!("gpu worker shutting down");
    Ok(())
}

/// Assemble up to `size` jobs, stopping early once a pop window passes with
/// no new job. Micro-batches are a scheduling unit only; each item is
/// processed independently.
fn collect_micro_batch(
    queue: &mut QueueClient,
    size: usize,
    shutdown: &ap_app::shutdown::Shutdown,
) -> Result<Vec<TranscribeJob>, QueueError> {
    let mut batch = Vec::new();

    while batch.len() < size && !shutdown.is_requested() {
        let Some((_, payload)) = queue.blocking_pop(&[TRANSCRIBE_QUEUE], ASSEMBLY_WAIT_SECS)?
        else {
            break;
        };

        match serde_json::from_str::<TranscribeJob>(&payload) {
            Ok(job) => batch.push(job),
            Err(error) => {
                tracing::error!("invalid transcribe job payload: {error}");
                let poison = FailedJob {
                    original_job: serde_json::Value::String(payload),
                    error: format!("invalid-payload:{error}"),
                    worker: "gpu".to_string(),
                    timestamp: types::utc_timestamp(),
                };
                if let Err(push_error) = queue.push_failed(&poison) {
                    tracing::error!("failed to park poison payload: {push_error}");
                }
            }
        }
    }

    Ok(batch)
}
