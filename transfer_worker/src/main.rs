use ap_queue::{QueueClient, UNPACK_QUEUE};
use ap_storage::{archive_object_key, BlobStore};
use serde::Deserialize;
use std::env;
use std::path::Path;
use types::UnpackJob;

#[derive(Deserialize, Debug, Clone)]
struct Config {
    blob_endpoint: String,
    blob_access_key: String,
    blob_secret_key: String,
    blob_bucket: String,

    queue_host: String,
    #[serde(default = "default_queue_port")]
    queue_port: u16,
}

fn default_queue_port() -> u16 {
    6379
}

/// Hand staged archives to the pipeline: mint a batch id, upload the
/// archive, then enqueue exactly one unpack job. The upload always happens
/// first; the archive must be fully persisted before the job is visible.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ap_app::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: transfer_worker <archive.tar> [<archive.tar> ...]");
        std::process::exit(1);
    }

    let config: Config = ap_app::load_config()?;

    let store = BlobStore::connect(
        &config.blob_endpoint,
        &config.blob_access_key,
        &config.blob_secret_key,
        &config.blob_bucket,
    )
    .await;
    store.check_connectivity().await?;

    let mut queue = QueueClient::connect(&config.queue_host, config.queue_port)?;

    let mut submitted = 0u32;
    let mut failed = 0u32;

    for archive in &args[1..] {
        let path = Path::new(archive);
        if !path.is_file() {
            tracing::error!("skipping {archive}: not a file");
            failed += 1;
            continue;
        }

        let batch_id = types::generate_batch_id();
        let s3_key = archive_object_key(&batch_id);

        tracing::info!("uploading {archive} as batch {batch_id}");
        if let Err(error) = store.put(&s3_key, path).await {
            tracing::error!("upload failed for {archive}: {error}");
            failed += 1;
            continue;
        }

        let job = UnpackJob {
            batch_id: batch_id.clone(),
            s3_key,
            original_filename: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| archive.clone()),
            transferred_at: types::utc_timestamp(),
        };

        match queue.push(UNPACK_QUEUE, &job) {
            Ok(()) => {
                tracing::info!("batch {batch_id} queued for unpacking");
                submitted += 1;
            }
            Err(error) => {
                // The archive stays in the store; re-running the transfer
                // will mint a fresh batch id for it.
                tracing::error!("failed to enqueue batch {batch_id}: {error}");
                failed += 1;
            }
        }
    }

    tracing::info!("transfer complete: {submitted} submitted, {failed} failed");
    Ok(())
}
