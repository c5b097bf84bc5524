use ap_queue::{QueueClient, UNPACK_QUEUE};
use ap_storage::BlobStore;
use serde::Deserialize;
use std::path::PathBuf;
use types::{FailedJob, UnpackJob};

mod archive;
mod process;

const POP_TIMEOUT_SECS: f64 = 5.0;

#[derive(Deserialize, Debug, Clone)]
struct Config {
    blob_endpoint: String,
    blob_access_key: String,
    blob_secret_key: String,
    blob_bucket: String,

    queue_host: String,
    #[serde(default = "default_queue_port")]
    queue_port: u16,

    #[serde(default = "default_scratch_root")]
    scratch_root: PathBuf,
    #[serde(default = "default_opus_bitrate")]
    opus_bitrate: String,
    #[serde(default = "default_transcode_parallelism")]
    transcode_parallelism: usize,
    #[serde(default = "default_audio_extensions")]
    audio_extensions: String,
}

fn default_queue_port() -> u16 {
    6379
}

fn default_scratch_root() -> PathBuf {
    PathBuf::from("/data/scratch")
}

fn default_opus_bitrate() -> String {
    "32k".to_string()
}

fn default_transcode_parallelism() -> usize {
    4
}

fn default_audio_extensions() -> String {
    ".mp3".to_string()
}

impl Config {
    /// Normalised extension set: lowercased, dots stripped.
    fn audio_extension_list(&self) -> Vec<String> {
        self.audio_extensions
            .split(',')
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ap_app::init_tracing();

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

    std::fs::create_dir_all(&config.scratch_root)?;

    let shutdown = ap_app::shutdown::watch();

    let extensions = config.audio_extension_list();
    let ctx = process::UnpackContext {
        store: &store,
        scratch_root: &config.scratch_root,
        opus_bitrate: &config.opus_bitrate,
        parallelism: config.transcode_parallelism,
        audio_extensions: &extensions,
    };

    tracing::info!("unpack worker started, waiting for jobs");

    let mut total_batches = 0u64;
    let mut total_converted = 0u64;

    while !shutdown.is_requested() {
        let popped = match queue.blocking_pop(&[UNPACK_QUEUE], POP_TIMEOUT_SECS) {
            Ok(popped) => popped,
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

        let Some((_, payload)) = popped else {
            continue;
        };

        let job: UnpackJob = match serde_json::from_str(&payload) {
            Ok(job) => job,
            Err(error) => {
                tracing::error!("invalid JSON in unpack job: {error}");
                let poison = FailedJob {
                    original_job: serde_json::Value::String(payload),
                    error: format!("invalid-payload:{error}"),
                    worker: "unpack".to_string(),
                    timestamp: types::utc_timestamp(),
                };
                if let Err(push_error) = queue.push_failed(&poison) {
                    tracing::error!("failed to park poison payload: {push_error}");
                }
                continue;
            }
        };

        tracing::info!("received job for batch {}", job.batch_id);

        match process::process_job(&ctx, &mut queue, &job).await {
            Ok(outcome) => {
                total_batches += 1;
                total_converted += outcome.converted as u64;
                tracing::info!(
                    "batch {}: {} found, {} converted, {} skipped, {} queued | totals: {total_batches} batches, {total_converted} files",
                    job.batch_id,
                    outcome.clips_found,
                    outcome.converted,
                    outcome.skipped,
                    outcome.queued
                );
            }
            Err(error) => {
                tracing::error!("batch {} failed: {error}", job.batch_id);

                let failed = FailedJob {
                    original_job: serde_json::to_value(&job)
                        .unwrap_or(serde_json::Value::Null),
                    error: error.error_string(),
                    worker: "unpack".to_string(),
                    timestamp: types::utc_timestamp(),
                };
                if let Err(push_error) = queue.push_failed(&failed) {
                    tracing::error!("failed to record failed batch: {push_error}");
                }
            }
        }
    }

    tracing::info!("unpack worker shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_extensions(raw: &str) -> Config {
        Config {
            blob_endpoint: "http://localhost:9000".into(),
            blob_access_key: "key".into(),
            blob_secret_key: "secret".into(),
            blob_bucket: "audio-pipeline".into(),
            queue_host: "localhost".into(),
            queue_port: default_queue_port(),
            scratch_root: default_scratch_root(),
            opus_bitrate: default_opus_bitrate(),
            transcode_parallelism: default_transcode_parallelism(),
            audio_extensions: raw.into(),
        }
    }

    #[test]
    fn extension_list_is_normalised() {
        let config = config_with_extensions(".mp3, .WAV ,flac,");
        assert_eq!(config.audio_extension_list(), vec!["mp3", "wav", "flac"]);
    }

    #[test]
    fn default_extension_is_mp3() {
        let config = config_with_extensions(&default_audio_extensions());
        assert_eq!(config.audio_extension_list(), vec!["mp3"]);
    }
}
