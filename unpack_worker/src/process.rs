use ap_queue::{QueueClient, QueueError, TRANSCRIBE_QUEUE};
use ap_storage::{cleanup_scratch, create_scratch, BlobStore, ScratchError, StorageError};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use types::{TranscribeJob, UnpackJob};

use crate::archive::{self, ExtractError};

#[derive(Error, Debug)]
pub enum UnpackError {
    #[error(transparent)]
    Scratch(#[from] ScratchError),
    #[error("archive download failed: {0}")]
    Download(StorageError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("no audio clips survived extraction and transcoding")]
    EmptyBatch,
    #[error("failed to seed batch ledger: {0}")]
    Ledger(QueueError),
    #[error("failed to enqueue transcribe jobs: {0}")]
    Queue(QueueError),
}

impl UnpackError {
    /// Error string for the `failed` queue entry: a stable tag, with detail
    /// appended where there is any.
    pub fn error_string(&self) -> String {
        match self {
            UnpackError::Scratch(ScratchError::Collision { .. }) => {
                format!("scratch-collision:{self}")
            }
            UnpackError::Scratch(e) => format!("scratch-io:{e}"),
            UnpackError::Download(e) => format!("download-failed:{e}"),
            UnpackError::Extract(ExtractError::UnknownFormat) => {
                "unknown-archive-format".to_string()
            }
            UnpackError::Extract(ExtractError::PathTraversal(entry)) => {
                format!("path-traversal:{entry}")
            }
            UnpackError::Extract(e) => format!("extract-failed:{e}"),
            UnpackError::EmptyBatch => "empty-batch".to_string(),
            UnpackError::Ledger(e) => format!("queue-unavailable:{e}"),
            UnpackError::Queue(e) => format!("queue-unavailable:{e}"),
        }
    }
}

#[derive(Debug)]
pub struct UnpackOutcome {
    pub clips_found: usize,
    pub converted: usize,
    pub skipped: usize,
    pub queued: usize,
}

pub struct UnpackContext<'a> {
    pub store: &'a BlobStore,
    pub scratch_root: &'a Path,
    pub opus_bitrate: &'a str,
    pub parallelism: usize,
    pub audio_extensions: &'a [String],
}

struct ConvertedClip {
    opus_path: PathBuf,
    original_filename: String,
}

/// Process one unpack job end to end. On failure the scratch directory is
/// removed; the caller owns routing the job to the `failed` queue.
pub async fn process_job(
    ctx: &UnpackContext<'_>,
    queue: &mut QueueClient,
    job: &UnpackJob,
) -> Result<UnpackOutcome, UnpackError> {
    // A collision aborts before anything is written; the existing scratch
    // belongs to the live batch with the same id and must not be touched.
    let scratch = create_scratch(ctx.scratch_root, &job.batch_id)?;

    match run_pipeline(ctx, queue, job, &scratch).await {
        Ok(outcome) => Ok(outcome),
        Err(error) => {
            cleanup_scratch(ctx.scratch_root, &job.batch_id);
            Err(error)
        }
    }
}

async fn run_pipeline(
    ctx: &UnpackContext<'_>,
    queue: &mut QueueClient,
    job: &UnpackJob,
    scratch: &Path,
) -> Result<UnpackOutcome, UnpackError> {
    let batch_id = &job.batch_id;

    tracing::info!("batch {batch_id}: downloading {}", job.s3_key);
    let archive_path = scratch.join("archive.tar");
    ctx.store
        .get(&job.s3_key, &archive_path)
        .await
        .map_err(UnpackError::Download)?;

    tracing::info!("batch {batch_id}: extracting archive");
    let extraction = tokio::task::spawn_blocking({
        let archive_path = archive_path.clone();
        let scratch = scratch.to_path_buf();
        move || archive::extract_archive(&archive_path, &scratch)
    })
    .await
    .map_err(|join_error| {
        UnpackError::Extract(ExtractError::Io(io::Error::other(join_error)))
    })?;
    extraction?;

    let mut clips = find_audio_files(scratch, ctx.audio_extensions)
        .map_err(|e| UnpackError::Extract(ExtractError::Io(e)))?;
    clips.sort();
    let clips_found = clips.len();

    if clips.is_empty() {
        tracing::warn!("batch {batch_id}: no audio files found in archive");
        return Err(UnpackError::EmptyBatch);
    }

    tracing::info!("batch {batch_id}: found {clips_found} audio files");

    let (converted, skipped) = transcode_all(ctx, &clips, scratch).await;
    tracing::info!(
        "batch {batch_id}: conversion complete, {} succeeded, {skipped} failed",
        converted.len()
    );

    if converted.is_empty() {
        return Err(UnpackError::EmptyBatch);
    }

    // Counters before fan-out: a consumer that sees a transcribe job must
    // always find the ledger present.
    queue
        .seed_ledger(batch_id, converted.len() as i64, &job.s3_key)
        .map_err(UnpackError::Ledger)?;
    tracing::info!(
        "batch {batch_id}: ledger seeded (total={})",
        converted.len()
    );

    let mut queued = 0;
    for clip in &converted {
        let transcribe = TranscribeJob {
            batch_id: batch_id.clone(),
            opus_path: clip.opus_path.display().to_string(),
            original_filename: clip.original_filename.clone(),
        };
        if let Err(error) = queue.push(TRANSCRIBE_QUEUE, &transcribe) {
            // A half-fanned-out batch would never finalise; take the ledger
            // down with us so the stragglers become orphans instead.
            if let Err(delete_error) = queue.delete_ledger(batch_id) {
                tracing::warn!(
                    "batch {batch_id}: failed to roll back ledger: {delete_error}"
                );
            }
            return Err(UnpackError::Queue(error));
        }
        queued += 1;
    }

    tracing::info!("batch {batch_id}: queued {queued} files for transcription");

    // The archive itself is no longer needed; the opus files stay for the
    // GPU worker.
    if let Err(error) = std::fs::remove_file(&archive_path) {
        tracing::warn!("batch {batch_id}: failed to delete archive from scratch: {error}");
    }

    Ok(UnpackOutcome {
        clips_found,
        converted: converted.len(),
        skipped,
        queued,
    })
}

/// Recursively collect files whose extension is in the configured set.
/// Extensions are matched case-insensitively and stored without the dot.
pub fn find_audio_files(dir: &Path, extensions: &[String]) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    collect_audio_files(dir, extensions, &mut found)?;
    Ok(found)
}

fn collect_audio_files(
    dir: &Path,
    extensions: &[String],
    found: &mut Vec<PathBuf>,
) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_audio_files(&path, extensions, found)?;
        } else if let Some(ext) = path.extension() {
            let ext = ext.to_string_lossy().to_ascii_lowercase();
            if extensions.iter().any(|wanted| *wanted == ext) {
                found.push(path);
            }
        }
    }
    Ok(())
}

async fn transcode_all(
    ctx: &UnpackContext<'_>,
    clips: &[PathBuf],
    scratch: &Path,
) -> (Vec<ConvertedClip>, usize) {
    let semaphore = Arc::new(Semaphore::new(ctx.parallelism.max(1)));
    let mut set = JoinSet::new();

    for source in clips {
        let Some(stem) = source.file_stem() else {
            continue;
        };
        let dest = scratch.join(format!("{}.opus", stem.to_string_lossy()));
        let original_filename = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let source = source.clone();
        let bitrate = ctx.opus_bitrate.to_string();
        let semaphore = semaphore.clone();

        set.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return None;
            };

            match ap_ffmpeg::convert_to_opus(&source, &dest, &bitrate).await {
                Ok(()) => {
                    // Reclaim the source immediately; scratch is sized for
                    // one copy of the batch, not two.
                    let _ = std::fs::remove_file(&source);
                    Some(ConvertedClip {
                        opus_path: dest,
                        original_filename,
                    })
                }
                Err(error) => {
                    tracing::warn!("skipping {}: {error}", source.display());
                    None
                }
            }
        });
    }

    let mut converted = Vec::new();
    let mut skipped = 0;

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Some(clip)) => converted.push(clip),
            Ok(None) => skipped += 1,
            Err(join_error) => {
                tracing::warn!("conversion task panicked: {join_error}");
                skipped += 1;
            }
        }
    }

    (converted, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exts(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn finds_audio_files_recursively_and_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp3"), b"x").unwrap();
        std::fs::write(dir.path().join("B.MP3"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/c.mp3"), b"x").unwrap();
        std::fs::write(dir.path().join("nested/meta.parquet"), b"x").unwrap();

        let mut found = find_audio_files(dir.path(), &exts(&["mp3"])).unwrap();
        found.sort();

        let names: Vec<String> = found
            .iter()
            .map(|p| {
                p.strip_prefix(dir.path())
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        assert_eq!(names, vec!["B.MP3", "a.mp3", "nested/c.mp3"]);
    }

    #[test]
    fn extension_set_is_configurable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp3"), b"x").unwrap();
        std::fs::write(dir.path().join("b.wav"), b"x").unwrap();

        let found = find_audio_files(dir.path(), &exts(&["wav"])).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("b.wav"));
    }

    #[test]
    fn error_strings_carry_the_expected_tags() {
        assert_eq!(UnpackError::EmptyBatch.error_string(), "empty-batch");
        assert_eq!(
            UnpackError::Extract(ExtractError::UnknownFormat).error_string(),
            "unknown-archive-format"
        );
        assert!(UnpackError::Extract(ExtractError::PathTraversal("../x".into()))
            .error_string()
            .starts_with("path-traversal:"));
        assert!(UnpackError::Scratch(ScratchError::Collision {
            batch_id: "b1".into()
        })
        .error_string()
        .starts_with("scratch-collision:"));
    }
}
