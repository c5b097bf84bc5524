use ap_db::{NewAudioFile, NewClassification, NewTranscript, Pool};
use ap_queue::QueueClient;
use ap_storage::{cleanup_scratch, processed_object_key, BlobStore};
use chrono::Utc;
use std::path::Path;
use types::{AudioStatus, ClassificationResult, TranscribeJob};

use crate::inference::{parse_classifier_output, Classifier, ClassifierOutput, Transcriber};

pub struct GpuContext<'a> {
    pub pool: &'a Pool,
    pub store: &'a BlobStore,
    pub scratch_root: &'a Path,
    pub delete_archive_on_finalise: bool,
}

/// What a counter observation means for the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Pending,
    Complete,
    /// More increments than clips: a transcribe job was delivered twice.
    Overrun,
}

pub fn completion_state(processed: i64, total: i64) -> Completion {
    if processed < total {
        Completion::Pending
    } else if processed == total {
        Completion::Complete
    } else {
        Completion::Overrun
    }
}

/// Process one transcribe job. Returns whether the clip reached a
/// non-failed terminal state. The batch counter is advanced in every case:
/// a single bad clip must not stall its batch.
pub async fn process_item<T: Transcriber, C: Classifier>(
    ctx: &GpuContext<'_>,
    queue: &mut QueueClient,
    transcriber: &T,
    classifier: &C,
    job: &TranscribeJob,
) -> bool {
    let success = match handle_item(ctx, transcriber, classifier, job).await {
        Ok(status) => {
            tracing::debug!(
                "processed {} with status {}",
                job.opus_path,
                status.as_str()
            );
            status != AudioStatus::Failed
        }
        Err(error) => {
            tracing::error!("failed processing {}: {error}", job.opus_path);
            false
        }
    };

    track_batch_progress(ctx, queue, &job.batch_id).await;

    success
}

async fn handle_item<T: Transcriber, C: Classifier>(
    ctx: &GpuContext<'_>,
    transcriber: &T,
    classifier: &C,
    job: &TranscribeJob,
) -> Result<AudioStatus, ap_db::DbError> {
    let opus_path = Path::new(&job.opus_path);

    let file_size_bytes = std::fs::metadata(opus_path)
        .map(|meta| meta.len() as i64)
        .unwrap_or(0);
    let duration_seconds = ap_ffmpeg::probe_duration(opus_path).await;

    let record = NewAudioFile {
        original_filename: &job.original_filename,
        opus_path: &job.opus_path,
        archive_source: &job.batch_id,
        duration_seconds,
        file_size_bytes,
        status: AudioStatus::Pending.as_str(),
    };
    let audio_id = ap_app::retry::with_backoff(
        "audio record insert",
        ap_app::retry::DEFAULT_ATTEMPTS,
        || ap_db::insert_audio_file(ctx.pool, &record),
    )
    .await?;

    let transcription = match transcriber.transcribe(opus_path).await {
        Ok(transcription) => transcription,
        Err(error) => {
            tracing::warn!("transcription failed for {}: {error}", job.opus_path);
            return Ok(mark_failed(ctx.pool, audio_id).await);
        }
    };

    if let Err(error) = ap_db::insert_transcript(
        ctx.pool,
        &NewTranscript {
            audio_file_id: audio_id,
            transcript_text: &transcription.text,
            language: &transcription.language,
            confidence: transcription.confidence,
        },
    )
    .await
    {
        tracing::warn!("failed to persist transcript for {audio_id}: {error}");
        return Ok(mark_failed(ctx.pool, audio_id).await);
    }

    let classification = if transcription.text.trim().is_empty() {
        // Nothing to classify; silent clips are not flagged.
        ClassificationResult::default()
    } else {
        let raw = match classifier.classify(&transcription.text).await {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!("classification failed for {audio_id}: {error}");
                return Ok(mark_failed(ctx.pool, audio_id).await);
            }
        };

        match parse_classifier_output(&raw) {
            ClassifierOutput::Valid(classification) => classification,
            ClassifierOutput::Invalid(raw) => {
                tracing::warn!(
                    "unparseable classifier output for {audio_id}: {:.80}",
                    raw
                );
                return Ok(mark_failed(ctx.pool, audio_id).await);
            }
        }
    };

    if let Err(error) = ap_db::insert_classification(
        ctx.pool,
        &NewClassification {
            audio_file_id: audio_id,
            flagged: classification.flagged,
            flag_score: classification.score,
            flag_category: classification.category.as_deref(),
        },
    )
    .await
    {
        tracing::warn!("failed to persist classification for {audio_id}: {error}");
        return Ok(mark_failed(ctx.pool, audio_id).await);
    }

    let status = if classification.flagged {
        AudioStatus::Flagged
    } else {
        AudioStatus::Transcribed
    };
    if let Err(error) = ap_db::update_audio_status(ctx.pool, audio_id, status).await {
        tracing::warn!("failed to update status for {audio_id}: {error}");
        return Ok(mark_failed(ctx.pool, audio_id).await);
    }

    // Retain the clip in the blob store. An upload failure marks the record
    // failed but keeps the rows already written; the lineage is still
    // useful for review.
    let date = Utc::now().format("%Y-%m-%d").to_string();
    let object_key = processed_object_key(&date, audio_id);
    if let Err(error) = ctx.store.put(&object_key, opus_path).await {
        tracing::warn!("opus upload failed for {audio_id}: {error}");
        return Ok(mark_failed(ctx.pool, audio_id).await);
    }

    if let Err(error) = ap_db::update_audio_s3_key(ctx.pool, audio_id, &object_key).await {
        tracing::warn!("failed to record object key for {audio_id}: {error}");
        return Ok(mark_failed(ctx.pool, audio_id).await);
    }

    tracing::debug!(
        "clip {audio_id}: status={}, score={:.2}, key={object_key}",
        status.as_str(),
        classification.score
    );

    Ok(status)
}

async fn mark_failed(pool: &Pool, audio_id: i32) -> AudioStatus {
    if let Err(error) = ap_db::update_audio_status(pool, audio_id, AudioStatus::Failed).await {
        tracing::warn!("failed to mark {audio_id} as failed: {error}");
    }
    AudioStatus::Failed
}

/// Advance the batch counter and finalise when this worker observes
/// completion. The atomic increment guarantees a single finaliser.
async fn track_batch_progress(ctx: &GpuContext<'_>, queue: &mut QueueClient, batch_id: &str) {
    let total = match queue.batch_total(batch_id) {
        Ok(Some(total)) => total,
        Ok(None) => {
            // Orphaned item: the ledger is gone, so there is no counter to
            // advance and nothing to finalise.
            tracing::warn!("batch {batch_id}: ledger missing, skipping completion check");
            return;
        }
        Err(error) => {
            tracing::warn!("batch {batch_id}: failed to read ledger: {error}");
            return;
        }
    };

    let processed = match queue.increment_processed(batch_id) {
        Ok(processed) => processed,
        Err(error) => {
            tracing::warn!("batch {batch_id}: failed to increment counter: {error}");
            return;
        }
    };

    tracing::debug!("batch {batch_id}: {processed}/{total} processed");

    match completion_state(processed, total) {
        Completion::Pending => {}
        Completion::Complete => finalise_batch(ctx, queue, batch_id).await,
        Completion::Overrun => {
            tracing::warn!(
                "batch {batch_id}: processed count {processed} exceeds total {total}"
            );
            finalise_batch(ctx, queue, batch_id).await;
        }
    }
}

/// One-time batch cleanup: scratch, then ledger, then (optionally) the
/// source archive. Re-running on an already-finalised batch is a no-op.
async fn finalise_batch(ctx: &GpuContext<'_>, queue: &mut QueueClient, batch_id: &str) {
    tracing::info!("batch {batch_id} complete, cleaning up");

    cleanup_scratch(ctx.scratch_root, batch_id);

    let archive_key = match queue.batch_archive_key(batch_id) {
        Ok(key) => key,
        Err(error) => {
            tracing::warn!("batch {batch_id}: failed to read archive key: {error}");
            None
        }
    };

    if let Err(error) = queue.delete_ledger(batch_id) {
        tracing::warn!("batch {batch_id}: failed to delete ledger: {error}");
    }

    if ctx.delete_archive_on_finalise {
        if let Some(key) = archive_key {
            match ctx.store.delete(&key).await {
                Ok(()) => tracing::info!("batch {batch_id}: deleted source archive {key}"),
                Err(error) => {
                    tracing::warn!("batch {batch_id}: failed to delete archive {key}: {error}")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_total_is_pending() {
        assert_eq!(completion_state(1, 3), Completion::Pending);
        assert_eq!(completion_state(2, 3), Completion::Pending);
    }

    #[test]
    fn exactly_total_completes() {
        assert_eq!(completion_state(3, 3), Completion::Complete);
        assert_eq!(completion_state(1, 1), Completion::Complete);
    }

    #[test]
    fn racing_workers_elect_one_finaliser() {
        // Two workers hold the last two jobs of a batch of two; the atomic
        // increment hands them 1 and 2, so only the second finalises.
        let observations = [completion_state(1, 2), completion_state(2, 2)];
        let finalisers = observations
            .iter()
            .filter(|&&c| c != Completion::Pending)
            .count();
        assert_eq!(finalisers, 1);
    }

    #[test]
    fn overrun_still_finalises_with_warning() {
        assert_eq!(completion_state(3, 2), Completion::Overrun);
    }
}
