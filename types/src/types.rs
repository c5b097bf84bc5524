use serde::{Deserialize, Serialize};

/// Job consumed by the unpack worker, one per uploaded archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnpackJob {
    pub batch_id: String,

    pub s3_key: String,

    pub original_filename: String,

    pub transferred_at: String,
}

/// Job consumed by a GPU worker, one per converted clip. The opus path is
/// local to the host that unpacked the batch; the GPU worker that pops the
/// job must be co-located with that host's scratch volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscribeJob {
    pub batch_id: String,

    pub opus_path: String,

    pub original_filename: String,
}

/// Envelope written to the `failed` queue when a job cannot be processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedJob {
    pub original_job: serde_json::Value,

    pub error: String,

    pub worker: String,

    pub timestamp: String,
}

/// Processing state of an audio record. `Flagged` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioStatus {
    Pending,
    Transcribed,
    Flagged,
    Failed,
}

impl AudioStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioStatus::Pending => "pending",
            AudioStatus::Transcribed => "transcribed",
            AudioStatus::Flagged => "flagged",
            AudioStatus::Failed => "failed",
        }
    }
}

/// Output of the transcription engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub text: String,

    pub language: String,

    pub confidence: f64,
}

/// Output of the classification engine, once its raw response has been
/// parsed. Absent keys default to the not-flagged state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassificationResult {
    #[serde(default)]
    pub flagged: bool,

    #[serde(default)]
    pub score: f64,

    #[serde(default)]
    pub category: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpack_job_matches_wire_format() {
        let json = r#"{"batch_id": "20250101-000000-ab12cd",
            "s3_key": "archives/20250101-000000-ab12cd.tar",
            "original_filename": "src.tar",
            "transferred_at": "2025-01-01T00:00:00Z"}"#;

        let job: UnpackJob = serde_json::from_str(json).unwrap();
        assert_eq!(job.batch_id, "20250101-000000-ab12cd");
        assert_eq!(job.s3_key, "archives/20250101-000000-ab12cd.tar");

        let round_trip: UnpackJob =
            serde_json::from_str(&serde_json::to_string(&job).unwrap()).unwrap();
        assert_eq!(round_trip, job);
    }

    #[test]
    fn transcribe_job_matches_wire_format() {
        let json = r#"{"batch_id": "b1", "opus_path": "/data/scratch/b1/a.opus",
            "original_filename": "a.mp3"}"#;

        let job: TranscribeJob = serde_json::from_str(json).unwrap();
        assert_eq!(job.opus_path, "/data/scratch/b1/a.opus");
    }

    #[test]
    fn transcribe_job_missing_field_is_rejected() {
        let json = r#"{"batch_id": "b1"}"#;
        assert!(serde_json::from_str::<TranscribeJob>(json).is_err());
    }

    #[test]
    fn failed_job_serializes_with_embedded_original() {
        let original = serde_json::json!({"batch_id": "b4", "s3_key": "archives/b4.tar"});
        let failed = FailedJob {
            original_job: original.clone(),
            error: "empty-batch".to_string(),
            worker: "unpack".to_string(),
            timestamp: "2025-01-01T00:00:00Z".to_string(),
        };

        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["original_job"], original);
        assert_eq!(value["error"], "empty-batch");
        assert_eq!(value["worker"], "unpack");
    }

    #[test]
    fn classification_defaults_fill_missing_keys() {
        let parsed: ClassificationResult =
            serde_json::from_str(r#"{"flagged": true}"#).unwrap();
        assert!(parsed.flagged);
        assert_eq!(parsed.score, 0.0);
        assert_eq!(parsed.category, None);
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            AudioStatus::Pending,
            AudioStatus::Transcribed,
            AudioStatus::Flagged,
            AudioStatus::Failed,
        ] {
            assert!(!status.as_str().is_empty());
        }
        assert_eq!(AudioStatus::Flagged.as_str(), "flagged");
    }
}
