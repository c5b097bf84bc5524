use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use types::{ClassificationResult, TranscriptionResult};

const TRANSCRIBE_SCRIPT: &str = "/opt/pipeline/transcribe.py";
const CLASSIFY_SCRIPT: &str = "/opt/pipeline/classify.py";

const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(600);
const CLASSIFY_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("model directory not found: {0}")]
    ModelMissing(PathBuf),
    #[error("failed to run inference process: {0}")]
    Io(#[from] std::io::Error),
    #[error("inference process exited with status {0}")]
    ProcessFailed(std::process::ExitStatus),
    #[error("inference process timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to parse transcription output: {0}")]
    Json(#[from] serde_json::Error),
}

/// Speech-to-text boundary. The engine is a black box; only the typed result
/// crosses into the pipeline.
pub trait Transcriber {
    fn transcribe(
        &self,
        audio_path: &Path,
    ) -> impl Future<Output = Result<TranscriptionResult, InferenceError>> + Send;
}

/// Content-classification boundary. Returns the model's raw response; the
/// caller owns parsing it defensively.
pub trait Classifier {
    fn classify(
        &self,
        transcript: &str,
    ) -> impl Future<Output = Result<String, InferenceError>> + Send;
}

/// Transcription engine backed by an external process holding the speech
/// model. Loaded once at startup and kept for the life of the worker.
pub struct TranscriptionEngine {
    model_dir: PathBuf,
}

impl TranscriptionEngine {
    pub fn load(models_root: &Path) -> Result<Self, InferenceError> {
        let model_dir = models_root.join("whisper-large-v2");
        if !model_dir.is_dir() {
            return Err(InferenceError::ModelMissing(model_dir));
        }

        tracing::info!("transcription model ready at {}", model_dir.display());
        Ok(Self { model_dir })
    }
}

impl Transcriber for TranscriptionEngine {
    fn transcribe(
        &self,
        audio_path: &Path,
    ) -> impl Future<Output = Result<TranscriptionResult, InferenceError>> + Send {
        async move {
            let temp_dir = tempfile::tempdir()?;

            let mut child = Command::new("python3")
                .arg(TRANSCRIBE_SCRIPT)
                .arg(audio_path)
                .arg("--model_dir")
                .arg(&self.model_dir)
                .arg("--output_format")
                .arg("json")
                .arg("--output_dir")
                .arg(temp_dir.path())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()?;

            let status = match timeout(TRANSCRIBE_TIMEOUT, child.wait()).await {
                Ok(result) => result?,
                Err(_) => {
                    tracing::warn!(
                        "transcription timed out for {}, killing process",
                        audio_path.display()
                    );
                    let _ = child.kill().await;
                    return Err(InferenceError::Timeout(TRANSCRIBE_TIMEOUT));
                }
            };

            if !status.success() {
                return Err(InferenceError::ProcessFailed(status));
            }

            let raw = std::fs::read_to_string(temp_dir.path().join("transcription.json"))?;
            let mut result: TranscriptionResult = serde_json::from_str(&raw)?;
            result.confidence = result.confidence.clamp(0.0, 1.0);
            Ok(result)
        }
    }
}

/// Classification engine backed by an external process holding the policy
/// model. The transcript is streamed over stdin; stdout is the raw model
/// response.
pub struct ClassificationEngine {
    model_dir: PathBuf,
}

impl ClassificationEngine {
    pub fn load(models_root: &Path) -> Result<Self, InferenceError> {
        let model_dir = models_root.join("classifier");
        if !model_dir.is_dir() {
            return Err(InferenceError::ModelMissing(model_dir));
        }

        tracing::info!("classification model ready at {}", model_dir.display());
        Ok(Self { model_dir })
    }
}

impl Classifier for ClassificationEngine {
    fn classify(
        &self,
        transcript: &str,
    ) -> impl Future<Output = Result<String, InferenceError>> + Send {
        async move {
            let mut child = Command::new("python3")
                .arg(CLASSIFY_SCRIPT)
                .arg("--model_dir")
                .arg(&self.model_dir)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()?;

            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(transcript.as_bytes()).await?;
            }

            let output = match timeout(CLASSIFY_TIMEOUT, child.wait_with_output()).await {
                Ok(result) => result?,
                Err(_) => return Err(InferenceError::Timeout(CLASSIFY_TIMEOUT)),
            };

            if !output.status.success() {
                return Err(InferenceError::ProcessFailed(output.status));
            }

            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        }
    }
}

/// Result of parsing the classifier's raw response.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifierOutput {
    Valid(ClassificationResult),
    Invalid(String),
}

/// Parse the classifier's response without trusting its structure.
///
/// Missing keys default to the not-flagged state. Responses that are not
/// valid JSON get one repair pass — the outermost `{…}` substring — before
/// the item is declared unclassifiable. Raw model text never travels
/// further than this function.
pub fn parse_classifier_output(raw: &str) -> ClassifierOutput {
    if let Ok(parsed) = serde_json::from_str::<ClassificationResult>(raw.trim()) {
        return ClassifierOutput::Valid(clamped(parsed));
    }

    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if end > start {
            if let Ok(parsed) = serde_json::from_str::<ClassificationResult>(&raw[start..=end]) {
                return ClassifierOutput::Valid(clamped(parsed));
            }
        }
    }

    ClassifierOutput::Invalid(raw.to_string())
}

fn clamped(mut result: ClassificationResult) -> ClassificationResult {
    result.score = result.score.clamp(0.0, 1.0);
    result
}

/// Resident set size of this process in megabytes, for the post-load memory
/// report. Only meaningful on Linux.
pub fn resident_memory_mb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|line| line.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_response_parses() {
        let output = parse_classifier_output(
            r#"{"flagged": true, "score": 0.93, "category": "harassment"}"#,
        );
        assert_eq!(
            output,
            ClassifierOutput::Valid(ClassificationResult {
                flagged: true,
                score: 0.93,
                category: Some("harassment".to_string()),
            })
        );
    }

    #[test]
    fn missing_keys_default_to_not_flagged() {
        let output = parse_classifier_output(r#"{"flagged": true}"#);
        assert_eq!(
            output,
            ClassifierOutput::Valid(ClassificationResult {
                flagged: true,
                score: 0.0,
                category: None,
            })
        );

        let output = parse_classifier_output("{}");
        assert_eq!(
            output,
            ClassifierOutput::Valid(ClassificationResult::default())
        );
    }

    #[test]
    fn chatty_response_is_repaired() {
        let output = parse_classifier_output(
            r#"Sure, here is the result: {"flagged": false, "score": 0.12} Let me know!"#,
        );
        assert_eq!(
            output,
            ClassifierOutput::Valid(ClassificationResult {
                flagged: false,
                score: 0.12,
                category: None,
            })
        );
    }

    #[test]
    fn unquoted_keys_fail_both_passes() {
        // The repair pass extracts the same malformed object and must not
        // loop or accept it.
        let raw = r#"{"flagged": true, score: 0.9}"#;
        assert_eq!(
            parse_classifier_output(raw),
            ClassifierOutput::Invalid(raw.to_string())
        );
    }

    #[test]
    fn non_object_responses_are_invalid() {
        assert_eq!(
            parse_classifier_output("1"),
            ClassifierOutput::Invalid("1".to_string())
        );
        assert_eq!(
            parse_classifier_output(""),
            ClassifierOutput::Invalid(String::new())
        );
    }

    #[test]
    fn scores_are_clamped_to_unit_interval() {
        let ClassifierOutput::Valid(high) =
            parse_classifier_output(r#"{"flagged": true, "score": 3.5}"#)
        else {
            panic!("expected valid output");
        };
        assert_eq!(high.score, 1.0);

        let ClassifierOutput::Valid(low) =
            parse_classifier_output(r#"{"flagged": false, "score": -0.4}"#)
        else {
            panic!("expected valid output");
        };
        assert_eq!(low.score, 0.0);
    }
}
