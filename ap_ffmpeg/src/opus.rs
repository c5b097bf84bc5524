use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

// Cap per-clip conversions so one corrupt file cannot wedge the pool.
const CONVERT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("failed to run ffmpeg: {0}")]
    Io(#[from] std::io::Error),
    #[error("ffmpeg exited with status {0}")]
    Failed(std::process::ExitStatus),
    #[error("ffmpeg timed out after {0:?}")]
    Timeout(Duration),
    #[error("ffmpeg reported success but {0} was not written")]
    MissingOutput(String),
}

/// Convert a source clip to opus at the given bitrate.
///
/// # Errors
/// Fails when ffmpeg cannot be spawned, exits non-zero, exceeds the timeout,
/// or does not produce the output file.
pub async fn convert_to_opus(
    source: &Path,
    dest: &Path,
    bitrate: &str,
) -> Result<(), TranscodeError> {
    let mut child = Command::new("ffmpeg")
        .arg("-hide_banner")
        .arg("-y") // overwrite output
        .arg("-i")
        .arg(source)
        .arg("-c:a") // choose audio codec
        .arg("libopus")
        .arg("-b:a") // sets audio bitrate
        .arg(bitrate)
        .arg("-vn") // no video stream
        .arg(dest)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    let status = match timeout(CONVERT_TIMEOUT, child.wait()).await {
        Ok(result) => result?,
        Err(_) => {
            tracing::warn!(
                "ffmpeg timed out converting {}, killing process",
                source.display()
            );
            let _ = child.kill().await;
            return Err(TranscodeError::Timeout(CONVERT_TIMEOUT));
        }
    };

    if !status.success() {
        return Err(TranscodeError::Failed(status));
    }

    if !dest.exists() {
        return Err(TranscodeError::MissingOutput(dest.display().to_string()));
    }

    Ok(())
}
