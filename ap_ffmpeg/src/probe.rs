use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Read a clip's duration in seconds with ffprobe. Probe failures are
/// non-fatal; the duration is simply unknown.
pub async fn probe_duration(path: &Path) -> Option<f64> {
    let probe = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format=duration")
        .arg("-of")
        .arg("default=noprint_wrappers=1:nokey=1")
        .arg(path)
        .output();

    let output = match timeout(PROBE_TIMEOUT, probe).await {
        Ok(Ok(output)) if output.status.success() => output,
        Ok(Ok(output)) => {
            tracing::debug!(
                "ffprobe exited with {} for {}",
                output.status,
                path.display()
            );
            return None;
        }
        Ok(Err(e)) => {
            tracing::debug!("failed to run ffprobe for {}: {e}", path.display());
            return None;
        }
        Err(_) => {
            tracing::debug!("ffprobe timed out for {}", path.display());
            return None;
        }
    };

    String::from_utf8_lossy(&output.stdout).trim().parse().ok()
}
