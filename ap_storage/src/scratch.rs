use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScratchError {
    #[error("scratch directory for batch {batch_id} already exists")]
    Collision { batch_id: String },
    #[error("scratch filesystem error: {0}")]
    Io(#[from] io::Error),
}

pub fn scratch_path(root: &Path, batch_id: &str) -> PathBuf {
    root.join(batch_id)
}

/// Create the per-batch scratch directory. A directory that already exists
/// means a duplicate batch id and fails the batch rather than mixing two
/// extractions.
pub fn create_scratch(root: &Path, batch_id: &str) -> Result<PathBuf, ScratchError> {
    std::fs::create_dir_all(root)?;

    let dir = scratch_path(root, batch_id);
    match std::fs::create_dir(&dir) {
        Ok(()) => Ok(dir),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(ScratchError::Collision {
            batch_id: batch_id.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Remove the batch scratch directory and everything under it. Idempotent:
/// already-missing is not an error.
pub fn cleanup_scratch(root: &Path, batch_id: &str) {
    let dir = scratch_path(root, batch_id);

    if !dir.exists() {
        tracing::debug!("scratch already cleaned: {}", dir.display());
        return;
    }

    match std::fs::remove_dir_all(&dir) {
        Ok(()) => tracing::info!("cleaned up scratch directory: {}", dir.display()),
        Err(e) => tracing::warn!("failed to clean up scratch {}: {e}", dir.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_cleanup_round_trips() {
        let root = tempfile::tempdir().unwrap();

        let dir = create_scratch(root.path(), "b1").unwrap();
        assert!(dir.is_dir());
        std::fs::write(dir.join("archive.tar"), b"data").unwrap();

        cleanup_scratch(root.path(), "b1");
        assert!(!dir.exists());
    }

    #[test]
    fn duplicate_batch_id_is_a_collision() {
        let root = tempfile::tempdir().unwrap();

        create_scratch(root.path(), "b1").unwrap();
        let second = create_scratch(root.path(), "b1");

        assert!(matches!(
            second,
            Err(ScratchError::Collision { ref batch_id }) if batch_id == "b1"
        ));

        // The first batch's scratch must survive the collision.
        assert!(scratch_path(root.path(), "b1").is_dir());
    }

    #[test]
    fn cleanup_of_missing_scratch_is_a_no_op() {
        let root = tempfile::tempdir().unwrap();
        cleanup_scratch(root.path(), "never-created");
    }
}
