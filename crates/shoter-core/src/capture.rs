//! Ephemeral on-disk captures.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

static CAPTURE_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture source not found: {0}")]
    SourceNotFound(String),
    #[error("failed to stage capture {path}: {source}")]
    Stage {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A just-taken photo on local storage.
///
/// The file is deleted when the frame is dropped, whether the pipeline that
/// consumed it succeeded or failed.
#[derive(Debug)]
pub struct CapturedFrame {
    path: PathBuf,
}

impl CapturedFrame {
    /// Take ownership of a photo the camera has already written.
    pub fn adopt(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Copy `src` into a fresh file under `dir` and own the copy.
    pub fn stage_copy(src: &Path, dir: &Path) -> Result<Self, CaptureError> {
        if !src.exists() {
            return Err(CaptureError::SourceNotFound(src.display().to_string()));
        }
        let path = dir.join(next_capture_name());
        std::fs::copy(src, &path).map_err(|source| CaptureError::Stage {
            path: path.display().to_string(),
            source,
        })?;
        tracing::debug!(src = %src.display(), staged = %path.display(), "capture staged");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CapturedFrame {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "capture deleted"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to delete capture")
            }
        }
    }
}

fn next_capture_name() -> String {
    let seq = CAPTURE_SEQ.fetch_add(1, Ordering::Relaxed);
    format!(
        "shot_{}_{}_{seq}.jpg",
        std::process::id(),
        chrono::Utc::now().timestamp_millis()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adopted_frame_deleted_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.jpg");
        std::fs::write(&path, b"not really a jpeg").unwrap();

        let frame = CapturedFrame::adopt(&path);
        assert!(frame.path().exists());
        drop(frame);
        assert!(!path.exists());
    }

    #[test]
    fn test_stage_copy_keeps_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("input.jpg");
        std::fs::write(&src, b"bytes").unwrap();

        let frame = CapturedFrame::stage_copy(&src, dir.path()).unwrap();
        let staged = frame.path().to_path_buf();
        assert_ne!(staged, src);
        assert_eq!(std::fs::read(&staged).unwrap(), b"bytes");

        drop(frame);
        assert!(!staged.exists());
        assert!(src.exists());
    }

    #[test]
    fn test_stage_copy_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = CapturedFrame::stage_copy(&dir.path().join("nope.jpg"), dir.path()).unwrap_err();
        assert!(matches!(err, CaptureError::SourceNotFound(_)));
    }

    #[test]
    fn test_drop_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let frame = CapturedFrame::adopt(dir.path().join("already-gone.jpg"));
        drop(frame);
    }
}
