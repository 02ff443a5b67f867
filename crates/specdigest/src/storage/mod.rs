//! Per-job artifact storage on the local filesystem.

use std::io::Write;
use std::path::Path;

pub mod export;
pub mod job_storage;

pub use crate::error::StorageError;
pub use export::{render_export, ExportFormat};
pub use job_storage::{JobStorage, SpecFormat};

/// Writes `bytes` to `path` through a sibling temp file and a rename, so
/// readers see either the old file or the complete new one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| StorageError::CreateDirectory {
        path: parent.to_path_buf(),
        source: e,
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));

    let write = || -> std::io::Result<()> {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()
    };
    if let Err(e) = write() {
        let _ = std::fs::remove_file(&tmp);
        return Err(StorageError::WriteFile {
            path: tmp,
            source: e,
        });
    }

    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        StorageError::MoveFile {
            from: tmp.clone(),
            to: path.to_path_buf(),
            source: e,
        }
    })
}

/// Job ids become directory names, so only a safe alphabet is accepted.
pub fn validate_job_id(job_id: &str) -> Result<(), StorageError> {
    let valid = !job_id.is_empty()
        && job_id.len() <= 128
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidJobId(job_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_creates_parents_and_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a").join("b.txt");

        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_validate_job_id() {
        assert!(validate_job_id("3f2a8c4e-1b2d-4c5e-9f00-123456789abc").is_ok());
        assert!(validate_job_id("job_1").is_ok());
        assert!(validate_job_id("").is_err());
        assert!(validate_job_id("../etc").is_err());
        assert!(validate_job_id("a/b").is_err());
        assert!(validate_job_id(&"x".repeat(200)).is_err());
    }
}
