use std::path::PathBuf;

use anyhow::{Context, Result};
use strict_path::{PathBoundary, StrictPath};
use uuid::Uuid;

use crate::infra::{app_error::AppError, config::UploadsConfig};

/// Marker for the prescription upload area.
#[derive(Clone)]
pub struct PrescriptionUploads;

const ALLOWED_TYPES: &[(&str, &str)] = &[
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("application/pdf", "pdf"),
];

/// Filesystem store for prescription uploads. Every path is resolved inside
/// the configured uploads directory; stored names are generated server-side.
#[derive(Clone)]
pub struct PrescriptionStore {
    root: PathBoundary<PrescriptionUploads>,
    max_bytes: usize,
}

#[derive(Debug)]
pub struct StoredFile {
    /// Path relative to the uploads root, as persisted in the database.
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub size_bytes: i64,
}

impl PrescriptionStore {
    pub fn open(config: &UploadsConfig) -> Result<Self> {
        let root = PathBoundary::try_new_create(&config.dir).with_context(|| {
            format!(
                "Failed to open uploads directory {}",
                config.dir.display()
            )
        })?;
        Ok(Self {
            root,
            max_bytes: config.max_bytes,
        })
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Maps an accepted content type to the extension used on disk.
    pub fn extension_for(content_type: &str) -> Option<&'static str> {
        ALLOWED_TYPES
            .iter()
            .find(|(mime, _)| mime.eq_ignore_ascii_case(content_type))
            .map(|(_, ext)| *ext)
    }

    pub fn save(&self, patient_id: i32, content_type: &str, bytes: &[u8]) -> Result<StoredFile, AppError> {
        let extension = Self::extension_for(content_type).ok_or_else(|| {
            AppError::BadRequest(format!(
                "Unsupported file type {}; upload a PNG, JPEG or PDF",
                content_type
            ))
        })?;
        if bytes.is_empty() {
            return Err(AppError::bad_request("Uploaded file is empty"));
        }
        if bytes.len() > self.max_bytes {
            return Err(AppError::BadRequest(format!(
                "Uploaded file exceeds the {} byte limit",
                self.max_bytes
            )));
        }

        let relative_path = format!("{}/{}.{}", patient_id, Uuid::new_v4(), extension);
        let path = self.resolve(&relative_path)?;
        path.create_parent_dir_all()
            .context("Failed to create the patient's upload directory")?;
        path.write(bytes).context("Failed to write the uploaded file")?;

        Ok(StoredFile {
            absolute_path: PathBuf::from(path.interop_path()),
            relative_path,
            size_bytes: bytes.len() as i64,
        })
    }

    pub fn read(&self, relative_path: &str) -> Result<Vec<u8>, AppError> {
        let path = self.resolve(relative_path)?;
        if !path.exists() {
            return Err(AppError::NotFound);
        }
        Ok(path.read().context("Failed to read the stored file")?)
    }

    /// Deletes a stored file. A file that is already gone is not an error.
    pub fn remove(&self, relative_path: &str) -> Result<(), AppError> {
        let path = self.resolve(relative_path)?;
        match path.remove_file() {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AppError::Other(
                anyhow::Error::new(err).context("Failed to remove the stored file"),
            )),
        }
    }

    fn resolve(&self, relative_path: &str) -> Result<StrictPath<PrescriptionUploads>, AppError> {
        self.root
            .strict_join(relative_path)
            .map_err(|err| AppError::Other(anyhow::anyhow!("Rejected upload path: {}", err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir, max_bytes: usize) -> PrescriptionStore {
        PrescriptionStore::open(&UploadsConfig {
            dir: dir.path().join("uploads"),
            max_bytes,
        })
        .unwrap()
    }

    #[test]
    fn saves_under_patient_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 1024);

        let stored = store.save(5, "image/png", b"png-bytes").unwrap();
        assert!(stored.relative_path.starts_with("5/"));
        assert!(stored.relative_path.ends_with(".png"));
        assert_eq!(stored.size_bytes, 9);
        assert_eq!(store.read(&stored.relative_path).unwrap(), b"png-bytes");
    }

    #[test]
    fn rejects_unsupported_types_and_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 4);

        assert!(matches!(
            store.save(1, "text/html", b"<p>"),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            store.save(1, "application/pdf", b"too large"),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            store.save(1, "application/pdf", b""),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn refuses_paths_outside_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 1024);
        assert!(store.read("../../etc/passwd").is_err());
    }

    #[test]
    fn missing_files_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 1024);
        assert!(matches!(store.read("1/missing.pdf"), Err(AppError::NotFound)));
    }

    #[test]
    fn removed_files_are_gone() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 1024);

        let stored = store.save(3, "application/pdf", b"%PDF").unwrap();
        store.remove(&stored.relative_path).unwrap();
        assert!(!stored.absolute_path.exists());
        assert!(matches!(store.read(&stored.relative_path), Err(AppError::NotFound)));
        // Second removal is a no-op.
        store.remove(&stored.relative_path).unwrap();
        assert!(store.remove("../outside.pdf").is_err());
    }

    #[test]
    fn content_type_matching_ignores_case() {
        assert_eq!(PrescriptionStore::extension_for("IMAGE/JPEG"), Some("jpg"));
        assert_eq!(PrescriptionStore::extension_for("image/gif"), None);
    }
}
