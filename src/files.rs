//! Uploaded-file registry
//!
//! Files are stored on disk under the upload directory with their
//! metadata in the database. The conversation tree only holds file ids;
//! resolution back to bytes happens here, at message-formatting time.

use crate::db::{Database, DbError, FileRecord};
use chrono::Utc;
use std::path::PathBuf;
use thiserror::Error;

/// Media types eligible for inline image embedding
pub const SUPPORTED_IMAGE_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/bmp",
];

pub fn is_image(media_type: &str) -> bool {
    SUPPORTED_IMAGE_TYPES.contains(&media_type)
}

#[derive(Error, Debug)]
pub enum FileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("upload exceeds the size limit ({size} > {limit} bytes)")]
    TooLarge { size: usize, limit: usize },
    #[error("filename is empty after sanitization")]
    EmptyFilename,
    #[error(transparent)]
    Db(#[from] DbError),
}

/// A registry entry resolved for formatting
#[derive(Debug, Clone)]
pub struct ResolvedFile {
    pub filename: String,
    pub media_type: String,
    pub path: PathBuf,
}

/// Lookup interface used by the message formatter
pub trait FileRegistry: Send + Sync {
    /// Resolve a file id. Absence means a stale reference, not an error.
    fn resolve(&self, file_id: &str) -> Option<ResolvedFile>;
}

/// Disk-backed file store
pub struct FileStore {
    db: Database,
    upload_dir: PathBuf,
    max_bytes: usize,
}

impl FileStore {
    pub fn new(db: Database, upload_dir: PathBuf, max_bytes: usize) -> std::io::Result<Self> {
        std::fs::create_dir_all(&upload_dir)?;
        Ok(Self {
            db,
            upload_dir,
            max_bytes,
        })
    }

    /// Store uploaded bytes and register the file. Returns the record.
    pub fn save_upload(&self, filename: &str, bytes: &[u8]) -> Result<FileRecord, FileError> {
        if bytes.len() > self.max_bytes {
            return Err(FileError::TooLarge {
                size: bytes.len(),
                limit: self.max_bytes,
            });
        }

        let filename = sanitize_filename(filename);
        if filename.is_empty() {
            return Err(FileError::EmptyFilename);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let path = self.upload_dir.join(format!("{id}_{filename}"));
        std::fs::write(&path, bytes)?;

        let record = FileRecord {
            id,
            filename: filename.clone(),
            path: path.to_string_lossy().to_string(),
            media_type: detect_media_type(&filename),
            size: bytes.len() as u64,
            uploaded_at: Utc::now(),
        };
        self.db.insert_file(&record)?;

        tracing::info!(
            file_id = %record.id,
            filename = %record.filename,
            media_type = %record.media_type,
            size = record.size,
            "File uploaded"
        );
        Ok(record)
    }

    pub fn get(&self, id: &str) -> Result<FileRecord, FileError> {
        Ok(self.db.get_file(id)?)
    }

    pub fn list(&self) -> Result<Vec<FileRecord>, FileError> {
        Ok(self.db.list_files()?)
    }
}

impl FileRegistry for FileStore {
    fn resolve(&self, file_id: &str) -> Option<ResolvedFile> {
        self.db.get_file(file_id).ok().map(|record| ResolvedFile {
            filename: record.filename,
            media_type: record.media_type,
            path: PathBuf::from(record.path),
        })
    }
}

/// Strip path components and shell-hostile characters from an uploaded
/// filename.
fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);

    base.chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect()
}

/// Guess a media type from the filename, with an extension fallback for
/// the image formats the formatter can embed.
fn detect_media_type(filename: &str) -> String {
    if let Some(mime) = mime_guess::from_path(filename).first() {
        return mime.essence_str().to_string();
    }

    let lower = filename.to_lowercase();
    let fallback = if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg"
    } else if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".gif") {
        "image/gif"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else if lower.ends_with(".bmp") {
        "image/bmp"
    } else {
        "application/octet-stream"
    };
    fallback.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store(max_bytes: usize) -> (FileStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let store = FileStore::new(db, dir.path().join("uploads"), max_bytes).unwrap();
        (store, dir)
    }

    #[test]
    fn upload_round_trips_through_registry() {
        let (store, _dir) = test_store(1024);
        let record = store.save_upload("notes.txt", b"hello world").unwrap();

        let resolved = store.resolve(&record.id).unwrap();
        assert_eq!(resolved.filename, "notes.txt");
        assert_eq!(resolved.media_type, "text/plain");
        assert_eq!(std::fs::read(&resolved.path).unwrap(), b"hello world");
    }

    #[test]
    fn oversized_upload_is_rejected() {
        let (store, _dir) = test_store(4);
        assert!(matches!(
            store.save_upload("big.bin", b"too large"),
            Err(FileError::TooLarge { .. })
        ));
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("my photo (1).png"), "myphoto1.png");
        assert_eq!(sanitize_filename("..\\..\\boot.ini"), "boot.ini");
    }

    #[test]
    fn media_type_falls_back_by_extension() {
        assert_eq!(detect_media_type("photo.JPG"), "image/jpeg");
        assert_eq!(detect_media_type("readme.md"), "text/markdown");
        assert_eq!(detect_media_type("mystery"), "application/octet-stream");
    }

    #[test]
    fn stale_ids_resolve_to_none() {
        let (store, _dir) = test_store(1024);
        assert!(store.resolve("ghost").is_none());
    }
}
