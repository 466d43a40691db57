// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Managed File Store
//!
//! Filesystem access for the managed directory. Every path handed to this
//! store has already been resolved by [`PathSanitizer`], so the store itself
//! only does I/O and formatting.
//!
//! **Limitations:**
//! - Listing is flat: subdirectories show up as entries but are not descended into
//! - Writes replace the whole file; there is no append or partial write
//! - Reads load the whole file, so large files will not fit in one datagram
//!
//! [`PathSanitizer`]: crate::domain::path_sanitizer::PathSanitizer

use chrono::{DateTime, Local};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::protocol::FileEntry;

#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("Failed to prepare managed directory {path}: {source}")]
    Setup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0} not found")]
    NotFound(PathBuf),

    #[error("Failed to {op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FileStoreError {
    fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            return Self::NotFound(path.to_path_buf());
        }
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Underlying OS error text, for the `details` field of error replies.
    pub fn cause(&self) -> String {
        match self {
            Self::Setup { source, .. } | Self::Io { source, .. } => source.to_string(),
            Self::NotFound(path) => format!("{} not found", path.display()),
        }
    }
}

/// Contents of a file plus the metadata shown alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub content: String,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// False when an existing file was overwritten.
    pub created: bool,
    pub size: u64,
}

/// Async filesystem access rooted at the managed directory.
#[derive(Debug, Clone)]
pub struct ManagedFiles {
    root: PathBuf,
}

impl ManagedFiles {
    /// Create the managed directory if needed and anchor the store to its
    /// absolute path.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, FileStoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| FileStoreError::Setup {
                path: root.clone(),
                source,
            })?;
        let root = tokio::fs::canonicalize(&root)
            .await
            .map_err(|source| FileStoreError::Setup {
                path: root.clone(),
                source,
            })?;

        info!(root = %root.display(), "Managed directory ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// One entry per directory member, sorted by name. Members whose metadata
    /// cannot be read are reported with an error marker instead of failing the
    /// whole listing.
    pub async fn list(&self) -> Result<Vec<FileEntry>, FileStoreError> {
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| FileStoreError::io("list", &self.root, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| FileStoreError::io("list", &self.root, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let described = match entry.metadata().await {
                Ok(meta) => FileEntry::described(
                    name.clone(),
                    format_file_size(meta.len()),
                    meta.modified().map(format_modified).unwrap_or_default(),
                    file_type_label(&name),
                ),
                Err(e) => {
                    debug!(name = %name, error = %e, "Cannot stat managed file");
                    FileEntry::unreadable(name)
                }
            };
            entries.push(described);
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Read `path` as text. Bytes that are not valid UTF-8 are replaced.
    pub async fn read(&self, path: &Path) -> Result<FileContent, FileStoreError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| FileStoreError::io("read", path, e))?;
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| FileStoreError::io("read", path, e))?;

        Ok(FileContent {
            content: String::from_utf8_lossy(&bytes).into_owned(),
            size: meta.len(),
            modified: meta.modified().ok(),
        })
    }

    /// Create or replace `path` with `content`.
    pub async fn write(&self, path: &Path, content: &str) -> Result<WriteOutcome, FileStoreError> {
        let existed = self.exists(path).await;
        tokio::fs::write(path, content.as_bytes())
            .await
            .map_err(|e| FileStoreError::io("write", path, e))?;
        let size = tokio::fs::metadata(path)
            .await
            .map(|m| m.len())
            .unwrap_or(content.len() as u64);

        debug!(path = %self.display_name(path), size, created = !existed, "Managed file written");
        Ok(WriteOutcome {
            created: !existed,
            size,
        })
    }

    pub async fn delete(&self, path: &Path) -> Result<(), FileStoreError> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| FileStoreError::io("delete", path, e))?;
        debug!(path = %self.display_name(path), "Managed file deleted");
        Ok(())
    }

    pub async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    /// Root-relative rendering of `path` for logs.
    fn display_name(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .display()
            .to_string()
    }
}

/// `1536` → `"1.5 KB"`. Units stop at GB.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}

/// Local-time rendering used in listings and read details.
pub fn format_modified(time: SystemTime) -> String {
    let local: DateTime<Local> = time.into();
    local.format("%-m/%-d/%Y, %-I:%M:%S %p").to_string()
}

fn file_type_label(name: &str) -> String {
    match Path::new(name).extension() {
        Some(ext) => format!(".{}", ext.to_string_lossy()),
        None => "No extension".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store() -> (TempDir, ManagedFiles) {
        let dir = TempDir::new().unwrap();
        let files = ManagedFiles::open(dir.path().join("managed")).await.unwrap();
        (dir, files)
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0.0 B");
        assert_eq!(format_file_size(1023), "1023.0 B");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_file_size(3 * 1024 * 1024 * 1024 * 1024), "3072.0 GB");
    }

    #[test]
    fn test_file_type_label() {
        assert_eq!(file_type_label("a.TXT"), ".TXT");
        assert_eq!(file_type_label("Makefile"), "No extension");
    }

    #[tokio::test]
    async fn test_open_creates_root() {
        let (dir, files) = store().await;
        assert!(dir.path().join("managed").is_dir());
        assert!(files.root().is_absolute());
    }

    #[tokio::test]
    async fn test_write_reports_created_then_updated() {
        let (_dir, files) = store().await;
        let path = files.root().join("notes.txt");

        let first = files.write(&path, "hello").await.unwrap();
        assert!(first.created);
        assert_eq!(first.size, 5);

        let second = files.write(&path, "hello again").await.unwrap();
        assert!(!second.created);
        assert_eq!(second.size, 11);
    }

    #[tokio::test]
    async fn test_read_replaces_invalid_utf8() {
        let (_dir, files) = store().await;
        let path = files.root().join("bin.dat");
        tokio::fs::write(&path, [b'o', b'k', 0xff]).await.unwrap();

        let read = files.read(&path).await.unwrap();
        assert_eq!(read.content, "ok\u{fffd}");
        assert_eq!(read.size, 3);
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let (_dir, files) = store().await;
        let err = files.read(&files.root().join("nope")).await.unwrap_err();
        assert!(matches!(err, FileStoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_is_sorted_and_described() {
        let (_dir, files) = store().await;
        files.write(&files.root().join("b.py"), "print(1)").await.unwrap();
        files.write(&files.root().join("a.txt"), "").await.unwrap();
        files.write(&files.root().join("README"), "x").await.unwrap();

        let listing = files.list().await.unwrap();
        let names: Vec<&str> = listing.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["README", "a.txt", "b.py"]);
        assert_eq!(listing[0].file_type.as_deref(), Some("No extension"));
        assert_eq!(listing[2].size.as_deref(), Some("8.0 B"));
        assert!(listing.iter().all(|e| e.error.is_none()));
    }

    #[tokio::test]
    async fn test_delete() {
        let (_dir, files) = store().await;
        let path = files.root().join("gone.txt");
        files.write(&path, "x").await.unwrap();
        files.delete(&path).await.unwrap();
        assert!(!files.exists(&path).await);
        assert!(matches!(
            files.delete(&path).await.unwrap_err(),
            FileStoreError::NotFound(_)
        ));
    }
}
