//! Build packaging.
//!
//! A build directory is packed into a single ZIP archive before upload.
//! Entries are stored relative to the build directory so the archive root
//! is the build root.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::app_data::publisher_data;
use crate::util::format_bytes;

/// Errors that can occur while packaging a build
#[derive(Error, Debug)]
pub enum PackageError {
    #[error("Build directory not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Build directory is empty: {0}")]
    Empty(PathBuf),

    #[error("Failed to create archive: {0}")]
    CreateFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Error shown when an archive exceeds the upload limit
pub fn oversize_message(limit: u64) -> String {
    format!("Max. allowed WebGL game .zip size is {}.", format_bytes(limit))
}

/// Creates upload archives from build directories
pub trait Packager: Send + Sync + 'static {
    /// Pack `source` into an archive and return its path
    fn archive(&self, source: &Path) -> Result<PathBuf, PackageError>;

    /// Size of a produced archive in bytes
    fn archive_size(&self, archive: &Path) -> Result<u64, PackageError> {
        Ok(fs::metadata(archive)?.len())
    }

    /// Delete a produced archive
    fn discard(&self, archive: &Path) {
        if let Err(e) = fs::remove_file(archive) {
            tracing::warn!("Failed to remove archive {:?}: {}", archive, e);
        }
    }
}

/// Packs builds into `<dest_dir>/connectwebgl.zip`
pub struct ZipPackager {
    dest_dir: PathBuf,
    compression_level: u8,
}

impl ZipPackager {
    pub fn new(dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            dest_dir: dest_dir.into(),
            compression_level: publisher_data().archive.compression_level,
        }
    }

    pub fn with_compression_level(mut self, level: u8) -> Self {
        self.compression_level = level;
        self
    }

    /// Where the next archive will be written
    pub fn archive_path(&self) -> PathBuf {
        self.dest_dir.join(&publisher_data().archive.file_name)
    }
}

impl Packager for ZipPackager {
    fn archive(&self, source: &Path) -> Result<PathBuf, PackageError> {
        if !source.is_dir() {
            return Err(PackageError::SourceNotFound(source.to_path_buf()));
        }

        let mut files: Vec<(PathBuf, String)> = Vec::new();
        for entry in WalkDir::new(source).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() {
                let path = entry.path().to_path_buf();
                let relative = path
                    .strip_prefix(source)
                    .map_err(|e| PackageError::CreateFailed(e.to_string()))?;
                let relative = relative.to_string_lossy().replace('\\', "/");
                files.push((path, relative));
            }
        }

        if files.is_empty() {
            return Err(PackageError::Empty(source.to_path_buf()));
        }

        fs::create_dir_all(&self.dest_dir)?;
        let archive_path = self.archive_path();
        // A stale archive from a previous run must not be appended to
        if archive_path.exists() {
            fs::remove_file(&archive_path)?;
        }

        // Stored entries reject an explicit level
        let options = if self.compression_level == 0 {
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
        } else {
            SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(self.compression_level.min(9) as i64))
        };

        let mut zip = ZipWriter::new(File::create(&archive_path)?);
        for (path, relative) in &files {
            let mut content = Vec::new();
            File::open(path)?.read_to_end(&mut content)?;
            zip.start_file(relative.as_str(), options)?;
            zip.write_all(&content)?;
        }
        zip.finish()?;

        tracing::info!("Packed {} files from {:?} into {:?}", files.len(), source, archive_path);
        Ok(archive_path)
    }
}
