//! Local backup engine — copies the database file to a chosen directory.

use log::info;
use std::fs;
use std::path::{Path, PathBuf};

/// Copies the live database to a destination directory, replacing any
/// previous copy. The local backup is a single overwritten snapshot,
/// never versioned.
pub struct LocalBackupEngine;

#[derive(Debug, thiserror::Error)]
pub enum LocalBackupError {
    #[error("database file not found: {0}")]
    MissingSource(PathBuf),
    #[error("could not create backup directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not replace previous backup {path}: {source}")]
    Replace {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not copy to {path}: {source}")]
    Copy {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("source path has no file name: {0}")]
    BadSource(PathBuf),
}

impl LocalBackupEngine {
    /// Copy `source` into `destination_dir`, returning the destination path.
    ///
    /// Creates the directory recursively if missing and removes a
    /// pre-existing destination file before copying, so a failed copy never
    /// leaves a merged or appended file behind.
    pub fn copy(source: &Path, destination_dir: &Path) -> Result<PathBuf, LocalBackupError> {
        if !source.is_file() {
            return Err(LocalBackupError::MissingSource(source.to_path_buf()));
        }
        let file_name = source
            .file_name()
            .ok_or_else(|| LocalBackupError::BadSource(source.to_path_buf()))?;

        fs::create_dir_all(destination_dir).map_err(|source| LocalBackupError::CreateDir {
            path: destination_dir.to_path_buf(),
            source,
        })?;

        let destination = destination_dir.join(file_name);
        let staging = destination_dir.join(format!(".{}.tmp", file_name.to_string_lossy()));

        // The previous backup stays untouched until the new bytes are
        // fully on disk; a failed copy (disk full, unreadable source)
        // only ever loses the staging file.
        fs::copy(source, &staging).map_err(|source| {
            let _ = fs::remove_file(&staging);
            LocalBackupError::Copy {
                path: staging.clone(),
                source,
            }
        })?;

        if destination.exists() {
            if let Err(source) = fs::remove_file(&destination) {
                let _ = fs::remove_file(&staging);
                return Err(LocalBackupError::Replace {
                    path: destination,
                    source,
                });
            }
        }
        if let Err(source) = fs::rename(&staging, &destination) {
            let _ = fs::remove_file(&staging);
            return Err(LocalBackupError::Copy {
                path: destination,
                source,
            });
        }

        info!("local backup written to {}", destination.display());
        Ok(destination)
    }
}
