// # Atomic JSON persistence
//
// Shared by the file-backed domain store, the credential vault and the
// settings store.
//
// ## Crash Recovery
//
// - Atomic writes: new content goes to `<file>.tmp`, then renamed over the target
// - Backup: the previous file is copied to `<file>.backup` before each rename
// - Recovery: if the main file fails to parse, the backup is loaded and
//   copied back over the corrupted file

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::Error;

enum LoadFailure {
    Io(Error),
    Corrupt(Error),
}

/// Create the parent directory of `path` if needed
pub(crate) async fn ensure_parent(path: &Path) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::storage(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }
    Ok(())
}

/// Load a JSON document, falling back to its backup on corruption
///
/// Returns `Ok(None)` when neither file exists.
pub(crate) async fn load_with_recovery<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, Error> {
    match load(path).await {
        Ok(value) => Ok(value),
        Err(LoadFailure::Io(e)) => Err(e),
        Err(LoadFailure::Corrupt(e)) => {
            tracing::warn!(
                "{} appears corrupted: {}. Attempting recovery from backup.",
                path.display(),
                e
            );

            let backup = backup_path(path);
            match load::<T>(&backup).await {
                Ok(Some(value)) => {
                    tracing::info!("Recovered {} from backup", path.display());
                    if let Err(restore_err) = fs::copy(&backup, path).await {
                        tracing::error!(
                            "Failed to restore {} from backup: {}",
                            path.display(),
                            restore_err
                        );
                    }
                    Ok(Some(value))
                }
                Ok(None) => Err(Error::storage(format!(
                    "{} is corrupted and no backup exists: {}",
                    path.display(),
                    e
                ))),
                Err(LoadFailure::Io(be)) | Err(LoadFailure::Corrupt(be)) => Err(Error::storage(format!(
                    "{} is corrupted and its backup is unusable: {} / {}",
                    path.display(),
                    e,
                    be
                ))),
            }
        }
    }
}

async fn load<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, LoadFailure> {
    if !path.exists() {
        tracing::debug!("File does not exist: {}", path.display());
        return Ok(None);
    }

    let content = fs::read_to_string(path).await.map_err(|e| {
        LoadFailure::Io(Error::storage(format!(
            "Failed to read {}: {}",
            path.display(),
            e
        )))
    })?;

    serde_json::from_str(&content).map(Some).map_err(|e| {
        LoadFailure::Corrupt(Error::storage(format!(
            "Failed to parse {}: {}",
            path.display(),
            e
        )))
    })
}

/// Write a JSON document atomically
///
/// Callers must serialize concurrent writes to the same path.
pub(crate) async fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), Error> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::storage(format!("Failed to serialize {}: {}", path.display(), e)))?;

    let temp = temp_path(path);
    {
        let mut file = fs::File::create(&temp).await.map_err(|e| {
            Error::storage(format!("Failed to create temp file {}: {}", temp.display(), e))
        })?;

        file.write_all(json.as_bytes()).await.map_err(|e| {
            Error::storage(format!("Failed to write temp file {}: {}", temp.display(), e))
        })?;

        file.flush().await.map_err(|e| {
            Error::storage(format!("Failed to flush temp file {}: {}", temp.display(), e))
        })?;
    }

    if path.exists() {
        if let Err(e) = fs::copy(path, backup_path(path)).await {
            tracing::warn!("Failed to create backup of {}: {}", path.display(), e);
        }
    }

    fs::rename(&temp, path).await.map_err(|e| {
        Error::storage(format!(
            "Failed to rename {} to {}: {}",
            temp.display(),
            path.display(),
            e
        ))
    })?;

    tracing::trace!("Wrote {}", path.display());
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut p = path.as_os_str().to_owned();
    p.push(".tmp");
    PathBuf::from(p)
}

pub(crate) fn backup_path(path: &Path) -> PathBuf {
    let mut p = path.as_os_str().to_owned();
    p.push(".backup");
    PathBuf::from(p)
}
