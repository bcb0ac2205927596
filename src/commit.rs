//! Atomic on-disk commit of a transformed module, and recovery from the
//! backups it leaves behind.
//!
//! The write path is: serialize to `<path>.tmp`, hard-link the untouched
//! original to `<path>.orig`, then rename the temp file over the original.
//! The rename is the only operation that mutates the original path, so an
//! interruption at any earlier point leaves the original module intact,
//! and a rerun cleans up whatever half-finished files remain.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::module::BinaryModule;

const BACKUP_EXTENSION: &str = "orig";
const TEMP_EXTENSION: &str = "tmp";

#[derive(Error, Debug)]
pub enum CommitError {
    #[error("failed to remove stale temp file {path}: {source}")]
    StaleTemp {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize module to {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to back up module to {path}: {source}")]
    Backup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to replace {path}: {source}")]
    Replace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0} is not a module backup")]
    NotABackup(PathBuf),

    #[error("no backup found at {0}")]
    MissingBackup(PathBuf),

    #[error("failed to restore backup {path}: {source}")]
    Restore {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Backup location for a module path: `<path>.orig`.
pub fn backup_path_for(path: &Path) -> PathBuf {
    append_extension(path, BACKUP_EXTENSION)
}

/// Transient serialization target for a module path: `<path>.tmp`.
pub fn temp_path_for(path: &Path) -> PathBuf {
    append_extension(path, TEMP_EXTENSION)
}

fn append_extension(path: &Path, extension: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(".");
    raw.push(extension);
    PathBuf::from(raw)
}

/// Commit a transformed module to disk.
///
/// Atomically replaces the file at `path` with the module's serialized
/// form and leaves the pre-patch content at the backup path, which is
/// returned. Takes the module by value: the handle must be released
/// before the original file can be replaced, and dropping it here
/// guarantees that.
pub fn commit<M: BinaryModule>(module: M, path: &Path) -> Result<PathBuf, CommitError> {
    let temp = temp_path_for(path);
    // An interrupted earlier run may have left a temp file behind.
    remove_stale(&temp).map_err(|source| CommitError::StaleTemp {
        path: temp.clone(),
        source,
    })?;

    module
        .write(&temp)
        .and_then(|()| sync(&temp))
        .map_err(|source| CommitError::Serialize {
            path: temp.clone(),
            source,
        })?;
    drop(module);

    let backup = backup_path_for(path);
    remove_stale(&backup).map_err(|source| CommitError::Backup {
        path: backup.clone(),
        source,
    })?;
    // Hard link rather than copy: after the rename below, the backup is
    // the sole remaining name for the pre-patch content, byte-identical
    // by construction.
    fs::hard_link(path, &backup).map_err(|source| CommitError::Backup {
        path: backup.clone(),
        source,
    })?;

    // The single atomic commit point.
    fs::rename(&temp, path).map_err(|source| CommitError::Replace {
        path: path.to_path_buf(),
        source,
    })?;

    // TODO: relocate the paired debug-symbol file here once the injector
    // learns to rewrite symbol information.

    Ok(backup)
}

fn remove_stale(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn sync(path: &Path) -> io::Result<()> {
    fs::File::open(path)?.sync_all()
}

/// Move a backup back over its module, undoing a patch.
///
/// Returns the restored module path.
pub fn restore_backup(backup: &Path) -> Result<PathBuf, CommitError> {
    let target = module_path_for(backup)
        .ok_or_else(|| CommitError::NotABackup(backup.to_path_buf()))?;
    if !backup.is_file() {
        return Err(CommitError::MissingBackup(backup.to_path_buf()));
    }

    fs::rename(backup, &target).map_err(|source| CommitError::Restore {
        path: backup.to_path_buf(),
        source,
    })?;
    Ok(target)
}

/// Restore every backup directly inside `dir`.
///
/// Returns the restored module paths in file-name order. Subdirectories
/// are not scanned; patching never writes below the trusted directory.
pub fn restore_all(dir: &Path) -> Result<Vec<PathBuf>, CommitError> {
    let mut restored = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|source| CommitError::Restore {
            path: dir.to_path_buf(),
            source: io::Error::from(source),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|e| e.to_str()) == Some(BACKUP_EXTENSION) {
            restored.push(restore_backup(entry.path())?);
        }
    }

    Ok(restored)
}

fn module_path_for(backup: &Path) -> Option<PathBuf> {
    let name = backup.file_name()?.to_str()?;
    let stem = name.strip_suffix(BACKUP_EXTENSION)?.strip_suffix('.')?;
    if stem.is_empty() {
        return None;
    }
    Some(backup.with_file_name(stem))
}
