//! Deployment scope validation.
//!
//! Patching is confined to a single trusted directory, normally the one
//! containing the orchestrator's own binary. The guard rejects an entry
//! module anywhere else before a single module file is opened, so the tool
//! can never rewrite binaries it does not deploy next to.

use std::env;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScopeError {
    #[error("entry module path is empty")]
    EmptyEntryPath,

    #[error("entry module path has no containing directory: {0}")]
    NoParent(PathBuf),

    #[error(
        "unsupported deployment layout: entry module directory {entry_dir} \
         does not match trusted directory {trusted_dir}"
    )]
    OutsideTrustedDir {
        entry_dir: PathBuf,
        trusted_dir: PathBuf,
    },

    #[error("cannot resolve {path}: {source}")]
    Resolve {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot locate the running orchestrator binary: {0}")]
    OwnLocation(#[source] io::Error),
}

/// Confirms that an entry module lives in the trusted directory.
#[derive(Debug, Clone)]
pub struct ScopeGuard {
    trusted_dir: PathBuf,
}

impl ScopeGuard {
    /// Create a guard for an explicit trusted directory.
    ///
    /// The directory is canonicalized so symlinked layouts compare
    /// correctly.
    pub fn new(trusted_dir: impl AsRef<Path>) -> Result<Self, ScopeError> {
        let trusted_dir = canonicalize(trusted_dir.as_ref())?;
        Ok(Self { trusted_dir })
    }

    /// Create a guard whose trusted directory is the one containing the
    /// running binary, the production layout: the orchestrator only
    /// patches modules deployed beside itself.
    pub fn beside_own_binary() -> Result<Self, ScopeError> {
        let exe = env::current_exe().map_err(ScopeError::OwnLocation)?;
        let dir = exe
            .parent()
            .ok_or_else(|| ScopeError::NoParent(exe.clone()))?;
        Self::new(dir)
    }

    pub fn trusted_dir(&self) -> &Path {
        &self.trusted_dir
    }

    /// Validate an entry module path.
    ///
    /// Returns the canonicalized absolute path if the entry module's
    /// directory matches the trusted directory. The comparison ignores
    /// case, following the case-insensitive module naming convention of
    /// the target ecosystem.
    pub fn validate_entry(&self, entry: &Path) -> Result<PathBuf, ScopeError> {
        if entry.as_os_str().is_empty() {
            return Err(ScopeError::EmptyEntryPath);
        }

        let entry = canonicalize(entry)?;
        let entry_dir = entry
            .parent()
            .ok_or_else(|| ScopeError::NoParent(entry.clone()))?;

        if !dirs_equal_ignore_case(entry_dir, &self.trusted_dir) {
            return Err(ScopeError::OutsideTrustedDir {
                entry_dir: entry_dir.to_path_buf(),
                trusted_dir: self.trusted_dir.clone(),
            });
        }

        Ok(entry)
    }
}

fn canonicalize(path: &Path) -> Result<PathBuf, ScopeError> {
    path.canonicalize().map_err(|source| ScopeError::Resolve {
        path: path.to_path_buf(),
        source,
    })
}

fn dirs_equal_ignore_case(a: &Path, b: &Path) -> bool {
    a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
}
