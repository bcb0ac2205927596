//! Collaborator seams: the binary module reader/writer and the
//! instrumentation transform.
//!
//! The orchestrator does not understand any particular binary format, and
//! it does not know how mocking hooks are injected. Both capabilities come
//! from the caller through these traits, which keeps the weaving logic
//! testable against fakes and lets a real reader/injector stack plug in
//! unchanged.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A module file could not be read or parsed.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("failed to read module {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("module {path} is malformed: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

/// The instrumentation transform rejected a module.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("instrumentation failed: {0}")]
    Rejected(String),
}

/// An open handle to a compiled binary unit.
pub trait BinaryModule {
    /// Logical names of the modules this module references.
    ///
    /// Names only; resolving a name to a path is the walker's concern.
    fn references(&self) -> &BTreeSet<String>;

    /// Serialize the (possibly mutated) module to `path`.
    fn write(&self, path: &Path) -> io::Result<()>;
}

/// Opens module files of one particular binary format.
pub trait ModuleLoader {
    type Module: BinaryModule;

    /// Open the module at `path` for reading.
    fn open(&self, path: &Path) -> Result<Self::Module, FormatError>;

    /// File extension (no leading dot) used when resolving a reference
    /// name to a candidate file in the trusted directory.
    fn extension(&self) -> &'static str;
}

/// Rewrites a module's internals to add mocking hooks.
///
/// `patch` must not be applied twice to the same module; callers gate it
/// behind [`Injector::is_patched`].
pub trait Injector<M: BinaryModule> {
    /// Whether the module already carries the instrumentation.
    fn is_patched(&self, module: &M) -> bool;

    /// Rewrite the in-memory module to add mocking hooks.
    ///
    /// Mutates the loaded representation only; nothing touches disk until
    /// the module is committed.
    fn patch(&self, module: &mut M) -> Result<(), TransformError>;
}
