//! Mockweave: in-place instrumentation of compiled module closures
//!
//! Patches compiled binary modules on disk so that a test-mocking
//! framework can intercept calls that are normally impossible to
//! intercept (for example calls to non-overridable methods), without
//! recompiling the original sources with special annotations.
//!
//! # Architecture
//!
//! Everything revolves around one orchestrator, [`Weaver`]: starting from
//! a single entry module it discovers the closure of dependent modules in
//! the trusted directory, classifies each one, applies the
//! instrumentation transform exactly once per module, and commits the
//! result atomically with a recoverable backup. The binary format and the
//! transform are capabilities supplied through the [`ModuleLoader`] and
//! [`Injector`] traits; a minimal reference backend ([`ImageLoader`],
//! [`HookInjector`]) ships with the crate.
//!
//! # Safety
//!
//! - Patching is confined to one trusted directory, checked up front
//! - Each module is transformed at most once (`is_patched` gate)
//! - Commits are atomic: temp file + hard-linked backup + rename
//! - A module that fails is reported and skipped, never half-written
//!
//! # Example
//!
//! ```no_run
//! use mockweave::{HookInjector, ImageLoader, PatchEntry, Weaver};
//! use std::path::Path;
//!
//! let weaver = Weaver::new(ImageLoader, HookInjector, "/opt/suite")?;
//! let report = weaver.patch_closure(Path::new("/opt/suite/tests.mwm"), PatchEntry::Preserve)?;
//! for outcome in &report {
//!     println!("{outcome}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod closure;
pub mod commit;
pub mod image;
pub mod module;
pub mod report;
pub mod scope;
pub mod weaver;

// Re-exports
pub use commit::{backup_path_for, restore_all, restore_backup, temp_path_for, CommitError};
pub use image::{HookInjector, ImageLoader, ImageModule, IMAGE_EXTENSION};
pub use module::{BinaryModule, FormatError, Injector, ModuleLoader, TransformError};
pub use report::{PatchOutcome, PatchReport, PatchState};
pub use scope::{ScopeError, ScopeGuard};
pub use weaver::{PatchEntry, Weaver};
