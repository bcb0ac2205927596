//! The patch orchestrator.
//!
//! Walks the reference closure of an entry module and drives every
//! discovered module through classification, instrumentation, and atomic
//! commit, producing one outcome record per identity. A module that fails
//! is reported and skipped; the rest of the closure keeps processing.

use std::path::Path;
use thiserror::Error;

use crate::closure::{resolve_reference, WorkQueue};
use crate::commit::{self, CommitError};
use crate::module::{BinaryModule, FormatError, Injector, ModuleLoader, TransformError};
use crate::report::{PatchOutcome, PatchReport, PatchState};
use crate::scope::{ScopeError, ScopeGuard};

/// Whether the entry module itself may be patched.
///
/// The entry module is typically the test-suite module and only the
/// systems under test should be instrumented, so the default preserves
/// it. Preservation takes precedence over every other classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatchEntry {
    #[default]
    Preserve,
    Patch,
}

/// Failure while processing one module of the closure.
///
/// Downgraded to a `GeneralFailure` outcome by the orchestrator; only a
/// scope violation aborts a whole run.
#[derive(Error, Debug)]
enum ModuleError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Commit(#[from] CommitError),
}

/// Orchestrates in-place patching of a module closure.
///
/// Generic over the binary format loader and the instrumentation
/// transform so it can drive a real mocking stack or the fakes used in
/// tests.
pub struct Weaver<L, I> {
    loader: L,
    injector: I,
    guard: ScopeGuard,
}

impl<L, I> Weaver<L, I>
where
    L: ModuleLoader,
    I: Injector<L::Module>,
{
    /// Create an orchestrator confined to `trusted_dir`.
    pub fn new(loader: L, injector: I, trusted_dir: impl AsRef<Path>) -> Result<Self, ScopeError> {
        Ok(Self {
            loader,
            injector,
            guard: ScopeGuard::new(trusted_dir)?,
        })
    }

    /// Create an orchestrator confined to the directory containing the
    /// running binary, the production deployment layout.
    pub fn beside_own_binary(loader: L, injector: I) -> Result<Self, ScopeError> {
        Ok(Self {
            loader,
            injector,
            guard: ScopeGuard::beside_own_binary()?,
        })
    }

    pub fn trusted_dir(&self) -> &Path {
        self.guard.trusted_dir()
    }

    /// Patch every module reachable from `entry` through references that
    /// resolve inside the trusted directory.
    ///
    /// Fails up front if the entry module does not live in the trusted
    /// directory. After that, each per-module failure is recorded as a
    /// `GeneralFailure` outcome and the walk continues: one bad module
    /// never blocks patching of the rest of the closure.
    pub fn patch_closure(
        &self,
        entry: &Path,
        patch_entry: PatchEntry,
    ) -> Result<PatchReport, ScopeError> {
        let entry = self.guard.validate_entry(entry)?;

        let mut report = PatchReport::new();
        let mut queue = WorkQueue::seeded(entry);

        while let Some((position, path)) = queue.next() {
            let outcome = self
                .process(position, &path, patch_entry, &mut queue, &mut report)
                .unwrap_or_else(|_| {
                    PatchOutcome::new(path.display().to_string(), PatchState::GeneralFailure)
                });
            report.record(outcome);
        }

        Ok(report)
    }

    /// Open one module, feed its references back into the queue, classify
    /// it, and commit it when it qualifies.
    fn process(
        &self,
        position: usize,
        path: &Path,
        patch_entry: PatchEntry,
        queue: &mut WorkQueue,
        report: &mut PatchReport,
    ) -> Result<PatchOutcome, ModuleError> {
        let mut module = self.loader.open(path)?;

        // References are walked before classification so that even a
        // skipped module still contributes its dependencies to the
        // closure.
        for name in module.references() {
            match resolve_reference(self.guard.trusted_dir(), name, self.loader.extension()) {
                Some(candidate) => {
                    if !report.contains(&candidate.display().to_string()) {
                        queue.enqueue(candidate);
                    }
                }
                None => {
                    report.record(PatchOutcome::new(
                        name.clone(),
                        PatchState::IgnoredOutsideScope,
                    ));
                }
            }
        }

        let identity = path.display().to_string();

        if position == 0 && patch_entry == PatchEntry::Preserve {
            return Ok(PatchOutcome::new(identity, PatchState::IgnoredEntryModule));
        }
        if self.injector.is_patched(&module) {
            return Ok(PatchOutcome::new(identity, PatchState::AlreadyPatched));
        }

        self.injector.patch(&mut module)?;
        let backup = commit::commit(module, path)?;
        Ok(PatchOutcome::patched(identity, backup))
    }
}
