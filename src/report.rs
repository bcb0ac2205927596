//! Patch outcome bookkeeping.
//!
//! One record per module identity, where an identity is the absolute path
//! of a processed module or the bare name of a reference that never
//! resolved. Keys compare case-insensitively, matching the naming
//! convention of the module ecosystem, and the first classification for an
//! identity wins.

use indexmap::IndexMap;
use serde::ser::{Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;

/// Final disposition of one module or unresolved reference name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatchState {
    /// The module could not be opened, transformed, or committed.
    GeneralFailure,
    /// The designated entry module; never modified unless explicitly
    /// requested.
    IgnoredEntryModule,
    /// A reference with no corresponding file in the trusted directory.
    IgnoredOutsideScope,
    /// Already carries the instrumentation marker.
    ///
    /// Detection is marker-based only: a module instrumented by an older
    /// tool version is indistinguishable from an up-to-date one.
    AlreadyPatched,
    /// Transformed and committed; the pre-patch content went to the
    /// backup.
    Patched,
}

impl fmt::Display for PatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PatchState::GeneralFailure => "general-failure",
            PatchState::IgnoredEntryModule => "ignored-entry-module",
            PatchState::IgnoredOutsideScope => "ignored-outside-scope",
            PatchState::AlreadyPatched => "already-patched",
            PatchState::Patched => "patched",
        };
        f.write_str(label)
    }
}

/// Outcome record for a single identity.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PatchOutcome {
    /// Absolute path for processed modules, bare reference name for
    /// unresolved references.
    pub identity: String,
    /// Backup location; present only when `state` is
    /// [`PatchState::Patched`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
    pub state: PatchState,
}

impl PatchOutcome {
    pub fn new(identity: impl Into<String>, state: PatchState) -> Self {
        Self {
            identity: identity.into(),
            backup: None,
            state,
        }
    }

    pub fn patched(identity: impl Into<String>, backup: PathBuf) -> Self {
        Self {
            identity: identity.into(),
            backup: Some(backup),
            state: PatchState::Patched,
        }
    }
}

impl fmt::Display for PatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.identity, self.state)?;
        if let Some(backup) = &self.backup {
            write!(f, " (backup: {})", backup.display())?;
        }
        Ok(())
    }
}

/// Case-folded map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FoldedKey(String);

impl FoldedKey {
    fn new(identity: &str) -> Self {
        Self(identity.to_lowercase())
    }
}

/// Ordered collection of patch outcomes, one per identity.
///
/// Records keep discovery order. Inserting a second outcome for an
/// already-recorded identity is a no-op.
#[derive(Debug, Default)]
#[must_use = "PatchReport should be checked for failed modules"]
pub struct PatchReport {
    entries: IndexMap<FoldedKey, PatchOutcome>,
}

impl PatchReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outcome unless its identity already has one.
    ///
    /// Returns whether the outcome was recorded.
    pub fn record(&mut self, outcome: PatchOutcome) -> bool {
        let key = FoldedKey::new(&outcome.identity);
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, outcome);
        true
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.entries.contains_key(&FoldedKey::new(identity))
    }

    pub fn get(&self, identity: &str) -> Option<&PatchOutcome> {
        self.entries.get(&FoldedKey::new(identity))
    }

    /// Outcomes in discovery order.
    pub fn iter(&self) -> Iter<'_> {
        Iter(self.entries.values())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of outcomes in the given state.
    pub fn count(&self, state: PatchState) -> usize {
        self.entries.values().filter(|o| o.state == state).count()
    }
}

/// Iterator over a report's outcomes in discovery order.
pub struct Iter<'a>(indexmap::map::Values<'a, FoldedKey, PatchOutcome>);

impl<'a> Iterator for Iter<'a> {
    type Item = &'a PatchOutcome;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

impl<'a> IntoIterator for &'a PatchReport {
    type Item = &'a PatchOutcome;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Serialize for PatchReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.values())
    }
}
