//! End-to-end closure patching scenarios over the module-image backend.

use mockweave::{
    backup_path_for, temp_path_for, BinaryModule, HookInjector, ImageLoader, ImageModule,
    Injector, ModuleLoader, PatchEntry, PatchReport, PatchState, ScopeError, Weaver,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_image(dir: &Path, name: &str, refs: &[&str]) -> PathBuf {
    let path = dir.join(format!("{name}.mwm"));
    let image = ImageModule::build(
        name,
        refs.iter().map(|r| (*r).to_string()),
        format!("code of {name}").into_bytes(),
    );
    image.write(&path).unwrap();
    path
}

fn weaver_for(dir: &Path) -> Weaver<ImageLoader, HookInjector> {
    Weaver::new(ImageLoader, HookInjector, dir).unwrap()
}

fn state_of(report: &PatchReport, identity: &str) -> PatchState {
    report
        .get(identity)
        .unwrap_or_else(|| panic!("no outcome recorded for {identity}"))
        .state
}

fn path_state(report: &PatchReport, path: &Path) -> PatchState {
    state_of(report, &path.display().to_string())
}

#[test]
fn patches_dependency_closure() {
    // suite references core and vendor; core references missing.
    // Only core exists beside the entry module.
    let temp = TempDir::new().unwrap();
    let dir = temp.path().canonicalize().unwrap();
    let entry = write_image(&dir, "suite", &["core", "vendor"]);
    let core = write_image(&dir, "core", &["missing"]);

    let report = weaver_for(&dir)
        .patch_closure(&entry, PatchEntry::Preserve)
        .unwrap();

    assert_eq!(report.len(), 4);
    assert_eq!(path_state(&report, &entry), PatchState::IgnoredEntryModule);
    assert_eq!(path_state(&report, &core), PatchState::Patched);
    assert_eq!(state_of(&report, "vendor"), PatchState::IgnoredOutsideScope);
    assert_eq!(state_of(&report, "missing"), PatchState::IgnoredOutsideScope);

    // Only the patched module carries a backup.
    let core_outcome = report.get(&core.display().to_string()).unwrap();
    assert_eq!(core_outcome.backup.as_deref(), Some(backup_path_for(&core).as_path()));
    assert!(backup_path_for(&core).is_file());
    assert!(report.get("vendor").unwrap().backup.is_none());

    // The entry module is untouched on disk, core is instrumented.
    assert!(!ImageLoader.open(&entry).unwrap().is_marked());
    assert!(ImageLoader.open(&core).unwrap().is_marked());
}

#[test]
fn second_run_reports_already_patched() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().canonicalize().unwrap();
    let entry = write_image(&dir, "suite", &["core", "vendor"]);
    let core = write_image(&dir, "core", &["missing"]);
    let weaver = weaver_for(&dir);

    weaver.patch_closure(&entry, PatchEntry::Preserve).unwrap();
    let backup_bytes = fs::read(backup_path_for(&core)).unwrap();
    let patched_bytes = fs::read(&core).unwrap();

    let rerun = weaver.patch_closure(&entry, PatchEntry::Preserve).unwrap();

    assert_eq!(path_state(&rerun, &entry), PatchState::IgnoredEntryModule);
    assert_eq!(path_state(&rerun, &core), PatchState::AlreadyPatched);
    assert_eq!(state_of(&rerun, "vendor"), PatchState::IgnoredOutsideScope);
    assert_eq!(state_of(&rerun, "missing"), PatchState::IgnoredOutsideScope);

    // Nothing was rewritten: no second backup, no content drift.
    assert_eq!(fs::read(backup_path_for(&core)).unwrap(), backup_bytes);
    assert_eq!(fs::read(&core).unwrap(), patched_bytes);
}

#[test]
fn entry_module_is_preserved_even_when_already_patched() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().canonicalize().unwrap();

    let mut image = ImageModule::build("suite", Vec::new(), b"entry code".to_vec());
    HookInjector.patch(&mut image).unwrap();
    let entry = dir.join("suite.mwm");
    image.write(&entry).unwrap();

    let report = weaver_for(&dir)
        .patch_closure(&entry, PatchEntry::Preserve)
        .unwrap();

    // Preservation outranks the already-patched classification.
    assert_eq!(path_state(&report, &entry), PatchState::IgnoredEntryModule);
}

#[test]
fn include_entry_patches_the_entry_module() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().canonicalize().unwrap();
    let entry = write_image(&dir, "suite", &[]);

    let report = weaver_for(&dir)
        .patch_closure(&entry, PatchEntry::Patch)
        .unwrap();

    assert_eq!(path_state(&report, &entry), PatchState::Patched);
    assert!(ImageLoader.open(&entry).unwrap().is_marked());
    assert!(backup_path_for(&entry).is_file());
}

#[test]
fn leftover_temp_file_does_not_block_rerun() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().canonicalize().unwrap();
    let entry = write_image(&dir, "suite", &["core"]);
    let core = write_image(&dir, "core", &[]);

    // Simulate an interrupted run that died after writing the temp file.
    fs::write(temp_path_for(&core), b"half-written junk").unwrap();

    let report = weaver_for(&dir)
        .patch_closure(&entry, PatchEntry::Preserve)
        .unwrap();

    assert_eq!(path_state(&report, &core), PatchState::Patched);
    assert!(!temp_path_for(&core).exists());
    assert!(ImageLoader.open(&core).unwrap().is_marked());
}

#[test]
fn backup_holds_exact_prepatch_bytes() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().canonicalize().unwrap();
    let entry = write_image(&dir, "suite", &["core"]);
    let core = write_image(&dir, "core", &[]);
    let prepatch = fs::read(&core).unwrap();

    weaver_for(&dir)
        .patch_closure(&entry, PatchEntry::Preserve)
        .unwrap();

    let backup = backup_path_for(&core);
    assert_eq!(fs::read(&backup).unwrap(), prepatch);

    // Re-applying the transform to the backup reproduces the patched
    // module byte for byte.
    let mut from_backup = ImageLoader.open(&backup).unwrap();
    HookInjector.patch(&mut from_backup).unwrap();
    assert_eq!(from_backup.encode().unwrap(), fs::read(&core).unwrap());
}

#[test]
fn unresolved_names_recorded_once_ignoring_case() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().canonicalize().unwrap();
    let entry = write_image(&dir, "suite", &["Gone", "gone"]);

    let report = weaver_for(&dir)
        .patch_closure(&entry, PatchEntry::Preserve)
        .unwrap();

    // One record for the entry, one shared record for both spellings.
    assert_eq!(report.len(), 2);
    assert_eq!(state_of(&report, "GONE"), PatchState::IgnoredOutsideScope);
    assert_eq!(report.get("gone").unwrap().identity, "Gone");
}

#[test]
fn reference_cycles_terminate() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().canonicalize().unwrap();
    let entry = write_image(&dir, "alpha", &["beta"]);
    let beta = write_image(&dir, "beta", &["alpha", "beta"]);

    let report = weaver_for(&dir)
        .patch_closure(&entry, PatchEntry::Preserve)
        .unwrap();

    assert_eq!(report.len(), 2);
    assert_eq!(path_state(&report, &entry), PatchState::IgnoredEntryModule);
    assert_eq!(path_state(&report, &beta), PatchState::Patched);
}

#[test]
fn malformed_module_fails_without_blocking_others() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().canonicalize().unwrap();
    let entry = write_image(&dir, "suite", &["broken", "lib"]);
    let lib = write_image(&dir, "lib", &[]);
    let broken = dir.join("broken.mwm");
    fs::write(&broken, b"not a module image").unwrap();
    let broken_bytes = fs::read(&broken).unwrap();

    let report = weaver_for(&dir)
        .patch_closure(&entry, PatchEntry::Preserve)
        .unwrap();

    assert_eq!(path_state(&report, &broken), PatchState::GeneralFailure);
    assert_eq!(path_state(&report, &lib), PatchState::Patched);

    // The unparseable module is left exactly as it was, with no backup.
    assert_eq!(fs::read(&broken).unwrap(), broken_bytes);
    assert!(!backup_path_for(&broken).exists());
}

#[test]
fn entry_outside_trusted_dir_aborts_before_any_work() {
    let temp = TempDir::new().unwrap();
    let trusted = temp.path().join("trusted");
    let elsewhere = temp.path().join("elsewhere");
    fs::create_dir_all(&trusted).unwrap();
    fs::create_dir_all(&elsewhere).unwrap();
    let entry = write_image(&elsewhere, "suite", &["core"]);
    let core = write_image(&elsewhere, "core", &[]);
    let before = fs::read(&core).unwrap();

    let result = weaver_for(&trusted).patch_closure(&entry, PatchEntry::Preserve);

    assert!(matches!(result, Err(ScopeError::OutsideTrustedDir { .. })));
    assert_eq!(fs::read(&core).unwrap(), before);
}

#[test]
fn restore_undoes_a_whole_run() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().canonicalize().unwrap();
    let entry = write_image(&dir, "suite", &["core", "lib"]);
    let core = write_image(&dir, "core", &[]);
    let lib = write_image(&dir, "lib", &[]);
    let core_before = fs::read(&core).unwrap();
    let lib_before = fs::read(&lib).unwrap();

    weaver_for(&dir)
        .patch_closure(&entry, PatchEntry::Preserve)
        .unwrap();
    let restored = mockweave::restore_all(&dir).unwrap();

    assert_eq!(restored.len(), 2);
    assert_eq!(fs::read(&core).unwrap(), core_before);
    assert_eq!(fs::read(&lib).unwrap(), lib_before);
    assert!(!backup_path_for(&core).exists());
    assert!(!backup_path_for(&lib).exists());
}
