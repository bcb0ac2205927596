use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use mockweave::{
    restore_all, BinaryModule, HookInjector, ImageLoader, ModuleLoader, PatchEntry, PatchReport,
    PatchState, Weaver,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mockweave")]
#[command(about = "Patches compiled module closures in place for elevated mocking", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Patch the entry module's reference closure
    Patch {
        /// Entry module (typically the test-suite module)
        entry: PathBuf,

        /// Also patch the entry module itself
        #[arg(long)]
        include_entry: bool,

        /// Trusted directory override; defaults to the directory
        /// containing this binary
        #[arg(short, long)]
        trusted_dir: Option<PathBuf>,

        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Move .orig backups back over their patched modules
    Restore {
        /// Directory to scan for backups
        dir: PathBuf,
    },

    /// Show a module image's name, marker, and references
    Inspect {
        /// Module image to read
        module: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Patch {
            entry,
            include_entry,
            trusted_dir,
            json,
        } => cmd_patch(entry, include_entry, trusted_dir, json),

        Commands::Restore { dir } => cmd_restore(dir),

        Commands::Inspect { module } => cmd_inspect(module),
    }
}

fn cmd_patch(
    entry: PathBuf,
    include_entry: bool,
    trusted_dir: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let weaver = match trusted_dir {
        Some(dir) => Weaver::new(ImageLoader, HookInjector, dir)?,
        None => Weaver::beside_own_binary(ImageLoader, HookInjector)?,
    };

    let patch_entry = if include_entry {
        PatchEntry::Patch
    } else {
        PatchEntry::Preserve
    };

    let report = weaver.patch_closure(&entry, patch_entry)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    let failures = report.count(PatchState::GeneralFailure);
    if failures > 0 {
        anyhow::bail!("{failures} module(s) failed to patch");
    }
    Ok(())
}

fn print_report(report: &PatchReport) {
    for outcome in report {
        let line = outcome.to_string();
        let line = match outcome.state {
            PatchState::Patched => line.green(),
            PatchState::AlreadyPatched => line.cyan(),
            PatchState::GeneralFailure => line.red(),
            PatchState::IgnoredEntryModule | PatchState::IgnoredOutsideScope => line.dimmed(),
        };
        println!("{line}");
    }

    let ignored = report.count(PatchState::IgnoredEntryModule)
        + report.count(PatchState::IgnoredOutsideScope);
    println!(
        "{} patched, {} already patched, {} ignored, {} failed",
        report.count(PatchState::Patched),
        report.count(PatchState::AlreadyPatched),
        ignored,
        report.count(PatchState::GeneralFailure),
    );
}

fn cmd_restore(dir: PathBuf) -> Result<()> {
    let restored =
        restore_all(&dir).with_context(|| format!("restoring backups in {}", dir.display()))?;

    if restored.is_empty() {
        println!("no backups found in {}", dir.display());
        return Ok(());
    }
    for path in restored {
        println!("{} {}", "restored".green(), path.display());
    }
    Ok(())
}

fn cmd_inspect(module: PathBuf) -> Result<()> {
    let image = ImageLoader
        .open(&module)
        .with_context(|| format!("opening {}", module.display()))?;

    println!("name: {}", image.name());
    println!(
        "instrumented: {}",
        if image.is_marked() {
            "yes".yellow().to_string()
        } else {
            "no".to_string()
        }
    );
    for reference in image.references() {
        println!("ref: {reference}");
    }
    Ok(())
}
