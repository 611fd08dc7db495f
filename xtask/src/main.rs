//! Project automation for k8s-addon-tester
//!
//! Usage: cargo xtask <command>
//!
//! - ci: fmt check, clippy, unit and integration tests
//! - fmt: format the workspace
//! - docs: regenerate docs/config.md and docs/env.txt from the schema tables
//! - dist: release tarball under dist/
//! - smoke: apply then delete a config against the current cluster

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use xshell::{cmd, Shell};

const BIN: &str = "k8s-addon-tester";

#[derive(Parser)]
#[command(name = "xtask", about = "Project automation for k8s-addon-tester")]
struct Cli {
    #[command(subcommand)]
    task: Task,
}

#[derive(Subcommand)]
enum Task {
    /// Everything CI runs, in the order it runs it
    Ci,
    /// Format the workspace
    Fmt {
        /// Fail instead of rewriting files
        #[arg(long)]
        check: bool,
    },
    /// Regenerate the config reference
    Docs,
    /// Build a release tarball
    Dist {
        /// Cross-compile for this target triple
        #[arg(long)]
        target: Option<String>,
    },
    /// Apply and then delete a config against a live cluster
    Smoke {
        /// Tester config file; created with defaults when missing
        #[arg(long, short = 'c')]
        config: PathBuf,

        /// Leave the add-ons installed after apply
        #[arg(long)]
        keep: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;
    sh.change_dir(workspace_root());

    match cli.task {
        Task::Ci => ci(&sh),
        Task::Fmt { check } => fmt(&sh, check),
        Task::Docs => docs(&sh),
        Task::Dist { target } => dist(&sh, target.as_deref()),
        Task::Smoke { config, keep } => smoke(&sh, &config, keep),
    }
}

fn ci(sh: &Shell) -> Result<()> {
    fmt(sh, true)?;
    cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;
    cmd!(sh, "cargo test --workspace").run()?;
    println!("✅ CI checks passed");
    Ok(())
}

fn fmt(sh: &Shell, check: bool) -> Result<()> {
    let flag: &[&str] = if check { &["--check"] } else { &[] };
    cmd!(sh, "cargo fmt --all -- {flag...}").run()?;
    Ok(())
}

fn docs(sh: &Shell) -> Result<()> {
    let dir = workspace_root().join("docs");
    sh.create_dir(&dir)?;

    let tables = cmd!(sh, "cargo run --quiet --bin {BIN} -- docs")
        .env("NO_COLOR", "1")
        .read()
        .context("rendering schema tables")?;
    sh.write_file(
        dir.join("config.md"),
        format!("# Configuration\n\n```text\n{}\n```\n", tables),
    )?;

    let keys = cmd!(sh, "cargo run --quiet --bin {BIN} -- env --all")
        .read()
        .context("listing environment keys")?;
    sh.write_file(dir.join("env.txt"), format!("{}\n", keys))?;

    println!("📝 Wrote docs/config.md and docs/env.txt");
    Ok(())
}

fn dist(sh: &Shell, target: Option<&str>) -> Result<()> {
    let version = cmd!(sh, "cargo pkgid").read()?;
    let version = version.rsplit(['#', '@']).next().unwrap_or("0.0.0").to_string();

    let binary = match target {
        Some(t) => {
            cmd!(sh, "cargo build --release --bin {BIN} --target {t}").run()?;
            workspace_root().join(format!("target/{}/release/{}", t, BIN))
        }
        None => {
            cmd!(sh, "cargo build --release --bin {BIN}").run()?;
            workspace_root().join(format!("target/release/{}", BIN))
        }
    };
    if !binary.exists() {
        bail!("release binary missing at {}", binary.display());
    }

    let dist = workspace_root().join("dist");
    sh.remove_path(&dist)?;
    sh.create_dir(&dist)?;
    sh.copy_file(&binary, dist.join(BIN))?;

    let suffix = target.map(|t| format!("-{}", t)).unwrap_or_default();
    let archive = format!("{}-{}{}.tar.gz", BIN, version, suffix);
    cmd!(sh, "tar -czf {archive} -C dist {BIN}").run()?;
    println!("📦 {}", archive);
    Ok(())
}

/// Runs the debug binary without prompting. Delete always runs unless
/// `keep` is set, even when apply failed.
fn smoke(sh: &Shell, config: &Path, keep: bool) -> Result<()> {
    cmd!(sh, "cargo build --bin {BIN}").run()?;
    let binary = workspace_root().join(format!("target/debug/{}", BIN));

    let applied = cmd!(sh, "{binary} --no-prompt apply --config {config}").run();
    if keep {
        return applied.context("apply failed");
    }
    let deleted = cmd!(sh, "{binary} --no-prompt delete --config {config}").run();

    match (applied, deleted) {
        (Ok(()), Ok(())) => {
            println!("✅ Smoke run passed");
            Ok(())
        }
        (Err(e), Ok(())) => Err(e).context("apply failed; delete succeeded"),
        (Ok(()), Err(e)) => Err(e).context("delete failed"),
        (Err(a), Err(d)) => bail!("apply failed ({}) and delete failed ({})", a, d),
    }
}

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
