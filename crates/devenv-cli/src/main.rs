//! `devenv` — capture and restore a developer's on-machine working state.
//!
//! Four verbs (§6): `manifest`, `backup`, `list-backups`, `restore`. All of
//! them accept `--timeout SECONDS`, which bounds the whole invocation (§5) —
//! expiry is reported as a timeout, not distinguished from any other error.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use devenv::backup::{self, BackupRequest};
use devenv::restore::{self, RestoreRequest};
use devenv::settings::{S3Url, Settings};
use devenv_store::{ObjectStore, S3Store};
use devenv_vcs::JjCli;

#[derive(Parser)]
#[command(name = "devenv")]
#[command(version, about = "Capture and restore a developer's on-machine working state")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the captured manifest JSON to standard output without touching
    /// the object store.
    Manifest(ManifestArgs),
    /// Upload files, agent session directories, and the manifest.
    Backup(BackupArgs),
    /// Enumerate backups recorded under `--base`/`--machine`.
    ListBackups(ListBackupsArgs),
    /// Download a backup's repositories, files, symlinks, and agent session
    /// directories onto this machine.
    Restore(RestoreArgs),
}

#[derive(clap::Args)]
struct CommonArgs {
    /// Overall deadline for the whole invocation. Expiry is reported as a
    /// timeout, not a distinct error kind (§5).
    #[arg(long, default_value_t = 120)]
    timeout: u64,
}

#[derive(clap::Args)]
struct ManifestArgs {
    #[arg(long, default_value = "~")]
    root_dir: PathBuf,
    #[arg(long)]
    no_include_files: bool,
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(clap::Args)]
struct BackupArgs {
    /// `s3://bucket/prefix` under which this machine's backups live.
    #[arg(long)]
    base: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    machine: Option<String>,
    #[arg(long)]
    agent_instructions: Option<String>,
    #[arg(long)]
    claude_dir_source: Option<PathBuf>,
    #[arg(long)]
    opencode_dir_source: Option<PathBuf>,
    #[arg(long, default_value = "~")]
    root_dir: PathBuf,
    #[arg(long)]
    no_include_files: bool,
    #[arg(long)]
    dry_run: bool,
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(clap::Args)]
struct ListBackupsArgs {
    #[arg(long)]
    base: String,
    #[arg(long)]
    machine: Option<String>,
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(clap::Args)]
struct RestoreArgs {
    #[arg(long)]
    base: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    machine: Option<String>,
    #[arg(long)]
    claude_dir_destination: Option<PathBuf>,
    #[arg(long)]
    opencode_dir_destination: Option<PathBuf>,
    #[arg(long)]
    manifest_file: Option<PathBuf>,
    /// `YYYY-MM-DD`; only agent-directory objects at or after this UTC date
    /// are restored.
    #[arg(long)]
    sessions_after: Option<String>,
    #[arg(long)]
    force: bool,
    #[arg(long, default_value = "~")]
    root_dir: PathBuf,
    #[arg(long)]
    dry_run: bool,
    #[command(flatten)]
    common: CommonArgs,
}

fn main() -> ExitCode {
    let _telemetry = devenv::telemetry::init();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(dispatch(cli)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns `Ok(true)` on full success, `Ok(false)` when the invocation
/// completed but accumulated reportable errors (exit code 1 per §6).
async fn dispatch(cli: Cli) -> Result<bool> {
    match cli.command {
        Commands::Manifest(args) => run_manifest(args).await,
        Commands::Backup(args) => run_backup(args).await,
        Commands::ListBackups(args) => run_list_backups(args).await,
        Commands::Restore(args) => run_restore(args).await,
    }
}

fn expand_root(root_dir: PathBuf) -> PathBuf {
    if root_dir == PathBuf::from("~") {
        dirs_home()
    } else {
        root_dir
    }
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
}

fn with_deadline<T>(timeout: Duration, fut: impl std::future::Future<Output = T>) -> impl std::future::Future<Output = Result<T>> {
    async move {
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| anyhow::anyhow!("invocation timed out after {}s", timeout.as_secs()))
    }
}

async fn run_manifest(args: ManifestArgs) -> Result<bool> {
    with_deadline(Duration::from_secs(args.common.timeout), async move {
        let root_dir = expand_root(args.root_dir);
        let mut settings = Settings::new(root_dir, None);
        settings.dry_run = true;
        let jj = JjCli::default();
        let store = devenv_store::MemoryStore::new();
        let base = S3Url {
            bucket: String::new(),
            prefix: String::new(),
        };

        let outcome = backup::run(
            &jj,
            &store,
            BackupRequest {
                settings: &settings,
                base: &base,
                name: "manifest",
                include_files: !args.no_include_files,
                agent_instructions: None,
                claude_dir_source: None,
                opencode_dir_source: None,
            },
        )
        .await;

        let bytes = outcome.manifest.to_json_bytes().context("serializing manifest")?;
        println!("{}", String::from_utf8_lossy(&bytes));
        report_errors(&outcome.errors);
        Ok(outcome.errors.is_empty())
    })
    .await?
}

async fn run_backup(args: BackupArgs) -> Result<bool> {
    let timeout = Duration::from_secs(args.common.timeout);
    with_deadline(timeout, async move {
        let base = S3Url::parse(&args.base).context("parsing --base")?;
        let root_dir = expand_root(args.root_dir);
        let mut settings = Settings::new(root_dir, args.machine.as_deref());
        settings.dry_run = args.dry_run;

        let name = args.name.unwrap_or_else(|| Utc::now().format("%Y-%m-%d").to_string());
        let jj = JjCli::default();
        let store: Box<dyn ObjectStore> = Box::new(S3Store::from_env().await);

        let outcome = backup::run(
            &jj,
            store.as_ref(),
            BackupRequest {
                settings: &settings,
                base: &base,
                name: &name,
                include_files: !args.no_include_files,
                agent_instructions: args.agent_instructions,
                claude_dir_source: args.claude_dir_source,
                opencode_dir_source: args.opencode_dir_source,
            },
        )
        .await;

        report_errors(&outcome.errors);
        Ok((outcome.uploaded || settings.dry_run) && outcome.errors.is_empty())
    })
    .await?
}

async fn run_list_backups(args: ListBackupsArgs) -> Result<bool> {
    with_deadline(Duration::from_secs(args.common.timeout), async move {
        let base = S3Url::parse(&args.base).context("parsing --base")?;
        let settings = Settings::new(PathBuf::new(), args.machine.as_deref());
        let store = S3Store::from_env().await;

        match restore::list_backups(&store, &base, &settings.machine).await {
            Ok(names) => {
                for n in names {
                    println!("{n}");
                }
                Ok(true)
            }
            Err(e) => {
                eprintln!("error: {e}");
                Ok(false)
            }
        }
    })
    .await?
}

async fn run_restore(args: RestoreArgs) -> Result<bool> {
    let timeout = Duration::from_secs(args.common.timeout);
    with_deadline(timeout, async move {
        let base = S3Url::parse(&args.base).context("parsing --base")?;
        let root_dir = expand_root(args.root_dir);
        let mut settings = Settings::new(root_dir, args.machine.as_deref());
        settings.force = args.force;
        settings.dry_run = args.dry_run;
        settings.sessions_after = args
            .sessions_after
            .as_deref()
            .map(parse_sessions_after)
            .transpose()?;

        let name = args.name.unwrap_or_else(|| Utc::now().format("%Y-%m-%d").to_string());
        let manifest_bytes = args
            .manifest_file
            .as_ref()
            .map(std::fs::read)
            .transpose()
            .context("reading --manifest-file")?;

        let jj = JjCli::default();
        let store: Box<dyn ObjectStore> = Box::new(S3Store::from_env().await);

        let outcome = restore::run(
            &jj,
            store.as_ref(),
            RestoreRequest {
                settings: &settings,
                base: &base,
                name: &name,
                manifest_bytes,
                claude_dir_destination: args.claude_dir_destination,
                opencode_dir_destination: args.opencode_dir_destination,
            },
        )
        .await;

        if let Some(reason) = &outcome.fatal {
            eprintln!("error: {reason}");
            return Ok(false);
        }
        report_errors(&outcome.errors);
        tracing::info!(
            files_downloaded = outcome.files_downloaded,
            files_skipped = outcome.files_skipped,
            symlinks_created = outcome.symlinks_created,
            symlinks_skipped = outcome.symlinks_skipped,
            agent_files_downloaded = outcome.agent_files_downloaded,
            agent_files_skipped_by_date = outcome.agent_files_skipped_by_date,
            "restore complete"
        );
        if let Some(manifest) = &outcome.manifest {
            if let Some(instructions) = &manifest.agent_instructions {
                eprintln!("=== AGENT INSTRUCTIONS ===\n{instructions}");
            }
        }
        Ok(outcome.is_success())
    })
    .await?
}

fn parse_sessions_after(raw: &str) -> Result<chrono::DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").context("--sessions-after must be YYYY-MM-DD")?;
    let naive = date.and_hms_opt(0, 0, 0).expect("midnight is always valid");
    Ok(Utc.from_utc_datetime(&naive))
}

/// The `=== ERRORS (N) ===` terminal summary block (§7), printed only when
/// the accumulated list is non-empty.
fn report_errors(errors: &[devenv::error::ReportedError]) {
    if errors.is_empty() {
        return;
    }
    eprintln!("=== ERRORS ({}) ===", errors.len());
    for e in errors {
        eprintln!("  {e}");
    }
}
