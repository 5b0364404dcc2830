//! Backup Tool - Main entry point
//!
//! `backup` stages, archives and encrypts a list of labeled paths;
//! `extract` reverses it and optionally verifies checksums.

use anyhow::Result;
use backup_tool::{
    checksum::DiscrepancyReason,
    config::{sidecar_for, Config},
    executor::{check_dependencies, BackupReport, ExtractReport},
    progress::{format_bytes, format_elapsed, ConsoleReporter},
    signal::{shutdown::ShutdownCoordinator, CancelHandle},
    utils, BackupError, BackupRequest, ExtractRequest, Orchestrator,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an encrypted backup of the paths listed in a sources file
    Backup {
        /// File with one `label=path` entry per line
        sources_file: PathBuf,

        /// Directory receiving the encrypted archive
        output_dir: PathBuf,

        /// Encryption passphrase (a single line)
        passphrase: String,

        /// Write a SHA-256 checksum file next to the archive
        #[arg(long)]
        checksum: bool,

        /// Show stage and progress output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Decrypt and extract a backup, optionally verifying checksums
    Extract {
        /// Encrypted archive (`.tar.gz.enc`)
        archive_file: PathBuf,

        /// Passphrase the archive was encrypted with
        passphrase: String,

        /// Checksum file to verify against
        checksum_file: Option<PathBuf>,

        /// Verify against the checksum file next to the archive
        #[arg(long)]
        checksum: bool,

        /// Parent directory for the extracted tree
        #[arg(long, value_name = "DIR")]
        into: Option<PathBuf>,

        /// Show stage and progress output
        #[arg(short, long)]
        verbose: bool,
    },
}

impl Command {
    fn verbose(&self) -> bool {
        match self {
            Command::Backup { verbose, .. } | Command::Extract { verbose, .. } => *verbose,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e
                .downcast_ref::<BackupError>()
                .map(BackupError::exit_code)
                .unwrap_or(1);
            eprintln!("Error: {:#}", e);
            ExitCode::from(code as u8)
        }
    }
}

async fn run(args: Args) -> Result<()> {
    // Load configuration
    let config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };

    // Initialize logging
    let verbose = args.command.verbose();
    let log_level = match &args.log_level {
        Some(level) => level.clone(),
        None if verbose => "info".to_string(),
        None => config.log.level.clone(),
    };
    utils::logger::init(&log_level)?;

    tracing::info!("Starting backup-tool v{}", env!("CARGO_PKG_VERSION"));

    check_dependencies(&config)?;

    let cancel = CancelHandle::new();
    let reporter = Box::new(ConsoleReporter::new(verbose));
    let mut orchestrator = Orchestrator::new(config, cancel.clone(), reporter);

    match args.command {
        Command::Backup {
            sources_file,
            output_dir,
            passphrase,
            checksum,
            ..
        } => {
            if !nix::unistd::geteuid().is_root() {
                tracing::warn!("Not running as root; files this user cannot read will fail the backup");
            }

            let request = BackupRequest {
                sources_file,
                output_dir,
                passphrase,
                checksum,
            };
            let report = run_pipeline(cancel, move || orchestrator.backup(&request)).await?;
            print_backup_report(&report);
        }
        Command::Extract {
            archive_file,
            passphrase,
            checksum_file,
            checksum,
            into,
            ..
        } => {
            let checksum_file =
                checksum_file.or_else(|| checksum.then(|| sidecar_for(&archive_file)));

            let request = ExtractRequest {
                archive: archive_file,
                passphrase,
                checksum_file,
                into,
            };
            let report = run_pipeline(cancel, move || orchestrator.extract(&request)).await?;
            print_extract_report(&report);
        }
    }

    Ok(())
}

/// Run the blocking pipeline while listening for SIGINT/SIGTERM.
async fn run_pipeline<T, F>(cancel: CancelHandle, job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> backup_tool::Result<T> + Send + 'static,
{
    let shutdown = ShutdownCoordinator::new(cancel);
    let mut task = tokio::task::spawn_blocking(job);

    tokio::select! {
        res = &mut task => return Ok(res??),
        sig = shutdown.wait_for_signal() => {
            if let Err(e) = sig {
                tracing::warn!("Signal handling unavailable: {}", e);
            }
        }
    }

    // The pipeline notices cancellation, cleans up and returns Interrupted
    Ok(task.await??)
}

fn print_backup_report(report: &BackupReport) {
    println!("Backup file: {}", report.artifact.display());
    if let Some(sidecar) = &report.sidecar {
        println!("Checksum file: {}", sidecar.display());
    }
    println!(
        "File size: {} bytes ({})",
        report.size_bytes,
        format_bytes(report.size_bytes)
    );
    println!("Elapsed time: {}", format_elapsed(report.elapsed));
}

fn print_extract_report(report: &ExtractReport) {
    println!("Extracted to: {}", report.extracted_to.display());

    if let Some(result) = &report.verification {
        if result.is_ok() {
            println!("Checksum verification passed ({} files)", result.checked);
        } else {
            for d in &result.discrepancies {
                eprintln!("Warning: {}", d);
            }
            eprintln!(
                "Warning: checksum verification found {} discrepancies ({} mismatched, {} missing, {} unexpected)",
                result.discrepancies.len(),
                result.count(DiscrepancyReason::Mismatch),
                result.count(DiscrepancyReason::Missing),
                result.count(DiscrepancyReason::Unexpected)
            );
        }
    }

    println!("Elapsed time: {}", format_elapsed(report.elapsed));
}
