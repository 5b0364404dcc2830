//! Backup orchestrator - sequences the pipeline stages.
//!
//! Backup: Parsing → Staging → (Checksumming) → Archiving → Encrypting →
//! Finalizing. Extract: Decrypting → Extracting → (Verifying) → Finalizing.
//!
//! Every temporary lives in the run's work directory and is tracked by a
//! [`RunWorkspace`]; final outputs are moved into place only at Finalizing,
//! so a failed or interrupted run never leaves a partial artifact behind.

pub mod state;
pub mod workspace;

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::archive::{Archiver, TarArchiver};
use crate::checksum::{self, ChecksumManifest, VerificationResult};
use crate::cipher::{Cipher, GpgCipher};
use crate::config::{extraction_name, Config, RunConfig};
use crate::fs::stager;
use crate::progress::Reporter;
use crate::signal::CancelHandle;
use crate::sources;
use crate::tools;
use crate::utils::errors::{BackupError, Result};
pub use state::Stage;
pub use workspace::RunWorkspace;

/// Input of the backup flow
#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub sources_file: PathBuf,
    pub output_dir: PathBuf,
    pub passphrase: String,
    /// Write a checksum sidecar next to the artifact
    pub checksum: bool,
}

/// Input of the extract flow
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub archive: PathBuf,
    pub passphrase: String,
    /// Manifest to verify the extracted tree against
    pub checksum_file: Option<PathBuf>,
    /// Parent of the extraction directory (defaults to the archive's directory)
    pub into: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTiming {
    pub stage: Stage,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct BackupReport {
    pub artifact: PathBuf,
    pub sidecar: Option<PathBuf>,
    pub size_bytes: u64,
    pub files_staged: usize,
    pub elapsed: Duration,
    pub stages: Vec<StageTiming>,
}

#[derive(Debug)]
pub struct ExtractReport {
    pub extracted_to: PathBuf,
    pub verification: Option<VerificationResult>,
    pub elapsed: Duration,
    pub stages: Vec<StageTiming>,
}

/// Fail with `DependencyMissing` unless the configured engines resolve.
pub fn check_dependencies(config: &Config) -> Result<()> {
    let missing = tools::missing_tools(&[config.tools.tar.as_str(), config.tools.gpg.as_str()]);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(BackupError::DependencyMissing(
            missing.into_iter().map(str::to_string).collect(),
        ))
    }
}

/// Runs one backup or extraction at a time.
pub struct Orchestrator {
    config: Config,
    archiver: Box<dyn Archiver + Send>,
    cipher: Box<dyn Cipher + Send>,
    reporter: Box<dyn Reporter + Send>,
    cancel: CancelHandle,
    stage: Stage,
    timings: Vec<StageTiming>,
}

impl Orchestrator {
    /// Orchestrator backed by the system `tar` and `gpg`.
    pub fn new(config: Config, cancel: CancelHandle, reporter: Box<dyn Reporter + Send>) -> Self {
        let archiver = TarArchiver::new(config.tools.tar.clone(), cancel.clone());
        let cipher = GpgCipher::new(&config.tools, cancel.clone());
        Self::with_engines(config, cancel, reporter, Box::new(archiver), Box::new(cipher))
    }

    pub fn with_engines(
        config: Config,
        cancel: CancelHandle,
        reporter: Box<dyn Reporter + Send>,
        archiver: Box<dyn Archiver + Send>,
        cipher: Box<dyn Cipher + Send>,
    ) -> Self {
        Self {
            config,
            archiver,
            cipher,
            reporter,
            cancel,
            stage: Stage::Idle,
            timings: Vec::new(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Stage, archive and encrypt the sources listed in `request.sources_file`.
    pub fn backup(&mut self, request: &BackupRequest) -> Result<BackupReport> {
        let started = Instant::now();
        self.reset();

        let run = RunConfig::new(&self.config, &request.output_dir);
        info!(
            "Starting backup {} of {} into {}",
            run.run_id,
            request.sources_file.display(),
            request.output_dir.display()
        );

        let mut workspace = RunWorkspace::new();
        let result = self.backup_stages(request, &run, &mut workspace);
        let result = self.finish(result, &mut workspace)?;

        let (artifact, sidecar, size_bytes, files_staged) = result;
        Ok(BackupReport {
            artifact,
            sidecar,
            size_bytes,
            files_staged,
            elapsed: started.elapsed(),
            stages: std::mem::take(&mut self.timings),
        })
    }

    fn backup_stages(
        &mut self,
        request: &BackupRequest,
        run: &RunConfig,
        workspace: &mut RunWorkspace,
    ) -> Result<(PathBuf, Option<PathBuf>, u64, usize)> {
        self.cipher.check_passphrase(&request.passphrase)?;

        let artifact = run.artifact_path();
        let sidecar = request.checksum.then(|| run.sidecar_path());

        for target in std::iter::once(&artifact).chain(sidecar.as_ref()) {
            if target.exists() {
                return Err(BackupError::OutputExists(target.clone()));
            }
        }

        let started = self.enter(Stage::Parsing)?;
        let sources = sources::parse(&request.sources_file)?;
        info!("Parsed {} source entries", sources.len());
        self.leave(Stage::Parsing, started);

        fs::create_dir_all(&run.output_dir)?;
        fs::create_dir_all(&run.work_dir)?;

        let started = self.enter(Stage::Staging)?;
        let staging = workspace.register(run.staging_dir());
        let reporter = &mut self.reporter;
        let tree = stager::stage(&sources, &staging, &self.cancel, |u| reporter.progress(u))?;
        self.leave(Stage::Staging, started);

        let temp_sidecar = if request.checksum {
            let started = self.enter(Stage::Checksumming)?;
            let reporter = &mut self.reporter;
            let manifest = checksum::compute(&tree.root, &self.cancel, |u| reporter.progress(u))?;
            let path = workspace.register(run.temp_sidecar());
            manifest.write_to(&path)?;
            info!("Wrote {} checksums", manifest.len());
            self.leave(Stage::Checksumming, started);
            Some(path)
        } else {
            None
        };

        let started = self.enter(Stage::Archiving)?;
        let temp_archive = workspace.register(run.temp_archive());
        let reporter = &mut self.reporter;
        self.archiver
            .pack(&tree.root, &temp_archive, &mut |u| reporter.progress(u))?;
        workspace.discard(&staging)?;
        self.leave(Stage::Archiving, started);

        let started = self.enter(Stage::Encrypting)?;
        let temp_encrypted = workspace.register(run.temp_encrypted());
        self.cipher
            .encrypt(&temp_archive, &temp_encrypted, &request.passphrase)?;
        workspace.discard(&temp_archive)?;
        self.leave(Stage::Encrypting, started);

        let started = self.enter(Stage::Finalizing)?;
        // Final names join the workspace only once this run has created them
        move_into_place(&temp_encrypted, &artifact)?;
        workspace.register(&artifact);
        if let (Some(from), Some(to)) = (&temp_sidecar, &sidecar) {
            move_into_place(from, to)?;
            workspace.register(to);
        }
        let size_bytes = fs::metadata(&artifact)?.len();
        workspace.release(&artifact);
        if let Some(path) = &sidecar {
            workspace.release(path);
        }
        self.leave(Stage::Finalizing, started);

        Ok((artifact, sidecar, size_bytes, tree.labels.len()))
    }

    /// Decrypt and unpack `request.archive`, then verify it when a manifest
    /// is given. Discrepancies are reported, never fatal.
    pub fn extract(&mut self, request: &ExtractRequest) -> Result<ExtractReport> {
        let started = Instant::now();
        self.reset();

        let mut workspace = RunWorkspace::new();
        let result = self.extract_stages(request, &mut workspace);
        let (extracted_to, verification) = self.finish(result, &mut workspace)?;

        Ok(ExtractReport {
            extracted_to,
            verification,
            elapsed: started.elapsed(),
            stages: std::mem::take(&mut self.timings),
        })
    }

    fn extract_stages(
        &mut self,
        request: &ExtractRequest,
        workspace: &mut RunWorkspace,
    ) -> Result<(PathBuf, Option<VerificationResult>)> {
        self.cipher.check_passphrase(&request.passphrase)?;

        if !request.archive.is_file() {
            return Err(BackupError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("archive file '{}' does not exist", request.archive.display()),
            )));
        }

        let manifest = match &request.checksum_file {
            Some(path) => Some(ChecksumManifest::load(path)?),
            None => None,
        };

        let parent = request
            .into
            .clone()
            .or_else(|| request.archive.parent().map(Path::to_path_buf))
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("."));
        let extracted_to = parent.join(extraction_name(&request.archive));
        if extracted_to.exists() {
            return Err(BackupError::OutputExists(extracted_to));
        }

        let run = RunConfig::new(&self.config, &parent);
        fs::create_dir_all(&run.work_dir)?;
        info!(
            "Starting extraction {} of {} into {}",
            run.run_id,
            request.archive.display(),
            extracted_to.display()
        );

        let started = self.enter(Stage::Decrypting)?;
        let temp_archive = workspace.register(run.temp_archive());
        self.cipher
            .decrypt(&request.archive, &temp_archive, &request.passphrase)?;
        self.leave(Stage::Decrypting, started);

        let started = self.enter(Stage::Extracting)?;
        workspace.register(&extracted_to);
        fs::create_dir_all(&extracted_to)?;
        let reporter = &mut self.reporter;
        self.archiver
            .unpack(&temp_archive, &extracted_to, &mut |u| reporter.progress(u))?;
        workspace.discard(&temp_archive)?;
        self.leave(Stage::Extracting, started);

        let verification = match &manifest {
            Some(manifest) => {
                let started = self.enter(Stage::Verifying)?;
                let reporter = &mut self.reporter;
                let result =
                    checksum::verify(&extracted_to, manifest, &self.cancel, |u| reporter.progress(u))?;
                if result.is_ok() {
                    info!("All {} files verified", result.checked);
                } else {
                    for d in &result.discrepancies {
                        warn!("Verification: {}", d);
                    }
                }
                self.leave(Stage::Verifying, started);
                Some(result)
            }
            None => None,
        };

        let started = self.enter(Stage::Finalizing)?;
        workspace.release(&extracted_to);
        self.leave(Stage::Finalizing, started);

        Ok((extracted_to, verification))
    }

    fn reset(&mut self) {
        self.stage = Stage::Idle;
        self.timings.clear();
    }

    fn enter(&mut self, stage: Stage) -> Result<Instant> {
        self.cancel.check()?;
        debug!("{} -> {}", self.stage, stage);
        self.stage = stage;
        self.reporter.stage_started(stage);
        Ok(Instant::now())
    }

    fn leave(&mut self, stage: Stage, started: Instant) {
        let elapsed = started.elapsed();
        info!("{} finished in {:.2}s", stage, elapsed.as_secs_f64());
        self.timings.push(StageTiming { stage, elapsed });
        self.reporter.stage_finished(stage, elapsed);
    }

    /// Move to `Done` or `Failed`; the workspace is cleaned either way.
    fn finish<T>(&mut self, result: Result<T>, workspace: &mut RunWorkspace) -> Result<T> {
        let cleaned = workspace.cleanup();

        match result {
            Ok(value) => {
                if let Err(e) = cleaned {
                    warn!("Cleanup incomplete: {}", e);
                }
                self.stage = Stage::Done;
                Ok(value)
            }
            Err(e) => {
                if let Err(ce) = cleaned {
                    warn!("Cleanup after failure incomplete: {}", ce);
                }
                error!("{} failed: {}", self.stage, e);
                self.stage = Stage::Failed;
                Err(e)
            }
        }
    }
}

/// Move `from` to the new name `to` without ever replacing an existing file.
///
/// A hard link claims the name atomically; across filesystems the data is
/// copied into a freshly created file instead.
fn move_into_place(from: &Path, to: &Path) -> Result<()> {
    match fs::hard_link(from, to) {
        Ok(()) => {
            remove_source(from);
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            Err(BackupError::OutputExists(to.to_path_buf()))
        }
        Err(e) => {
            debug!("link {} failed ({}), copying", from.display(), e);
            copy_into_new(from, to)?;
            remove_source(from);
            Ok(())
        }
    }
}

/// `from` is still a tracked temporary, so a failure here is retried at cleanup.
fn remove_source(from: &Path) {
    if let Err(e) = fs::remove_file(from) {
        warn!("Failed to remove {}: {}", from.display(), e);
    }
}

fn copy_into_new(from: &Path, to: &Path) -> Result<()> {
    let mut src = File::open(from)?;
    let mut dst = match OpenOptions::new().write(true).create_new(true).open(to) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(BackupError::OutputExists(to.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    let copied = std::io::copy(&mut src, &mut dst)
        .and_then(|_| dst.sync_all())
        .and_then(|_| fs::set_permissions(to, fs::metadata(from)?.permissions()));
    if let Err(e) = copied {
        drop(dst);
        let _ = fs::remove_file(to);
        return Err(e.into());
    }
    Ok(())
}
