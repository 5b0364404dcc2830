//! End-to-end backup and extract runs against the system `tar`.
//!
//! Most flows encrypt with a keyed passthrough cipher; one runs the system
//! `gpg` with a throwaway home directory. Tests skip when a tool is missing.

use backup_tool::archive::TarArchiver;
use backup_tool::checksum::{hash_file, DiscrepancyReason};
use backup_tool::cipher::Cipher;
use backup_tool::config::sidecar_for;
use backup_tool::executor::Stage;
use backup_tool::progress::NullReporter;
use backup_tool::signal::CancelHandle;
use backup_tool::tools::find_executable;
use backup_tool::{BackupError, BackupRequest, Config, ExtractRequest, Orchestrator};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const MAGIC: &[u8] = b"KEYED1\n";

/// Prefixes the plaintext with a passphrase digest; decrypt checks it.
struct KeyedCipher;

fn key_line(passphrase: &str) -> Vec<u8> {
    let mut line = hex::encode(Sha256::digest(passphrase.as_bytes())).into_bytes();
    line.push(b'\n');
    line
}

impl Cipher for KeyedCipher {
    fn encrypt(&self, input: &Path, output: &Path, passphrase: &str) -> backup_tool::Result<()> {
        let mut sealed = MAGIC.to_vec();
        sealed.extend(key_line(passphrase));
        sealed.extend(fs::read(input)?);
        fs::write(output, sealed)?;
        Ok(())
    }

    fn decrypt(&self, input: &Path, output: &Path, passphrase: &str) -> backup_tool::Result<()> {
        let sealed = fs::read(input).map_err(|_| BackupError::Decryption)?;
        let header_len = MAGIC.len() + 65;
        if sealed.len() < header_len
            || &sealed[..MAGIC.len()] != MAGIC
            || sealed[MAGIC.len()..header_len] != key_line(passphrase)[..]
        {
            return Err(BackupError::Decryption);
        }
        fs::write(output, &sealed[header_len..])?;
        Ok(())
    }
}

fn tar_available() -> bool {
    find_executable("tar").is_some()
}

fn orchestrator(cancel: CancelHandle) -> Orchestrator {
    let mut config = Config::default();
    config.backup.tag = Some("testhost".to_string());
    Orchestrator::with_engines(
        config,
        cancel.clone(),
        Box::new(NullReporter),
        Box::new(TarArchiver::new("tar", cancel)),
        Box::new(KeyedCipher),
    )
}

/// photos/ with two files and a single conf file.
fn fixture(tmp: &TempDir) -> PathBuf {
    let data = tmp.path().join("data");
    fs::create_dir_all(data.join("photos")).unwrap();
    fs::write(data.join("photos/a.jpg"), b"hello").unwrap();
    fs::write(data.join("photos/b.jpg"), b"test").unwrap();
    fs::create_dir_all(data.join("etc")).unwrap();
    fs::write(data.join("etc/x.conf"), b"key=value\n").unwrap();

    let sources = tmp.path().join("sources.txt");
    fs::write(
        &sources,
        "# things worth keeping\nphotos=data/photos/\n\nconf=data/etc/x.conf\n",
    )
    .unwrap();
    sources
}

fn names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match fs::read_dir(dir) {
        Ok(rd) => rd
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

fn backup(orch: &mut Orchestrator, sources: PathBuf, out: &Path) -> backup_tool::Result<PathBuf> {
    orch.backup(&BackupRequest {
        sources_file: sources,
        output_dir: out.to_path_buf(),
        passphrase: "very_bad_pw".to_string(),
        checksum: true,
    })
    .map(|report| report.artifact)
}

#[test]
fn test_backup_produces_artifact_and_sidecar_only() {
    if !tar_available() {
        eprintln!("tar not installed, skipping");
        return;
    }
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("out");
    let mut orch = orchestrator(CancelHandle::new());

    let artifact = backup(&mut orch, fixture(&tmp), &out).unwrap();

    let listing = names(&out);
    assert_eq!(listing.len(), 2, "unexpected output: {:?}", listing);
    assert!(listing.iter().any(|n| n.ends_with(".tar.gz.enc")));
    assert!(listing.iter().any(|n| n.ends_with(".sha256")));
    assert!(artifact
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("backup-testhost-"));

    let sidecar = fs::read_to_string(sidecar_for(&artifact)).unwrap();
    let paths: Vec<&str> = sidecar
        .lines()
        .map(|l| l.split_once("  ").unwrap().1)
        .collect();
    assert_eq!(paths, vec!["conf/x.conf", "photos/a.jpg", "photos/b.jpg"]);
}

#[test]
fn test_round_trip_verifies_clean() {
    if !tar_available() {
        eprintln!("tar not installed, skipping");
        return;
    }
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("out");
    let mut orch = orchestrator(CancelHandle::new());
    let artifact = backup(&mut orch, fixture(&tmp), &out).unwrap();

    let restore = tmp.path().join("restore");
    let report = orch
        .extract(&ExtractRequest {
            archive: artifact.clone(),
            passphrase: "very_bad_pw".to_string(),
            checksum_file: Some(sidecar_for(&artifact)),
            into: Some(restore.clone()),
        })
        .unwrap();

    assert_eq!(orch.stage(), Stage::Done);
    let verification = report.verification.unwrap();
    assert!(verification.is_ok());
    assert_eq!(verification.checked, 3);
    assert_eq!(
        fs::read(report.extracted_to.join("photos/a.jpg")).unwrap(),
        b"hello"
    );
    assert_eq!(
        fs::read(report.extracted_to.join("conf/x.conf")).unwrap(),
        b"key=value\n"
    );
    // No intermediate archive left next to the extracted tree
    assert_eq!(names(&restore).len(), 1);
}

#[test]
fn test_malformed_sources_line_creates_nothing() {
    if !tar_available() {
        eprintln!("tar not installed, skipping");
        return;
    }
    let tmp = TempDir::new().unwrap();
    let sources = tmp.path().join("sources.txt");
    fs::write(&sources, "bad_line_no_equals\n").unwrap();
    let out = tmp.path().join("out");

    let err = backup(&mut orchestrator(CancelHandle::new()), sources, &out).unwrap_err();

    match err {
        BackupError::SourcesParse { line, message } => {
            assert_eq!(line, Some(1));
            assert!(message.contains("invalid format at line 1"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(names(&out).is_empty());
}

#[test]
fn test_missing_source_path_fails_before_staging() {
    if !tar_available() {
        eprintln!("tar not installed, skipping");
        return;
    }
    let tmp = TempDir::new().unwrap();
    let sources = tmp.path().join("sources.txt");
    fs::write(&sources, "gone=/definitely/not/here/\n").unwrap();
    let out = tmp.path().join("out");

    let err = backup(&mut orchestrator(CancelHandle::new()), sources, &out).unwrap_err();
    assert!(matches!(err, BackupError::PathNotFound { line: 1, .. }));
    assert!(names(&out).is_empty());
}

#[test]
fn test_altered_file_is_reported_not_fatal() {
    if !tar_available() {
        eprintln!("tar not installed, skipping");
        return;
    }
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("out");
    let mut orch = orchestrator(CancelHandle::new());
    let artifact = backup(&mut orch, fixture(&tmp), &out).unwrap();

    // Pretend photos/b.jpg held different bytes when the backup was taken
    let sidecar = sidecar_for(&artifact);
    let forged = tmp.path().join("forged");
    fs::write(&forged, b"something else").unwrap();
    let original = hash_file(&tmp.path().join("data/photos/b.jpg")).unwrap();
    let text = fs::read_to_string(&sidecar)
        .unwrap()
        .replace(&original, &hash_file(&forged).unwrap());
    fs::write(&sidecar, text).unwrap();

    let report = orch
        .extract(&ExtractRequest {
            archive: artifact,
            passphrase: "very_bad_pw".to_string(),
            checksum_file: Some(sidecar),
            into: Some(tmp.path().join("restore")),
        })
        .unwrap();

    let verification = report.verification.unwrap();
    assert_eq!(verification.discrepancies.len(), 1);
    assert_eq!(verification.count(DiscrepancyReason::Mismatch), 1);
    assert_eq!(verification.discrepancies[0].path, "photos/b.jpg");
    assert!(report.extracted_to.join("photos/b.jpg").exists());
    assert_eq!(orch.stage(), Stage::Done);
}

#[test]
fn test_wrong_passphrase_leaves_no_extraction() {
    if !tar_available() {
        eprintln!("tar not installed, skipping");
        return;
    }
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("out");
    let mut orch = orchestrator(CancelHandle::new());
    let artifact = backup(&mut orch, fixture(&tmp), &out).unwrap();
    let before = names(&out);

    let err = orch
        .extract(&ExtractRequest {
            archive: artifact,
            passphrase: "not_the_passphrase".to_string(),
            checksum_file: None,
            into: None,
        })
        .unwrap_err();

    assert!(matches!(err, BackupError::Decryption));
    assert_eq!(err.to_string(), "Decryption failed");
    assert_eq!(orch.stage(), Stage::Failed);
    assert_eq!(names(&out), before);
}

#[test]
fn test_interrupted_backup_removes_temporaries() {
    if !tar_available() {
        eprintln!("tar not installed, skipping");
        return;
    }
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("out");
    let cancel = CancelHandle::new();
    cancel.cancel();

    let err = backup(&mut orchestrator(cancel), fixture(&tmp), &out).unwrap_err();

    assert!(matches!(err, BackupError::Interrupted));
    assert_eq!(err.exit_code(), 130);
    assert!(names(&out).is_empty());
}

#[test]
fn test_separate_work_dir_keeps_output_clean() {
    if !tar_available() {
        eprintln!("tar not installed, skipping");
        return;
    }
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("out");
    let work = tmp.path().join("work");

    let mut config = Config::default();
    config.backup.tag = Some("testhost".to_string());
    config.backup.work_dir = Some(work.clone());
    let cancel = CancelHandle::new();
    let mut orch = Orchestrator::with_engines(
        config,
        cancel.clone(),
        Box::new(NullReporter),
        Box::new(TarArchiver::new("tar", cancel)),
        Box::new(KeyedCipher),
    );

    backup(&mut orch, fixture(&tmp), &out).unwrap();
    assert_eq!(names(&out).len(), 2);
    assert!(names(&work).is_empty());
}

#[test]
fn test_round_trip_with_system_tar_and_gpg() {
    use std::os::unix::fs::PermissionsExt;

    if !tar_available() || find_executable("gpg").is_none() {
        eprintln!("tar or gpg not installed, skipping");
        return;
    }
    let tmp = TempDir::new().unwrap();
    let home = tmp.path().join("gnupg");
    fs::create_dir(&home).unwrap();
    fs::set_permissions(&home, fs::Permissions::from_mode(0o700)).unwrap();

    let mut config = Config::default();
    config.backup.tag = Some("testhost".to_string());
    config.tools.gpg_homedir = Some(home);
    backup_tool::executor::check_dependencies(&config).unwrap();
    let mut orch = Orchestrator::new(config, CancelHandle::new(), Box::new(NullReporter));

    let out = tmp.path().join("out");
    let artifact = backup(&mut orch, fixture(&tmp), &out).unwrap();
    assert!(!fs::read(&artifact).unwrap().windows(5).any(|w| w == b"hello"));

    let err = orch
        .extract(&ExtractRequest {
            archive: artifact.clone(),
            passphrase: "wrong".to_string(),
            checksum_file: None,
            into: Some(tmp.path().join("nope")),
        })
        .unwrap_err();
    assert!(matches!(err, BackupError::Decryption));
    assert!(names(&tmp.path().join("nope")).is_empty());

    let report = orch
        .extract(&ExtractRequest {
            archive: artifact.clone(),
            passphrase: "very_bad_pw".to_string(),
            checksum_file: Some(sidecar_for(&artifact)),
            into: Some(tmp.path().join("restore")),
        })
        .unwrap();
    assert!(report.verification.unwrap().is_ok());
    assert_eq!(fs::read(report.extracted_to.join("photos/b.jpg")).unwrap(), b"test");
}
