//! Passphrase encryption of archives.
//!
//! [`GpgCipher`] runs gpg in symmetric batch mode (AES-256 by default) with
//! the passphrase on stdin. Both directions are all-or-nothing: on failure
//! the output file is removed. Decryption failures carry no detail, so a
//! wrong passphrase and damaged data look the same to the caller.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::ToolsConfig;
use crate::signal::CancelHandle;
use crate::tools;
use crate::utils::errors::{BackupError, Result};

pub trait Cipher {
    /// Reject a passphrase this cipher cannot use, before any work starts.
    fn check_passphrase(&self, _passphrase: &str) -> Result<()> {
        Ok(())
    }

    fn encrypt(&self, input: &Path, output: &Path, passphrase: &str) -> Result<()>;

    fn decrypt(&self, input: &Path, output: &Path, passphrase: &str) -> Result<()>;
}

pub struct GpgCipher {
    program: String,
    cipher_algo: String,
    armor: bool,
    homedir: Option<PathBuf>,
    cancel: CancelHandle,
}

impl GpgCipher {
    pub fn new(tools: &ToolsConfig, cancel: CancelHandle) -> Self {
        Self {
            program: tools.gpg.clone(),
            cipher_algo: tools.cipher_algo.clone(),
            armor: tools.armor,
            homedir: tools.gpg_homedir.clone(),
            cancel,
        }
    }

    fn base_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if let Some(home) = &self.homedir {
            args.push("--homedir".into());
            args.push(home.as_os_str().to_os_string());
        }
        args.extend(
            [
                "--batch",
                "--quiet",
                "--no-symkey-cache",
                "--pinentry-mode=loopback",
                "--passphrase-fd",
                "0",
            ]
            .map(OsString::from),
        );
        args
    }

    /// `None` when the program could not be started.
    fn invoke(&self, args: Vec<OsString>, passphrase: &str) -> Option<tools::ToolOutput> {
        let mut stdin = passphrase.as_bytes().to_vec();
        stdin.push(b'\n');

        match tools::run(&self.program, args, Some(stdin.as_slice()), &self.cancel, |_| {}) {
            Ok(out) => Some(out),
            Err(e) => {
                debug!("Cannot run {}: {}", self.program, e);
                None
            }
        }
    }
}

impl Cipher for GpgCipher {
    /// `--passphrase-fd` reads a single line.
    fn check_passphrase(&self, passphrase: &str) -> Result<()> {
        if passphrase.contains(['\n', '\r']) {
            return Err(BackupError::Passphrase(
                "must not contain line breaks".to_string(),
            ));
        }
        Ok(())
    }

    fn encrypt(&self, input: &Path, output: &Path, passphrase: &str) -> Result<()> {
        self.check_passphrase(passphrase)?;
        if output.exists() {
            return Err(BackupError::OutputExists(output.to_path_buf()));
        }

        let mut args = self.base_args();
        args.push("--symmetric".into());
        args.push(format!("--cipher-algo={}", self.cipher_algo).into());
        if self.armor {
            args.push("--armor".into());
        }
        args.push("--output".into());
        args.push(output.as_os_str().to_os_string());
        args.push(input.as_os_str().to_os_string());

        let out = self.invoke(args, passphrase);
        if let Err(e) = self.cancel.check() {
            remove_partial(output);
            return Err(e);
        }

        match out {
            Some(out) if out.success() => Ok(()),
            Some(out) => {
                remove_partial(output);
                Err(BackupError::Encryption(out.diagnostic()))
            }
            None => {
                remove_partial(output);
                Err(BackupError::Encryption(format!("cannot run {}", self.program)))
            }
        }
    }

    fn decrypt(&self, input: &Path, output: &Path, passphrase: &str) -> Result<()> {
        self.check_passphrase(passphrase)?;

        let mut args = self.base_args();
        args.push("--decrypt".into());
        args.push("--output".into());
        args.push(output.as_os_str().to_os_string());
        args.push(input.as_os_str().to_os_string());

        let out = self.invoke(args, passphrase);
        if let Err(e) = self.cancel.check() {
            remove_partial(output);
            return Err(e);
        }

        match out {
            Some(out) if out.success() => Ok(()),
            Some(out) => {
                debug!("gpg decryption exited with {}", out.status);
                remove_partial(output);
                Err(BackupError::Decryption)
            }
            None => {
                remove_partial(output);
                Err(BackupError::Decryption)
            }
        }
    }
}

fn remove_partial(path: &Path) {
    if path.exists() {
        let _ = std::fs::remove_file(path);
    }
}
