//! External tool discovery and execution.
//!
//! Archiving and encryption are delegated to system tools. This module
//! resolves them on `PATH` and runs them with line-streamed stdout, an
//! optional stdin payload, and cancellation through [`CancelHandle`].

use std::ffi::OsStr;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use tracing::{debug, warn};

use crate::signal::CancelHandle;

/// Resolve an executable name (or explicit path) the way a shell would.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|p| is_executable(p))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

/// Names of the given tools that cannot be resolved.
pub fn missing_tools<'a>(names: &[&'a str]) -> Vec<&'a str> {
    names
        .iter()
        .copied()
        .filter(|name| find_executable(name).is_none())
        .collect()
}

/// Result of a finished tool invocation.
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Last non-empty stderr line, for error messages.
    pub fn diagnostic(&self) -> String {
        self.stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("exited with {}", self.status))
    }
}

/// Run `program` with `args`, feeding `stdin` (then closing it) and calling
/// `on_line` for every non-empty stdout line. Stderr is collected.
pub fn run<I, S, F>(
    program: &str,
    args: I,
    stdin: Option<&[u8]>,
    cancel: &CancelHandle,
    mut on_line: F,
) -> std::io::Result<ToolOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
    F: FnMut(&str),
{
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("Running {:?}", command);

    let mut child = command.spawn()?;
    let _guard = cancel.track(&child);

    if let (Some(payload), Some(mut pipe)) = (stdin, child.stdin.take()) {
        if let Err(e) = pipe.write_all(payload) {
            // The tool may exit before reading stdin; its status says why.
            warn!("Failed to write stdin of {}: {}", program, e);
        }
    }

    // Drain stderr on its own thread so a chatty tool never blocks on a full pipe
    let stderr_reader = child.stderr.take().map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = pipe.read_to_string(&mut buf);
            buf
        })
    });

    if let Some(stdout) = child.stdout.take() {
        for line in BufReader::new(stdout).lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Failed to read output of {}: {}", program, e);
                    break;
                }
            };
            let line = line.trim();
            if !line.is_empty() {
                on_line(line);
            }
        }
    }

    let status = child.wait()?;
    let stderr = stderr_reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();

    debug!("{} finished with {}", program, status);

    Ok(ToolOutput { status, stderr })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_executable_resolves_sh() {
        assert!(find_executable("sh").is_some());
    }

    #[test]
    fn test_missing_tools_reports_unknown() {
        let missing = missing_tools(&["sh", "definitely-not-a-real-tool-42"]);
        assert_eq!(missing, vec!["definitely-not-a-real-tool-42"]);
    }

    #[test]
    fn test_explicit_path_must_exist() {
        assert!(find_executable("/nonexistent/bin/tar").is_none());
    }

    #[test]
    fn test_run_streams_lines_and_stdin() {
        let cancel = CancelHandle::new();
        let mut lines = Vec::new();
        let out = run(
            "sh",
            ["-c", "cat; echo second; echo oops >&2"],
            Some(b"first\n".as_slice()),
            &cancel,
            |l| lines.push(l.to_string()),
        )
        .unwrap();

        assert!(out.success());
        assert_eq!(lines, vec!["first", "second"]);
        assert_eq!(out.diagnostic(), "oops");
    }

    #[test]
    fn test_run_reports_failure_status() {
        let cancel = CancelHandle::new();
        let out = run("sh", ["-c", "exit 3"], None, &cancel, |_| {}).unwrap();
        assert!(!out.success());
        assert_eq!(out.status.code(), Some(3));
    }
}
