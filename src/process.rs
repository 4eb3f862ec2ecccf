// src/process.rs

//! External process execution
//!
//! Stage commands never touch `std::process` directly; they go through a
//! [`ProcessRunner`] so the engine can be driven by a scripted runner in
//! tests. [`SystemRunner`] is the real thing: stdin is nulled, output is
//! captured, and a command that outlives its timeout is killed.

use crate::error::Result;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// One command to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    /// Variables set on top of the inherited environment
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

impl ProcessRequest {
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    /// Command line for logs and error messages
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

/// How a command ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Process exited on its own; `status` is `None` when killed by a signal
    Exited {
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
    /// Killed after exceeding its timeout
    TimedOut,
}

impl ProcessOutcome {
    /// Successful exit with empty output
    pub fn success() -> Self {
        Self::Exited {
            status: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited { status: Some(0), .. })
    }
}

/// Runs external commands
///
/// An `Err` means the command could not be started at all.
pub trait ProcessRunner: Send + Sync {
    fn run(&self, request: &ProcessRequest) -> Result<ProcessOutcome>;
}

/// Runs commands as child processes of this one
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessRunner for SystemRunner {
    fn run(&self, request: &ProcessRequest) -> Result<ProcessOutcome> {
        debug!("Running '{}' in {}", request.display(), request.cwd.display());

        let mut child = Command::new(request.program())
            .args(request.argv.iter().skip(1))
            .current_dir(&request.cwd)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drain both pipes while waiting so a chatty build cannot fill them and stall
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = match request.timeout {
            Some(timeout) => match child.wait_timeout(timeout)? {
                Some(status) => status,
                None => {
                    warn!(
                        "'{}' exceeded {}s, killing it",
                        request.display(),
                        timeout.as_secs()
                    );
                    let _ = child.kill();
                    let _ = child.wait();
                    return Ok(ProcessOutcome::TimedOut);
                }
            },
            None => child.wait()?,
        };

        Ok(ProcessOutcome::Exited {
            status: status.code(),
            stdout: stdout.map(join_output).unwrap_or_default(),
            stderr: stderr.map(join_output).unwrap_or_default(),
        })
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_output(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(argv: &[&str], dir: &TempDir) -> ProcessRequest {
        ProcessRequest {
            argv: argv.iter().map(|s| s.to_string()).collect(),
            cwd: dir.path().to_path_buf(),
            env: BTreeMap::new(),
            timeout: Some(Duration::from_secs(10)),
        }
    }

    #[test]
    fn test_captures_output_and_status() {
        let dir = TempDir::new().unwrap();
        let mut req = request(&["sh", "-c", "echo out; echo err >&2; exit 3"], &dir);
        req.env.insert("UNUSED".into(), "1".into());

        match SystemRunner.run(&req).unwrap() {
            ProcessOutcome::Exited { status, stdout, stderr } => {
                assert_eq!(status, Some(3));
                assert_eq!(stdout, "out\n");
                assert_eq!(stderr, "err\n");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_env_and_cwd() {
        let dir = TempDir::new().unwrap();
        let mut req = request(&["sh", "-c", "echo \"$GREETING\" > out.txt"], &dir);
        req.env.insert("GREETING".into(), "hello".into());

        assert!(SystemRunner.run(&req).unwrap().is_success());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out.txt")).unwrap(),
            "hello\n"
        );
    }

    #[test]
    fn test_timeout_kills() {
        let dir = TempDir::new().unwrap();
        let mut req = request(&["sleep", "5"], &dir);
        req.timeout = Some(Duration::from_millis(100));

        assert_eq!(SystemRunner.run(&req).unwrap(), ProcessOutcome::TimedOut);
    }

    #[test]
    fn test_missing_program_is_an_error() {
        let dir = TempDir::new().unwrap();
        let req = request(&["definitely-not-a-real-program-xyz"], &dir);
        assert!(SystemRunner.run(&req).is_err());
    }
}
