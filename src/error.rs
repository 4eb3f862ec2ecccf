// src/error.rs

//! Error types for the formula engine
//!
//! Every component reports failure through [`Error`]. The engine never
//! swallows or downgrades these: each one aborts the current top-level
//! invocation. [`Error::exit_code`] maps the taxonomy onto the CLI exit codes
//! so scripts can tell resolution, verification and stage failures apart.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for formulary operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A requirement names a formula the index does not know
    #[error("unresolved requirement '{name}' (required by '{required_by}')")]
    UnresolvedRequirement { name: String, required_by: String },

    /// The requirement graph contains a cycle
    #[error("cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// Fetched content does not match its declared digest
    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    /// A patch failed to apply; nothing from this preparation attempt is kept
    #[error("patch #{index} ({url}) failed to apply: {reason}")]
    PatchApplicationFailed {
        index: usize,
        url: String,
        reason: String,
    },

    /// A stage command exited unsuccessfully
    #[error("{formula}: {stage} command '{command}' failed ({}){}", display_status(.status), display_output(.output))]
    StageCommandFailed {
        formula: String,
        stage: String,
        command: String,
        status: Option<i32>,
        output: String,
    },

    /// A stage command exceeded the per-command timeout
    #[error("{formula}: {stage} command '{command}' timed out after {}s", .timeout.as_secs())]
    TimedOut {
        formula: String,
        stage: String,
        command: String,
        timeout: Duration,
    },

    /// Upstream version could not be determined
    #[error("livecheck unavailable for '{name}': {reason}")]
    LivecheckUnavailable { name: String, reason: String },

    /// Resource fetcher failure (passed through unchanged)
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// `test` was requested for a formula without a complete install
    #[error("'{name}' is not installed; install it before running its test")]
    NotInstalled { name: String },

    /// Top-level lookup of an unknown formula
    #[error("no formula named '{0}'")]
    FormulaNotFound(String),

    /// Formula data is structurally invalid
    #[error("invalid formula '{name}': {reason}")]
    InvalidFormula { name: String, reason: String },

    /// A digest string could not be parsed
    #[error("invalid digest '{digest}': {reason}")]
    InvalidDigest { digest: String, reason: String },

    /// A command argument references a placeholder that does not exist
    #[error("unknown variable '%({0})s'")]
    UnknownVariable(String),

    /// Source archive could not be unpacked
    #[error("failed to unpack {path}: {reason}")]
    Archive { path: PathBuf, reason: String },

    /// Configuration file problems
    #[error("configuration error: {0}")]
    Config(String),

    /// Receipt database failure
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn display_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit status {code}"),
        None => "terminated by signal".to_string(),
    }
}

fn display_output(output: &str) -> String {
    let trimmed = output.trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\n{trimmed}")
    }
}

impl Error {
    /// Process exit code for this error kind
    ///
    /// | code | meaning |
    /// |------|---------|
    /// | 2 | resolution (unresolved, cyclic, unknown formula) |
    /// | 3 | verification (checksum, patch) |
    /// | 4 | stage failure (command failed, timed out) |
    /// | 5 | livecheck unavailable |
    /// | 6 | not installed |
    /// | 7 | fetch error |
    /// | 1 | everything else |
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::UnresolvedRequirement { .. }
            | Error::CyclicDependency { .. }
            | Error::FormulaNotFound(_) => 2,
            Error::ChecksumMismatch { .. } | Error::PatchApplicationFailed { .. } => 3,
            Error::StageCommandFailed { .. } | Error::TimedOut { .. } => 4,
            Error::LivecheckUnavailable { .. } => 5,
            Error::NotInstalled { .. } => 6,
            Error::Fetch { .. } => 7,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_category() {
        let resolution = Error::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        let verification = Error::ChecksumMismatch {
            url: "u".into(),
            expected: "e".into(),
            actual: "a".into(),
        };
        let stage = Error::StageCommandFailed {
            formula: "f".into(),
            stage: "install".into(),
            command: "configure".into(),
            status: Some(1),
            output: String::new(),
        };

        assert_eq!(resolution.exit_code(), 2);
        assert_eq!(verification.exit_code(), 3);
        assert_eq!(stage.exit_code(), 4);
        assert_eq!(Error::NotInstalled { name: "f".into() }.exit_code(), 6);
    }

    #[test]
    fn test_cycle_message_names_path() {
        let err = Error::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic dependency: a -> b -> a");
    }

    #[test]
    fn test_stage_failure_message_includes_output() {
        let err = Error::StageCommandFailed {
            formula: "jsoncpp".into(),
            stage: "install".into(),
            command: "meson setup build".into(),
            status: None,
            output: "killed\n".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("terminated by signal"));
        assert!(msg.ends_with("killed"));
    }
}
