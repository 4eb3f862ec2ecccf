// src/formula/stage.rs

//! Stage execution
//!
//! A stage is an ordered list of commands run one after another in a fixed
//! working directory with a fixed environment. The first command that does
//! not exit 0 stops the stage; later commands are never started.

use crate::error::{Error, Result};
use crate::formula::format::{Command, Formula, Substitutions};
use crate::process::{ProcessOutcome, ProcessRequest, ProcessRunner};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info};

/// Lifecycle stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Install,
    Test,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Install => "install",
            Stage::Test => "test",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scratch state for one formula's lifecycle run
///
/// Owned by a single invocation and dropped with it; the scratch directory
/// goes with it unless it was created with `keep_scratch`.
pub struct BuildState {
    scratch: TempDir,
    /// Environment every stage command sees on top of the inherited one
    pub env: BTreeMap<String, String>,
    /// Resolved requirement order, root last
    pub order: Vec<String>,
    log: String,
}

impl BuildState {
    pub fn new(formula: &str, keep_scratch: bool) -> Result<Self> {
        let scratch = tempfile::Builder::new()
            .prefix(&format!("formulary-{formula}-"))
            .disable_cleanup(keep_scratch)
            .tempdir()?;
        if keep_scratch {
            info!("Keeping scratch directory {}", scratch.path().display());
        }
        Ok(Self {
            scratch,
            env: BTreeMap::new(),
            order: Vec::new(),
            log: String::new(),
        })
    }

    pub fn path(&self) -> &Path {
        self.scratch.path()
    }

    pub fn log(&self) -> &str {
        &self.log
    }

    pub fn into_log(self) -> String {
        self.log
    }

    pub fn log_line(&mut self, line: &str) {
        self.log.push_str(line);
        self.log.push('\n');
    }

    fn log_command_output(&mut self, stage: Stage, command: &str, stdout: &str, stderr: &str) {
        self.log_line(&format!("=== {stage}: {command} ==="));
        for chunk in [stdout, stderr] {
            if !chunk.is_empty() {
                self.log.push_str(chunk);
                if !chunk.ends_with('\n') {
                    self.log.push('\n');
                }
            }
        }
    }
}

/// Build the environment for a stage
///
/// Requirement prefixes are put on `PATH`, `CMAKE_PREFIX_PATH` and
/// `PKG_CONFIG_PATH` in resolution order; the formula's own `environment`
/// table is applied last and wins.
pub fn stage_environment(
    formula: &Formula,
    prefix: &Path,
    requirement_prefixes: &[PathBuf],
    jobs: usize,
    subs: &Substitutions,
) -> Result<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();

    let mut path: Vec<String> = requirement_prefixes
        .iter()
        .map(|p| p.join("bin").to_string_lossy().into_owned())
        .collect();
    path.push(std::env::var("PATH").unwrap_or_else(|_| "/usr/local/bin:/usr/bin:/bin".to_string()));
    env.insert("PATH".to_string(), path.join(":"));

    if !requirement_prefixes.is_empty() {
        let cmake: Vec<String> = requirement_prefixes
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let pkg_config: Vec<String> = requirement_prefixes
            .iter()
            .flat_map(|p| [p.join("lib/pkgconfig"), p.join("share/pkgconfig")])
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        env.insert("CMAKE_PREFIX_PATH".to_string(), cmake.join(":"));
        env.insert("PKG_CONFIG_PATH".to_string(), pkg_config.join(":"));
    }

    env.insert("PREFIX".to_string(), prefix.to_string_lossy().into_owned());
    env.insert("MAKEFLAGS".to_string(), format!("-j{}", jobs.max(1)));

    for (key, value) in &formula.environment {
        env.insert(key.clone(), subs.substitute(value)?);
    }

    Ok(env)
}

/// Runs stages through a [`ProcessRunner`]
pub struct StageExecutor<'a> {
    runner: &'a dyn ProcessRunner,
    timeout: Option<Duration>,
}

impl<'a> StageExecutor<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, timeout: Option<Duration>) -> Self {
        Self { runner, timeout }
    }

    /// Run `commands` in order in `cwd`, stopping at the first failure
    pub fn run(
        &self,
        formula: &Formula,
        stage: Stage,
        commands: &[Command],
        cwd: &Path,
        subs: &Substitutions,
        state: &mut BuildState,
    ) -> Result<()> {
        info!(
            "Running {} stage for {} ({} commands)",
            stage,
            formula.name,
            commands.len()
        );

        for command in commands {
            let argv = subs.expand(command)?;
            let request = ProcessRequest {
                argv,
                cwd: cwd.to_path_buf(),
                env: state.env.clone(),
                timeout: self.timeout,
            };
            let shown = request.display();
            debug!("[{}/{}] {}", formula.name, stage, shown);

            let outcome = match self.runner.run(&request) {
                Ok(outcome) => outcome,
                Err(Error::Io(e)) => {
                    state.log_line(&format!("=== {stage}: {shown} ==="));
                    state.log_line(&e.to_string());
                    return Err(Error::StageCommandFailed {
                        formula: formula.name.clone(),
                        stage: stage.to_string(),
                        command: shown,
                        status: None,
                        output: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            };

            match outcome {
                ProcessOutcome::Exited {
                    status,
                    stdout,
                    stderr,
                } => {
                    for line in stdout.lines().chain(stderr.lines()) {
                        debug!("[{}/{}] {}", formula.name, stage, line);
                    }
                    state.log_command_output(stage, &shown, &stdout, &stderr);

                    if status != Some(0) {
                        return Err(Error::StageCommandFailed {
                            formula: formula.name.clone(),
                            stage: stage.to_string(),
                            command: shown,
                            status,
                            output: format!("{stdout}{stderr}"),
                        });
                    }
                }
                ProcessOutcome::TimedOut => {
                    let timeout = self.timeout.unwrap_or_default();
                    state.log_line(&format!(
                        "=== {stage}: {shown} (timed out after {}s) ===",
                        timeout.as_secs()
                    ));
                    return Err(Error::TimedOut {
                        formula: formula.name.clone(),
                        stage: stage.to_string(),
                        command: shown,
                        timeout,
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::parser::parse_formula;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays canned outcomes and records what was asked
    struct Scripted {
        outcomes: Mutex<VecDeque<Result<ProcessOutcome>>>,
        seen: Mutex<Vec<ProcessRequest>>,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<ProcessOutcome>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl ProcessRunner for Scripted {
        fn run(&self, request: &ProcessRequest) -> Result<ProcessOutcome> {
            self.seen.lock().push(request.clone());
            self.outcomes
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(ProcessOutcome::success()))
        }
    }

    fn formula() -> Formula {
        parse_formula(
            r#"
name = "hello"
[resource]
url = "https://example.com/hello-2.12.tar.gz"
sha256 = "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
[install]
commands = [["./configure", "--prefix=%(prefix)s"], ["make"], ["make", "install"]]
[environment]
CFLAGS = "-O2 -I%(prefix)s/include"
"#,
        )
        .unwrap()
    }

    fn run(runner: &Scripted, timeout: Option<Duration>) -> (Result<()>, BuildState) {
        let formula = formula();
        let mut subs = Substitutions::new(&formula);
        subs.set("prefix", "/cellar/hello/2.12");
        let mut state = BuildState::new("hello", false).unwrap();
        let cwd = state.path().to_path_buf();
        let result = StageExecutor::new(runner, timeout).run(
            &formula,
            Stage::Install,
            &formula.install.commands,
            &cwd,
            &subs,
            &mut state,
        );
        (result, state)
    }

    #[test]
    fn test_commands_run_in_order() {
        let runner = Scripted::new(vec![]);
        let (result, state) = run(&runner, None);
        result.unwrap();

        let seen = runner.seen.lock();
        let argvs: Vec<_> = seen.iter().map(|r| r.display()).collect();
        assert_eq!(
            argvs,
            vec!["./configure --prefix=/cellar/hello/2.12", "make", "make install"]
        );
        assert!(state.log().contains("=== install: make install ==="));
    }

    #[test]
    fn test_first_failure_stops_stage() {
        let runner = Scripted::new(vec![Ok(ProcessOutcome::Exited {
            status: Some(1),
            stdout: String::new(),
            stderr: "configure: error: no C compiler\n".to_string(),
        })]);
        let (result, _) = run(&runner, None);

        match result {
            Err(Error::StageCommandFailed { command, status, output, stage, .. }) => {
                assert_eq!(command, "./configure --prefix=/cellar/hello/2.12");
                assert_eq!(status, Some(1));
                assert_eq!(stage, "install");
                assert!(output.contains("no C compiler"));
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(runner.seen.lock().len(), 1);
    }

    #[test]
    fn test_signal_is_failure() {
        let runner = Scripted::new(vec![Ok(ProcessOutcome::Exited {
            status: None,
            stdout: String::new(),
            stderr: String::new(),
        })]);
        let (result, _) = run(&runner, None);
        assert!(matches!(
            result,
            Err(Error::StageCommandFailed { status: None, .. })
        ));
    }

    #[test]
    fn test_timeout_is_distinct() {
        let runner = Scripted::new(vec![Ok(ProcessOutcome::success()), Ok(ProcessOutcome::TimedOut)]);
        let (result, _) = run(&runner, Some(Duration::from_secs(30)));

        match result {
            Err(Error::TimedOut { command, timeout, .. }) => {
                assert_eq!(command, "make");
                assert_eq!(timeout, Duration::from_secs(30));
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(runner.seen.lock().len(), 2);
    }

    #[test]
    fn test_spawn_failure_becomes_stage_failure() {
        let runner = Scripted::new(vec![Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "No such file or directory",
        )))]);
        let (result, _) = run(&runner, None);
        assert!(matches!(
            result,
            Err(Error::StageCommandFailed { status: None, .. })
        ));
    }

    #[test]
    fn test_stage_environment_precedence() {
        let formula = formula();
        let mut subs = Substitutions::new(&formula);
        subs.set("prefix", "/cellar/hello/2.12");
        let deps = vec![PathBuf::from("/cellar/meson/1.4.0")];

        let env = stage_environment(&formula, Path::new("/cellar/hello/2.12"), &deps, 4, &subs)
            .unwrap();

        assert!(env["PATH"].starts_with("/cellar/meson/1.4.0/bin:"));
        assert_eq!(env["CMAKE_PREFIX_PATH"], "/cellar/meson/1.4.0");
        assert_eq!(
            env["PKG_CONFIG_PATH"],
            "/cellar/meson/1.4.0/lib/pkgconfig:/cellar/meson/1.4.0/share/pkgconfig"
        );
        assert_eq!(env["MAKEFLAGS"], "-j4");
        assert_eq!(env["PREFIX"], "/cellar/hello/2.12");
        assert_eq!(env["CFLAGS"], "-O2 -I/cellar/hello/2.12/include");
    }

    #[test]
    fn test_scratch_cleanup_follows_keep_flag() {
        let state = BuildState::new("hello", false).unwrap();
        let dropped = state.path().to_path_buf();
        drop(state);
        assert!(!dropped.exists());

        let state = BuildState::new("hello", true).unwrap();
        let kept = state.path().to_path_buf();
        drop(state);
        assert!(kept.is_dir());
        std::fs::remove_dir_all(&kept).unwrap();
    }
}
