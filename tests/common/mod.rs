// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.
//!
//! The engine is driven entirely through in-memory doubles: a map-backed
//! fetcher, a runner that records every command and answers from a script,
//! and formulas built in code.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::GzEncoder;
use formulary::formula::{Command, Procedure, Requirement, RequirementKind, Resource};
use formulary::hash::sha256;
use formulary::{
    Digest, Engine, EngineConfig, Error, Fetcher, Formula, MemoryIndex, ProcessOutcome,
    ProcessRequest, ProcessRunner, Result,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Fetcher answering from a fixed URL -> bytes map
#[derive(Default)]
pub struct MemFetcher {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    pub requests: Mutex<Vec<String>>,
}

impl MemFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.bodies.lock().insert(url.to_string(), body.into());
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests.lock().iter().filter(|u| *u == url).count()
    }
}

impl Fetcher for MemFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.requests.lock().push(url.to_string());
        self.bodies.lock().get(url).cloned().ok_or_else(|| Error::Fetch {
            url: url.to_string(),
            reason: "HTTP 404 Not Found".to_string(),
        })
    }
}

type Responder = dyn Fn(&ProcessRequest) -> ProcessOutcome + Send + Sync;

/// Runner that records requests and answers through a closure
///
/// The default answer is a successful exit with no output.
pub struct ScriptedRunner {
    respond: Box<Responder>,
    pub requests: Mutex<Vec<ProcessRequest>>,
}

impl ScriptedRunner {
    pub fn succeeding() -> Self {
        Self::with(|_| ProcessOutcome::success())
    }

    pub fn with(respond: impl Fn(&ProcessRequest) -> ProcessOutcome + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Fail any command whose program is `program` with `status`
    pub fn failing(program: &'static str, status: i32) -> Self {
        Self::with(move |req| {
            if req.program() == program {
                ProcessOutcome::Exited {
                    status: Some(status),
                    stdout: String::new(),
                    stderr: format!("{program}: failed\n"),
                }
            } else {
                ProcessOutcome::success()
            }
        })
    }

    /// Programs run so far, in order
    pub fn programs(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|r| r.program().to_string())
            .collect()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.display()).collect()
    }
}

impl ProcessRunner for ScriptedRunner {
    fn run(&self, request: &ProcessRequest) -> Result<ProcessOutcome> {
        self.requests.lock().push(request.clone());
        Ok((self.respond)(request))
    }
}

/// Gzipped tarball with one top-level directory
pub fn source_tarball(top: &str, files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{top}/{path}"), content.as_bytes())
            .unwrap();
    }
    let tar = builder.into_inner().unwrap();

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar).unwrap();
    encoder.finish().unwrap()
}

pub fn source_url(name: &str) -> String {
    format!("https://example.com/{name}-1.0.tar.gz")
}

/// Formula whose resource is a small tarball served by `fetcher`
pub fn formula(name: &str, fetcher: &MemFetcher) -> Formula {
    let archive = source_tarball(
        &format!("{name}-1.0"),
        &[("README", "hello\n"), ("src/main.c", "int main(void) { return 0; }\n")],
    );
    let url = source_url(name);
    let digest = Digest::parse(&sha256(&archive)).unwrap();
    fetcher.serve(&url, archive);

    Formula {
        name: name.to_string(),
        desc: None,
        homepage: None,
        license: None,
        version: None,
        head: None,
        resource: Resource { url, digest },
        patches: Vec::new(),
        requirements: Vec::new(),
        install: Procedure::default(),
        test: None,
        livecheck: None,
        environment: BTreeMap::new(),
        variables: HashMap::new(),
    }
}

pub fn requires(mut formula: Formula, name: &str, kind: RequirementKind) -> Formula {
    formula.requirements.push(Requirement {
        name: name.to_string(),
        kind,
    });
    formula
}

pub fn with_install(mut formula: Formula, commands: &[&[&str]]) -> Formula {
    formula.install.commands = commands.iter().map(|argv| Command::new(argv.iter().copied())).collect();
    formula
}

/// Engine over in-memory collaborators, rooted in a temp directory
pub struct Harness {
    pub root: TempDir,
    pub index: Arc<MemoryIndex>,
    pub fetcher: Arc<MemFetcher>,
    pub runner: Arc<ScriptedRunner>,
    pub engine: Arc<Engine>,
}

impl Harness {
    pub fn new(formulas: Vec<Formula>, fetcher: MemFetcher, runner: ScriptedRunner) -> Self {
        let root = TempDir::new().unwrap();
        let mut config = EngineConfig::rooted_at(root.path());
        config.command_timeout = Some(Duration::from_secs(60));
        config.jobs = 2;

        let index = Arc::new(MemoryIndex::with_formulas(formulas));
        let fetcher = Arc::new(fetcher);
        let runner = Arc::new(runner);
        let engine = Arc::new(Engine::new(
            index.clone(),
            fetcher.clone(),
            runner.clone(),
            config,
        ));

        Self {
            root,
            index,
            fetcher,
            runner,
            engine,
        }
    }

    pub fn keg(&self, name: &str) -> std::path::PathBuf {
        self.engine.config().keg_prefix(name, "1.0")
    }
}
