// src/formula/engine.rs

//! Formula engine
//!
//! The orchestrator behind `install`, `test`, `livecheck` and `fetch`.
//!
//! # Install
//!
//! 1. Resolve the install closure of the formula (requirements first).
//! 2. For each formula in that order, ensure it is installed:
//!    - take the formula's install lock and re-check its receipt;
//!    - fetch and verify the resource (source cache first);
//!    - unpack it, fetch and verify every patch, apply them copy-on-write;
//!    - run the install stage into the keg prefix;
//!    - write the receipt.
//!
//! Any failure aborts the whole invocation. The keg prefix of the formula
//! that failed is removed, no receipt is written for it, and nothing that
//! depends on it is attempted.
//!
//! # Test
//!
//! Only runs against a completed install (receipt present, keg on disk).
//! Test requirements are installed first, then the test stage runs in a
//! fresh scratch directory that has never held a build tree.

use crate::cache::SourceCache;
use crate::config::EngineConfig;
use crate::db::Receipt;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::formula::format::{Formula, Substitutions, is_contained_relative};
use crate::formula::graph::{Phase, Resolver};
use crate::formula::livecheck::{Livecheck, LivecheckResult};
use crate::formula::locks::InstallLocks;
use crate::formula::patch::{VerifiedPatch, apply_patches};
use crate::formula::stage::{BuildState, Stage, StageExecutor, stage_environment};
use crate::formula::unpack::unpack;
use crate::index::FormulaIndex;
use crate::process::ProcessRunner;
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to one formula during an install
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStatus {
    Installed,
    AlreadyInstalled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledFormula {
    pub name: String,
    pub version: String,
    pub prefix: PathBuf,
    pub status: InstallStatus,
}

/// Result of `install`, in resolution order (requested formula last)
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallReport {
    pub formulas: Vec<InstalledFormula>,
}

impl InstallReport {
    /// Names of formulas built by this invocation
    pub fn newly_installed(&self) -> impl Iterator<Item = &str> {
        self.formulas
            .iter()
            .filter(|f| f.status == InstallStatus::Installed)
            .map(|f| f.name.as_str())
    }

    pub fn root(&self) -> Option<&InstalledFormula> {
        self.formulas.last()
    }
}

/// Result of a successful `test`
#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub formula: String,
    pub version: String,
    /// Requirements ensured before the test ran, in resolution order
    pub requirements: Vec<String>,
    /// Captured stage output
    pub log: String,
}

/// One verified artifact in the source cache
#[derive(Debug, Clone, Serialize)]
pub struct FetchedArtifact {
    pub url: String,
    pub digest: String,
    pub path: PathBuf,
}

/// Drives the formula lifecycle against injected collaborators
pub struct Engine {
    index: Arc<dyn FormulaIndex>,
    fetcher: Arc<dyn Fetcher>,
    runner: Arc<dyn ProcessRunner>,
    cache: SourceCache,
    locks: InstallLocks,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        index: Arc<dyn FormulaIndex>,
        fetcher: Arc<dyn Fetcher>,
        runner: Arc<dyn ProcessRunner>,
        config: EngineConfig,
    ) -> Self {
        Self {
            cache: SourceCache::new(&config.cache_dir),
            locks: InstallLocks::new(),
            index,
            fetcher,
            runner,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn index(&self) -> &dyn FormulaIndex {
        self.index.as_ref()
    }

    /// Look up a formula requested by name
    pub fn formula(&self, name: &str) -> Result<Arc<Formula>> {
        self.index
            .lookup(name)?
            .ok_or_else(|| Error::FormulaNotFound(name.to_string()))
    }

    /// Requirement order for `name` in `phase`, root last
    pub fn deps(&self, name: &str, phase: Phase) -> Result<Vec<String>> {
        let root = self.formula(name)?;
        Resolver::new(self.index.as_ref()).resolve_names(&root, phase)
    }

    /// Install `name` and everything it needs
    pub fn install(&self, name: &str) -> Result<InstallReport> {
        let root = self.formula(name)?;
        let order = Resolver::new(self.index.as_ref()).resolve(&root, Phase::Install)?;
        info!(
            "Install order for {}: {}",
            name,
            order.iter().map(|f| f.name.as_str()).collect::<Vec<_>>().join(", ")
        );

        let mut report = InstallReport::default();
        for formula in &order {
            report.formulas.push(self.ensure_installed(formula)?);
        }
        Ok(report)
    }

    /// Run the test stage of an installed formula
    pub fn test(&self, name: &str) -> Result<TestReport> {
        let root = self.formula(name)?;
        let receipt = self
            .installed_receipt(name)?
            .ok_or_else(|| Error::NotInstalled {
                name: name.to_string(),
            })?;
        let procedure = root.test.as_ref().ok_or_else(|| Error::InvalidFormula {
            name: name.to_string(),
            reason: "no test stage declared".to_string(),
        })?;

        let order = Resolver::new(self.index.as_ref()).resolve(&root, Phase::Test)?;
        let requirements = &order[..order.len().saturating_sub(1)];
        for formula in requirements {
            self.ensure_installed(formula)?;
        }

        let mut state = BuildState::new(&format!("{name}-test"), self.config.keep_scratch)?;
        state.order = order.iter().map(|f| f.name.clone()).collect();
        let testpath = state.path().join("test");
        fs::create_dir_all(&testpath)?;

        let mut subs = Substitutions::new(&root);
        subs.set("version", receipt.version.as_str())
            .set("prefix", receipt.prefix.to_string_lossy())
            .set("testpath", testpath.to_string_lossy())
            .set("jobs", self.config.jobs.to_string());

        for (relative, content) in &procedure.files {
            if !is_contained_relative(Path::new(relative)) {
                return Err(Error::InvalidFormula {
                    name: name.to_string(),
                    reason: format!("test file '{relative}' escapes the test directory"),
                });
            }
            let path = testpath.join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, subs.substitute(content)?)?;
            debug!("Wrote test file {}", path.display());
        }

        // The artifact under test comes first on every search path
        let mut prefixes = vec![receipt.prefix.clone()];
        prefixes.extend(self.requirement_prefixes(requirements)?);
        state.env = stage_environment(&root, &receipt.prefix, &prefixes, self.config.jobs, &subs)?;

        self.executor().run(
            &root,
            Stage::Test,
            &procedure.commands,
            &testpath,
            &subs,
            &mut state,
        )?;
        info!("{} {} passed its test", name, receipt.version);

        Ok(TestReport {
            formula: name.to_string(),
            version: receipt.version,
            requirements: requirements.iter().map(|f| f.name.clone()).collect(),
            log: state.into_log(),
        })
    }

    /// Compare the formula's version with upstream; never builds anything
    pub fn livecheck(&self, name: &str) -> Result<LivecheckResult> {
        let formula = self.formula(name)?;
        Livecheck::new(self.fetcher.as_ref())
            .with_github_api_base(self.config.github_api_base.as_str())
            .check(&formula)
    }

    /// Fetch and verify the resource and patches into the source cache
    pub fn fetch(&self, name: &str) -> Result<Vec<FetchedArtifact>> {
        let formula = self.formula(name)?;
        let sources = std::iter::once((&formula.resource.url, &formula.resource.digest))
            .chain(formula.patches.iter().map(|p| (&p.url, &p.digest)));

        let mut fetched = Vec::new();
        for (url, digest) in sources {
            self.cache.fetch_verified(self.fetcher.as_ref(), url, digest)?;
            fetched.push(FetchedArtifact {
                url: url.clone(),
                digest: digest.to_prefixed_string(),
                path: self.cache.entry_path(digest),
            });
        }
        Ok(fetched)
    }

    fn executor(&self) -> StageExecutor<'_> {
        StageExecutor::new(self.runner.as_ref(), self.config.command_timeout)
    }

    fn ensure_installed(&self, formula: &Arc<Formula>) -> Result<InstalledFormula> {
        let lock = self.locks.for_formula(&formula.name);
        let _guard = lock.lock();

        if let Some(receipt) = self.installed_receipt(&formula.name)? {
            debug!("{} {} already installed", receipt.name, receipt.version);
            return Ok(InstalledFormula {
                name: receipt.name,
                version: receipt.version,
                prefix: receipt.prefix,
                status: InstallStatus::AlreadyInstalled,
            });
        }

        let version = formula.require_version()?;
        let prefix = self.config.keg_prefix(&formula.name, &version);
        info!("Installing {} {}", formula.name, version);

        let mut state = BuildState::new(&formula.name, self.config.keep_scratch)?;
        let buildpath = self.prepare_source(formula, &mut state)?;

        // Closure minus the formula itself; all installed by now
        let closure = Resolver::new(self.index.as_ref()).resolve(formula, Phase::Install)?;
        let requirements = &closure[..closure.len().saturating_sub(1)];
        state.order = closure.iter().map(|f| f.name.clone()).collect();
        let prefixes = self.requirement_prefixes(requirements)?;

        if prefix.exists() {
            warn!("Removing leftover keg {}", prefix.display());
            fs::remove_dir_all(&prefix)?;
        }
        fs::create_dir_all(&prefix)?;

        let result = self.run_install_stage(formula, &prefix, &buildpath, &prefixes, &mut state);
        let result = result.and_then(|()| {
            self.index.mark_installed(&Receipt {
                name: formula.name.clone(),
                version: version.clone(),
                digest: formula.resource.digest.to_prefixed_string(),
                prefix: prefix.clone(),
                installed_at: Utc::now(),
            })
        });

        if let Err(e) = result {
            if let Err(cleanup) = fs::remove_dir_all(&prefix) {
                warn!("Failed to remove partial keg {}: {}", prefix.display(), cleanup);
            }
            return Err(e);
        }

        info!("Installed {} {} to {}", formula.name, version, prefix.display());
        Ok(InstalledFormula {
            name: formula.name.clone(),
            version,
            prefix,
            status: InstallStatus::Installed,
        })
    }

    fn run_install_stage(
        &self,
        formula: &Formula,
        prefix: &Path,
        buildpath: &Path,
        requirement_prefixes: &[PathBuf],
        state: &mut BuildState,
    ) -> Result<()> {
        let mut subs = Substitutions::new(formula);
        subs.set("prefix", prefix.to_string_lossy())
            .set("buildpath", buildpath.to_string_lossy())
            .set("jobs", self.config.jobs.to_string());

        state.env = stage_environment(formula, prefix, requirement_prefixes, self.config.jobs, &subs)?;
        self.executor().run(
            formula,
            Stage::Install,
            &formula.install.commands,
            buildpath,
            &subs,
            state,
        )
    }

    /// Fetch, verify, unpack and patch; returns the build tree
    fn prepare_source(&self, formula: &Formula, state: &mut BuildState) -> Result<PathBuf> {
        let resource = &formula.resource;
        let data = self
            .cache
            .fetch_verified(self.fetcher.as_ref(), &resource.url, &resource.digest)?;
        state.log_line(&format!("Verified {} ({})", resource.url, resource.digest));

        let buildpath = unpack(&formula.archive_filename(), &data, &state.path().join("src"))?;
        state.log_line(&format!("Unpacked source to {}", buildpath.display()));

        let mut patches = Vec::with_capacity(formula.patches.len());
        for patch in &formula.patches {
            let content = self
                .cache
                .fetch_verified(self.fetcher.as_ref(), &patch.url, &patch.digest)?;
            patches.push(VerifiedPatch {
                url: patch.url.clone(),
                strip: patch.strip,
                content,
            });
        }
        apply_patches(&buildpath, &patches)?;
        if !patches.is_empty() {
            state.log_line(&format!("Applied {} patches", patches.len()));
        }

        Ok(buildpath)
    }

    /// Receipt of a complete install; a receipt whose keg is gone does not count
    fn installed_receipt(&self, name: &str) -> Result<Option<Receipt>> {
        let receipt = self.index.receipt(name)?;
        Ok(receipt.filter(|r| {
            let present = r.prefix.is_dir();
            if !present {
                warn!("Receipt for {} points at missing keg {}", r.name, r.prefix.display());
            }
            present
        }))
    }

    /// Keg prefixes of installed requirements, nearest requirement first
    fn requirement_prefixes(&self, requirements: &[Arc<Formula>]) -> Result<Vec<PathBuf>> {
        requirements
            .iter()
            .rev()
            .map(|f| {
                self.installed_receipt(&f.name)?
                    .map(|r| r.prefix)
                    .ok_or_else(|| Error::NotInstalled {
                        name: f.name.clone(),
                    })
            })
            .collect()
    }
}
