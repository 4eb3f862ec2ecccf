// src/commands/mod.rs
//! Command handlers for the formulary CLI

mod fetch;
mod install;
mod livecheck;
mod query;

pub use fetch::cmd_fetch;
pub use install::cmd_install;
pub use livecheck::cmd_livecheck;
pub use query::{cmd_deps, cmd_info, cmd_list};
pub use test::cmd_test;

use crate::cli::GlobalArgs;
use anyhow::{Context, Result};
use formulary::{Engine, EngineConfig, Formulary, HttpFetcher, SystemRunner};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Engine plus the directory index it was built on
pub struct Session {
    pub engine: Engine,
    pub formulary: Arc<Formulary>,
}

/// Resolve configuration from file and flags
pub fn load_config(global: &GlobalArgs) -> Result<EngineConfig> {
    let mut config = match &global.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    if let Some(dir) = &global.formula_dir {
        config.formula_dir = dir.clone();
    }
    if let Some(prefix) = &global.prefix {
        config.prefix = prefix.clone();
    }
    if let Some(db) = &global.db {
        config.db_path = db.clone();
    }
    if let Some(cache) = &global.cache {
        config.cache_dir = cache.clone();
    }
    if let Some(secs) = global.timeout {
        config.command_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    if let Some(jobs) = global.jobs {
        config.jobs = jobs.max(1);
    }
    if global.keep_scratch {
        config.keep_scratch = true;
    }

    debug!("Effective configuration: {:?}", config);
    Ok(config)
}

/// Open the formula directory and build an engine over it
pub fn open_session(global: &GlobalArgs) -> Result<Session> {
    let config = load_config(global)?;
    let formulary = Arc::new(
        Formulary::open(&config.formula_dir, &config.db_path)
            .with_context(|| format!("Failed to open formulas in {}", config.formula_dir.display()))?,
    );
    let fetcher = HttpFetcher::new().context("Failed to initialise downloader")?;

    let engine = Engine::new(
        formulary.clone(),
        Arc::new(fetcher),
        Arc::new(SystemRunner::new()),
        config,
    );
    Ok(Session { engine, formulary })
}
