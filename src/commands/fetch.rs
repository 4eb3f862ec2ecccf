// src/commands/fetch.rs

//! Fetch command - populate the source cache

use super::open_session;
use crate::cli::GlobalArgs;
use anyhow::{Context, Result};

pub fn cmd_fetch(global: &GlobalArgs, name: &str) -> Result<()> {
    let session = open_session(global)?;
    let fetched = session
        .engine
        .fetch(name)
        .with_context(|| format!("Failed to fetch sources for {name}"))?;

    for artifact in &fetched {
        println!("{}", artifact.url);
        println!("  {} -> {}", artifact.digest, artifact.path.display());
    }
    println!("[OK] {} artifact(s) verified", fetched.len());
    Ok(())
}
