// src/commands/livecheck.rs

//! Livecheck command

use super::open_session;
use crate::cli::GlobalArgs;
use anyhow::{Context, Result};

pub fn cmd_livecheck(global: &GlobalArgs, names: &[String], json: bool) -> Result<()> {
    let session = open_session(global)?;

    let mut results = Vec::with_capacity(names.len());
    for name in names {
        let result = session
            .engine
            .livecheck(name)
            .with_context(|| format!("Livecheck failed for {name}"))?;
        results.push(result);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    for result in &results {
        if result.outdated {
            println!("{}: {} ==> {}", result.formula, result.current, result.latest);
        } else {
            println!("{}: {} (up to date)", result.formula, result.current);
        }
    }
    Ok(())
}
