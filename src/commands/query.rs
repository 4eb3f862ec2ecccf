// src/commands/query.rs

//! Read-only queries: deps, info, list

use super::open_session;
use crate::cli::GlobalArgs;
use anyhow::{Context, Result};
use formulary::{FormulaIndex, Phase};
use serde::Serialize;
use tracing::warn;

pub fn cmd_deps(global: &GlobalArgs, name: &str, include_test: bool) -> Result<()> {
    let session = open_session(global)?;
    let phase = if include_test { Phase::Test } else { Phase::Install };
    let order = session
        .engine
        .deps(name, phase)
        .with_context(|| format!("Failed to resolve requirements of {name}"))?;

    for (position, formula) in order.iter().enumerate() {
        let installed = session.formulary.is_installed(formula)?;
        println!(
            "{:>3}. {}{}",
            position + 1,
            formula,
            if installed { " (installed)" } else { "" }
        );
    }
    Ok(())
}

pub fn cmd_info(global: &GlobalArgs, name: &str) -> Result<()> {
    let session = open_session(global)?;
    let formula = session.engine.formula(name)?;

    println!("{}: {}", formula.name, formula.version().as_deref().unwrap_or("(unknown)"));
    if let Some(desc) = &formula.desc {
        println!("{}", desc);
    }
    if let Some(homepage) = &formula.homepage {
        println!("Homepage: {}", homepage);
    }
    if let Some(license) = &formula.license {
        println!("License: {}", license);
    }
    println!("Source: {}", formula.resource.url);
    println!("  {}", formula.resource.digest);
    if let Some(head) = &formula.head {
        println!("Head: {}{}", head.url, head.branch.as_deref().map(|b| format!(" ({b})")).unwrap_or_default());
    }
    if !formula.patches.is_empty() {
        println!("Patches: {}", formula.patches.len());
    }
    for req in &formula.requirements {
        println!("Requires: {} ({})", req.name, req.kind);
    }
    if let Some(livecheck) = &formula.livecheck {
        println!("Livecheck: {:?}", livecheck.strategy);
    }

    match session.formulary.receipt(name)? {
        Some(receipt) => println!(
            "Installed: {} at {} ({})",
            receipt.version,
            receipt.prefix.display(),
            receipt.installed_at.to_rfc3339()
        ),
        None => println!("Not installed"),
    }
    Ok(())
}

#[derive(Serialize)]
struct ListEntry {
    name: String,
    version: Option<String>,
    installed: Option<String>,
}

pub fn cmd_list(global: &GlobalArgs, installed_only: bool, json: bool) -> Result<()> {
    let session = open_session(global)?;

    let mut entries = Vec::new();
    for name in session.formulary.names()? {
        let installed = session.formulary.receipt(&name)?.map(|r| r.version);
        if installed_only && installed.is_none() {
            continue;
        }
        let version = match session.formulary.lookup(&name) {
            Ok(formula) => formula.and_then(|f| f.version()),
            Err(e) => {
                warn!("Skipping version of {}: {}", name, e);
                None
            }
        };
        entries.push(ListEntry {
            name,
            version,
            installed,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for entry in &entries {
        let version = entry.version.as_deref().unwrap_or("?");
        match &entry.installed {
            Some(installed) => println!("{} {} [installed {}]", entry.name, version, installed),
            None => println!("{} {}", entry.name, version),
        }
    }
    Ok(())
}
