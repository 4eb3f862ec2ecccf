// src/commands/install.rs

//! Install command

use super::open_session;
use crate::cli::GlobalArgs;
use anyhow::{Context, Result};
use formulary::InstallStatus;

pub fn cmd_install(global: &GlobalArgs, name: &str) -> Result<()> {
    let session = open_session(global)?;
    let report = session
        .engine
        .install(name)
        .with_context(|| format!("Failed to install {name}"))?;

    for formula in &report.formulas {
        match formula.status {
            InstallStatus::Installed => println!(
                "Installed {} {} -> {}",
                formula.name,
                formula.version,
                formula.prefix.display()
            ),
            InstallStatus::AlreadyInstalled => {
                println!("{} {} is already installed", formula.name, formula.version)
            }
        }
    }

    let built = report.newly_installed().count();
    if built == 0 {
        println!("Nothing to do");
    } else {
        println!("[OK] {} formula(s) installed", built);
    }
    Ok(())
}
