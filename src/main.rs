// src/main.rs

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.global.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let global = &cli.global;
    let result = match &cli.command {
        Commands::Install { formula } => commands::cmd_install(global, formula),
        Commands::Test { formula, show_log } => commands::cmd_test(global, formula, *show_log),
        Commands::Livecheck { formulas, json } => commands::cmd_livecheck(global, formulas, *json),
        Commands::Fetch { formula } => commands::cmd_fetch(global, formula),
        Commands::Deps { formula, test } => commands::cmd_deps(global, formula, *test),
        Commands::Info { formula } => commands::cmd_info(global, formula),
        Commands::List { installed, json } => commands::cmd_list(global, *installed, *json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            let code = err
                .chain()
                .find_map(|cause| cause.downcast_ref::<formulary::Error>())
                .map_or(1, formulary::Error::exit_code);
            ExitCode::from(code)
        }
    }
}
