// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: formula name
fn formula_arg() -> Arg {
    Arg::new("formula").required(true).help("Formula name")
}

fn build_cli() -> Command {
    Command::new("formulary")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Formulary Contributors")
        .about("Resolve, verify, patch, build, install and test packages from formulas")
        .subcommand_required(true)
        .arg(Arg::new("config").long("config").global(true).value_name("FILE").help("Configuration file (TOML)"))
        .arg(Arg::new("formula_dir").long("formula-dir").global(true).value_name("DIR").help("Directory of <name>.toml formulas"))
        .arg(Arg::new("prefix").long("prefix").global(true).value_name("DIR").help("Cellar root; kegs are installed to <prefix>/<name>/<version>"))
        .arg(Arg::new("db").long("db").global(true).value_name("PATH").help("Receipt database path"))
        .arg(Arg::new("cache").long("cache").global(true).value_name("DIR").help("Source cache directory"))
        .arg(Arg::new("timeout").long("timeout").global(true).value_name("SECS").help("Per-command timeout in seconds (0 disables)"))
        .arg(Arg::new("jobs").short('j').long("jobs").global(true).value_name("N").help("Parallel jobs passed to build tools"))
        .arg(
            Arg::new("keep_scratch")
                .long("keep-scratch")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Keep scratch directories for inspection"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Verbose output (debug logging)"),
        )
        .subcommand(
            Command::new("install")
                .about("Install a formula and its requirements")
                .arg(formula_arg()),
        )
        .subcommand(
            Command::new("test")
                .about("Run the test stage of an installed formula")
                .arg(formula_arg())
                .arg(
                    Arg::new("show_log")
                        .long("show-log")
                        .action(ArgAction::SetTrue)
                        .help("Print the captured test output"),
                ),
        )
        .subcommand(
            Command::new("livecheck")
                .about("Check upstream for a newer version")
                .arg(Arg::new("formulas").required(true).num_args(1..).help("Formula names"))
                .arg(Arg::new("json").long("json").action(ArgAction::SetTrue).help("Output as JSON")),
        )
        .subcommand(
            Command::new("fetch")
                .about("Download and verify sources into the cache without building")
                .arg(formula_arg()),
        )
        .subcommand(
            Command::new("deps")
                .about("Show the resolved requirement order")
                .arg(formula_arg())
                .arg(
                    Arg::new("test")
                        .long("test")
                        .action(ArgAction::SetTrue)
                        .help("Include test requirements"),
                ),
        )
        .subcommand(
            Command::new("info")
                .about("Show formula details")
                .arg(formula_arg()),
        )
        .subcommand(
            Command::new("list")
                .about("List known formulas and their install state")
                .arg(
                    Arg::new("installed")
                        .long("installed")
                        .action(ArgAction::SetTrue)
                        .help("Only show installed formulas"),
                )
                .arg(Arg::new("json").long("json").action(ArgAction::SetTrue).help("Output as JSON")),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // OUT_DIR is always set by cargo; keep generated files out of the source tree
    let out_dir = match env::var("OUT_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=OUT_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = out_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("formulary.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
