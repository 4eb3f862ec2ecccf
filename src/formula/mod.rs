// src/formula/mod.rs

//! Formula model and execution engine
//!
//! Formulas are declarative TOML files describing how to fetch, verify,
//! patch, build, install and test one package:
//!
//! ```toml
//! name = "jsoncpp"
//! desc = "Library for interacting with JSON"
//! homepage = "https://github.com/open-source-parsers/jsoncpp"
//! license = "MIT"
//!
//! [resource]
//! url = "https://github.com/open-source-parsers/jsoncpp/archive/refs/tags/1.9.6.tar.gz"
//! sha256 = "f93b6dd7ce796b13d02c108bc9f79812245a82e577581c4c9aabe57075c90ea2"
//!
//! [[requirements]]
//! name = "meson"
//! kind = "build"
//!
//! [install]
//! commands = [
//!     ["meson", "setup", "build", "%(std_meson_args)s"],
//!     ["meson", "install", "-C", "build"],
//! ]
//!
//! [livecheck]
//! url = "stable"
//! strategy = "github_latest"
//! ```
//!
//! [`Engine`] drives the lifecycle; everything it touches outside the
//! process (formula lookup, downloads, commands) goes through a trait.

mod engine;
mod format;
pub mod graph;
pub mod livecheck;
mod locks;
mod parser;
pub mod patch;
pub mod stage;
pub mod unpack;

pub use engine::{Engine, FetchedArtifact, InstallReport, InstallStatus, InstalledFormula, TestReport};
pub use format::{
    Command, Formula, HeadSpec, LivecheckSpec, LivecheckStrategy, LivecheckUrl, Patch, Procedure,
    Requirement, RequirementKind, Resource, Substitutions, TestProcedure, is_contained_relative,
};
pub use graph::{Phase, Resolver};
pub use livecheck::LivecheckResult;
pub use locks::InstallLocks;
pub use parser::{parse_formula, parse_formula_file, validate_formula};
pub use stage::{BuildState, Stage};
