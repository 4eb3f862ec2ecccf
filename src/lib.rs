// src/lib.rs

//! Formulary: a formula execution engine
//!
//! A formula is declarative data describing how to fetch, verify, patch,
//! build, install and test one package. This crate interprets formulas:
//!
//! - Requirement resolution with cycle detection ([`formula::Resolver`])
//! - Digest verification of every resource and patch ([`hash`])
//! - Copy-on-write patch application ([`formula::patch`])
//! - Fail-fast stage execution with per-command timeouts ([`formula::stage`])
//! - Read-only upstream version checks ([`formula::livecheck`])
//! - Install receipts in SQLite ([`db`])
//!
//! # Architecture
//!
//! The [`Engine`] owns no global state. Formula lookup, downloads and process
//! execution are injected as [`FormulaIndex`], [`Fetcher`] and
//! [`ProcessRunner`]; each has one production implementation here.

pub mod cache;
pub mod config;
pub mod db;
mod error;
pub mod fetch;
pub mod formula;
pub mod hash;
pub mod index;
pub mod process;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use fetch::{Fetcher, HttpFetcher};
pub use formula::{
    Engine, Formula, InstallReport, InstallStatus, LivecheckResult, Phase, TestReport,
};
pub use hash::{Digest, HashAlgorithm};
pub use index::{FormulaIndex, Formulary, MemoryIndex};
pub use process::{ProcessOutcome, ProcessRequest, ProcessRunner, SystemRunner};
