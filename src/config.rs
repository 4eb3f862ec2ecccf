// src/config.rs

//! Engine configuration
//!
//! Defaults come from the per-user data and cache directories. A TOML file
//! may override any of them:
//!
//! ```toml
//! [paths]
//! prefix = "/opt/formulary/cellar"
//! cache = "/var/cache/formulary"
//! db = "/opt/formulary/receipts.db"
//! formulas = "/opt/formulary/formulas"
//!
//! [build]
//! jobs = 8
//! timeout_secs = 3600   # 0 disables the per-command timeout
//! keep_scratch = false
//!
//! [livecheck]
//! github_api_base = "https://api.github.com"
//! ```
//!
//! Command-line flags are applied on top by the binary.

use crate::error::{Error, Result};
use crate::formula::livecheck::GITHUB_API_BASE;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default per-command timeout
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(3600);

/// Resolved runtime configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Cellar root; kegs live at `<prefix>/<name>/<version>`
    pub prefix: PathBuf,
    /// Verified download cache
    pub cache_dir: PathBuf,
    /// Receipt database
    pub db_path: PathBuf,
    /// Directory of `<name>.toml` formulas
    pub formula_dir: PathBuf,
    /// Per-command timeout; `None` waits forever
    pub command_timeout: Option<Duration>,
    /// Parallel jobs handed to build tools
    pub jobs: usize,
    /// Keep scratch directories after the run
    pub keep_scratch: bool,
    pub github_api_base: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("formulary");
        let cache = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("formulary");
        let jobs = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4);

        Self {
            prefix: data.join("cellar"),
            cache_dir: cache.join("sources"),
            db_path: data.join("receipts.db"),
            formula_dir: data.join("formulas"),
            command_timeout: Some(DEFAULT_COMMAND_TIMEOUT),
            jobs,
            keep_scratch: false,
            github_api_base: GITHUB_API_BASE.to_string(),
        }
    }
}

impl EngineConfig {
    /// Configuration rooted at one directory, used for self-contained setups
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            prefix: root.join("cellar"),
            cache_dir: root.join("cache"),
            db_path: root.join("receipts.db"),
            formula_dir: root.join("formulas"),
            ..Self::default()
        }
    }

    /// Defaults overlaid with a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let file: ConfigFile = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid config {}: {e}", path.display())))?;

        let mut config = Self::default();
        file.apply(&mut config);
        Ok(config)
    }

    /// Keg prefix for one formula version
    pub fn keg_prefix(&self, name: &str, version: &str) -> PathBuf {
        self.prefix.join(name).join(version)
    }
}

/// On-disk configuration file
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub build: BuildSection,
    #[serde(default)]
    pub livecheck: LivecheckSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsSection {
    pub prefix: Option<PathBuf>,
    pub cache: Option<PathBuf>,
    pub db: Option<PathBuf>,
    pub formulas: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildSection {
    pub jobs: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub keep_scratch: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LivecheckSection {
    pub github_api_base: Option<String>,
}

impl ConfigFile {
    fn apply(self, config: &mut EngineConfig) {
        if let Some(prefix) = self.paths.prefix {
            config.prefix = prefix;
        }
        if let Some(cache) = self.paths.cache {
            config.cache_dir = cache;
        }
        if let Some(db) = self.paths.db {
            config.db_path = db;
        }
        if let Some(formulas) = self.paths.formulas {
            config.formula_dir = formulas;
        }
        if let Some(jobs) = self.build.jobs {
            config.jobs = jobs.max(1);
        }
        if let Some(secs) = self.build.timeout_secs {
            config.command_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(keep) = self.build.keep_scratch {
            config.keep_scratch = keep;
        }
        if let Some(base) = self.livecheck.github_api_base {
            config.github_api_base = base;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.prefix.ends_with("formulary/cellar"));
        assert!(config.jobs >= 1);
        assert_eq!(config.command_timeout, Some(DEFAULT_COMMAND_TIMEOUT));
        assert_eq!(
            config.keg_prefix("jsoncpp", "1.9.6"),
            config.prefix.join("jsoncpp/1.9.6")
        );
    }

    #[test]
    fn test_load_overrides() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("formulary.toml");
        std::fs::write(
            &path,
            r#"
[paths]
prefix = "/opt/cellar"

[build]
jobs = 2
timeout_secs = 0
"#,
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.prefix, PathBuf::from("/opt/cellar"));
        assert_eq!(config.jobs, 2);
        assert_eq!(config.command_timeout, None);
        assert_eq!(config.github_api_base, GITHUB_API_BASE);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.toml");
        std::fs::write(&path, "[build]\nthreads = 4\n").unwrap();
        assert!(matches!(EngineConfig::load(&path), Err(Error::Config(_))));
    }
}
