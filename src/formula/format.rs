// src/formula/format.rs

//! Formula data model
//!
//! A formula is passive data: where the source lives and what it hashes to,
//! which patches to apply, what it requires, and the commands for its
//! `install` and `test` stages. Formulas are stored as TOML and shared as
//! `Arc<Formula>`; nothing in the engine mutates them after loading.

use crate::error::{Error, Result};
use crate::hash::Digest;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Component, Path};
use std::sync::LazyLock;

/// A complete formula
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formula {
    /// Formula name (index key)
    pub name: String,

    /// One-line description
    #[serde(default)]
    pub desc: Option<String>,

    /// Project homepage
    #[serde(default)]
    pub homepage: Option<String>,

    /// License identifier (SPDX)
    #[serde(default)]
    pub license: Option<String>,

    /// Explicit version; derived from the resource URL when absent
    #[serde(default)]
    pub version: Option<String>,

    /// Development repository (informational only, never built)
    #[serde(default)]
    pub head: Option<HeadSpec>,

    /// Primary source archive
    pub resource: Resource,

    /// Patches applied in declaration order
    #[serde(default)]
    pub patches: Vec<Patch>,

    /// Requirements on other formulas
    #[serde(default)]
    pub requirements: Vec<Requirement>,

    /// Install stage
    #[serde(default)]
    pub install: Procedure,

    /// Test stage (optional)
    #[serde(default)]
    pub test: Option<TestProcedure>,

    /// Upstream version probe
    #[serde(default)]
    pub livecheck: Option<LivecheckSpec>,

    /// Environment merged into every stage
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Custom `%(name)s` placeholders
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

/// Downloadable, digest-verified artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub url: String,
    #[serde(alias = "sha256")]
    pub digest: Digest,
}

/// External patch applied against the unpacked resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patch {
    pub url: String,
    #[serde(alias = "sha256")]
    pub digest: Digest,
    /// Leading path components to strip (`patch -p<strip>`)
    #[serde(default = "default_strip")]
    pub strip: usize,
}

fn default_strip() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadSpec {
    pub url: String,
    #[serde(default)]
    pub branch: Option<String>,
}

/// Lifecycle phase during which a requirement must be present
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequirementKind {
    /// Satisfied before the install stage
    Build,
    /// Satisfied before the test stage
    Test,
    /// Needed by the installed artifact itself
    Runtime,
}

impl RequirementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequirementKind::Build => "build",
            RequirementKind::Test => "test",
            RequirementKind::Runtime => "runtime",
        }
    }
}

impl fmt::Display for RequirementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: RequirementKind,
}

fn default_kind() -> RequirementKind {
    RequirementKind::Runtime
}

/// One external command as an argv list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Command(pub Vec<String>);

impl Command {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(argv.into_iter().map(Into::into).collect())
    }

    pub fn program(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

/// Ordered command list for one stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Procedure {
    #[serde(default)]
    pub commands: Vec<Command>,
}

/// Test stage: files written into a fresh test directory, then commands
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestProcedure {
    /// Relative path -> file content (placeholders substituted)
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    #[serde(default)]
    pub commands: Vec<Command>,
}

/// Which URL a livecheck strategy inspects
///
/// Written as `"stable"` (the resource URL), `"homepage"`, or a literal URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivecheckUrl {
    Stable,
    Homepage,
    Url(String),
}

impl Serialize for LivecheckUrl {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            LivecheckUrl::Stable => serializer.serialize_str("stable"),
            LivecheckUrl::Homepage => serializer.serialize_str("homepage"),
            LivecheckUrl::Url(url) => serializer.serialize_str(url),
        }
    }
}

impl<'de> Deserialize<'de> for LivecheckUrl {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "stable" => LivecheckUrl::Stable,
            "homepage" => LivecheckUrl::Homepage,
            _ => LivecheckUrl::Url(s),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivecheckStrategy {
    /// Latest GitHub release of the repository behind the URL
    GithubLatest,
    /// Highest version matched by `regex` in the page body
    PageMatch,
    /// Explicitly opted out
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivecheckSpec {
    #[serde(default = "default_livecheck_url")]
    pub url: LivecheckUrl,
    pub strategy: LivecheckStrategy,
    /// Version extraction regex; first capture group is the version
    #[serde(default)]
    pub regex: Option<String>,
}

fn default_livecheck_url() -> LivecheckUrl {
    LivecheckUrl::Stable
}

static URL_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[-_/v])(\d+(?:\.\d+)+)(?:\.tar\.\w+|\.tgz|\.tbz2?|\.txz|\.zip)?$")
        .expect("valid regex")
});

impl Formula {
    /// Declared version, or the one embedded in the resource URL
    pub fn version(&self) -> Option<String> {
        if let Some(version) = &self.version {
            return Some(version.clone());
        }
        let url = self.resource.url.split(['?', '#']).next().unwrap_or_default();
        let file = url.rsplit('/').next().unwrap_or_default();
        URL_VERSION
            .captures(file)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Version or an `InvalidFormula` error
    pub fn require_version(&self) -> Result<String> {
        self.version().ok_or_else(|| Error::InvalidFormula {
            name: self.name.clone(),
            reason: format!(
                "no version declared and none found in resource URL {}",
                self.resource.url
            ),
        })
    }

    /// Requirements of the given kinds, in declaration order
    pub fn requirements_of<'a>(
        &'a self,
        kinds: &'a [RequirementKind],
    ) -> impl Iterator<Item = &'a Requirement> + 'a {
        self.requirements.iter().filter(move |r| kinds.contains(&r.kind))
    }

    /// Archive file name from the resource URL
    pub fn archive_filename(&self) -> String {
        let path = self.resource.url.split(['?', '#']).next().unwrap_or_default();
        path.rsplit('/')
            .find(|s| !s.is_empty())
            .unwrap_or("source")
            .to_string()
    }
}

/// Values available to `%(name)s` placeholders in a stage
#[derive(Debug, Clone, Default)]
pub struct Substitutions {
    values: HashMap<String, String>,
}

impl Substitutions {
    pub fn new(formula: &Formula) -> Self {
        let mut values = formula.variables.clone();
        values.insert("name".to_string(), formula.name.clone());
        if let Some(version) = formula.version() {
            values.insert("version".to_string(), version);
        }
        Self { values }
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Replace every `%(key)s` in `template`
    pub fn substitute(&self, template: &str) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("%(") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find(")s") else {
                out.push_str(&rest[start..]);
                return Ok(out);
            };
            let key = &after[..end];
            let value = self
                .values
                .get(key)
                .ok_or_else(|| Error::UnknownVariable(key.to_string()))?;
            out.push_str(value);
            rest = &after[end + 2..];
        }

        out.push_str(rest);
        Ok(out)
    }

    /// Expand a command's argv
    ///
    /// An argument that is exactly `%(std_meson_args)s` or
    /// `%(std_cmake_args)s` expands into several arguments; everything else
    /// is substituted in place.
    pub fn expand(&self, command: &Command) -> Result<Vec<String>> {
        let mut argv = Vec::with_capacity(command.0.len());
        for arg in &command.0 {
            match arg.as_str() {
                "%(std_meson_args)s" => argv.extend(self.std_meson_args()?),
                "%(std_cmake_args)s" => argv.extend(self.std_cmake_args()?),
                _ => argv.push(self.substitute(arg)?),
            }
        }
        Ok(argv)
    }

    fn prefix(&self) -> Result<&str> {
        self.get("prefix")
            .ok_or_else(|| Error::UnknownVariable("prefix".to_string()))
    }

    fn std_meson_args(&self) -> Result<Vec<String>> {
        let prefix = self.prefix()?;
        Ok(vec![
            format!("--prefix={prefix}"),
            format!("--libdir={prefix}/lib"),
            "--buildtype=release".to_string(),
            "--wrap-mode=nofallback".to_string(),
        ])
    }

    fn std_cmake_args(&self) -> Result<Vec<String>> {
        let prefix = self.prefix()?;
        Ok(vec![
            format!("-DCMAKE_INSTALL_PREFIX={prefix}"),
            "-DCMAKE_INSTALL_LIBDIR=lib".to_string(),
            "-DCMAKE_BUILD_TYPE=Release".to_string(),
        ])
    }
}

/// Reject absolute paths and `..` so a relative path stays inside its root
pub fn is_contained_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
