// src/formula/livecheck.rs

//! Upstream version checks
//!
//! A livecheck only reads: it fetches release metadata or a page, extracts
//! a version token and compares it with the formula's version. It never
//! downloads the resource, touches a source tree or runs a command. Any
//! failure to determine the upstream version is [`Error::LivecheckUnavailable`];
//! it is never reported as "up to date".

use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::formula::format::{Formula, LivecheckStrategy, LivecheckUrl};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, info};
use url::Url;

/// Default GitHub REST endpoint
pub const GITHUB_API_BASE: &str = "https://api.github.com";

/// Version token pattern used when a formula declares none
pub const DEFAULT_VERSION_REGEX: &str = r"v?(\d+(?:\.\d+)+)";

/// Outcome of one livecheck
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LivecheckResult {
    pub formula: String,
    pub current: String,
    pub latest: String,
    pub outdated: bool,
}

#[derive(Deserialize)]
struct GithubRelease {
    tag_name: String,
}

/// Resolves upstream versions through a [`Fetcher`]
pub struct Livecheck<'a> {
    fetcher: &'a dyn Fetcher,
    github_api_base: String,
}

impl<'a> Livecheck<'a> {
    pub fn new(fetcher: &'a dyn Fetcher) -> Self {
        Self {
            fetcher,
            github_api_base: GITHUB_API_BASE.to_string(),
        }
    }

    pub fn with_github_api_base(mut self, base: impl Into<String>) -> Self {
        self.github_api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn check(&self, formula: &Formula) -> Result<LivecheckResult> {
        let unavailable = |reason: String| Error::LivecheckUnavailable {
            name: formula.name.clone(),
            reason,
        };

        let spec = formula
            .livecheck
            .as_ref()
            .filter(|l| l.strategy != LivecheckStrategy::None)
            .ok_or_else(|| unavailable("no livecheck strategy".to_string()))?;

        let current = formula.version().ok_or_else(|| {
            unavailable("formula has no version to compare against".to_string())
        })?;

        let target = match &spec.url {
            LivecheckUrl::Stable => formula.resource.url.clone(),
            LivecheckUrl::Homepage => formula
                .homepage
                .clone()
                .ok_or_else(|| unavailable("livecheck uses homepage but none is declared".to_string()))?,
            LivecheckUrl::Url(url) => url.clone(),
        };

        let pattern = spec.regex.as_deref().unwrap_or(DEFAULT_VERSION_REGEX);
        let regex = Regex::new(pattern).map_err(|e| unavailable(format!("invalid regex: {e}")))?;

        let latest = match spec.strategy {
            LivecheckStrategy::GithubLatest => {
                let (owner, repo) = github_repository(&target).ok_or_else(|| {
                    unavailable(format!("{target} is not a GitHub repository URL"))
                })?;
                let api = format!("{}/repos/{owner}/{repo}/releases/latest", self.github_api_base);
                debug!("Querying {}", api);

                let body = self
                    .fetcher
                    .fetch(&api)
                    .map_err(|e| unavailable(e.to_string()))?;
                let release: GithubRelease = serde_json::from_slice(&body)
                    .map_err(|e| unavailable(format!("unexpected response from {api}: {e}")))?;

                extract_version(&regex, &release.tag_name).ok_or_else(|| {
                    unavailable(format!("no version in release tag '{}'", release.tag_name))
                })?
            }
            LivecheckStrategy::PageMatch => {
                let body = self
                    .fetcher
                    .fetch(&target)
                    .map_err(|e| unavailable(e.to_string()))?;
                let page = String::from_utf8_lossy(&body);

                regex
                    .captures_iter(&page)
                    .filter_map(|caps| caps.get(1).or_else(|| caps.get(0)))
                    .map(|m| m.as_str().to_string())
                    .max_by(|a, b| compare_versions(a, b))
                    .ok_or_else(|| unavailable(format!("no version matched on {target}")))?
            }
            LivecheckStrategy::None => return Err(unavailable("no livecheck strategy".to_string())),
        };

        let outdated = is_newer(&latest, &current);
        info!(
            "{}: current {}, latest {}{}",
            formula.name,
            current,
            latest,
            if outdated { " (outdated)" } else { "" }
        );

        Ok(LivecheckResult {
            formula: formula.name.clone(),
            current,
            latest,
            outdated,
        })
    }
}

/// `(owner, repo)` for a github.com URL
pub fn github_repository(url: &str) -> Option<(String, String)> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    if host != "github.com" && host != "www.github.com" {
        return None;
    }

    let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());
    let owner = segments.next()?;
    let repo = segments.next()?;
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    Some((owner.to_string(), repo.to_string()))
}

fn extract_version(regex: &Regex, text: &str) -> Option<String> {
    let caps = regex.captures(text)?;
    caps.get(1)
        .or_else(|| caps.get(0))
        .map(|m| m.as_str().to_string())
}

/// Numeric dotted version, padded to semver when it has at most three parts
fn lenient_semver(version: &str) -> Option<semver::Version> {
    if let Ok(v) = semver::Version::parse(version) {
        return Some(v);
    }
    let parts: Vec<u64> = version
        .split('.')
        .map(|p| p.parse().ok())
        .collect::<Option<_>>()?;
    match parts.as_slice() {
        [major] => Some(semver::Version::new(*major, 0, 0)),
        [major, minor] => Some(semver::Version::new(*major, *minor, 0)),
        [major, minor, patch] => Some(semver::Version::new(*major, *minor, *patch)),
        _ => None,
    }
}

fn numeric_parts(version: &str) -> Option<Vec<u64>> {
    version.split('.').map(|p| p.parse().ok()).collect()
}

/// Order two version tokens
///
/// Semver when both sides parse (leniently), component-wise numeric when both
/// are dotted numbers, plain string order otherwise.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    if let (Some(a), Some(b)) = (lenient_semver(a), lenient_semver(b)) {
        return a.cmp(&b);
    }
    if let (Some(a), Some(b)) = (numeric_parts(a), numeric_parts(b)) {
        return a.cmp(&b);
    }
    a.cmp(b)
}

/// Whether `latest` is newer than `current`
///
/// Versions that cannot be compared numerically are outdated whenever they
/// differ.
pub fn is_newer(latest: &str, current: &str) -> bool {
    let comparable = (lenient_semver(latest).is_some() || numeric_parts(latest).is_some())
        && (lenient_semver(current).is_some() || numeric_parts(current).is_some());
    if comparable {
        compare_versions(latest, current) == Ordering::Greater
    } else {
        latest != current
    }
}
