// src/formula/parser.rs

//! Formula file parsing and validation

use crate::error::{Error, Result};
use crate::formula::format::{Formula, LivecheckStrategy, RequirementKind, is_contained_relative};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use tracing::warn;

/// Parse a formula from a TOML string
pub fn parse_formula(content: &str) -> Result<Formula> {
    let formula: Formula = toml::from_str(content).map_err(|e| Error::InvalidFormula {
        name: "<unparsed>".to_string(),
        reason: e.to_string(),
    })?;
    validate_formula(&formula)?;
    Ok(formula)
}

/// Parse a formula from a file
pub fn parse_formula_file(path: &Path) -> Result<Formula> {
    let content = std::fs::read_to_string(path)?;
    let formula: Formula = toml::from_str(&content).map_err(|e| Error::InvalidFormula {
        name: path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        reason: e.to_string(),
    })?;
    for warning in validate_formula(&formula)? {
        warn!("{}: {}", path.display(), warning);
    }
    Ok(formula)
}

/// Validate a formula, returning non-fatal warnings
///
/// Hard errors: empty name, underivable version, self-requirement, duplicate
/// requirement names, test files escaping the test directory, an invalid
/// livecheck regex or a regex-based strategy without one.
pub fn validate_formula(formula: &Formula) -> Result<Vec<String>> {
    let invalid = |reason: String| Error::InvalidFormula {
        name: formula.name.clone(),
        reason,
    };
    let mut warnings = Vec::new();

    if formula.name.trim().is_empty() {
        return Err(invalid("formula name cannot be empty".to_string()));
    }
    formula.require_version()?;

    let mut seen = HashSet::new();
    for req in &formula.requirements {
        if req.name == formula.name {
            return Err(invalid("formula requires itself".to_string()));
        }
        if !seen.insert(req.name.as_str()) {
            return Err(invalid(format!("requirement '{}' declared twice", req.name)));
        }
    }

    if let Some(test) = &formula.test {
        for path in test.files.keys() {
            if !is_contained_relative(Path::new(path)) {
                return Err(invalid(format!("test file '{path}' escapes the test directory")));
            }
        }
        if test.commands.is_empty() {
            warnings.push("Test stage declares no commands".to_string());
        }
        if test.commands.iter().any(|c| c.0.is_empty()) {
            return Err(invalid("test stage contains an empty command".to_string()));
        }
    } else if formula
        .requirements_of(&[RequirementKind::Test])
        .next()
        .is_some()
    {
        warnings.push("Test requirements declared without a test stage".to_string());
    }

    if formula.install.commands.iter().any(|c| c.0.is_empty()) {
        return Err(invalid("install stage contains an empty command".to_string()));
    }

    if let Some(livecheck) = &formula.livecheck {
        if let Some(pattern) = &livecheck.regex {
            Regex::new(pattern).map_err(|e| invalid(format!("invalid livecheck regex: {e}")))?;
        } else if livecheck.strategy == LivecheckStrategy::PageMatch {
            return Err(invalid("page_match livecheck requires a regex".to_string()));
        }
    }

    // Warn about missing metadata
    if formula.desc.is_none() {
        warnings.push("Missing formula description".to_string());
    }
    if formula.license.is_none() {
        warnings.push("Missing formula license".to_string());
    }
    if formula.install.commands.is_empty() {
        warnings.push("Install stage declares no commands".to_string());
    }

    Ok(warnings)
}
