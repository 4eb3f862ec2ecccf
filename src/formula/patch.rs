// src/formula/patch.rs

//! Copy-on-write patch application
//!
//! Patches are applied to a scratch copy of the pristine source tree. Only
//! when every patch has applied is the scratch copy renamed over the
//! pristine tree; on any failure the scratch copy is dropped and the tree a
//! later stage would see is byte-for-byte what was unpacked.
//!
//! Patches are unified diffs as produced by `diff -u` or `git format-patch`.
//! A patch may touch several files and may create or delete them through
//! `/dev/null`. Hunk text is applied with `diffy`; this module splits a
//! multi-file patch into per-file sections, strips the leading path
//! components (`patch -p<strip>`), and refuses paths that leave the tree.

use crate::error::{Error, Result};
use crate::formula::format::is_contained_relative;
use regex::Regex;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Patch bytes that have already passed checksum verification
#[derive(Debug, Clone)]
pub struct VerifiedPatch {
    pub url: String,
    pub strip: usize,
    pub content: Vec<u8>,
}

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("valid regex")
});

/// One file's worth of a unified diff
#[derive(Debug)]
struct FileSection {
    old: Option<String>,
    new: Option<String>,
    /// Hunk headers and bodies, newline terminated
    hunks: Vec<String>,
}

/// Apply `patches` in order to the tree at `source`
///
/// On error the tree at `source` is unchanged and the error names the
/// position of the offending patch in `patches`.
pub fn apply_patches(source: &Path, patches: &[VerifiedPatch]) -> Result<()> {
    if patches.is_empty() {
        return Ok(());
    }

    let parent = source.parent().ok_or_else(|| Error::Archive {
        path: source.to_path_buf(),
        reason: "source tree has no parent directory".to_string(),
    })?;

    // Same filesystem as the source so publishing is a rename
    let scratch = tempfile::Builder::new()
        .prefix(".patching-")
        .tempdir_in(parent)?;
    let work = scratch.path().join("tree");
    copy_tree(source, &work)?;

    for (index, patch) in patches.iter().enumerate() {
        info!("Applying patch #{}: {}", index, patch.url);
        apply_one(&work, patch).map_err(|reason| Error::PatchApplicationFailed {
            index,
            url: patch.url.clone(),
            reason,
        })?;
    }

    let retired = scratch.path().join("pristine");
    fs::rename(source, &retired)?;
    if let Err(e) = fs::rename(&work, source) {
        fs::rename(&retired, source)?;
        return Err(e.into());
    }
    debug!("Published patched tree at {}", source.display());

    Ok(())
}

fn apply_one(root: &Path, patch: &VerifiedPatch) -> std::result::Result<(), String> {
    let text = std::str::from_utf8(&patch.content).map_err(|_| "patch is not UTF-8".to_string())?;
    let sections = split_sections(text)?;

    for section in &sections {
        match (&section.old, &section.new) {
            (None, None) => return Err("both sides of a file header are /dev/null".to_string()),
            (None, Some(new)) => {
                let path = contained_target(root, new, patch.strip)?;
                if fs::symlink_metadata(&path).is_ok() {
                    return Err(format!("{new}: file to be created already exists"));
                }
                if let Some(dir) = path.parent() {
                    fs::create_dir_all(dir).map_err(|e| format!("{new}: {e}"))?;
                }
                fs::write(&path, created_content(&section.hunks))
                    .map_err(|e| format!("{new}: {e}"))?;
            }
            (Some(old), None) => {
                let path = contained_target(root, old, patch.strip)?;
                if !fs::symlink_metadata(&path).is_ok_and(|m| m.is_file()) {
                    return Err(format!("{old}: file to be deleted does not exist"));
                }
                fs::remove_file(&path).map_err(|e| format!("{old}: {e}"))?;
            }
            (Some(old), Some(new)) => {
                let path = contained_target(root, new, patch.strip)?;
                let base = fs::read_to_string(&path).map_err(|e| format!("{new}: {e}"))?;

                let mut diff = format!("--- {old}\n+++ {new}\n");
                for hunk in &section.hunks {
                    diff.push_str(hunk);
                }
                let parsed = diffy::Patch::from_str(&diff).map_err(|e| format!("{new}: {e}"))?;
                let patched = diffy::apply(&base, &parsed).map_err(|e| format!("{new}: {e}"))?;
                fs::write(&path, patched).map_err(|e| format!("{new}: {e}"))?;
            }
        }
    }

    Ok(())
}

/// Split a (possibly multi-file, possibly mailbox-wrapped) diff into sections
///
/// Lines outside hunks (`diff --git`, `index`, commit message, signature)
/// are skipped. Hunk bodies are read by their declared line counts so that
/// trailing text is never mistaken for hunk content.
fn split_sections(text: &str) -> std::result::Result<Vec<FileSection>, String> {
    // Line endings are kept so CRLF sources still match their context
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let mut sections = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if line.starts_with("GIT binary patch") {
            return Err("binary patches are not supported".to_string());
        }
        if !(line.starts_with("--- ") && lines.get(i + 1).is_some_and(|l| l.starts_with("+++ "))) {
            i += 1;
            continue;
        }

        let old = header_path(&line[4..]);
        let new = header_path(&lines[i + 1][4..]);
        i += 2;

        let mut hunks = Vec::new();
        while let Some(header) = lines.get(i).filter(|l| l.starts_with("@@ ")) {
            let caps = HUNK_HEADER
                .captures(header)
                .ok_or_else(|| format!("malformed hunk header '{}'", header.trim_end()))?;
            let count = |n: usize| {
                caps.get(n)
                    .map_or(Ok(1), |m| m.as_str().parse::<usize>())
                    .map_err(|e| e.to_string())
            };
            let mut old_left = count(2)?;
            let mut new_left = count(4)?;

            let mut hunk = format!("{}\n", header.trim_end());
            i += 1;
            while old_left > 0 || new_left > 0 {
                let Some(&body) = lines.get(i) else {
                    return Err("patch ends inside a hunk".to_string());
                };
                let content = body.trim_end_matches(['\r', '\n']);
                match content.chars().next() {
                    // Some tools drop the space on blank context lines
                    None => {
                        hunk.push(' ');
                        push_line(&mut hunk, &body[content.len()..]);
                        old_left = old_left.saturating_sub(1);
                        new_left = new_left.saturating_sub(1);
                        i += 1;
                        continue;
                    }
                    Some(' ') => {
                        old_left = old_left.saturating_sub(1);
                        new_left = new_left.saturating_sub(1);
                    }
                    Some('-') => old_left = old_left.saturating_sub(1),
                    Some('+') => new_left = new_left.saturating_sub(1),
                    Some('\\') => {}
                    Some(_) => return Err(format!("malformed hunk line '{content}'")),
                }
                push_line(&mut hunk, body);
                i += 1;
            }
            if let Some(marker) = lines.get(i).filter(|l| l.starts_with('\\')) {
                push_line(&mut hunk, marker.trim_end());
                i += 1;
            }
            hunks.push(hunk);
        }

        if hunks.is_empty() {
            return Err(format!(
                "no hunks for {}",
                new.as_deref().or(old.as_deref()).unwrap_or("/dev/null")
            ));
        }
        sections.push(FileSection { old, new, hunks });
    }

    if sections.is_empty() {
        return Err("no file changes found".to_string());
    }
    Ok(sections)
}

/// Append `line` with its own ending, adding `\n` when it has none
fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    if !line.ends_with('\n') {
        out.push('\n');
    }
}

/// Path from a `---`/`+++` header, `None` for `/dev/null`
fn header_path(raw: &str) -> Option<String> {
    let path = raw.split('\t').next().unwrap_or(raw).trim_end();
    if path == "/dev/null" {
        None
    } else {
        Some(path.to_string())
    }
}

fn strip_path(raw: &str, strip: usize) -> std::result::Result<PathBuf, String> {
    let components: Vec<Component> = Path::new(raw).components().collect();
    if components.len() <= strip {
        return Err(format!("cannot strip {strip} components from '{raw}'"));
    }
    let rest: PathBuf = components[strip..].iter().collect();
    if !is_contained_relative(&rest) {
        return Err(format!("'{raw}' escapes the source tree"));
    }
    Ok(rest)
}

/// Target of a file header under `root`
///
/// Every existing component of the path must be a plain file or directory;
/// a symlink anywhere along it is refused, so writes cannot be redirected
/// outside the tree.
fn contained_target(root: &Path, raw: &str, strip: usize) -> std::result::Result<PathBuf, String> {
    let relative = strip_path(raw, strip)?;
    let real_root = root
        .canonicalize()
        .map_err(|e| format!("{}: {e}", root.display()))?;

    let mut current = root.to_path_buf();
    for component in relative.components() {
        current.push(component);
        let Ok(meta) = fs::symlink_metadata(&current) else {
            // Missing from here on; created fresh under a checked parent
            break;
        };
        if meta.file_type().is_symlink() {
            return Err(format!("'{raw}' passes through a symlink"));
        }
    }

    let path = root.join(&relative);
    if let Some(parent) = path.parent()
        && let Ok(real_parent) = parent.canonicalize()
        && !real_parent.starts_with(&real_root)
    {
        return Err(format!("'{raw}' escapes the source tree"));
    }
    Ok(path)
}

fn created_content(hunks: &[String]) -> String {
    let mut out = String::new();
    for hunk in hunks {
        for line in hunk.split_inclusive('\n').skip(1) {
            if let Some(added) = line.strip_prefix('+') {
                out.push_str(added);
            } else if line.starts_with('\\') && out.ends_with('\n') {
                out.pop();
            }
        }
    }
    out
}

/// Recursive copy preserving symlinks
fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(std::io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let target = to.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(&link, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
