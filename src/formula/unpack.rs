// src/formula/unpack.rs

//! Source archive extraction
//!
//! Verified resource bytes are expanded into a source tree. Gzip and zstd
//! compressed tarballs and plain tarballs are recognised by their magic bytes
//! (falling back to the file extension); anything else is placed into the
//! tree verbatim under its file name, which covers single-file resources.

use crate::error::{Error, Result};
use crate::formula::format::is_contained_relative;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Archive layout of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    TarZst,
    Tar,
    /// Not an archive; copied as-is
    Plain,
}

impl ArchiveKind {
    /// Detect from content, using the file name only when the bytes are ambiguous
    pub fn detect(filename: &str, data: &[u8]) -> Self {
        if data.starts_with(&[0x1f, 0x8b]) {
            return Self::TarGz;
        }
        if data.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            return Self::TarZst;
        }
        if data.len() > 262 && &data[257..262] == b"ustar" {
            return Self::Tar;
        }

        let lower = filename.to_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Self::TarGz
        } else if lower.ends_with(".tar.zst") || lower.ends_with(".tzst") {
            Self::TarZst
        } else if lower.ends_with(".tar") {
            Self::Tar
        } else {
            Self::Plain
        }
    }
}

/// Expand `data` into `dest`, returning the root of the source tree
///
/// When the archive holds exactly one top-level directory, that directory is
/// the source root.
pub fn unpack(filename: &str, data: &[u8], dest: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dest)?;
    let kind = ArchiveKind::detect(filename, data);
    debug!("Unpacking {} ({:?}) into {}", filename, kind, dest.display());

    match kind {
        ArchiveKind::TarGz => extract_tar(flate2::read::GzDecoder::new(data), filename, dest)?,
        ArchiveKind::TarZst => {
            let decoder = zstd::Decoder::new(data).map_err(|e| archive_error(filename, e))?;
            extract_tar(decoder, filename, dest)?
        }
        ArchiveKind::Tar => extract_tar(data, filename, dest)?,
        ArchiveKind::Plain => {
            let name = Path::new(filename);
            if !is_contained_relative(name) || name.components().count() != 1 {
                return Err(archive_error(filename, "unsafe resource file name"));
            }
            fs::write(dest.join(name), data)?;
            return Ok(dest.to_path_buf());
        }
    }

    // Archives conventionally wrap their sources in one directory
    let entries: Vec<_> = fs::read_dir(dest)?.filter_map(|e| e.ok()).collect();
    if entries.len() == 1 && entries[0].file_type().map(|t| t.is_dir()).unwrap_or(false) {
        let root = entries[0].path();
        debug!("Source directory: {}", root.display());
        return Ok(root);
    }

    Ok(dest.to_path_buf())
}

fn extract_tar<R: Read>(reader: R, filename: &str, dest: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);

    let entries = archive.entries().map_err(|e| archive_error(filename, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| archive_error(filename, e))?;
        let path = entry
            .path()
            .map_err(|e| archive_error(filename, e))?
            .into_owned();

        if path.as_os_str().is_empty() || path == Path::new(".") || path == Path::new("./") {
            continue;
        }
        if !is_contained_relative(&path) {
            return Err(archive_error(
                filename,
                format!("entry '{}' escapes the source tree", path.display()),
            ));
        }

        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| archive_error(filename, e))?;
        if !unpacked {
            return Err(archive_error(
                filename,
                format!("entry '{}' escapes the source tree", path.display()),
            ));
        }
    }

    Ok(())
}

fn archive_error(filename: &str, reason: impl ToString) -> Error {
    Error::Archive {
        path: PathBuf::from(filename),
        reason: reason.to_string(),
    }
}
