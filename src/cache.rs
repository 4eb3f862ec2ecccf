// src/cache.rs

//! Content-addressed source cache
//!
//! Verified downloads are kept under `<cache>/<algo>_<hex>`. A hit is
//! verified again before use; an entry that no longer matches its name is
//! deleted and fetched afresh. Nothing reaches the cache before it has
//! passed verification.

use crate::error::Result;
use crate::fetch::Fetcher;
use crate::hash::Digest;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct SourceCache {
    root: PathBuf,
}

impl SourceCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_path(&self, digest: &Digest) -> PathBuf {
        self.root.join(digest.cache_key())
    }

    /// Verified cached bytes for `digest`, if present and intact
    pub fn get(&self, digest: &Digest) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(digest);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if digest.verify(&path.to_string_lossy(), &data).is_err() {
            warn!("Cached entry {} is corrupt, discarding", path.display());
            fs::remove_file(&path)?;
            return Ok(None);
        }

        debug!("Using cached source: {}", path.display());
        Ok(Some(data))
    }

    /// Store bytes that have already been verified against `digest`
    pub fn put(&self, digest: &Digest, data: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)?;
        let path = self.entry_path(digest);

        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(data)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(path)
    }

    /// Cached bytes, or fetch, verify and cache them
    ///
    /// A checksum mismatch on freshly fetched bytes is returned as-is and
    /// nothing is written.
    pub fn fetch_verified(&self, fetcher: &dyn Fetcher, url: &str, digest: &Digest) -> Result<Vec<u8>> {
        if let Some(data) = self.get(digest)? {
            return Ok(data);
        }

        let data = fetcher.fetch(url)?;
        digest.verify(url, &data)?;
        self.put(digest, &data)?;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::hash::{HashAlgorithm, sha256};
    use parking_lot::Mutex;
    use tempfile::TempDir;

    struct CountingFetcher {
        body: Vec<u8>,
        calls: Mutex<usize>,
    }

    impl Fetcher for CountingFetcher {
        fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
            *self.calls.lock() += 1;
            Ok(self.body.clone())
        }
    }

    fn fetcher(body: &[u8]) -> CountingFetcher {
        CountingFetcher {
            body: body.to_vec(),
            calls: Mutex::new(0),
        }
    }

    #[test]
    fn test_fetch_then_hit() {
        let tmp = TempDir::new().unwrap();
        let cache = SourceCache::new(tmp.path());
        let digest = Digest::parse(&sha256(b"source")).unwrap();
        let fetcher = fetcher(b"source");

        assert_eq!(cache.fetch_verified(&fetcher, "u", &digest).unwrap(), b"source");
        assert_eq!(cache.fetch_verified(&fetcher, "u", &digest).unwrap(), b"source");
        assert_eq!(*fetcher.calls.lock(), 1);
        assert!(cache.entry_path(&digest).is_file());
    }

    #[test]
    fn test_mismatch_is_not_cached() {
        let tmp = TempDir::new().unwrap();
        let cache = SourceCache::new(tmp.path());
        let digest = Digest::parse(&sha256(b"expected")).unwrap();

        let result = cache.fetch_verified(&fetcher(b"tampered"), "u", &digest);
        assert!(matches!(result, Err(Error::ChecksumMismatch { .. })));
        assert!(!cache.entry_path(&digest).exists());
    }

    #[test]
    fn test_corrupt_entry_is_refetched() {
        let tmp = TempDir::new().unwrap();
        let cache = SourceCache::new(tmp.path());
        let digest = Digest::compute(HashAlgorithm::Xxh128, b"good");
        fs::write(cache.entry_path(&digest), b"bitrot").unwrap();

        let fetcher = fetcher(b"good");
        assert_eq!(cache.fetch_verified(&fetcher, "u", &digest).unwrap(), b"good");
        assert_eq!(*fetcher.calls.lock(), 1);
        assert_eq!(fs::read(cache.entry_path(&digest)).unwrap(), b"good");
    }
}
