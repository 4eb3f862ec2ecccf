// src/fetch.rs

//! Resource fetching
//!
//! The engine asks a [`Fetcher`] for bytes and verifies them itself; a
//! fetcher never judges content. [`HttpFetcher`] is the production
//! implementation: blocking reqwest with a bounded retry for transient
//! failures, plus `file://` URLs for local mirrors.

use crate::error::{Error, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Default timeout for HTTP requests
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Maximum attempts for one URL
const MAX_RETRIES: u32 = 3;

/// Base retry delay; attempt `n` waits `n` times this
const RETRY_DELAY_MS: u64 = 1000;

/// Source of raw bytes for a URL
pub trait Fetcher: Send + Sync {
    /// Retrieve the full body behind `url`; failures are [`Error::Fetch`]
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// HTTP(S) and `file://` fetcher with retry
pub struct HttpFetcher {
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("formulary/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_retries: MAX_RETRIES,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        })
    }

    /// Override the retry policy
    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    fn fetch_file(url: &Url) -> Result<Vec<u8>> {
        let path = url.to_file_path().map_err(|()| Error::Fetch {
            url: url.to_string(),
            reason: "not a local file path".to_string(),
        })?;
        std::fs::read(&path).map_err(|e| Error::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    fn fetch_http(&self, url: &str) -> std::result::Result<Vec<u8>, Attempt> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Attempt::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let reason = format!("HTTP {status}");
            return Err(if is_transient(status) {
                Attempt::Transient(reason)
            } else {
                Attempt::Fatal(reason)
            });
        }

        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| Attempt::Transient(format!("failed to read response: {e}")))
    }
}

enum Attempt {
    Transient(String),
    Fatal(String),
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let parsed = Url::parse(url).map_err(|e| Error::Fetch {
            url: url.to_string(),
            reason: format!("invalid URL: {e}"),
        })?;

        match parsed.scheme() {
            "file" => return Self::fetch_file(&parsed),
            "http" | "https" => {}
            other => {
                return Err(Error::Fetch {
                    url: url.to_string(),
                    reason: format!("unsupported scheme '{other}'"),
                });
            }
        }

        info!("Downloading {}", url);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fetch_http(url) {
                Ok(bytes) => {
                    debug!("Fetched {} bytes from {}", bytes.len(), url);
                    return Ok(bytes);
                }
                Err(Attempt::Fatal(reason)) => {
                    return Err(Error::Fetch {
                        url: url.to_string(),
                        reason,
                    });
                }
                Err(Attempt::Transient(reason)) => {
                    if attempt >= self.max_retries {
                        return Err(Error::Fetch {
                            url: url.to_string(),
                            reason: format!("{reason} (after {attempt} attempts)"),
                        });
                    }
                    warn!("Fetch attempt {} for {} failed: {}, retrying...", attempt, url, reason);
                    std::thread::sleep(self.retry_delay * attempt);
                }
            }
        }
    }
}
