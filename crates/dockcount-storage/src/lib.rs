//! Raw report-page archive + polite HTTP fetch utilities for Dock Count.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "dockcount-storage";

#[derive(Debug, Clone)]
pub struct ArchivedPage {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Hash-addressed, write-once store for fetched report pages. Every body is kept
/// so a phantom or misdated ingestion can be traced back to what the source
/// actually served.
#[derive(Debug, Clone)]
pub struct PageArchive {
    root: PathBuf,
}

impl PageArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// `<report_date>/<fetch stamp>_<hash>.html`
    pub fn page_relative_path(
        &self,
        report_date: NaiveDate,
        fetched_at: DateTime<Utc>,
        content_hash: &str,
    ) -> PathBuf {
        let stamp = fetched_at.format("%Y%m%dT%H%M%S");
        PathBuf::from(report_date.format("%Y-%m-%d").to_string())
            .join(format!("{stamp}_{content_hash}.html"))
    }

    /// Stores a page body, skipping the write when an identical body for the
    /// same fetch stamp is already present.
    pub async fn store_page(
        &self,
        report_date: NaiveDate,
        fetched_at: DateTime<Utc>,
        bytes: &[u8],
    ) -> anyhow::Result<ArchivedPage> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path = self.page_relative_path(report_date, fetched_at, &content_hash);
        let absolute_path = self.root.join(&relative_path);
        let mut archived = ArchivedPage {
            content_hash,
            relative_path,
            absolute_path,
            byte_size: bytes.len(),
            deduplicated: false,
        };

        let Some(parent) = archived.absolute_path.parent().map(Path::to_path_buf) else {
            anyhow::bail!("archive path {} has no parent", archived.absolute_path.display());
        };
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating archive directory {}", parent.display()))?;

        if fs::try_exists(&archived.absolute_path)
            .await
            .with_context(|| format!("checking archive path {}", archived.absolute_path.display()))?
        {
            archived.deduplicated = true;
            return Ok(archived);
        }

        archived.deduplicated = write_once(&parent, &archived.absolute_path, bytes).await?;
        Ok(archived)
    }
}

/// Writes via a temp file + rename. Returns `true` when another writer won the
/// race and the destination already existed.
async fn write_once(dir: &Path, dest: &Path, bytes: &[u8]) -> anyhow::Result<bool> {
    let temp_path = dir.join(format!(".{}.partial", Uuid::new_v4()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp page file {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp page file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp page file {}", temp_path.display()))?;
    drop(file);

    match fs::rename(&temp_path, dest).await {
        Ok(()) => Ok(false),
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
            let _ = fs::remove_file(&temp_path).await;
            Ok(true)
        }
        Err(err) => {
            let _ = fs::remove_file(&temp_path).await;
            Err(err).with_context(|| {
                format!("renaming {} -> {}", temp_path.display(), dest.display())
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Bounded retry with capped exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the zero-based failed attempt `attempt_index`.
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = u32::try_from(attempt_index)
            .ok()
            .and_then(|shift| 1u32.checked_shl(shift))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub fn attempts(&self) -> usize {
        self.max_attempts.max(1)
    }
}

/// Enforces a minimum interval between consecutive outbound requests.
#[derive(Debug)]
pub struct RequestPacer {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    /// Sleeps until the interval since the previous turn has elapsed, then
    /// claims the next turn.
    pub async fn wait_turn(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let pause = self.min_interval - elapsed;
                debug!(pause_ms = pause.as_millis() as u64, "pacing next request");
                tokio::time::sleep(pause).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub retry: RetryPolicy,
    pub min_request_interval: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            retry: RetryPolicy::default(),
            min_request_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
    pub attempts: usize,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed after {attempts} attempt(s): {source}")]
    Request {
        url: String,
        attempts: usize,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url} after {attempts} attempt(s)")]
    HttpStatus {
        status: u16,
        url: String,
        attempts: usize,
    },
    #[error("reading response body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Sequential, paced HTTP client for report pages.
#[derive(Debug)]
pub struct ReportHttpClient {
    client: reqwest::Client,
    retry: RetryPolicy,
    pacer: RequestPacer,
}

impl ReportHttpClient {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            retry: config.retry,
            pacer: RequestPacer::new(config.min_request_interval),
        })
    }

    pub async fn get(&self, url: &str) -> Result<FetchedBody, FetchError> {
        self.pacer.wait_turn().await;
        let span = info_span!("http_fetch", url);
        self.get_with_retry(url).instrument(span).await
    }

    async fn get_with_retry(&self, url: &str) -> Result<FetchedBody, FetchError> {
        let attempts = self.retry.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let last_attempt = attempt >= attempts;

            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();
                    if status.is_success() {
                        let body = resp
                            .bytes()
                            .await
                            .map_err(|source| FetchError::Body {
                                url: final_url.clone(),
                                source,
                            })?
                            .to_vec();
                        return Ok(FetchedBody {
                            status,
                            final_url,
                            body,
                            attempts: attempt,
                        });
                    }

                    if classify_status(status) == RetryDisposition::NonRetryable || last_attempt {
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: final_url,
                            attempts: attempt,
                        });
                    }
                    warn!(attempt, status = status.as_u16(), "transient http status; retrying");
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::NonRetryable || last_attempt {
                        return Err(FetchError::Request {
                            url: url.to_string(),
                            attempts: attempt,
                            source: err,
                        });
                    }
                    warn!(attempt, error = %err, "transient request failure; retrying");
                }
            }

            tokio::time::sleep(self.retry.delay_for_attempt(attempt - 1)).await;
        }
    }
}
