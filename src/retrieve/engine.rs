//! Dataset retrieval engine.
//!
//! Downloads data products from the archive dataportal, skipping files that
//! are already present unless a continuation is forced, optionally pulling
//! in associated calibration files first, and inflating compressed products
//! after download. Individual file failures are logged and skipped so one
//! revoked dataset does not sink a batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_DISPOSITION, RETRY_AFTER};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, error, info, instrument, warn};

use super::calselector::{CalSelectorClient, CalibScope};
use super::error::RetrieveError;
use super::filename::filename_from_content_disposition;
use super::pacing::{RequestPacer, parse_retry_after};
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
use super::unzip::{inflated_path, unpack_products};

/// CalSelector requests are batched to keep request bodies reasonable.
const CALSELECTOR_BATCH_SIZE: usize = 100;

/// Default spacing between consecutive dataportal requests.
const DEFAULT_PACING: Duration = Duration::from_millis(250);

/// Options for a retrieval run.
#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    /// Where files are written. Defaults to the engine's fallback
    /// destination (the cache directory).
    pub destination: Option<PathBuf>,
    /// Force re-download of files already present at the destination.
    pub continuation: bool,
    /// Also retrieve associated calibration files.
    pub with_calib: Option<CalibScope>,
    /// Inflate compressed products after download. Enabled by default in
    /// [`RetrievalOptions::new`].
    pub unzip: bool,
    /// Save the CalSelector association trees next to the data.
    pub save_xml: bool,
}

impl RetrievalOptions {
    /// Default options: no continuation, no calibrations, unzip enabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            destination: None,
            continuation: false,
            with_calib: None,
            unzip: true,
            save_xml: false,
        }
    }
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a retrieval run.
#[derive(Debug, Default)]
pub struct RetrievalOutcome {
    /// Local paths of all files now present (downloaded or pre-existing).
    pub files: Vec<PathBuf>,
    /// How many files were actually transferred.
    pub downloaded: usize,
    /// How many files were already present and skipped.
    pub skipped: usize,
    /// How many files failed and were left out of `files`.
    pub failed: usize,
}

/// Engine that retrieves data products from the archive.
#[derive(Debug)]
pub struct RetrievalEngine {
    client: Client,
    download_url: String,
    calselector: CalSelectorClient,
    retry_policy: RetryPolicy,
    pacer: Arc<RequestPacer>,
    fallback_destination: PathBuf,
}

impl RetrievalEngine {
    /// Creates an engine downloading from `download_url` (the dataset id is
    /// appended) with calibration lookups against `calselector_url`.
    #[must_use]
    pub fn new(
        client: Client,
        download_url: impl Into<String>,
        calselector_url: impl Into<String>,
        fallback_destination: impl Into<PathBuf>,
    ) -> Self {
        let calselector = CalSelectorClient::new(client.clone(), calselector_url);
        Self {
            client,
            download_url: download_url.into(),
            calselector,
            retry_policy: RetryPolicy::default(),
            pacer: Arc::new(RequestPacer::new(DEFAULT_PACING)),
            fallback_destination: fallback_destination.into(),
        }
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Replaces the request pacer.
    #[must_use]
    pub fn with_pacer(mut self, pacer: Arc<RequestPacer>) -> Self {
        self.pacer = pacer;
        self
    }

    /// Retrieves `datasets`, returning the local paths of everything that
    /// is now present.
    ///
    /// Per-file failures are logged and counted, not propagated; the
    /// returned error covers only conditions that sink the whole run (an
    /// unusable destination directory).
    ///
    /// # Errors
    ///
    /// Returns [`RetrieveError::Io`] when the destination directory cannot
    /// be created.
    #[instrument(skip(self, datasets, options, auth_header), fields(count = datasets.len()))]
    pub async fn retrieve(
        &self,
        datasets: &[String],
        options: &RetrievalOptions,
        auth_header: Option<String>,
    ) -> Result<RetrievalOutcome, RetrieveError> {
        let destination = options
            .destination
            .clone()
            .unwrap_or_else(|| self.fallback_destination.clone());
        std::fs::create_dir_all(&destination)
            .map_err(|e| RetrieveError::io(destination.clone(), e))?;

        let mut all_datasets: Vec<String> = datasets.to_vec();
        if let Some(scope) = options.with_calib {
            let associated = self
                .associated_calibrations(datasets, scope, options, &destination)
                .await;
            info!(count = associated.len(), "found associated calibration files");
            all_datasets.extend(associated);
        }

        let total = all_datasets.len();
        info!(total, destination = %destination.display(), "downloading datasets");
        let mut outcome = RetrievalOutcome::default();
        for (index, dataset) in all_datasets.iter().enumerate() {
            let url = format!("{}{}", self.download_url, dataset);
            info!(
                file = index + 1,
                total,
                url,
                "downloading dataset"
            );
            match self
                .download_with_retry(&url, &destination, options.continuation, auth_header.as_deref())
                .await
            {
                Ok((path, downloaded)) => {
                    if downloaded {
                        info!(dataset, path = %path.display(), "downloaded dataset");
                        outcome.downloaded += 1;
                    } else {
                        info!(dataset, path = %path.display(), "already present, skipping");
                        outcome.skipped += 1;
                    }
                    outcome.files.push(path);
                }
                Err(RetrieveError::AccessDenied { url, status }) => {
                    error!(%url, status, "access denied");
                    outcome.failed += 1;
                }
                Err(err) => {
                    error!(%url, error = %err, "failed to download dataset");
                    outcome.failed += 1;
                }
            }
        }

        if options.unzip {
            outcome.files = unpack_products(outcome.files);
        }
        info!(
            downloaded = outcome.downloaded,
            skipped = outcome.skipped,
            failed = outcome.failed,
            "retrieval complete"
        );
        Ok(outcome)
    }

    /// Runs batched CalSelector lookups. Batch failures are logged and the
    /// remaining batches still run, matching the per-file tolerance of the
    /// download loop.
    async fn associated_calibrations(
        &self,
        datasets: &[String],
        scope: CalibScope,
        options: &RetrievalOptions,
        destination: &Path,
    ) -> Vec<String> {
        info!(mode = scope.mode_param(), "retrieving associated calibration files");
        let mut sorted: Vec<String> = datasets.to_vec();
        sorted.sort();

        let save_dir = options.save_xml.then(|| destination.to_path_buf());
        let mut associated: Vec<String> = Vec::new();
        for batch in sorted.chunks(CALSELECTOR_BATCH_SIZE) {
            match self
                .calselector
                .associated_files(batch, scope, save_dir.as_deref())
                .await
            {
                Ok(files) => associated.extend(files),
                Err(err) => {
                    error!(error = %err, "failed to retrieve associated files");
                }
            }
        }
        associated.sort();
        associated.dedup();
        // Files already in the request list are not fetched twice.
        associated.retain(|file| !datasets.contains(file));
        associated
    }

    async fn download_with_retry(
        &self,
        url: &str,
        destination: &Path,
        continuation: bool,
        auth_header: Option<&str>,
    ) -> Result<(PathBuf, bool), RetrieveError> {
        let mut attempt: u32 = 1;
        loop {
            self.pacer.acquire(url).await;
            match self
                .download_one(url, destination, continuation, auth_header)
                .await
            {
                Ok(result) => return Ok(result),
                Err(err) => {
                    let failure_type = classify_error(&err);
                    if failure_type == FailureType::RateLimited
                        && let RetrieveError::HttpStatus {
                            retry_after: Some(retry_after),
                            ..
                        } = &err
                        && let Some(delay) = parse_retry_after(retry_after)
                    {
                        self.pacer.record_server_delay(url, delay).await;
                    }
                    match self.retry_policy.should_retry(failure_type, attempt) {
                        RetryDecision::Retry { delay, attempt: next } => {
                            warn!(
                                %url,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %err,
                                "retrying download"
                            );
                            tokio::time::sleep(delay).await;
                            attempt = next;
                        }
                        RetryDecision::DoNotRetry { reason } => {
                            debug!(%url, reason, "not retrying");
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    async fn download_one(
        &self,
        url: &str,
        destination: &Path,
        continuation: bool,
        auth_header: Option<&str>,
    ) -> Result<(PathBuf, bool), RetrieveError> {
        let mut request = self.client.get(url);
        if let Some(header) = auth_header {
            request = request.header(AUTHORIZATION, header);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RetrieveError::timeout(url)
            } else {
                RetrieveError::network(url, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            if matches!(status.as_u16(), 401 | 403) {
                return Err(RetrieveError::access_denied(url, status.as_u16()));
            }
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Err(RetrieveError::http_status(url, status.as_u16(), retry_after));
        }

        let filename = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_content_disposition)
            .ok_or_else(|| RetrieveError::MissingFilename {
                url: url.to_string(),
            })?;
        let path = destination.join(&filename);

        // A stale partial file from an interrupted run is never resumed;
        // the dataportal does not serve ranges.
        let part_path = destination.join(format!("{filename}.part"));
        if part_path.exists() {
            info!(path = %part_path.display(), "removing partially downloaded file");
            let _ = std::fs::remove_file(&part_path);
        }

        if !continuation && let Some(existing) = find_existing(&path) {
            debug!(path = %existing.display(), "found cached file");
            return Ok((existing, false));
        }

        let mut file = File::create(&part_path)
            .await
            .map_err(|e| RetrieveError::io(part_path.clone(), e))?;
        let written = stream_to_file(&mut file, response, url, &part_path).await;
        if written.is_err() {
            let _ = tokio::fs::remove_file(&part_path).await;
        }
        let bytes = written?;

        tokio::fs::rename(&part_path, &path)
            .await
            .map_err(|e| RetrieveError::io(path.clone(), e))?;
        debug!(path = %path.display(), bytes, "download complete");
        Ok((path, true))
    }
}

/// Returns the already-present form of a product: the file itself or its
/// decompressed sibling.
fn find_existing(path: &Path) -> Option<PathBuf> {
    if path.exists() {
        return Some(path.to_path_buf());
    }
    let sibling = inflated_path(path)?;
    sibling.exists().then_some(sibling)
}

/// Streams the response body to a file, returning the bytes written.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    path: &Path,
) -> Result<u64, RetrieveError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| RetrieveError::network(url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| RetrieveError::io(path.to_path_buf(), e))?;
        bytes_written += chunk.len() as u64;
    }
    writer
        .flush()
        .await
        .map_err(|e| RetrieveError::io(path.to_path_buf(), e))?;
    Ok(bytes_written)
}
