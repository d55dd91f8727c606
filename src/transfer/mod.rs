use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, info, warn};
use reqwest::Client;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use crate::checksum::{self, DigestKind};
use crate::error::InstallError;
use crate::progress::ProgressSnapshot;
use crate::util::{CancelToken, transfer_percent};

/// Largest slice written (and reported) in one step.
pub const CHUNK_SIZE: usize = 8 * 1024;

pub type ProgressCallback<'a> = &'a mut (dyn FnMut(ProgressSnapshot) + Send);

/// One remote file to fetch.
#[derive(Clone, Debug)]
pub struct TransferRequest {
    pub url: String,
    pub dest: PathBuf,
    /// 1-based position in the batch.
    pub file_index: usize,
    pub total_files: usize,
    pub display_name: String,
    /// Hex digest to verify after the write; `None` accepts whatever arrived.
    pub expected_checksum: Option<String>,
}

impl TransferRequest {
    fn snapshot(&self, percentage: f64) -> ProgressSnapshot {
        ProgressSnapshot {
            file_index: self.file_index,
            total_files: self.total_files,
            file_name: self.display_name.clone(),
            percentage,
        }
    }
}

#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Fetch `request.url` into `request.dest`, returning the bytes written.
    async fn transfer(
        &self,
        request: &TransferRequest,
        cancel: &CancelToken,
        progress: ProgressCallback<'_>,
    ) -> Result<u64, InstallError>;
}

/// Streams files over HTTP GET, restarting from byte zero every time.
#[derive(Clone)]
pub struct HttpTransfer {
    client: Client,
}

impl HttpTransfer {
    pub fn new() -> Self {
        // No total timeout: installers run to gigabytes. Stalls are caught per read.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .read_timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|err| {
                warn!("transfer: falling back to default HTTP client configuration ({err})");
                Client::new()
            });
        Self { client }
    }

    fn network_error(request: &TransferRequest, source: reqwest::Error) -> InstallError {
        InstallError::Network {
            file: request.display_name.clone(),
            index: request.file_index,
            total: request.total_files,
            source,
        }
    }
}

impl Default for HttpTransfer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileTransfer for HttpTransfer {
    async fn transfer(
        &self,
        request: &TransferRequest,
        cancel: &CancelToken,
        progress: ProgressCallback<'_>,
    ) -> Result<u64, InstallError> {
        debug!(
            "transfer: GET {} -> {}",
            request.url,
            request.dest.display()
        );
        let response = self
            .client
            .get(&request.url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| Self::network_error(request, e))?;

        if let Some(parent) = request.dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| InstallError::io("create directory", parent, e))?;
        }

        let total = response.content_length();
        if total.is_none() {
            debug!("transfer: {} has no Content-Length", request.display_name);
        }
        let mut stream = response.bytes_stream();
        let mut file = create_exclusive(&request.dest)
            .await
            .map_err(|e| InstallError::io("create", &request.dest, e))?;

        let copied = async {
            let mut downloaded: u64 = 0;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| Self::network_error(request, e))?;
                for slice in chunk.chunks(CHUNK_SIZE) {
                    file.write_all(slice)
                        .await
                        .map_err(|e| InstallError::io("write", &request.dest, e))?;
                    downloaded += slice.len() as u64;
                    progress(request.snapshot(transfer_percent(downloaded, total)));

                    if cancel.is_cancelled() {
                        // Partial file stays on disk; the next run re-checks it.
                        warn!(
                            "transfer: cancelled {} after {} bytes",
                            request.display_name, downloaded
                        );
                        return Err(InstallError::Cancelled);
                    }
                }
            }
            Ok::<u64, InstallError>(downloaded)
        }
        .await;

        // tokio finishes the last write on a blocking thread; wait for it on every
        // exit so the handle is really released when this returns.
        let flushed = file
            .flush()
            .await
            .map_err(|e| InstallError::io("flush", &request.dest, e));
        drop(file);
        let downloaded = copied?;
        flushed?;

        if let Some(expected) = request
            .expected_checksum
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            verify_download(&request.dest, &request.display_name, expected).await?;
        }

        info!(
            "transfer: {} done ({} bytes)",
            request.display_name, downloaded
        );
        Ok(downloaded)
    }
}

/// Truncating create that no other process may open while the transfer writes.
async fn create_exclusive(path: &Path) -> std::io::Result<File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(windows)]
    options.share_mode(0);
    options.open(path).await
}

/// Hash the finished file off the async threads and compare against `expected`.
async fn verify_download(dest: &Path, name: &str, expected: &str) -> Result<(), InstallError> {
    let path = dest.to_path_buf();
    let kind = DigestKind::for_expected(expected);
    let actual = tokio::task::spawn_blocking(move || checksum::file_digest(&path, kind))
        .await
        .map_err(|e| InstallError::io("hash", dest, std::io::Error::other(e)))?
        .map_err(|e| InstallError::io("hash", dest, e))?;

    if !checksum::digest_matches(&actual, expected) {
        // The corrupt file is left in place for the caller to inspect or replace.
        return Err(InstallError::Integrity {
            file: name.to_owned(),
            expected: expected.to_owned(),
            actual,
        });
    }
    debug!("transfer: checksum ok for {name}");
    Ok(())
}
