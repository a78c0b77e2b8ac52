//! Ranged fetch of one part file.
//!
//! A [`RangeFetcher`] issues a single ranged GET, streams the body into
//! its part file, and feeds every chunk through the shared
//! [`ProgressSink`]. The fetch registers its cancellation token in the
//! [`CancelRegistry`] for the duration of the request and deregisters on
//! every exit path.

use std::path::PathBuf;
use std::sync::Arc;

use reqwest::{Client, Response, StatusCode};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{DownloadError, DownloadResult};
use crate::partition::PartRange;
use crate::progress::ProgressSink;
use crate::registry::CancelRegistry;

/// Buffer size for streaming response bodies to disk.
pub(crate) const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// How a fetch ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FetchOutcome {
    /// The body was consumed to its end.
    Completed,
    /// The cancellation token fired mid-transfer; the partial file is
    /// intact on disk.
    Cancelled,
}

/// One worker's ranged download into a part file.
pub(crate) struct RangeFetcher {
    pub client: Client,
    pub url: String,
    /// Effective range to request, already adjusted for resumed bytes.
    pub range: PartRange,
    pub part_path: PathBuf,
    pub resume: bool,
    pub sink: Arc<ProgressSink>,
    pub registry: Arc<CancelRegistry>,
}

impl RangeFetcher {
    /// Fetch the range into the part file.
    ///
    /// An empty range is an immediate success: resume has already
    /// satisfied it and no request is issued.
    pub async fn run(self, cancel: CancellationToken) -> DownloadResult<FetchOutcome> {
        if self.range.is_empty() {
            debug!(part = self.range.index, "part already complete, skipping fetch");
            return Ok(FetchOutcome::Completed);
        }

        let key = self.part_path.to_string_lossy().into_owned();
        self.registry.register(key.clone(), cancel.clone());
        let result = self.fetch(&cancel).await;
        self.registry.deregister(&key);
        result
    }

    async fn fetch(&self, cancel: &CancellationToken) -> DownloadResult<FetchOutcome> {
        // Wire format is inclusive on both ends; the internal range is
        // half-open.
        let range_header = format!("bytes={}-{}", self.range.start, self.range.end - 1);
        debug!(
            part = self.range.index,
            range = %range_header,
            path = %self.part_path.display(),
            "fetching part"
        );

        let request = self.client.get(&self.url).header("Range", range_header);
        let response = tokio::select! {
            biased;

            _ = cancel.cancelled() => return Ok(FetchOutcome::Cancelled),

            sent = request.send() => {
                sent.map_err(|e| DownloadError::transport(&self.url, e))?
            }
        };

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return Err(DownloadError::UnexpectedStatus {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }
        if status == StatusCode::OK && self.range.start > 0 {
            // The server ignored the Range header; the body starts at
            // offset 0 and this part will not line up with its peers.
            warn!(part = self.range.index, url = %self.url, "server ignored range request");
        }

        let file = self.open_part_file().await?;
        stream_to_file(response, file, &self.part_path, &self.sink, cancel).await
    }

    /// Open the part file for writing: append when resuming so existing
    /// bytes are preserved, truncate otherwise.
    async fn open_part_file(&self) -> DownloadResult<File> {
        let mut options = OpenOptions::new();
        options.write(true).create(true);
        if self.resume {
            options.append(true);
        } else {
            options.truncate(true);
        }
        options
            .open(&self.part_path)
            .await
            .map_err(|e| DownloadError::filesystem(&self.part_path, e))
    }
}

/// Stream a response body into `file`, counting every chunk through the
/// sink. Shared by the range workers and the single-stream path.
///
/// On cancellation the buffered tail is flushed so the bytes already
/// received survive on disk, and `Cancelled` is returned instead of an
/// error.
pub(crate) async fn stream_to_file(
    mut response: Response,
    file: File,
    path: &std::path::Path,
    sink: &ProgressSink,
    cancel: &CancellationToken,
) -> DownloadResult<FetchOutcome> {
    let url = response.url().to_string();
    let mut writer = BufWriter::with_capacity(COPY_BUFFER_SIZE, file);

    let outcome = loop {
        let chunk = tokio::select! {
            biased;

            _ = cancel.cancelled() => break FetchOutcome::Cancelled,

            chunk = response.chunk() => {
                match chunk.map_err(|e| DownloadError::transport(&url, e))? {
                    Some(chunk) => chunk,
                    None => break FetchOutcome::Completed,
                }
            }
        };

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::filesystem(path, e))?;
        sink.write(&chunk);
    };

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::filesystem(path, e))?;

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_range_is_immediate_success() {
        let fetcher = RangeFetcher {
            client: Client::new(),
            url: "http://unreachable.invalid/file".to_string(),
            range: PartRange { index: 0, start: 10, end: 10 },
            part_path: PathBuf::from("unused"),
            resume: true,
            sink: Arc::new(ProgressSink::new()),
            registry: Arc::new(CancelRegistry::new()),
        };

        let outcome = fetcher.run(CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, FetchOutcome::Completed);
    }

    #[tokio::test]
    async fn test_registry_is_empty_after_failed_fetch() {
        let registry = Arc::new(CancelRegistry::new());
        let fetcher = RangeFetcher {
            client: Client::new(),
            url: "http://127.0.0.1:1/file".to_string(),
            range: PartRange { index: 0, start: 0, end: 100 },
            part_path: PathBuf::from("unused_part_0"),
            resume: true,
            sink: Arc::new(ProgressSink::new()),
            registry: Arc::clone(&registry),
        };

        let result = fetcher.run(CancellationToken::new()).await;
        assert!(result.is_err());
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_short_circuits() {
        let registry = Arc::new(CancelRegistry::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let fetcher = RangeFetcher {
            client: Client::new(),
            url: "http://127.0.0.1:1/file".to_string(),
            range: PartRange { index: 0, start: 0, end: 100 },
            part_path: PathBuf::from("unused_part_0"),
            resume: true,
            sink: Arc::new(ProgressSink::new()),
            registry: Arc::clone(&registry),
        };

        let outcome = fetcher.run(cancel).await.unwrap();
        assert_eq!(outcome, FetchOutcome::Cancelled);
        assert_eq!(registry.len(), 0);
    }
}
