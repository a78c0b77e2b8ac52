//! End-to-end orchestration of one download run.
//!
//! The coordinator probes the server with a HEAD request, decides between
//! the ranged multi-worker path and the single-stream path, drives the
//! workers to quiescence, and reassembles part files into the output.
//!
//! ```text
//! run ──► probe (HEAD)
//!          │
//!          ├── Accept-Ranges + positive length ──► multi_mode
//!          │       partition ─► spawn fetchers ─► join ─► merge
//!          │
//!          └── otherwise ──► single_mode
//!                  one GET ─► stream to destination
//! ```
//!
//! The stop signal is observed at every spawn decision and by every
//! in-flight request; after the join barrier the coordinator reports
//! cancellation (not an error) when the signal was raised.

use std::path::Path;
use std::sync::Arc;

use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH};
use reqwest::{Client, StatusCode};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DownloadConfig;
use crate::error::{DownloadError, DownloadResult};
use crate::fetch::{stream_to_file, FetchOutcome, RangeFetcher};
use crate::observer::Observers;
use crate::partition::{self, PartRange};
use crate::progress::ProgressSink;
use crate::registry::CancelRegistry;

/// What the HEAD probe revealed about the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferMode {
    /// Range requests are usable; carries the total content length.
    Ranged(u64),
    /// Fall back to one plain GET.
    Single,
}

/// Drives a single download run end to end.
pub(crate) struct Coordinator {
    pub client: Client,
    pub url: String,
    pub config: DownloadConfig,
    pub sink: Arc<ProgressSink>,
    pub registry: Arc<CancelRegistry>,
    /// Stop signal for this run, cloned from the controller.
    pub stop: CancellationToken,
    pub observers: Arc<Observers>,
}

impl Coordinator {
    /// Run the download to completion, cancellation, or error.
    pub async fn run(&self) -> DownloadResult<()> {
        let rate_cancel = CancellationToken::new();
        let _rate_guard = rate_cancel.clone().drop_guard();
        ProgressSink::spawn_rate_task(Arc::clone(&self.sink), rate_cancel);

        match self.probe().await? {
            TransferMode::Ranged(len) => {
                info!(url = %self.url, len, workers = self.config.concurrency, "ranged download");
                self.multi_mode(len).await
            }
            TransferMode::Single => {
                info!(url = %self.url, "single-stream download");
                self.single_mode().await
            }
        }
    }

    /// HEAD the URL and decide the transfer mode.
    ///
    /// Multi-mode requires 200, `Accept-Ranges: bytes`, and a positive
    /// `Content-Length`. A zero length with range support degenerates to
    /// the single path (one plain GET, empty output). A missing or
    /// unparseable length while ranges are advertised is an error.
    async fn probe(&self) -> DownloadResult<TransferMode> {
        let response = self
            .client
            .head(&self.url)
            .send()
            .await
            .map_err(|e| DownloadError::transport(&self.url, e))?;

        if response.status() != StatusCode::OK {
            debug!(status = %response.status(), "HEAD not OK, using single stream");
            return Ok(TransferMode::Single);
        }

        let ranges_supported = response
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "bytes")
            .unwrap_or(false);
        if !ranges_supported {
            return Ok(TransferMode::Single);
        }

        let content_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        match content_length {
            Some(0) => Ok(TransferMode::Single),
            Some(len) => Ok(TransferMode::Ranged(len)),
            None => Err(DownloadError::InvalidContentLength {
                url: self.url.clone(),
            }),
        }
    }

    /// Ranged path: partition, spawn one fetcher per part, join, merge.
    async fn multi_mode(&self, len: u64) -> DownloadResult<()> {
        let file_name = self.config.file_name.clone();

        self.sink.set_total(len);
        self.observers.fire_start(len, &file_name);

        let part_dir = self.config.part_dir();
        tokio::fs::create_dir_all(&part_dir)
            .await
            .map_err(|e| DownloadError::filesystem(&part_dir, e))?;

        let ranges = partition::plan(len, self.config.concurrency);

        let mut handles = Vec::with_capacity(ranges.len());
        for range in &ranges {
            if self.stop.is_cancelled() {
                debug!(part = range.index, "stop raised, not spawning further workers");
                break;
            }

            let part_path = self.config.part_file(range.index);
            let effective = if self.config.resume {
                let on_disk = partition::bytes_on_disk(&part_path).await;
                // Credit already-downloaded bytes so `loaded` matches the
                // on-disk state before any request goes out.
                let credited = on_disk.min(range.len());
                if credited > 0 {
                    self.sink.add(credited);
                }
                range.remaining_after(on_disk)
            } else {
                *range
            };

            let fetcher = RangeFetcher {
                client: self.client.clone(),
                url: self.url.clone(),
                range: effective,
                part_path,
                resume: self.config.resume,
                sink: Arc::clone(&self.sink),
                registry: Arc::clone(&self.registry),
            };
            // A child of the stop signal: individual cancellation through
            // the registry and broadcast cancellation both reach it.
            let cancel = self.stop.child_token();
            handles.push(tokio::spawn(fetcher.run(cancel)));
        }

        // Quiescence barrier: a failing worker never short-circuits its
        // peers, so their partial artifacts stay usable for resume.
        let mut first_error: Option<DownloadError> = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "range worker failed");
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    warn!(error = %e, "range worker terminated abnormally");
                    first_error.get_or_insert(DownloadError::filesystem(
                        &part_dir,
                        std::io::Error::other(e),
                    ));
                }
            }
        }

        if self.stop.is_cancelled() {
            info!(file = %file_name, "download canceled, partial parts retained");
            self.observers.fire_canceled(&file_name);
            return Ok(());
        }
        if let Some(error) = first_error {
            return Err(error);
        }

        self.merge(&ranges).await?;
        if let Err(e) = tokio::fs::remove_dir_all(&part_dir).await {
            debug!(error = %e, "could not remove part directory after merge");
        }

        info!(file = %file_name, "download finished");
        self.observers.fire_finished(&file_name);
        Ok(())
    }

    /// Reassemble part files into the destination, strictly ascending by
    /// part index, removing each part as it is consumed.
    async fn merge(&self, ranges: &[PartRange]) -> DownloadResult<()> {
        let dest_path = Path::new(&self.config.file_name);
        let mut dest = File::create(dest_path)
            .await
            .map_err(|e| DownloadError::filesystem(dest_path, e))?;

        for range in ranges {
            let part_path = self.config.part_file(range.index);
            let mut part = match File::open(&part_path).await {
                Ok(file) => file,
                // A part whose nominal range is empty never touched disk.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound && range.is_empty() => {
                    continue;
                }
                Err(e) => return Err(DownloadError::filesystem(&part_path, e)),
            };

            tokio::io::copy(&mut part, &mut dest)
                .await
                .map_err(|e| DownloadError::filesystem(&part_path, e))?;
            drop(part);
            tokio::fs::remove_file(&part_path)
                .await
                .map_err(|e| DownloadError::filesystem(&part_path, e))?;
        }

        dest.flush()
            .await
            .map_err(|e| DownloadError::filesystem(dest_path, e))?;
        Ok(())
    }

    /// Fallback path: one plain GET streamed straight to the destination.
    async fn single_mode(&self) -> DownloadResult<()> {
        let file_name = self.config.file_name.clone();
        let cancel = self.stop.child_token();

        self.registry.register(file_name.clone(), cancel.clone());
        let result = self.single_fetch(&file_name, &cancel).await;
        self.registry.deregister(&file_name);
        result
    }

    async fn single_fetch(
        &self,
        file_name: &str,
        cancel: &CancellationToken,
    ) -> DownloadResult<()> {
        let response = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                self.observers.fire_canceled(file_name);
                return Ok(());
            }

            sent = self.client.get(&self.url).send() => {
                sent.map_err(|e| DownloadError::transport(&self.url, e))?
            }
        };

        if response.status() != StatusCode::OK {
            return Err(DownloadError::UnexpectedStatus {
                url: self.url.clone(),
                status: response.status().as_u16(),
            });
        }

        // 0 when the server did not report a length; still surfaced.
        let total = response.content_length().unwrap_or(0);
        self.sink.set_total(total);
        self.observers.fire_start(total, file_name);

        let dest_path = Path::new(file_name);
        let dest = File::create(dest_path)
            .await
            .map_err(|e| DownloadError::filesystem(dest_path, e))?;

        let outcome = stream_to_file(response, dest, dest_path, &self.sink, cancel).await?;

        if outcome == FetchOutcome::Cancelled || self.stop.is_cancelled() {
            info!(file = %file_name, "download canceled");
            self.observers.fire_canceled(file_name);
        } else {
            info!(file = %file_name, "download finished");
            self.observers.fire_finished(file_name);
        }
        Ok(())
    }
}
