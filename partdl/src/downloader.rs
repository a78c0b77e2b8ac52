//! Public downloader surface: lifecycle control and observer wiring.

use std::sync::Arc;

use parking_lot::RwLock;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::DownloadConfig;
use crate::coordinator::Coordinator;
use crate::error::{DownloadError, DownloadResult};
use crate::observer::Observers;
use crate::progress::{ProgressSink, ProgressSnapshot};
use crate::registry::CancelRegistry;

/// A concurrent, resumable HTTP file downloader.
///
/// One `Downloader` owns one URL-to-file transfer. [`start`] drives the
/// transfer to completion; [`stop`] raises the broadcast stop signal and
/// aborts every in-flight request, leaving part files on disk for a later
/// [`resume`]. Wrap the downloader in an [`Arc`] to control it from
/// another task while a run is in flight.
///
/// [`start`]: Downloader::start
/// [`stop`]: Downloader::stop
/// [`resume`]: Downloader::resume
///
/// # Example
///
/// ```no_run
/// use partdl::{DownloadConfig, Downloader};
///
/// # async fn demo() -> Result<(), partdl::DownloadError> {
/// let downloader = Downloader::with_config(
///     "https://example.com/large.iso",
///     DownloadConfig::for_url("https://example.com/large.iso").with_concurrency(8),
/// );
/// downloader.on_progress(|loaded, total, rate| {
///     println!("{loaded}/{total} bytes ({rate})");
/// });
/// downloader.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct Downloader {
    url: String,
    config: DownloadConfig,
    client: Client,
    sink: Arc<ProgressSink>,
    registry: Arc<CancelRegistry>,
    /// Replaced wholesale on re-initialization, never reset in place.
    stop: RwLock<CancellationToken>,
    observers: Arc<Observers>,
}

impl Downloader {
    /// Create a downloader with defaults derived from the URL.
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let config = DownloadConfig::for_url(&url);
        Self::with_config(url, config)
    }

    /// Create a downloader with an explicit configuration.
    pub fn with_config(url: impl Into<String>, mut config: DownloadConfig) -> Self {
        if config.concurrency == 0 {
            config.concurrency = num_cpus::get();
        }
        Self {
            url: url.into(),
            config,
            client: Client::new(),
            sink: Arc::new(ProgressSink::new()),
            registry: Arc::new(CancelRegistry::new()),
            stop: RwLock::new(CancellationToken::new()),
            observers: Arc::new(Observers::default()),
        }
    }

    /// The configuration this downloader runs with.
    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Run the download until it finishes, errors, or is stopped.
    ///
    /// A start that follows a [`stop`](Downloader::stop) re-initializes
    /// the progress counters, the stop signal, and the cancel registry
    /// before running. Concurrent starts on the same downloader are not
    /// supported.
    pub async fn start(&self) -> DownloadResult<()> {
        if self.url.is_empty() {
            return Err(DownloadError::InvalidUrl);
        }

        let stop = {
            let mut stop = self.stop.write();
            if stop.is_cancelled() {
                debug!("re-initializing after a previous stop");
                self.sink.init();
                self.registry.clear();
                *stop = CancellationToken::new();
            }
            stop.clone()
        };

        let coordinator = Coordinator {
            client: self.client.clone(),
            url: self.url.clone(),
            config: self.config.clone(),
            sink: Arc::clone(&self.sink),
            registry: Arc::clone(&self.registry),
            stop,
            observers: Arc::clone(&self.observers),
        };
        coordinator.run().await
    }

    /// Raise the stop signal and cancel every registered request.
    ///
    /// Stop is eventually consistent: it does not wait for the workers to
    /// wind down. The in-flight [`start`](Downloader::start) call is what
    /// returns once quiescence is reached, after firing the canceled
    /// observer. Fails with [`DownloadError::AlreadyStopped`] when the
    /// signal is already raised.
    pub fn stop(&self) -> DownloadResult<()> {
        let stop = self.stop.read().clone();
        if stop.is_cancelled() {
            return Err(DownloadError::AlreadyStopped);
        }
        stop.cancel();
        self.registry.cancel_and_clear();
        Ok(())
    }

    /// Alias for [`stop`](Downloader::stop); parts stay on disk.
    pub fn pause(&self) -> DownloadResult<()> {
        self.stop()
    }

    /// Alias for [`start`](Downloader::start); with resume enabled,
    /// existing part files are reused.
    pub async fn resume(&self) -> DownloadResult<()> {
        self.start().await
    }

    /// Point-in-time progress: `(loaded, total, rate)`.
    pub fn progress(&self) -> ProgressSnapshot {
        self.sink.snapshot()
    }

    /// Observe byte progress. Called inline from worker tasks; keep it
    /// fast and thread-safe.
    pub fn on_progress<F>(&self, callback: F)
    where
        F: Fn(u64, u64, &str) + Send + Sync + 'static,
    {
        self.sink.set_on_progress(Some(Box::new(callback)));
    }

    /// Observe the start of a transfer: `(total, file_name)`.
    pub fn on_download_start<F>(&self, callback: F)
    where
        F: Fn(u64, &str) + Send + Sync + 'static,
    {
        self.observers.set_on_start(Box::new(callback));
    }

    /// Observe successful completion.
    pub fn on_download_finished<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.observers.set_on_finished(Box::new(callback));
    }

    /// Observe cancellation. Fired once the workers have quiesced after a
    /// stop; mutually exclusive with the finished observer for any run.
    pub fn on_download_canceled<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.observers.set_on_canceled(Box::new(callback));
    }
}
