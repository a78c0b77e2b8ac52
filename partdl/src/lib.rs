//! partdl - concurrent HTTP file downloader
//!
//! This library fetches a remote resource into a local file, splitting the
//! transfer into parallel byte-range requests when the server supports
//! them. Each range lands in its own part file so an interrupted transfer
//! resumes where it left off, and the whole run can be observed through
//! progress and lifecycle callbacks.
//!
//! The pieces, bottom up: [`progress::ProgressSink`] aggregates bytes and
//! throughput across workers, [`partition`] slices the byte range,
//! internal range fetchers stream each slice to disk, and [`Downloader`]
//! exposes start/stop/pause/resume plus observer registration.

pub mod config;
pub mod error;
pub mod partition;
pub mod progress;

mod coordinator;
mod downloader;
mod fetch;
mod observer;
mod registry;

pub use config::DownloadConfig;
pub use downloader::Downloader;
pub use error::{DownloadError, DownloadResult};
pub use observer::{CompletionCallback, StartCallback};
pub use progress::{ProgressCallback, ProgressSnapshot};
