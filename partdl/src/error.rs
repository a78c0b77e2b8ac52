//! Error types for download operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for download operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Errors that can occur while driving a download.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The downloader was constructed with an empty URL.
    #[error("download URL is empty")]
    InvalidUrl,

    /// The server advertised range support but no usable content length.
    #[error("server at {url} advertises ranges but reports no usable content length")]
    InvalidContentLength { url: String },

    /// A request failed at the network layer.
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a status the download cannot proceed from.
    #[error("unexpected status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },

    /// A filesystem operation on a part file, the destination, or the
    /// part directory failed.
    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// `stop` was called while the stop signal was already raised.
    #[error("downloader has been stopped")]
    AlreadyStopped,
}

impl DownloadError {
    pub(crate) fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            url: url.into(),
            source,
        }
    }

    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_display() {
        assert_eq!(DownloadError::InvalidUrl.to_string(), "download URL is empty");
    }

    #[test]
    fn test_unexpected_status_display() {
        let err = DownloadError::UnexpectedStatus {
            url: "http://example.com/file".to_string(),
            status: 503,
        };
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("http://example.com/file"));
    }

    #[test]
    fn test_filesystem_error_keeps_source() {
        use std::error::Error;

        let err = DownloadError::filesystem(
            "/tmp/part_0",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.source().is_some());
        assert!(err.to_string().contains("/tmp/part_0"));
    }

    #[test]
    fn test_already_stopped_display() {
        assert_eq!(
            DownloadError::AlreadyStopped.to_string(),
            "downloader has been stopped"
        );
    }
}
