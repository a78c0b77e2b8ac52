//! Download configuration.
//!
//! [`DownloadConfig`] is immutable once a download starts: the downloader
//! clones whatever it needs up front, so changing a config value between
//! runs never affects a run already in flight.

use std::path::{Path, PathBuf};

/// Default directory that holds per-download part subdirectories.
pub const DEFAULT_BASE_DIR: &str = "downloader_cache";

/// Fallback output name when the URL has no usable last path segment.
pub const DEFAULT_FILE_NAME: &str = "downloaded_file";

/// Configuration for a single downloader.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Output file name, relative or absolute.
    ///
    /// Defaults to the last path segment of the URL.
    pub file_name: String,

    /// Directory holding per-download part subdirectories.
    ///
    /// Default: `"downloader_cache"`.
    pub base_dir: PathBuf,

    /// Number of parallel range workers.
    ///
    /// Default: number of logical CPUs. A caller-supplied 0 is coerced
    /// to the default.
    pub concurrency: usize,

    /// Whether existing part files are reused to skip already-fetched
    /// bytes on a subsequent start.
    ///
    /// Default: true.
    pub resume: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            file_name: DEFAULT_FILE_NAME.to_string(),
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            concurrency: num_cpus::get(),
            resume: true,
        }
    }
}

impl DownloadConfig {
    /// Create a config with defaults, deriving the output name from `url`.
    pub fn for_url(url: &str) -> Self {
        Self {
            file_name: file_name_from_url(url),
            ..Self::default()
        }
    }

    /// Set the output file name.
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    /// Set the part cache directory.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    /// Set the number of parallel range workers. 0 keeps the CPU default.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        if concurrency > 0 {
            self.concurrency = concurrency;
        }
        self
    }

    /// Enable or disable resume from existing part files.
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Directory that holds this download's part files.
    ///
    /// Nested under `base_dir` by the output's name component, so an
    /// absolute `file_name` still caches below the base directory.
    pub fn part_dir(&self) -> PathBuf {
        self.base_dir.join(self.output_name())
    }

    /// Path of the part file for worker `index`.
    pub fn part_file(&self, index: usize) -> PathBuf {
        self.part_dir()
            .join(format!("{}_{}", self.output_name(), index))
    }

    /// Final component of `file_name`, used for part naming.
    fn output_name(&self) -> &str {
        Path::new(&self.file_name)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(&self.file_name)
    }
}

/// Derive an output file name from the last path segment of a URL.
///
/// Query and fragment are ignored; an empty or all-slash path falls back
/// to [`DEFAULT_FILE_NAME`].
pub fn file_name_from_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty() && !segment.contains(':'))
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string())
}
