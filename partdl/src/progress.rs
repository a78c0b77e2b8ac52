//! Concurrent progress aggregation.
//!
//! [`ProgressSink`] accepts byte counts from any number of workers, keeps
//! a cumulative total with atomic arithmetic, and publishes a smoothed
//! human-readable transfer rate from a dedicated timer task. Workers never
//! contend on a lock for the hot counting path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Sampling window for the instantaneous transfer rate.
pub const RATE_WINDOW: Duration = Duration::from_millis(250);

/// Rate string published before the first window elapses.
pub const INITIAL_RATE: &str = "0.00 MB/s";

/// Windows per second; the window byte count is scaled by this to get
/// bytes per second.
const WINDOWS_PER_SECOND: f64 = 4.0;

/// Progress observer: `(loaded, total, rate)`.
///
/// Invoked inline from [`ProgressSink::write`], potentially from many
/// worker tasks at once; implementations must be fast and thread-safe.
pub type ProgressCallback = Box<dyn Fn(u64, u64, &str) + Send + Sync>;

/// Point-in-time copy of the sink's counters.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    /// Bytes committed since the last initialization.
    pub loaded: u64,
    /// Expected total; 0 until known.
    pub total: u64,
    /// Last published rate string.
    pub rate: Arc<str>,
}

/// Shared byte counter and rate publisher for one downloader.
pub struct ProgressSink {
    loaded: AtomicU64,
    total: AtomicU64,
    /// Bytes observed in the current sampling window.
    window: AtomicU64,
    /// Swapped wholesale by the rate task; readers clone the Arc.
    rate: RwLock<Arc<str>>,
    on_progress: RwLock<Option<ProgressCallback>>,
}

impl Default for ProgressSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink {
    /// Create a sink with zeroed counters and the initial rate string.
    pub fn new() -> Self {
        Self {
            loaded: AtomicU64::new(0),
            total: AtomicU64::new(0),
            window: AtomicU64::new(0),
            rate: RwLock::new(Arc::from(INITIAL_RATE)),
            on_progress: RwLock::new(None),
        }
    }

    /// Count `chunk` as transferred and notify the progress observer.
    ///
    /// Never fails and always accounts for the full chunk length.
    pub fn write(&self, chunk: &[u8]) -> usize {
        self.add(chunk.len() as u64);
        chunk.len()
    }

    /// Count `n` bytes as transferred and notify the progress observer.
    ///
    /// Used directly when the bytes themselves are not at hand, e.g. when
    /// crediting pre-existing part file contents on resume.
    pub fn add(&self, n: u64) {
        let loaded = self.loaded.fetch_add(n, Ordering::AcqRel) + n;
        self.window.fetch_add(n, Ordering::AcqRel);

        let guard = self.on_progress.read();
        if let Some(callback) = guard.as_ref() {
            let rate = self.rate.read().clone();
            callback(loaded, self.total.load(Ordering::Acquire), &rate);
        }
    }

    /// Record the expected total size. Called once per run once known.
    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Release);
    }

    /// Bytes committed since the last initialization.
    pub fn loaded(&self) -> u64 {
        self.loaded.load(Ordering::Acquire)
    }

    /// Expected total; 0 until known.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    /// Lock-free-for-writers read of `(loaded, total, rate)`.
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            loaded: self.loaded.load(Ordering::Acquire),
            total: self.total.load(Ordering::Acquire),
            rate: self.rate.read().clone(),
        }
    }

    /// Replace the progress observer. Safe while workers are writing.
    pub fn set_on_progress(&self, callback: Option<ProgressCallback>) {
        *self.on_progress.write() = callback;
    }

    /// Reset counters and the rate string for a fresh run.
    pub fn init(&self) {
        self.loaded.store(0, Ordering::Release);
        self.window.store(0, Ordering::Release);
        *self.rate.write() = Arc::from(INITIAL_RATE);
    }

    /// Spawn the periodic rate task.
    ///
    /// Every [`RATE_WINDOW`] the task drains the window counter, converts
    /// it to bytes per second, and publishes the formatted string. The
    /// task exits when `cancel` fires.
    pub fn spawn_rate_task(sink: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + RATE_WINDOW, RATE_WINDOW);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break,

                    _ = ticker.tick() => {
                        let window = sink.window.swap(0, Ordering::AcqRel);
                        let per_second = window as f64 * WINDOWS_PER_SECOND;
                        *sink.rate.write() = format_rate(per_second).into();
                    }
                }
            }
        })
    }
}

/// Format a bytes-per-second figure with two decimals and a 1024-based
/// unit, e.g. `"3.52 MB/s"`.
pub fn format_rate(bytes_per_second: f64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

    if bytes_per_second >= GIB {
        format!("{:.2} GB/s", bytes_per_second / GIB)
    } else if bytes_per_second >= MIB {
        format!("{:.2} MB/s", bytes_per_second / MIB)
    } else if bytes_per_second >= KIB {
        format!("{:.2} KB/s", bytes_per_second / KIB)
    } else {
        format!("{:.2} B/s", bytes_per_second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_write_returns_input_length_and_accumulates() {
        let sink = ProgressSink::new();

        assert_eq!(sink.write(b"test data"), 9);
        assert_eq!(sink.write(b""), 0);
        assert_eq!(sink.loaded(), 9);
    }

    #[test]
    fn test_snapshot_reflects_counters() {
        let sink = ProgressSink::new();
        sink.set_total(1000);
        sink.add(250);

        let snapshot = sink.snapshot();
        assert_eq!(snapshot.loaded, 250);
        assert_eq!(snapshot.total, 1000);
        assert_eq!(&*snapshot.rate, INITIAL_RATE);
    }

    #[test]
    fn test_progress_callback_sees_running_totals() {
        let sink = ProgressSink::new();
        sink.set_total(100);

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        sink.set_on_progress(Some(Box::new(move |loaded, total, rate| {
            seen_clone.lock().push((loaded, total, rate.to_string()));
        })));

        sink.add(5);
        sink.add(7);

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, 5);
        assert_eq!(seen[1].0, 12);
        assert!(seen.iter().all(|(_, total, _)| *total == 100));
        assert!(seen.iter().all(|(_, _, rate)| rate == INITIAL_RATE));
    }

    #[test]
    fn test_init_resets_counters() {
        let sink = ProgressSink::new();
        sink.set_total(100);
        sink.add(42);

        sink.init();

        assert_eq!(sink.loaded(), 0);
        assert_eq!(&*sink.snapshot().rate, INITIAL_RATE);
    }

    #[test]
    fn test_concurrent_writes_sum_exactly() {
        let sink = Arc::new(ProgressSink::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        sink.add(3);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(sink.loaded(), 8 * 1000 * 3);
    }

    #[test]
    fn test_format_rate_unit_boundaries() {
        assert_eq!(format_rate(0.0), "0.00 B/s");
        assert_eq!(format_rate(1023.0), "1023.00 B/s");
        assert_eq!(format_rate(1024.0), "1.00 KB/s");
        assert_eq!(format_rate(1536.0), "1.50 KB/s");
        assert_eq!(format_rate(1024.0 * 1024.0), "1.00 MB/s");
        assert_eq!(format_rate(2.5 * 1024.0 * 1024.0 * 1024.0), "2.50 GB/s");
    }

    #[test]
    fn test_format_rate_matches_published_pattern() {
        let pattern = regex::Regex::new(r"^-?\d+\.\d{2} (B|KB|MB|GB)/s$").unwrap();
        for bps in [0.0, 1.0, 999.99, 1024.0, 250_000.0, 8.0e6, 3.0e9, 7.7e10] {
            let formatted = format_rate(bps);
            assert!(pattern.is_match(&formatted), "bad rate string: {formatted}");
        }
        assert!(pattern.is_match(INITIAL_RATE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_task_publishes_window_rate() {
        let sink = Arc::new(ProgressSink::new());
        let cancel = CancellationToken::new();
        let handle = ProgressSink::spawn_rate_task(Arc::clone(&sink), cancel.clone());

        // One full window's worth of traffic: 1 MiB in 250ms is 4 MiB/s.
        sink.add(1024 * 1024);
        tokio::time::sleep(RATE_WINDOW + Duration::from_millis(10)).await;
        assert_eq!(&*sink.snapshot().rate, "4.00 MB/s");

        // An idle window decays back to zero.
        tokio::time::sleep(RATE_WINDOW).await;
        assert_eq!(&*sink.snapshot().rate, "0.00 B/s");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_task_stops_on_cancel() {
        let sink = Arc::new(ProgressSink::new());
        let cancel = CancellationToken::new();
        let handle = ProgressSink::spawn_rate_task(Arc::clone(&sink), cancel.clone());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("rate task did not stop after cancellation")
            .unwrap();
    }

    #[test]
    fn test_callback_invocation_count_under_concurrency() {
        let sink = Arc::new(ProgressSink::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        sink.set_on_progress(Some(Box::new(move |_, _, _| {
            calls_clone.fetch_add(1, Ordering::Relaxed);
        })));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        sink.write(&[0u8; 16]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(calls.load(Ordering::Relaxed), 400);
    }
}
