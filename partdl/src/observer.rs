//! Lifecycle observer slots.
//!
//! Each slot is independently guarded so a setter never blocks an
//! unrelated callback invocation, and replacing a callback is race-free
//! against workers that are about to fire it.

use parking_lot::RwLock;

/// Invoked once a transfer mode is entered: `(total, file_name)`.
///
/// `total` is 0 when the server did not report a length.
pub type StartCallback = Box<dyn Fn(u64, &str) + Send + Sync>;

/// Invoked with the output file name when a run finishes or is canceled.
pub type CompletionCallback = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Observers {
    on_start: RwLock<Option<StartCallback>>,
    on_finished: RwLock<Option<CompletionCallback>>,
    on_canceled: RwLock<Option<CompletionCallback>>,
}

impl Observers {
    pub fn set_on_start(&self, callback: StartCallback) {
        *self.on_start.write() = Some(callback);
    }

    pub fn set_on_finished(&self, callback: CompletionCallback) {
        *self.on_finished.write() = Some(callback);
    }

    pub fn set_on_canceled(&self, callback: CompletionCallback) {
        *self.on_canceled.write() = Some(callback);
    }

    pub fn fire_start(&self, total: u64, file_name: &str) {
        if let Some(callback) = self.on_start.read().as_ref() {
            callback(total, file_name);
        }
    }

    pub fn fire_finished(&self, file_name: &str) {
        if let Some(callback) = self.on_finished.read().as_ref() {
            callback(file_name);
        }
    }

    pub fn fire_canceled(&self, file_name: &str) {
        if let Some(callback) = self.on_canceled.read().as_ref() {
            callback(file_name);
        }
    }
}
