//! Registry of cancellation handles for in-flight requests.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Maps a per-request key (the part file path, or the output name in
/// single mode) to the token that aborts that request.
///
/// Entries are inserted before a request is issued and removed on every
/// exit path of the fetch, so at any instant each entry corresponds to
/// exactly one in-flight request.
#[derive(Debug, Default)]
pub struct CancelRegistry {
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the handle for a request about to be issued.
    pub fn register(&self, key: impl Into<String>, token: CancellationToken) {
        self.tokens.lock().insert(key.into(), token);
    }

    /// Remove the handle once the request has completed or been aborted.
    pub fn deregister(&self, key: &str) {
        self.tokens.lock().remove(key);
    }

    /// Fire every registered handle and empty the registry.
    pub fn cancel_and_clear(&self) {
        let drained: Vec<CancellationToken> = {
            let mut tokens = self.tokens.lock();
            tokens.drain().map(|(_, token)| token).collect()
        };
        for token in drained {
            token.cancel();
        }
    }

    /// Drop all handles without firing them. Used when re-initializing
    /// for a fresh run.
    pub fn clear(&self) {
        self.tokens.lock().clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_deregister() {
        let registry = CancelRegistry::new();
        registry.register("part_0", CancellationToken::new());
        registry.register("part_1", CancellationToken::new());
        assert_eq!(registry.len(), 2);

        registry.deregister("part_0");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_cancel_and_clear_fires_every_token() {
        let registry = CancelRegistry::new();
        let first = CancellationToken::new();
        let second = CancellationToken::new();
        registry.register("a", first.clone());
        registry.register("b", second.clone());

        registry.cancel_and_clear();

        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_clear_does_not_fire() {
        let registry = CancelRegistry::new();
        let token = CancellationToken::new();
        registry.register("a", token.clone());

        registry.clear();

        assert!(!token.is_cancelled());
        assert_eq!(registry.len(), 0);
    }
}
