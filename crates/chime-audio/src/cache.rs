//! Raw asset bytes kept for warming strategies.

use std::collections::HashMap;

use bytes::Bytes;
use chime_core::SoundKey;
use parking_lot::RwLock;

/// Fetched asset bytes, kept so a newly activated strategy can be warmed
/// without going back to the network.
#[derive(Debug, Default)]
pub(crate) struct AssetCache {
    inner: RwLock<HashMap<SoundKey, Bytes>>,
}

impl AssetCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, key: SoundKey, data: Bytes) {
        self.inner.write().insert(key, data);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Point-in-time copy. `Bytes` clones are reference counted.
    pub(crate) fn snapshot(&self) -> HashMap<SoundKey, Bytes> {
        self.inner.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_insert_wins() {
        let cache = AssetCache::new();
        assert!(cache.is_empty());

        cache.insert(SoundKey::LineClear, Bytes::from_static(b"old"));
        cache.insert(SoundKey::LineClear, Bytes::from_static(b"abcd"));
        cache.insert(SoundKey::Tetris, Bytes::from_static(b"x"));

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[&SoundKey::LineClear], Bytes::from_static(b"abcd"));
        assert!(!cache.is_empty());
    }
}
