//! Thumbnail result cache (spec §1, §3): a content-addressed key/value
//! store of pre-rendered previews, external to the core per spec §1 but
//! included here as a minimal in-process default so the CLI binary has
//! something working out of the box. Modeled directly on the teacher's
//! `SegmentCache` (`DashMap`-backed, no external dependencies beyond
//! what the crate already pulls in).
//!
//! Keyed by `(files[0].path, max modified_at, total_size)` per spec §3's
//! lifecycle note — any of the three changing invalidates the entry.

use dashmap::DashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThumbKey {
    pub path: PathBuf,
    pub modified_at: Option<u64>,
    pub total_size: u64,
}

/// In-process thumbnail cache. A GUI embedder is free to substitute its
/// own persistent store behind the same `get`/`put` shape.
#[derive(Default)]
pub struct ThumbnailCache {
    entries: DashMap<ThumbKey, Vec<u8>>,
}

impl ThumbnailCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, path: &std::path::Path, modified_at: Option<u64>, total_size: u64) -> Option<Vec<u8>> {
        let key = ThumbKey {
            path: path.to_path_buf(),
            modified_at,
            total_size,
        };
        self.entries.get(&key).map(|v| v.clone())
    }

    pub fn put(&self, path: &std::path::Path, modified_at: Option<u64>, total_size: u64, jpeg_bytes: Vec<u8>) {
        let key = ThumbKey {
            path: path.to_path_buf(),
            modified_at,
            total_size,
        };
        self.entries.insert(key, jpeg_bytes);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let cache = ThumbnailCache::new();
        let path = std::path::Path::new("/tmp/f_0000a0");
        cache.put(path, Some(100), 4096, vec![1, 2, 3]);
        assert_eq!(cache.get(path, Some(100), 4096), Some(vec![1, 2, 3]));
    }

    #[test]
    fn changed_modified_at_invalidates_entry() {
        let cache = ThumbnailCache::new();
        let path = std::path::Path::new("/tmp/f_0000a0");
        cache.put(path, Some(100), 4096, vec![1, 2, 3]);
        assert_eq!(cache.get(path, Some(101), 4096), None);
    }

    #[test]
    fn changed_total_size_invalidates_entry() {
        let cache = ThumbnailCache::new();
        let path = std::path::Path::new("/tmp/f_0000a0");
        cache.put(path, Some(100), 4096, vec![1, 2, 3]);
        assert_eq!(cache.get(path, Some(100), 4097), None);
    }

    #[test]
    fn miss_on_unknown_key_returns_none() {
        let cache = ThumbnailCache::new();
        assert_eq!(cache.get(std::path::Path::new("/tmp/nope"), None, 0), None);
    }
}
