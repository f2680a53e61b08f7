use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::PathInfo;

/// Memo of stat results for adapters whose path lookups are expensive.
///
/// Every mutation performed through the owning adapter must call
/// [`PathInfoCache::invalidate`] for the touched path.
#[derive(Debug, Default)]
pub struct PathInfoCache {
    entries: Mutex<HashMap<String, PathInfo>>,
}

impl PathInfoCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PathInfo>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, path: &str) -> Option<PathInfo> {
        self.lock().get(path).cloned()
    }

    pub fn insert(&self, info: PathInfo) {
        self.lock().insert(info.path.clone(), info);
    }

    /// Drops `path`, everything below it, and its parent directory.
    pub fn invalidate(&self, path: &str) {
        let path = path.trim_matches('/');
        let prefix = format!("{path}/");
        let parent = path.rsplit_once('/').map_or("", |(p, _)| p);
        self.lock().retain(|key, _| {
            let key = key.trim_matches('/');
            key != path && key != parent && !key.starts_with(&prefix)
        });
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
