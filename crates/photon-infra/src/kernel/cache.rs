// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! On-disk kernel artifact cache with LRU retention per variant and architecture.

use super::error::KernelError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Name of the index file inside the cache directory.
pub const INDEX_FILE: &str = "cache_index.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct IndexEntry {
    variant: String,
    // Empty for indexes written before entries recorded it.
    #[serde(default)]
    arch: String,
    last_use: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheIndex {
    next_use: u64,
    entries: BTreeMap<String, IndexEntry>,
}

/// Cached artifacts named `{variant}_{arch}_{key}.{ext}` under one directory.
///
/// Every hit or insert bumps the entry's use sequence; after an insert only the
/// `retention` most recently used artifacts of that variant and architecture
/// are kept, so devices of different generations do not evict each other.
#[derive(Debug)]
pub struct KernelCache {
    dir: PathBuf,
    retention: usize,
    index: Mutex<CacheIndex>,
}

impl KernelCache {
    /// Opens or creates the cache at `dir`.
    ///
    /// An unreadable index is discarded and rebuilt.
    pub fn open(dir: impl Into<PathBuf>, retention: usize) -> Result<Self, KernelError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|err| KernelError::io(&dir, err))?;
        let index_path = dir.join(INDEX_FILE);
        let index = match std::fs::read_to_string(&index_path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|err| {
                log::warn!("KernelCache: discarding corrupt index '{}': {err}", index_path.display());
                CacheIndex::default()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => CacheIndex::default(),
            Err(err) => return Err(KernelError::io(index_path, err)),
        };
        Ok(Self {
            dir,
            retention: retention.max(1),
            index: Mutex::new(index),
        })
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path an artifact is stored at.
    pub fn path_for(&self, variant: &str, arch: &str, key: &str, ext: &str) -> PathBuf {
        self.dir.join(file_name(variant, arch, key, ext))
    }

    /// Returns the cached artifact and marks it used, or `None` on a miss.
    pub fn lookup(&self, variant: &str, arch: &str, key: &str, ext: &str) -> Result<Option<PathBuf>, KernelError> {
        let name = file_name(variant, arch, key, ext);
        let path = self.dir.join(&name);
        let mut index = self.lock();
        if !path.is_file() {
            if index.entries.remove(&name).is_some() {
                self.save(&index)?;
            }
            return Ok(None);
        }
        touch(&mut index, &name, variant, arch);
        self.save(&index)?;
        log::debug!("KernelCache: hit {name}");
        Ok(Some(path))
    }

    /// Records a freshly written artifact and evicts the oldest entries of the
    /// same variant and architecture beyond retention. Returns the evicted paths.
    pub fn insert(&self, variant: &str, arch: &str, key: &str, ext: &str) -> Result<Vec<PathBuf>, KernelError> {
        let name = file_name(variant, arch, key, ext);
        let mut index = self.lock();
        touch(&mut index, &name, variant, arch);

        let mut owned: Vec<(String, u64)> = index
            .entries
            .iter()
            .filter(|(_, e)| e.variant == variant && e.arch == arch)
            .map(|(n, e)| (n.clone(), e.last_use))
            .collect();
        owned.sort_by(|a, b| b.1.cmp(&a.1));

        let mut evicted = Vec::new();
        for (stale, _) in owned.into_iter().skip(self.retention) {
            index.entries.remove(&stale);
            let path = self.dir.join(&stale);
            match std::fs::remove_file(&path) {
                Ok(()) => log::info!("KernelCache: evicted {stale}"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => log::warn!("KernelCache: could not remove '{}': {err}", path.display()),
            }
            evicted.push(path);
        }
        self.save(&index)?;
        Ok(evicted)
    }

    /// Cached artifacts of `variant`, most recently used first.
    pub fn entries(&self, variant: &str) -> Vec<PathBuf> {
        let index = self.lock();
        let mut owned: Vec<(&String, u64)> = index
            .entries
            .iter()
            .filter(|(_, e)| e.variant == variant)
            .map(|(n, e)| (n, e.last_use))
            .collect();
        owned.sort_by(|a, b| b.1.cmp(&a.1));
        owned.into_iter().map(|(n, _)| self.dir.join(n)).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheIndex> {
        self.index.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn save(&self, index: &CacheIndex) -> Result<(), KernelError> {
        let path = self.dir.join(INDEX_FILE);
        let tmp = self.dir.join(format!("{INDEX_FILE}.tmp"));
        let text = serde_json::to_string_pretty(index)?;
        std::fs::write(&tmp, text).map_err(|err| KernelError::io(&tmp, err))?;
        std::fs::rename(&tmp, &path).map_err(|err| KernelError::io(&path, err))
    }
}

fn file_name(variant: &str, arch: &str, key: &str, ext: &str) -> String {
    format!("{variant}_{arch}_{key}.{ext}")
}

fn touch(index: &mut CacheIndex, name: &str, variant: &str, arch: &str) {
    index.next_use += 1;
    let last_use = index.next_use;
    index.entries.insert(
        name.to_string(),
        IndexEntry {
            variant: variant.to_string(),
            arch: arch.to_string(),
            last_use,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(cache: &KernelCache, variant: &str, key: &str) {
        store_for(cache, variant, "sm_86", key);
    }

    fn store_for(cache: &KernelCache, variant: &str, arch: &str, key: &str) {
        std::fs::write(cache.path_for(variant, arch, key, "cubin"), key).unwrap();
        cache.insert(variant, arch, key, "cubin").unwrap();
    }

    #[test]
    fn lru_keeps_most_recent_per_variant() {
        let dir = tempfile::tempdir().unwrap();
        let cache = KernelCache::open(dir.path(), 2).unwrap();
        store(&cache, "kernel", "k1");
        store(&cache, "kernel", "k2");
        store(&cache, "filter", "f1");
        // Touching k1 makes k2 the oldest kernel entry.
        assert!(cache.lookup("kernel", "sm_86", "k1", "cubin").unwrap().is_some());
        store(&cache, "kernel", "k3");

        assert!(!cache.path_for("kernel", "sm_86", "k2", "cubin").exists());
        assert!(cache.path_for("kernel", "sm_86", "k1", "cubin").exists());
        assert!(cache.path_for("filter", "sm_86", "f1", "cubin").exists());
        assert_eq!(cache.entries("kernel").len(), 2);
        assert_eq!(
            cache.entries("kernel")[0],
            cache.path_for("kernel", "sm_86", "k3", "cubin")
        );
    }

    #[test]
    fn architectures_are_retained_separately() {
        let dir = tempfile::tempdir().unwrap();
        let cache = KernelCache::open(dir.path(), 1).unwrap();
        store_for(&cache, "kernel", "sm_75", "k1");
        store_for(&cache, "kernel", "sm_86", "k1");
        assert!(cache.path_for("kernel", "sm_75", "k1", "cubin").exists());
        assert!(cache.path_for("kernel", "sm_86", "k1", "cubin").exists());

        store_for(&cache, "kernel", "sm_86", "k2");
        assert!(!cache.path_for("kernel", "sm_86", "k1", "cubin").exists());
        assert!(cache.path_for("kernel", "sm_75", "k1", "cubin").exists());
        assert_eq!(cache.entries("kernel").len(), 2);
    }

    #[test]
    fn index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = KernelCache::open(dir.path(), 5).unwrap();
            store(&cache, "kernel", "k1");
        }
        let cache = KernelCache::open(dir.path(), 5).unwrap();
        assert_eq!(cache.entries("kernel").len(), 1);
    }

    #[test]
    fn missing_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = KernelCache::open(dir.path(), 5).unwrap();
        store(&cache, "kernel", "k1");
        std::fs::remove_file(cache.path_for("kernel", "sm_86", "k1", "cubin")).unwrap();
        assert!(cache.lookup("kernel", "sm_86", "k1", "cubin").unwrap().is_none());
        assert!(cache.entries("kernel").is_empty());
    }

    #[test]
    fn corrupt_index_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(INDEX_FILE), "{ broken").unwrap();
        let cache = KernelCache::open(dir.path(), 5).unwrap();
        assert!(cache.entries("kernel").is_empty());
    }
}
