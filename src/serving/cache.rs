//! Lazily loaded, shared bundles.
//!
//! The map lock is held only to fetch or insert a key's cell; the load
//! itself happens inside the cell, so concurrent first requests for one
//! key wait for a single load and all receive the same [`Arc`]. A failed
//! load leaves the cell empty and the next request tries again.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::bundle::ModelBundle;
use crate::error::{MedisightError, Result};

/// Produces a bundle for a key. Called from a blocking thread.
pub trait BundleLoader: Send + Sync + 'static {
    fn load(&self, key: &str, path: &Path) -> Result<ModelBundle>;
}

/// Reads bundles from disk with [`ModelBundle::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FileBundleLoader;

impl BundleLoader for FileBundleLoader {
    fn load(&self, _key: &str, path: &Path) -> Result<ModelBundle> {
        ModelBundle::load(path)
    }
}

type Slot = Arc<OnceCell<Arc<ModelBundle>>>;

/// Key to bundle cache with single-flight loading.
pub struct ModelCache {
    loader: Arc<dyn BundleLoader>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl ModelCache {
    pub fn new(loader: Arc<dyn BundleLoader>) -> Self {
        Self {
            loader,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached bundle for `key`, loading it from `path` on first use.
    pub async fn get_or_load(&self, key: &str, path: &Path) -> Result<Arc<ModelBundle>> {
        let slot = self.slot(key);
        let bundle = slot
            .get_or_try_init(|| self.load(key.to_string(), path.to_path_buf()))
            .await?;
        Ok(Arc::clone(bundle))
    }

    /// The bundle for `key` if it is already loaded.
    pub fn get(&self, key: &str) -> Option<Arc<ModelBundle>> {
        self.slots.lock().get(key).and_then(|slot| slot.get().cloned())
    }

    pub fn is_loaded(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Keys with a loaded bundle, sorted.
    pub fn loaded_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .slots
            .lock()
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Drop the cached bundle for `key`. In-flight holders keep their `Arc`.
    pub fn evict(&self, key: &str) -> bool {
        self.slots.lock().remove(key).is_some()
    }

    fn slot(&self, key: &str) -> Slot {
        let mut slots = self.slots.lock();
        Arc::clone(slots.entry(key.to_string()).or_default())
    }

    async fn load(&self, key: String, path: PathBuf) -> Result<Arc<ModelBundle>> {
        log::info!("Loading model '{}' from {}", key, path.display());
        let loader = Arc::clone(&self.loader);
        let task_key = key.clone();
        let loaded = tokio::task::spawn_blocking(move || loader.load(&task_key, &path))
            .await
            .map_err(|e| MedisightError::internal(format!("loader task for '{key}' failed: {e}")))?;

        match loaded {
            Ok(bundle) => {
                log::info!(
                    "Loaded model '{}' ({} features, best {})",
                    key,
                    bundle.input_dimensionality(),
                    bundle.best().key
                );
                Ok(Arc::new(bundle))
            }
            Err(e) => {
                log::warn!("Failed to load model '{key}': {e}");
                Err(e)
            }
        }
    }
}

impl fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelCache")
            .field("loaded", &self.loaded_keys())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::CountingLoader;
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_load() {
        let loader = Arc::new(CountingLoader::new());
        let cache = Arc::new(ModelCache::new(loader.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_or_load("common", Path::new("common.bundle")).await })
            })
            .collect();
        let bundles: Vec<Arc<ModelBundle>> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert_eq!(loader.calls(), 1);
        assert!(bundles.iter().all(|b| Arc::ptr_eq(b, &bundles[0])));
        assert_eq!(cache.loaded_keys(), ["common"]);
    }

    #[tokio::test]
    async fn test_failed_load_not_cached() {
        let mut failing = CountingLoader::new();
        failing.fail = true;
        let loader = Arc::new(failing);
        let cache = ModelCache::new(loader.clone());

        for _ in 0..2 {
            let err = cache.get_or_load("heart", Path::new("heart.bundle")).await.unwrap_err();
            assert_eq!(err.kind(), "corrupt_artifact");
        }
        assert_eq!(loader.calls(), 2);
        assert!(!cache.is_loaded("heart"));
    }

    #[tokio::test]
    async fn test_evict_forces_reload() {
        let loader = Arc::new(CountingLoader::new());
        let cache = ModelCache::new(loader.clone());

        cache.get_or_load("common", Path::new("a")).await.unwrap();
        cache.get_or_load("common", Path::new("a")).await.unwrap();
        assert_eq!(loader.calls(), 1);

        assert!(cache.evict("common"));
        assert!(cache.get("common").is_none());
        cache.get_or_load("common", Path::new("a")).await.unwrap();
        assert_eq!(loader.calls(), 2);
    }

    #[tokio::test]
    async fn test_file_loader_reads_saved_bundle() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("common.bundle");
        CountingLoader::new().bundle.save(&path).unwrap();

        let cache = ModelCache::new(Arc::new(FileBundleLoader));
        let bundle = cache.get_or_load("common", &path).await.unwrap();
        assert_eq!(bundle.labels(), ["flu", "migraine"]);

        let err = cache
            .get_or_load("missing", &dir.path().join("missing.bundle"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "io");
    }
}
