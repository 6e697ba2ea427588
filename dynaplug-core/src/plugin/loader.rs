//! Module loading and the module cache.
//!
//! Loaders keep a [`ModuleCache`] of module images keyed by entry path, so a
//! second load of the same path returns the cached image. Deactivation evicts
//! every image under the plugin directory; the next load then picks up the
//! freshly compiled code instead of a stale cached instance.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::module::{ModuleError, PluginModule};

/// Turns a compiled entry point into a live module.
pub trait ModuleLoader: Send + Sync {
    /// Loads the module at `entry`, reusing a cached image when present.
    fn load(&self, entry: &Path) -> Result<Box<dyn PluginModule>, ModuleError>;

    /// Drops every cached image whose path lies under `prefix` and returns
    /// how many were dropped.
    fn evict(&self, prefix: &Path) -> usize;
}

/// Path-keyed cache of loaded module images.
#[derive(Debug)]
pub struct ModuleCache<T> {
    entries: Mutex<HashMap<PathBuf, T>>,
}

impl<T> Default for ModuleCache<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> ModuleCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached image for `path`, creating it with `create` when
    /// absent. A failed `create` leaves the cache untouched.
    pub fn get_or_try_insert<E>(
        &self,
        path: &Path,
        create: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        let mut entries = self.lock();
        if let Some(image) = entries.get(path) {
            debug!(path = %path.display(), "Module cache hit");
            return Ok(image.clone());
        }
        let image = create()?;
        entries.insert(path.to_path_buf(), image.clone());
        Ok(image)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Removes every entry whose path starts with `prefix`, compared by
    /// whole path components.
    pub fn evict_prefix(&self, prefix: &Path) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|path, _| !path.starts_with(prefix));
        before - entries.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, T>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub type ModuleFactory = Arc<dyn Fn() -> Box<dyn PluginModule> + Send + Sync>;

/// Loads modules that are linked into the host process.
///
/// Embedders (and tests) publish a factory per entry path. Publishing a new
/// factory models a recompilation: until the old image is evicted, loads of
/// that path keep returning modules built by the cached factory.
#[derive(Default)]
pub struct InProcessLoader {
    published: Mutex<HashMap<PathBuf, ModuleFactory>>,
    cache: ModuleCache<ModuleFactory>,
}

impl InProcessLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish<F>(&self, entry: impl Into<PathBuf>, factory: F)
    where
        F: Fn() -> Box<dyn PluginModule> + Send + Sync + 'static,
    {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.into(), Arc::new(factory));
    }

    pub fn is_cached(&self, entry: &Path) -> bool {
        self.cache.contains(entry)
    }
}

impl ModuleLoader for InProcessLoader {
    fn load(&self, entry: &Path) -> Result<Box<dyn PluginModule>, ModuleError> {
        let factory = self.cache.get_or_try_insert(entry, || {
            self.published
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(entry)
                .cloned()
                .ok_or_else(|| ModuleError::Load {
                    path: entry.to_path_buf(),
                    message: "no module has been published at this path".to_string(),
                })
        })?;
        Ok(factory())
    }

    fn evict(&self, prefix: &Path) -> usize {
        self.cache.evict_prefix(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::module::ActivationContext;

    struct Tagged(&'static str);

    impl PluginModule for Tagged {
        fn activate(&mut self, _context: &mut ActivationContext) -> Result<(), ModuleError> {
            Ok(())
        }

        fn deactivate(&mut self, _context: &mut ActivationContext) -> Result<(), ModuleError> {
            Err(ModuleError::Deactivation(self.0.to_string()))
        }
    }

    fn tag_of(mut module: Box<dyn PluginModule>) -> String {
        let mut context = ActivationContext::new("t", "/t");
        match module.deactivate(&mut context) {
            Err(ModuleError::Deactivation(tag)) => tag,
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_evict_prefix_matches_whole_components() {
        let cache = ModuleCache::new();
        cache
            .get_or_try_insert::<()>(Path::new("/ws/plugin/out/plugin.js"), || Ok(1))
            .unwrap();
        cache
            .get_or_try_insert::<()>(Path::new("/ws/plugin/out/util.js"), || Ok(2))
            .unwrap();
        cache
            .get_or_try_insert::<()>(Path::new("/ws/plugin-two/out/plugin.js"), || Ok(3))
            .unwrap();

        assert_eq!(cache.evict_prefix(Path::new("/ws/plugin")), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(Path::new("/ws/plugin-two/out/plugin.js")));
    }

    #[test]
    fn test_failed_create_is_not_cached() {
        let cache: ModuleCache<u32> = ModuleCache::new();
        let result = cache.get_or_try_insert(Path::new("/a"), || Err("boom"));

        assert_eq!(result, Err("boom"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_in_process_loader_serves_cached_image_until_evicted() {
        let loader = InProcessLoader::new();
        let entry = Path::new("/ws/hooks/out/plugin.js");
        loader.publish(entry, || Box::new(Tagged("v1")));
        assert_eq!(tag_of(loader.load(entry).unwrap()), "v1");

        loader.publish(entry, || Box::new(Tagged("v2")));
        assert_eq!(tag_of(loader.load(entry).unwrap()), "v1");

        assert_eq!(loader.evict(Path::new("/ws/hooks")), 1);
        assert_eq!(tag_of(loader.load(entry).unwrap()), "v2");
    }

    #[test]
    fn test_unpublished_entry_fails_to_load() {
        let loader = InProcessLoader::new();
        let err = loader
            .load(Path::new("/ws/missing/out/plugin.js"))
            .err()
            .unwrap();

        assert!(matches!(err, ModuleError::Load { .. }));
    }
}
