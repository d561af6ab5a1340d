use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    error::{Error, Result},
    tantivy_index::{self, IndexResources},
};

/// Default writer heap shared by the writer's indexing threads.
pub const DEFAULT_WRITER_MEMORY_BUDGET: usize = 50_000_000;

const MAX_NAME_LEN: usize = 128;

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub writer_memory_budget: usize,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            writer_memory_budget: DEFAULT_WRITER_MEMORY_BUDGET,
        }
    }
}

/// Advisory residency report for one discovered index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexMemoryStatus {
    pub name: String,
    pub discovered: bool,
    pub loaded: bool,
    pub estimated_bytes: u64,
}

/// Registry of known indexes and the subset currently loaded.
///
/// Every index name has its own lock. Loading, building, unloading and
/// removing a name all happen under that lock, so at most one
/// [`IndexResources`] (and therefore one writer) exists per name, while
/// operations on different names proceed independently.
pub struct IndexManager {
    base_dir: PathBuf,
    options: ManagerOptions,
    discovered: RwLock<BTreeSet<String>>,
    loaded: RwLock<HashMap<String, Arc<IndexResources>>>,
    name_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Check that `name` can be used verbatim as a directory name.
pub fn validate_index_name(name: &str) -> Result<()> {
    let invalid = |reason| Error::InvalidIndexName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("name is longer than 128 bytes"));
    }
    if name.starts_with('.') {
        return Err(invalid("name starts with '.'"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(invalid("only ASCII letters, digits, '-', '_' and '.' are allowed"));
    }
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl IndexManager {
    /// Create a manager over `base_dir` and run discovery.
    pub fn open(base_dir: &Path) -> Result<Self> {
        Self::with_options(base_dir, ManagerOptions::default())
    }

    pub fn with_options(base_dir: &Path, options: ManagerOptions) -> Result<Self> {
        std::fs::create_dir_all(base_dir)
            .map_err(|_| Error::DataDir(base_dir.to_path_buf()))?;

        let manager = Self {
            base_dir: base_dir.to_path_buf(),
            options,
            discovered: RwLock::new(BTreeSet::new()),
            loaded: RwLock::new(HashMap::new()),
            name_locks: Mutex::new(HashMap::new()),
        };
        manager.discover()?;
        Ok(manager)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn storage_dir(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    fn name_lock(&self, name: &str) -> Arc<Mutex<()>> {
        lock(&self.name_locks)
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Scan the storage root and record every valid index directory.
    ///
    /// Entries that are not directories, have unusable names or lack a
    /// committed-segment marker are skipped with a warning. Returns the
    /// number of names newly discovered.
    pub fn discover(&self) -> Result<usize> {
        let mut found = Vec::new();

        for entry in std::fs::read_dir(&self.base_dir)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "failed to read index storage entry");
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            if let Err(e) = validate_index_name(&name) {
                warn!(path = %path.display(), error = %e, "skipping directory");
                continue;
            }

            match tantivy_index::is_index_dir(&path) {
                Ok(true) => found.push(name),
                Ok(false) => {
                    warn!(
                        path = %path.display(),
                        "skipping directory without committed index"
                    );
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable index");
                }
            }
        }

        let mut discovered =
            self.discovered.write().unwrap_or_else(PoisonError::into_inner);
        let added = found
            .into_iter()
            .filter(|name| discovered.insert(name.clone()))
            .count();
        info!(
            base_dir = %self.base_dir.display(),
            added,
            total = discovered.len(),
            "index discovery finished"
        );
        Ok(added)
    }

    /// Record an index that exists on disk without loading it.
    ///
    /// Returns `false` when the name was already discovered.
    pub fn register(&self, name: &str) -> Result<bool> {
        validate_index_name(name)?;
        if !tantivy_index::is_index_dir(&self.storage_dir(name))? {
            return Err(self.not_found(name));
        }
        Ok(self
            .discovered
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string()))
    }

    /// Return the loaded resources for `name`, creating them if needed.
    ///
    /// A cache hit does not take the name lock, so readers are never
    /// queued behind a build holding it.
    pub fn get_or_create_resources(
        &self,
        name: &str,
    ) -> Result<Arc<IndexResources>> {
        validate_index_name(name)?;
        if let Some(resources) = self.cached(name) {
            return Ok(resources);
        }
        let name_lock = self.name_lock(name);
        let _guard = lock(&name_lock);
        self.load_locked(name)
    }

    /// Return the resources for an already discovered index, loading it if
    /// needed but never creating it.
    ///
    /// Discovery is re-checked under the name lock, so a concurrent
    /// [`remove`](Self::remove) yields `IndexNotFound` instead of an empty
    /// index recreated in its place.
    pub fn open_existing(&self, name: &str) -> Result<Arc<IndexResources>> {
        if validate_index_name(name).is_err() {
            return Err(self.not_found(name));
        }
        if let Some(resources) = self.cached(name) {
            return Ok(resources);
        }
        let name_lock = self.name_lock(name);
        let _guard = lock(&name_lock);
        if !self.exists(name) {
            return Err(self.not_found(name));
        }
        self.load_locked(name)
    }

    fn cached(&self, name: &str) -> Option<Arc<IndexResources>> {
        self.loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Run `f` with the resources for `name` while holding its name lock.
    ///
    /// Unload, remove and other exclusive users of the same name wait until
    /// `f` returns. Readers that only need a snapshot should use
    /// [`get_or_create_resources`](Self::get_or_create_resources) instead.
    pub fn with_exclusive<T>(
        &self,
        name: &str,
        f: impl FnOnce(&IndexResources) -> Result<T>,
    ) -> Result<T> {
        validate_index_name(name)?;
        let name_lock = self.name_lock(name);
        let _guard = lock(&name_lock);
        let resources = self.load_locked(name)?;
        f(&resources)
    }

    fn load_locked(&self, name: &str) -> Result<Arc<IndexResources>> {
        if let Some(resources) = self.cached(name) {
            return Ok(resources);
        }

        let dir = self.storage_dir(name);
        let resources = Arc::new(IndexResources::open(
            name,
            &dir,
            self.options.writer_memory_budget,
        )?);
        info!(index = name, dir = %dir.display(), "loaded index");

        self.discovered
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
        self.loaded
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Arc::clone(&resources));
        Ok(resources)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.discovered
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Discovered names in lexicographic order.
    pub fn list_names(&self) -> Vec<String> {
        self.discovered
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn not_found(&self, name: &str) -> Error {
        Error::IndexNotFound {
            name: name.to_string(),
            available: self.list_names(),
        }
    }

    /// Close the handles for `name`. The name stays discovered.
    ///
    /// Returns `false` if the index was not loaded.
    pub fn unload(&self, name: &str) -> bool {
        if validate_index_name(name).is_err() {
            return false;
        }
        let name_lock = self.name_lock(name);
        let _guard = lock(&name_lock);
        self.unload_locked(name)
    }

    fn unload_locked(&self, name: &str) -> bool {
        let removed = self
            .loaded
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        match removed {
            Some(resources) => {
                resources.close();
                info!(index = name, "unloaded index");
                true
            }
            None => false,
        }
    }

    /// Unload every loaded index, returning how many were unloaded.
    pub fn unload_all(&self) -> usize {
        let names: Vec<String> = self
            .loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.iter().filter(|name| self.unload(name)).count()
    }

    /// Release everything at end of life.
    pub fn shutdown(&self) {
        let count = self.unload_all();
        debug!(count, "index manager shut down");
    }

    /// Unload `name`, delete its storage directory, then forget it.
    ///
    /// If the delete fails the name stays discovered (unloaded) so the
    /// caller can retry. Returns `false` if the name was not discovered.
    pub fn remove(&self, name: &str) -> Result<bool> {
        validate_index_name(name)?;
        let name_lock = self.name_lock(name);
        let guard = lock(&name_lock);

        self.unload_locked(name);

        let dir = self.storage_dir(name);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
            info!(index = name, dir = %dir.display(), "removed index storage");
        }

        let was_known = self
            .discovered
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);

        self.release_name_lock(name, &name_lock);
        drop(guard);
        Ok(was_known)
    }

    /// Drop the lock entry for a forgotten name unless someone else holds
    /// or waits on it. Clones only happen under the map lock, so the count
    /// cannot grow while it is checked.
    fn release_name_lock(&self, name: &str, held: &Arc<Mutex<()>>) {
        let mut locks = lock(&self.name_locks);
        if locks
            .get(name)
            .is_some_and(|l| Arc::ptr_eq(l, held) && Arc::strong_count(l) == 2)
        {
            locks.remove(name);
        }
    }

    /// Committed document count for `name`, loading it if necessary.
    pub fn document_count(&self, name: &str) -> Result<u64> {
        self.open_existing(name)?.num_docs()
    }

    /// Residency report for every discovered index, sorted by name.
    pub fn memory_status(&self) -> Vec<IndexMemoryStatus> {
        let loaded = self.loaded.read().unwrap_or_else(PoisonError::into_inner);
        self.list_names()
            .into_iter()
            .map(|name| {
                let resources = loaded.get(&name);
                IndexMemoryStatus {
                    discovered: true,
                    loaded: resources.is_some(),
                    estimated_bytes: resources
                        .map(|r| r.disk_size())
                        .unwrap_or(0),
                    name,
                }
            })
            .collect()
    }
}

impl Drop for IndexManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexManager")
            .field("base_dir", &self.base_dir)
            .field("discovered", &self.list_names())
            .finish_non_exhaustive()
    }
}
