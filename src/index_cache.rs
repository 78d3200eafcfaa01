use std::cell::RefCell;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::nearest::NearestIndex;

/// Where prebuilt indexes live between runs. Rebuilding the index for a
/// chromosome-scale variant table dominates the runtime of small queries,
/// so callers can plug in a persistent store; the algorithms never know.
pub trait IndexStore<T> {
    /// The cached index for `source`, if one exists and is still valid.
    fn load(&self, source: &Path) -> Option<NearestIndex<T>>;

    /// Persist a freshly built index for `source`.
    fn save(&self, source: &Path, index: &NearestIndex<T>) -> Result<()>;
}

/// Fetch the index for `source` from the store, or build and persist it.
pub fn load_or_build<T, F>(
    source: &Path,
    store: &dyn IndexStore<T>,
    build: F,
) -> Result<NearestIndex<T>>
where
    F: FnOnce() -> Result<NearestIndex<T>>,
{
    if let Some(index) = store.load(source) {
        return Ok(index);
    }
    let index = build()?;
    store.save(source, &index)?;
    Ok(index)
}

/// Sidecar file next to the source, invalidated whenever the source has
/// been modified after the sidecar was written.
pub struct FileStore;

impl FileStore {
    pub fn sidecar(source: &Path) -> PathBuf {
        let mut name = source
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".idx");
        source.with_file_name(name)
    }

    fn is_current(source: &Path, sidecar: &Path) -> bool {
        let (Ok(source_meta), Ok(cache_meta)) = (fs::metadata(source), fs::metadata(sidecar))
        else {
            return false;
        };
        match (source_meta.modified(), cache_meta.modified()) {
            (Ok(source_ts), Ok(cache_ts)) => source_ts <= cache_ts,
            _ => false,
        }
    }
}

impl<T: Serialize + DeserializeOwned> IndexStore<T> for FileStore {
    fn load(&self, source: &Path) -> Option<NearestIndex<T>> {
        let sidecar = Self::sidecar(source);
        if !Self::is_current(source, &sidecar) {
            return None;
        }
        let file = File::open(&sidecar).ok()?;
        match bincode::deserialize_from(BufReader::new(file)) {
            Ok(index) => {
                debug!("loaded cached index {}", sidecar.display());
                Some(index)
            }
            Err(err) => {
                warn!(
                    "ignoring unreadable index cache {}: {}",
                    sidecar.display(),
                    err
                );
                None
            }
        }
    }

    fn save(&self, source: &Path, index: &NearestIndex<T>) -> Result<()> {
        let sidecar = Self::sidecar(source);
        let file = File::create(&sidecar)?;
        bincode::serialize_into(BufWriter::new(file), index).map_err(|err| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("failed to serialize index: {}", err),
            )
        })?;
        debug!("wrote index cache {}", sidecar.display());
        Ok(())
    }
}

/// In-process store for repeated builds within one run, and for tests.
pub struct MemoryStore<T> {
    cached: RefCell<FxHashMap<PathBuf, NearestIndex<T>>>,
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        MemoryStore {
            cached: RefCell::new(FxHashMap::default()),
        }
    }
}

impl<T: Clone> IndexStore<T> for MemoryStore<T> {
    fn load(&self, source: &Path) -> Option<NearestIndex<T>> {
        self.cached.borrow().get(source).cloned()
    }

    fn save(&self, source: &Path, index: &NearestIndex<T>) -> Result<()> {
        self.cached
            .borrow_mut()
            .insert(source.to_path_buf(), index.clone());
        Ok(())
    }
}

/// Disables caching entirely.
pub struct NoStore;

impl<T> IndexStore<T> for NoStore {
    fn load(&self, _source: &Path) -> Option<NearestIndex<T>> {
        None
    }

    fn save(&self, _source: &Path, _index: &NearestIndex<T>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    fn sample_index() -> NearestIndex<String> {
        NearestIndex::build(vec![
            ("1".to_string(), 100, "rs1".to_string()),
            ("1".to_string(), 900, "rs2".to_string()),
            ("2".to_string(), 50, "rs3".to_string()),
        ])
    }

    #[test]
    fn file_store_round_trips_an_index() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("snps.txt");
        fs::write(&source, "placeholder").unwrap();

        let index = sample_index();
        let store = FileStore;
        IndexStore::<String>::save(&store, &source, &index).unwrap();
        assert!(FileStore::sidecar(&source).exists());

        let loaded: NearestIndex<String> = store.load(&source).expect("cache should be valid");
        assert_eq!(loaded.len(), 3);
        let (entry, _) = loaded.nearest("1", 850).unwrap();
        assert_eq!((entry.pos, entry.payload.as_str()), (900, "rs2"));
    }

    #[test]
    fn file_store_ignores_stale_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("snps.txt");
        fs::write(&source, "v1").unwrap();

        let store = FileStore;
        IndexStore::<String>::save(&store, &source, &sample_index()).unwrap();

        // Touch the source after the sidecar; mtime resolution can be a
        // full second on some filesystems.
        sleep(Duration::from_millis(1100));
        fs::write(&source, "v2").unwrap();

        assert!(IndexStore::<String>::load(&store, &source).is_none());
    }

    #[test]
    fn load_or_build_only_builds_on_miss() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("snps.txt");
        fs::write(&source, "placeholder").unwrap();

        let store = MemoryStore::default();
        let mut builds = 0;
        for _ in 0..3 {
            let index = load_or_build(&source, &store, || {
                builds += 1;
                Ok(sample_index())
            })
            .unwrap();
            assert_eq!(index.len(), 3);
        }
        assert_eq!(builds, 1);
    }

    #[test]
    fn no_store_always_rebuilds() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("snps.txt");
        fs::write(&source, "placeholder").unwrap();

        let mut builds = 0;
        for _ in 0..2 {
            load_or_build(&source, &NoStore, || {
                builds += 1;
                Ok(sample_index())
            })
            .unwrap();
        }
        assert_eq!(builds, 2);
        assert!(!FileStore::sidecar(&source).exists());
    }
}
