//! Registry multiplexing lookups across every (pack, index) pair under a
//! root folder.
//!
//! The registry discovers packs by scanning for `<name>.pack` files with a
//! sibling `<name>.idx`, and learns about new ones when a transactional
//! writer publishes a commit. Indexes are small and consulted first, so they
//! live in their own bounded cache; open pack handles are cached separately
//! and only materialize once an index reports a hit. Both caches close file
//! handles on eviction — the handle actually closes when the last in-flight
//! read drops its `Arc`.

use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, warn};

use crate::cache::Cache;
use crate::error::Result;
use crate::fsio;
use crate::hash::{self, Hash};
use crate::index::IndexReader;
use crate::pack::PackReader;
use crate::processing::PackProcessing;
use crate::Error;

/// A pack reader shared between concurrent lookups. The mutex serializes
/// access to the reader's single seek cursor.
type SharedPackReader = Arc<Mutex<PackReader<File>>>;

pub struct PackPack {
    pack_dir: PathBuf,
    temp_dir: PathBuf,
    /// Names of every published pack. When a hash is present in more than
    /// one pack, whichever the iteration reaches first answers; all copies
    /// of a content-addressed block are equally valid.
    known: RwLock<BTreeSet<String>>,
    readers: Mutex<Cache<String, SharedPackReader>>,
    indexes: Mutex<Cache<String, Arc<IndexReader>>>,
}

impl PackPack {
    /// Opens the registry: creates both directories if missing and records
    /// every `<name>.pack` with a sibling `<name>.idx` as known. A pack
    /// without an index is unfinished or corrupt and is skipped.
    pub fn open(
        pack_dir: impl Into<PathBuf>,
        temp_dir: impl Into<PathBuf>,
        max_open: usize,
    ) -> Result<Self> {
        let pack_dir = pack_dir.into();
        let temp_dir = temp_dir.into();
        std::fs::create_dir_all(&pack_dir)?;
        std::fs::create_dir_all(&temp_dir)?;

        let mut known = BTreeSet::new();
        for entry in std::fs::read_dir(&pack_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("pack") {
                continue;
            }
            let name = match path.file_stem().and_then(|s| s.to_str()) {
                Some(n) => n,
                None => continue,
            };
            if pack_dir.join(format!("{name}.idx")).is_file() {
                known.insert(name.to_string());
            } else {
                warn!(pack = name, "pack without index, skipping");
            }
        }

        debug!(
            packs = known.len(),
            dir = %pack_dir.display(),
            "opened pack registry"
        );

        Ok(Self {
            pack_dir,
            temp_dir,
            known: RwLock::new(known),
            readers: Mutex::new(Cache::new(max_open)),
            indexes: Mutex::new(Cache::new(max_open)),
        })
    }

    /// Fetches the block body for a raw key.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.get_hash(&hash::sum(key))
    }

    /// Fetches the block body for a key hash, trying each known pack until
    /// one of its indexes claims the hash.
    pub fn get_hash(&self, key: &Hash) -> Result<Vec<u8>> {
        for name in self.snapshot() {
            let idx = match self.index(&name)? {
                Some(idx) => idx,
                None => continue,
            };
            let offset = match idx.get_offset(key) {
                Ok(offset) => offset,
                Err(Error::NotFound) => continue,
                Err(e) => return Err(e),
            };
            let reader = match self.reader(&name)? {
                Some(reader) => reader,
                None => continue,
            };
            let (_, body) = reader.lock().unwrap().read_value_at(offset)?;
            return Ok(body);
        }
        Err(Error::NotFound)
    }

    /// Whether any known pack holds the raw key.
    pub fn has(&self, key: &[u8]) -> Result<bool> {
        self.has_hash(&hash::sum(key))
    }

    /// Whether any known pack holds the hash. Only indexes are consulted.
    pub fn has_hash(&self, key: &Hash) -> Result<bool> {
        for name in self.snapshot() {
            let idx = match self.index(&name)? {
                Some(idx) => idx,
                None => continue,
            };
            if idx.contains(key) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Declared body size of the block for a key hash, from the first index
    /// that knows it.
    pub fn get_size(&self, key: &Hash) -> Result<u32> {
        for name in self.snapshot() {
            let idx = match self.index(&name)? {
                Some(idx) => idx,
                None => continue,
            };
            match idx.get_size(key) {
                Ok(size) => return Ok(size),
                Err(Error::NotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::NotFound)
    }

    /// Records a freshly published pack so subsequent reads consider it.
    pub fn add_pack(&self, name: &str) {
        self.known.write().unwrap().insert(name.to_string());
    }

    /// Constructs a transactional writer bound to this registry.
    pub fn new_pack_processing(self: &Arc<Self>, max_elements_per_pack: usize) -> PackProcessing {
        PackProcessing::new(Arc::clone(self), max_elements_per_pack)
    }

    /// Purges both caches. Each held file handle closes once the last
    /// in-flight reader releases it.
    pub fn close(&self) {
        self.readers.lock().unwrap().purge();
        self.indexes.lock().unwrap().purge();
    }

    fn snapshot(&self) -> Vec<String> {
        self.known.read().unwrap().iter().cloned().collect()
    }

    /// Fetches or loads the index for `name`. `Ok(None)` means the index
    /// was corrupt and the pack has been excluded from the registry.
    fn index(&self, name: &str) -> Result<Option<Arc<IndexReader>>> {
        let key = name.to_string();
        if let Some(idx) = self.indexes.lock().unwrap().get(&key) {
            return Ok(Some(idx));
        }

        match IndexReader::from_file(&self.index_path(name)) {
            Ok(idx) => {
                let idx = Arc::new(idx);
                self.indexes.lock().unwrap().add(key, idx.clone());
                Ok(Some(idx))
            }
            Err(Error::Format(msg)) => {
                warn!(pack = name, error = %msg, "corrupt index, excluding pack");
                self.known.write().unwrap().remove(name);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Fetches or opens the pack reader for `name`, validating the pack
    /// header on first open. `Ok(None)` means the pack was corrupt and has
    /// been excluded.
    fn reader(&self, name: &str) -> Result<Option<SharedPackReader>> {
        let key = name.to_string();
        if let Some(reader) = self.readers.lock().unwrap().get(&key) {
            return Ok(Some(reader));
        }

        let file = fsio::open(&self.pack_path(name))?;
        let mut reader = PackReader::new(file);
        match reader.read_header() {
            Ok(()) => {}
            Err(Error::Format(msg)) => {
                warn!(pack = name, error = %msg, "corrupt pack, excluding");
                self.known.write().unwrap().remove(name);
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        let reader = Arc::new(Mutex::new(reader));
        self.readers.lock().unwrap().add(key, reader.clone());
        Ok(Some(reader))
    }

    pub(crate) fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub(crate) fn pack_path(&self, name: &str) -> PathBuf {
        self.pack_dir.join(format!("{name}.pack"))
    }

    pub(crate) fn index_path(&self, name: &str) -> PathBuf {
        self.pack_dir.join(format!("{name}.idx"))
    }

    pub(crate) fn temp_pack_path(&self, name: &str) -> PathBuf {
        self.temp_dir.join(format!("{name}.pack.writing"))
    }

    pub(crate) fn temp_index_path(&self, name: &str) -> PathBuf {
        self.temp_dir.join(format!("{name}.idx.writing"))
    }
}
