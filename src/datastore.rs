//! The datastore facade: keyed get/put/has/delete/batch/sync over the
//! packfile core.
//!
//! Lookup order on `get`: block cache, tombstone, the shared writer's
//! in-flight pack, then the pack registry. Deletes only append to the
//! tombstone; the block stays in its pack until a future repack, so a later
//! put of the same key stays shadowed until the tombstone is cleared.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::cache::Cache;
use crate::config::DatastoreConfig;
use crate::error::Result;
use crate::hash::{self, Hash};
use crate::packpack::PackPack;
use crate::processing::PackProcessing;
use crate::tombstone::Tombstone;
use crate::Error;

const PACK_FOLDER: &str = "packs";
const PROCESSING_FOLDER: &str = "processing";
const TOMBSTONE_NAME: &str = "tombstone.bin";

pub struct Datastore {
    tombstone: Tombstone,
    cache: Mutex<Cache<Hash, Vec<u8>>>,
    packs: Arc<PackPack>,
    /// The shared single-object writer behind `put` and `sync`; batches get
    /// a writer of their own.
    shared: Mutex<PackProcessing>,
    folder: PathBuf,
    pack_max_num_elements: usize,
}

impl Datastore {
    /// Opens (or creates) a store rooted at `config.folder`.
    pub fn open(config: DatastoreConfig) -> Result<Self> {
        let folder = config.folder.clone();

        let tombstone = Tombstone::open(&folder.join(TOMBSTONE_NAME))?;
        let packs = Arc::new(PackPack::open(
            folder.join(PACK_FOLDER),
            folder.join(PROCESSING_FOLDER),
            config.max_open_packs,
        )?);
        let shared = Mutex::new(packs.new_pack_processing(config.pack_max_num_elements));

        Ok(Self {
            tombstone,
            cache: Mutex::new(Cache::new(config.block_cache_num_elements)),
            packs,
            shared,
            folder,
            pack_max_num_elements: config.pack_max_num_elements,
        })
    }

    /// Stores `value` under `key` through the shared writer. The write
    /// becomes durable and registry-visible at the next [`sync`](Self::sync).
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.shared.lock().unwrap().write_block(key, value)
    }

    /// Fetches the value for `key`, or [`Error::NotFound`] if the key was
    /// never written or has been deleted.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let h = hash::sum(key);

        if let Some(value) = self.cache.lock().unwrap().get(&h) {
            return Ok(value);
        }

        if self.tombstone.has_hash(&h) {
            return Err(Error::NotFound);
        }

        if let Some(value) = self.shared.lock().unwrap().get_pending(&h)? {
            return Ok(value);
        }

        let value = self.packs.get_hash(&h)?;
        self.cache.lock().unwrap().add(h, value.clone());
        Ok(value)
    }

    /// Whether `key` currently resolves to a value.
    pub fn has(&self, key: &[u8]) -> Result<bool> {
        let h = hash::sum(key);

        if self.cache.lock().unwrap().contains(&h) {
            return Ok(true);
        }
        if self.tombstone.has_hash(&h) {
            return Ok(false);
        }
        if self.shared.lock().unwrap().contains_pending(&h) {
            return Ok(true);
        }
        self.packs.has_hash(&h)
    }

    /// Declared size of the block for `key`, answered from the pack indexes
    /// alone.
    pub fn get_size(&self, key: &[u8]) -> Result<u32> {
        self.packs.get_size(&hash::sum(key))
    }

    /// Records `key` as deleted and drops it from the cache. The block
    /// itself stays in its pack.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let h = hash::sum(key);
        self.cache.lock().unwrap().remove(&h);
        self.tombstone.add_hash(&h)
    }

    /// Commits the shared writer, atomically publishing everything `put`
    /// since the last sync.
    pub fn sync(&self) -> Result<()> {
        self.shared.lock().unwrap().commit()
    }

    /// Creates an isolated write batch; its puts become visible atomically
    /// at [`Batch::commit`].
    pub fn batch(&self) -> Batch {
        Batch {
            proc: self.packs.new_pack_processing(self.pack_max_num_elements),
        }
    }

    /// Total bytes on disk under the store's folder.
    pub fn disk_usage(&self) -> Result<u64> {
        dir_size(&self.folder)
    }

    /// Purges the cache and closes the registry and tombstone. Writes not
    /// published by `sync` or a batch commit stay staged under the
    /// processing directory and are ignored on the next open.
    pub fn close(&self) -> Result<()> {
        self.cache.lock().unwrap().purge();
        self.packs.close();
        self.tombstone.close()
    }
}

fn dir_size(dir: &Path) -> Result<u64> {
    let mut size = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            size += dir_size(&entry.path())?;
        } else {
            size += meta.len();
        }
    }
    Ok(size)
}

/// A write batch backed by its own transactional writer.
pub struct Batch {
    proc: PackProcessing,
}

impl Batch {
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.proc.write_block(key, value)
    }

    /// Deletes are not supported on a batch; route them through
    /// [`Datastore::delete`].
    pub fn delete(&mut self, _key: &[u8]) -> Result<()> {
        Err(Error::NotSupportedOnBatch)
    }

    /// Atomically publishes every put in this batch.
    pub fn commit(&mut self) -> Result<()> {
        self.proc.commit()
    }
}
