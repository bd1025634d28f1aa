//! Append-only log of deleted key hashes.
//!
//! The file is a bare concatenation of 32-byte digests in insertion order;
//! there is no header. In memory the log is split into 256 buckets by first
//! hash byte. Deletion is rare next to lookup, so buckets are sorted lazily:
//! an insert only marks its bucket dirty, and the first lookup afterwards
//! sorts it under a brief exclusive hold.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Mutex, RwLock};

use tracing::warn;

use crate::error::Result;
use crate::fsio;
use crate::hash::{self, Hash, KEY_SIZE};

/// One bucket per possible first hash byte.
const BUCKETS: usize = 256;

#[derive(Default)]
struct Bucket {
    hashes: Vec<Hash>,
    sorted: bool,
}

/// The set of logically deleted keys, consulted before any pack lookup.
pub struct Tombstone {
    file: Mutex<File>,
    buckets: Vec<RwLock<Bucket>>,
}

impl Tombstone {
    /// Opens (or creates) the log at `path` and replays it into memory.
    ///
    /// A trailing partial record is what an append cut short by a crash
    /// leaves behind; it is logged and truncated away so later appends stay
    /// aligned.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = fsio::open_rw(path)?;

        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;

        let aligned = raw.len() - raw.len() % KEY_SIZE;
        if aligned != raw.len() {
            warn!(
                path = %path.display(),
                trailing = raw.len() - aligned,
                "truncating torn tombstone tail"
            );
            file.set_len(aligned as u64)?;
        }

        let mut buckets: Vec<RwLock<Bucket>> =
            (0..BUCKETS).map(|_| RwLock::new(Bucket::default())).collect();

        for chunk in raw[..aligned].chunks_exact(KEY_SIZE) {
            let mut h: Hash = [0u8; KEY_SIZE];
            h.copy_from_slice(chunk);
            let bucket = buckets[hash::bucket(&h)].get_mut().unwrap();
            bucket.hashes.push(h);
            bucket.sorted = false;
        }

        file.seek(SeekFrom::End(0))?;

        Ok(Self {
            file: Mutex::new(file),
            buckets,
        })
    }

    /// Appends a deleted hash. When this returns, the bytes have been handed
    /// to the OS; the next `open` replays them.
    pub fn add_hash(&self, h: &Hash) -> Result<()> {
        {
            let mut file = self.file.lock().unwrap();
            file.write_all(h)?;
            file.flush()?;
        }

        let mut bucket = self.buckets[hash::bucket(h)].write().unwrap();
        bucket.hashes.push(*h);
        bucket.sorted = false;
        Ok(())
    }

    /// Hashes `key` and appends it.
    pub fn add_key(&self, key: &[u8]) -> Result<()> {
        self.add_hash(&hash::sum(key))
    }

    /// Whether `h` has been recorded as deleted.
    pub fn has_hash(&self, h: &Hash) -> bool {
        let bucket = &self.buckets[hash::bucket(h)];

        {
            let guard = bucket.read().unwrap();
            if guard.sorted {
                return guard.hashes.binary_search(h).is_ok();
            }
        }

        let mut guard = bucket.write().unwrap();
        if !guard.sorted {
            guard.hashes.sort_unstable();
            guard.sorted = true;
        }
        guard.hashes.binary_search(h).is_ok()
    }

    pub fn has_key(&self, key: &[u8]) -> bool {
        self.has_hash(&hash::sum(key))
    }

    /// Truncates the log and forgets every recorded hash.
    pub fn clear(&self) -> Result<()> {
        let mut file = self.file.lock().unwrap();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;

        for bucket in &self.buckets {
            let mut b = bucket.write().unwrap();
            b.hashes.clear();
            b.sorted = true;
        }
        Ok(())
    }

    /// Forces the log to stable storage. The handle itself closes on drop.
    pub fn close(&self) -> Result<()> {
        self.file.lock().unwrap().sync_all()?;
        Ok(())
    }
}
