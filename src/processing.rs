//! Transactional multi-pack writer.
//!
//! A `PackProcessing` stages blocks into pack files under the processing
//! directory and publishes them as a group on commit. Until the two renames
//! into the pack directory happen, nothing it wrote is visible to the
//! registry; temp files left behind by a crash or an abandoned writer carry
//! a `.writing` suffix and are ignored on the next open.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::errformat;
use crate::error::Result;
use crate::fsio;
use crate::hash::Hash;
use crate::index::IndexWriter;
use crate::pack::{PackReader, PackWriter};
use crate::packpack::PackPack;
use crate::Error;

struct CurrentPack {
    writer: PackWriter<File>,
    index: IndexWriter,
    /// In-progress file: `txn-<uuid>.pack.writing` under the temp dir. The
    /// pack's real name is only known once its content hash is final.
    path: PathBuf,
    elements: usize,
}

pub struct PackProcessing {
    registry: Arc<PackPack>,
    max_elements_per_pack: usize,
    current: Option<CurrentPack>,
    /// Content-hash names of closed packs staged under the temp dir,
    /// awaiting publication.
    completed: Vec<String>,
}

impl PackProcessing {
    pub(crate) fn new(registry: Arc<PackPack>, max_elements_per_pack: usize) -> Self {
        Self {
            registry,
            max_elements_per_pack: max_elements_per_pack.max(1),
            current: None,
            completed: Vec::new(),
        }
    }

    /// Appends one block, rolling over to a fresh pack when the current one
    /// has reached the element limit.
    pub fn write_block(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self
            .current
            .as_ref()
            .is_some_and(|c| c.elements >= self.max_elements_per_pack)
        {
            self.close_pack()?;
        }

        let size = u32::try_from(value.len()).map_err(|_| {
            errformat!("block of {} bytes exceeds the u32 size field", value.len())
        })?;

        let cur = self.ensure_pack()?;
        let pos = cur.writer.write_block(key, size, &mut &value[..])?;
        // The CRC slot is reserved in the index format but not populated.
        cur.index.add(key, 0, pos, size);
        cur.elements += 1;
        Ok(())
    }

    /// Looks a hash up in the not-yet-closed current pack. Blocks in packs
    /// that already rolled over but are not committed are not visible here;
    /// callers treat a miss as not-found, which is within the pre-commit
    /// visibility contract.
    pub fn get_pending(&self, key: &Hash) -> Result<Option<Vec<u8>>> {
        let cur = match &self.current {
            Some(cur) => cur,
            None => return Ok(None),
        };
        let entry = match cur.index.get(key) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        // The pack writer flushes after every block, so a fresh handle on
        // the temp file sees the complete record.
        let file = fsio::open(&cur.path)?;
        let mut reader = PackReader::new(file);
        let (_, body) = reader.read_value_at(entry.offset)?;
        Ok(Some(body))
    }

    /// Whether the current pack holds a block for this hash.
    pub fn contains_pending(&self, key: &Hash) -> bool {
        self.current
            .as_ref()
            .is_some_and(|c| c.index.get(key).is_some())
    }

    /// Closes the current pack and publishes every staged pack: for each,
    /// the index is renamed into the pack directory before its pack, because
    /// discovery keys on `*.pack` presence and must never see a pack whose
    /// index is missing. The writer stays usable afterwards.
    pub fn commit(&mut self) -> Result<()> {
        self.close_pack()?;

        for name in std::mem::take(&mut self.completed) {
            fsio::rename(
                &self.registry.temp_index_path(&name),
                &self.registry.index_path(&name),
            )?;
            fsio::rename(
                &self.registry.temp_pack_path(&name),
                &self.registry.pack_path(&name),
            )?;
            self.registry.add_pack(&name);
            debug!(pack = %name, "published pack");
        }
        Ok(())
    }

    fn ensure_pack(&mut self) -> Result<&mut CurrentPack> {
        if self.current.is_none() {
            let path = self
                .registry
                .temp_dir()
                .join(format!("txn-{}.pack.writing", Uuid::new_v4()));
            let file = fsio::create(&path)?;
            let mut writer = PackWriter::new(file);
            writer.write_header()?;
            self.current = Some(CurrentPack {
                writer,
                index: IndexWriter::new(),
                path,
                elements: 0,
            });
        }
        Ok(self.current.as_mut().unwrap())
    }

    /// Closes the in-progress pack: sync the body, write and sync its index
    /// under the temp dir, and stage both under the pack's content-hash
    /// name. A pack that never received a block is removed instead.
    fn close_pack(&mut self) -> Result<()> {
        let cur = match self.current.take() {
            Some(cur) => cur,
            None => return Ok(()),
        };

        if cur.elements == 0 {
            drop(cur.writer);
            let _ = fs::remove_file(&cur.path);
            return Ok(());
        }

        let CurrentPack {
            writer,
            mut index,
            path,
            elements: _,
        } = cur;

        let (name, file) = writer.finish()?;
        file.sync_all()?;
        drop(file);

        let mut idx_file = BufWriter::new(fsio::create(&self.registry.temp_index_path(&name))?);
        index.write_to(&mut idx_file)?;
        let idx_file = idx_file
            .into_inner()
            .map_err(|e| Error::IO(e.to_string()))?;
        idx_file.sync_all()?;
        drop(idx_file);

        fsio::rename(&path, &self.registry.temp_pack_path(&name))?;

        // Identical content yields an identical name; staging it twice is
        // a no-op.
        if !self.completed.contains(&name) {
            self.completed.push(name);
        }
        Ok(())
    }
}
