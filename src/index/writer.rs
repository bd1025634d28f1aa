use std::collections::HashMap;
use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};

use super::{Entry, FANOUT_SIZE, INDEX_MAGIC, INDEX_VERSION, MAX_OFFSET32, OFFSET64_FLAG};
use crate::errformat;
use crate::error::Result;
use crate::hash::{self, Hash, KEY_SIZE};

/// In-memory accumulator for one pack's index.
///
/// Entries are buffered unsorted; `write_to` orders them by key hash and
/// emits the on-disk format. A pack is a set of distinct content-addressed
/// entries, so duplicate hashes coalesce and the first insertion wins: its
/// offset is the authoritative location of the block.
#[derive(Default)]
pub struct IndexWriter {
    added: HashMap<Hash, usize>,
    entries: Vec<Entry>,
}

impl IndexWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hashes `key` and records where its block lives.
    pub fn add(&mut self, key: &[u8], crc32: u32, pos: u64, size: u32) {
        self.add_raw(hash::sum(key), crc32, pos, size);
    }

    /// As [`add`](IndexWriter::add), with a precomputed key hash.
    pub fn add_raw(&mut self, key: Hash, crc32: u32, pos: u64, size: u32) {
        if self.added.contains_key(&key) {
            return;
        }
        self.added.insert(key, self.entries.len());
        self.entries.push(Entry {
            key,
            crc32,
            offset: pos,
            size,
        });
    }

    /// Looks up a buffered entry by key hash, without requiring a sort.
    pub fn get(&self, key: &Hash) -> Option<&Entry> {
        self.added.get(key).map(|&i| &self.entries[i])
    }

    /// Number of distinct entries recorded so far.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorts the entries and emits the index format. Returns the number of
    /// bytes written.
    pub fn write_to<W: Write>(&mut self, w: &mut W) -> Result<u64> {
        if self.entries.len() > u32::MAX as usize {
            return Err(errformat!("too many index entries: {}", self.entries.len()));
        }

        self.entries.sort_unstable_by(|a, b| a.key.cmp(&b.key));

        let mut n: u64 = 0;

        w.write_all(INDEX_MAGIC)?;
        n += INDEX_MAGIC.len() as u64;

        w.write_u32::<BigEndian>(INDEX_VERSION)?;
        n += 4;

        // Cumulative fanout: entries are sorted, so the last entry of each
        // first byte already carries the running count; gaps inherit it.
        let mut fanout = [0u32; FANOUT_SIZE];
        for (i, e) in self.entries.iter().enumerate() {
            fanout[e.key[0] as usize] = (i + 1) as u32;
        }
        for b in 1..FANOUT_SIZE {
            if fanout[b] < fanout[b - 1] {
                fanout[b] = fanout[b - 1];
            }
        }
        for fo in fanout {
            w.write_u32::<BigEndian>(fo)?;
            n += 4;
        }

        for e in &self.entries {
            w.write_all(&e.key)?;
            n += KEY_SIZE as u64;
        }

        for e in &self.entries {
            w.write_u32::<BigEndian>(e.crc32)?;
            n += 4;
        }

        // Offsets that fit in 31 bits are stored inline; larger ones spill
        // into the trailing 64-bit table and the slot stores its position.
        let mut offsets64: Vec<u8> = Vec::new();
        for e in &self.entries {
            let slot = if e.offset > MAX_OFFSET32 {
                let idx = (offsets64.len() / 8) as u32;
                offsets64.write_u64::<BigEndian>(e.offset)?;
                OFFSET64_FLAG | idx
            } else {
                e.offset as u32
            };
            w.write_u32::<BigEndian>(slot)?;
            n += 4;
        }
        w.write_all(&offsets64)?;
        n += offsets64.len() as u64;

        for e in &self.entries {
            w.write_u32::<BigEndian>(e.size)?;
            n += 4;
        }

        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_coalesce_first_wins() {
        let mut idx = IndexWriter::new();

        idx.add(b"hello", 0, 10, 100);
        idx.add(b"hello", 0, 999, 5);

        assert_eq!(idx.count(), 1);
        let e = idx.get(&hash::sum(b"hello")).expect("entry");
        assert_eq!(e.offset, 10);
        assert_eq!(e.size, 100);
    }

    #[test]
    fn test_get_on_unsorted_entries() {
        let mut idx = IndexWriter::new();

        idx.add(b"b", 0, 2, 20);
        idx.add(b"a", 0, 1, 10);

        assert_eq!(idx.get(&hash::sum(b"a")).expect("entry").offset, 1);
        assert_eq!(idx.get(&hash::sum(b"b")).expect("entry").offset, 2);
        assert!(idx.get(&hash::sum(b"c")).is_none());
    }

    #[test]
    fn test_written_size_matches_layout() {
        let mut idx = IndexWriter::new();
        idx.add(b"hello", 1, 10, 100);
        idx.add(b"bye", 2, 20, 200);
        idx.add(b"world", 3, 30, 300);

        let mut buf = Vec::new();
        let n = idx.write_to(&mut buf).expect("write");

        // 3 magic + 4 version + 1024 fanout + 3*32 keys + 3*4 crcs
        // + 3*4 offsets + 3*4 sizes, no 64-bit spill.
        assert_eq!(n, 1163);
        assert_eq!(buf.len(), 1163);
    }

    #[test]
    fn test_keys_emitted_sorted_and_fanout_consistent() {
        let mut idx = IndexWriter::new();
        for i in 0..64u32 {
            idx.add(format!("key-{i}").as_bytes(), 0, u64::from(i), i);
        }

        let mut buf = Vec::new();
        idx.write_to(&mut buf).expect("write");

        // Fanout table sits after magic + version.
        let fanout: Vec<u32> = buf[7..7 + 1024]
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(fanout[255], 64);

        let keys: Vec<&[u8]> = buf[7 + 1024..7 + 1024 + 64 * KEY_SIZE]
            .chunks_exact(KEY_SIZE)
            .collect();
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1], "keys must be strictly ascending");
        }

        for (b, &fo) in fanout.iter().enumerate() {
            let expect = keys.iter().filter(|k| usize::from(k[0]) <= b).count();
            assert_eq!(fo as usize, expect, "fanout[{b}]");
        }
    }
}
