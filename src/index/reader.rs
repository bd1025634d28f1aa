use std::io::{BufReader, Read};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};

use super::{FANOUT_SIZE, INDEX_MAGIC, INDEX_VERSION, OFFSET64_FLAG};
use crate::errformat;
use crate::error::Result;
use crate::fsio;
use crate::hash::{Hash, KEY_SIZE};
use crate::Error;

/// Immutable, fully in-memory view of one pack's index.
///
/// The layout is parsed once into per-first-byte bucket blobs; lookups fan
/// out on the first hash byte and binary-search the bucket. Misses are
/// [`Error::NotFound`], never an IO error.
#[derive(Debug)]
pub struct IndexReader {
    fanout: [u32; FANOUT_SIZE],
    /// Maps a first byte to its position in the bucket vectors, for buckets
    /// that hold at least one entry.
    fanout_mapping: [Option<usize>; FANOUT_SIZE],
    names: Vec<Vec<u8>>,
    crcs32: Vec<Vec<u8>>,
    offsets32: Vec<Vec<u8>>,
    offsets64: Vec<u8>,
    sizes: Vec<Vec<u8>>,
}

impl IndexReader {
    /// Loads and parses `<name>.idx` from disk.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = fsio::open(path)?;
        Self::read_from(&mut BufReader::new(file))
    }

    /// Parses an index from any byte source.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut magic = [0u8; INDEX_MAGIC.len()];
        read_section(r, &mut magic, "magic")?;
        if &magic != INDEX_MAGIC {
            return Err(errformat!("not an index file: bad magic"));
        }

        let version = r
            .read_u32::<BigEndian>()
            .map_err(|e| section_err("version", e))?;
        if version != INDEX_VERSION {
            return Err(errformat!("unsupported index version {version}"));
        }

        let mut fanout = [0u32; FANOUT_SIZE];
        for b in 0..FANOUT_SIZE {
            let v = r
                .read_u32::<BigEndian>()
                .map_err(|e| section_err("fanout table", e))?;
            if b > 0 && v < fanout[b - 1] {
                return Err(errformat!("fanout table is not monotone at byte {b}"));
            }
            fanout[b] = v;
        }

        // Bucket sizes fall out of the cumulative fanout.
        let mut fanout_mapping = [None; FANOUT_SIZE];
        let mut bucket_counts = Vec::new();
        let mut names = Vec::new();
        for b in 0..FANOUT_SIZE {
            let prev = if b == 0 { 0 } else { fanout[b - 1] };
            let count = (fanout[b] - prev) as usize;
            if count == 0 {
                continue;
            }

            fanout_mapping[b] = Some(names.len());
            bucket_counts.push(count);

            let mut blob = vec![0u8; count * KEY_SIZE];
            read_section(r, &mut blob, "key hashes")?;
            names.push(blob);
        }

        let mut crcs32 = Vec::with_capacity(names.len());
        for &count in &bucket_counts {
            let mut blob = vec![0u8; count * 4];
            read_section(r, &mut blob, "crc32s")?;
            crcs32.push(blob);
        }

        let mut offsets32 = Vec::with_capacity(names.len());
        let mut spilled = 0usize;
        for &count in &bucket_counts {
            let mut blob = vec![0u8; count * 4];
            read_section(r, &mut blob, "offsets")?;
            spilled += blob
                .chunks_exact(4)
                .filter(|c| BigEndian::read_u32(c) & OFFSET64_FLAG != 0)
                .count();
            offsets32.push(blob);
        }

        let mut offsets64 = vec![0u8; spilled * 8];
        if spilled > 0 {
            read_section(r, &mut offsets64, "64-bit offsets")?;
        }

        let mut sizes = Vec::with_capacity(names.len());
        for &count in &bucket_counts {
            let mut blob = vec![0u8; count * 4];
            read_section(r, &mut blob, "sizes")?;
            sizes.push(blob);
        }

        Ok(Self {
            fanout,
            fanout_mapping,
            names,
            crcs32,
            offsets32,
            offsets64,
            sizes,
        })
    }

    /// Total number of entries, i.e. the last fanout value.
    pub fn count(&self) -> u32 {
        self.fanout[FANOUT_SIZE - 1]
    }

    pub fn contains(&self, key: &Hash) -> bool {
        self.find(key).is_some()
    }

    /// Byte offset of the block record for `key` inside its pack.
    pub fn get_offset(&self, key: &Hash) -> Result<u64> {
        let (bucket, i) = self.find(key).ok_or(Error::NotFound)?;

        let slot = BigEndian::read_u32(&self.offsets32[bucket][i * 4..i * 4 + 4]);
        if slot & OFFSET64_FLAG == 0 {
            return Ok(u64::from(slot));
        }

        let at = ((slot & !OFFSET64_FLAG) as usize) * 8;
        if at + 8 > self.offsets64.len() {
            return Err(errformat!("64-bit offset slot {slot:#x} out of range"));
        }
        Ok(BigEndian::read_u64(&self.offsets64[at..at + 8]))
    }

    /// Declared body size of the block for `key`.
    pub fn get_size(&self, key: &Hash) -> Result<u32> {
        let (bucket, i) = self.find(key).ok_or(Error::NotFound)?;
        Ok(BigEndian::read_u32(&self.sizes[bucket][i * 4..i * 4 + 4]))
    }

    /// Recorded CRC32 of the block body for `key`; zero when the writer did
    /// not record one.
    pub fn get_crc32(&self, key: &Hash) -> Result<u32> {
        let (bucket, i) = self.find(key).ok_or(Error::NotFound)?;
        Ok(BigEndian::read_u32(&self.crcs32[bucket][i * 4..i * 4 + 4]))
    }

    /// Locates `key`, returning its bucket position and index within the
    /// bucket.
    fn find(&self, key: &Hash) -> Option<(usize, usize)> {
        let bucket = self.fanout_mapping[usize::from(key[0])]?;
        let blob = &self.names[bucket];

        let mut lo = 0;
        let mut hi = blob.len() / KEY_SIZE;
        while lo < hi {
            let mid = (lo + hi) / 2;
            let at = mid * KEY_SIZE;
            match blob[at..at + KEY_SIZE].cmp(&key[..]) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Some((bucket, mid)),
            }
        }
        None
    }
}

fn read_section(r: &mut impl Read, buf: &mut [u8], what: &str) -> Result<()> {
    r.read_exact(buf).map_err(|e| section_err(what, e))
}

/// A short read inside a declared section means the file is corrupt, not
/// that the disk failed; other IO errors pass through.
fn section_err(what: &str, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        errformat!("truncated index: {what}")
    } else {
        e.into()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::hash;
    use crate::index::IndexWriter;

    fn roundtrip(idx: &mut IndexWriter) -> IndexReader {
        let mut buf = Vec::new();
        idx.write_to(&mut buf).expect("write index");
        IndexReader::read_from(&mut Cursor::new(buf)).expect("read index")
    }

    #[test]
    fn test_write_and_read_index() {
        let mut idx = IndexWriter::new();
        idx.add(b"hello", 1, 10, 100);
        idx.add(b"bye", 2, 20, 200);
        idx.add(b"world", 3, 30, 300);

        let r = roundtrip(&mut idx);
        assert_eq!(r.count(), 3);

        let key = hash::sum(b"hello");
        assert!(r.contains(&key));
        assert_eq!(r.get_offset(&key).expect("offset"), 10);
        assert_eq!(r.get_size(&key).expect("size"), 100);
        assert_eq!(r.get_crc32(&key).expect("crc"), 1);

        let key = hash::sum(b"world");
        assert_eq!(r.get_offset(&key).expect("offset"), 30);
        assert_eq!(r.get_size(&key).expect("size"), 300);
    }

    #[test]
    fn test_missing_entry_is_not_found() {
        let mut idx = IndexWriter::new();
        idx.add(b"present", 0, 1, 2);

        let r = roundtrip(&mut idx);
        let missing = hash::sum(b"absent");

        assert!(!r.contains(&missing));
        assert_eq!(r.get_offset(&missing), Err(Error::NotFound));
        assert_eq!(r.get_size(&missing), Err(Error::NotFound));
        assert_eq!(r.get_crc32(&missing), Err(Error::NotFound));
    }

    #[test]
    fn test_empty_index() {
        let mut idx = IndexWriter::new();
        let r = roundtrip(&mut idx);

        assert_eq!(r.count(), 0);
        assert!(!r.contains(&hash::sum(b"anything")));
    }

    #[test]
    fn test_large_offsets_spill_to_64_bit_table() {
        let mut idx = IndexWriter::new();
        idx.add(b"small", 0, 7, 1);
        idx.add(b"big", 0, 1 << 32, 2);
        idx.add(b"bigger", 0, (1 << 35) + 123, 3);

        let r = roundtrip(&mut idx);

        assert_eq!(r.get_offset(&hash::sum(b"small")).expect("offset"), 7);
        assert_eq!(r.get_offset(&hash::sum(b"big")).expect("offset"), 1 << 32);
        assert_eq!(
            r.get_offset(&hash::sum(b"bigger")).expect("offset"),
            (1 << 35) + 123
        );
    }

    #[test]
    fn test_many_entries_all_resolvable() {
        let mut idx = IndexWriter::new();
        for i in 0..500u64 {
            idx.add(format!("key-{i}").as_bytes(), 0, i * 13, i as u32);
        }

        let r = roundtrip(&mut idx);
        assert_eq!(r.count(), 500);
        for i in 0..500u64 {
            let key = hash::sum(format!("key-{i}").as_bytes());
            assert_eq!(r.get_offset(&key).expect("offset"), i * 13);
            assert_eq!(r.get_size(&key).expect("size"), i as u32);
        }
    }

    #[test]
    fn test_bad_magic() {
        let err = IndexReader::read_from(&mut Cursor::new(b"NOP".to_vec()))
            .expect_err("bad magic");
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn test_truncated_index_is_a_format_error() {
        let mut idx = IndexWriter::new();
        idx.add(b"hello", 0, 10, 100);

        let mut buf = Vec::new();
        idx.write_to(&mut buf).expect("write index");
        buf.truncate(buf.len() - 6);

        let err = IndexReader::read_from(&mut Cursor::new(buf)).expect_err("truncated");
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn test_non_monotone_fanout_rejected() {
        let mut idx = IndexWriter::new();
        idx.add(b"a", 0, 1, 1);
        idx.add(b"b", 0, 2, 2);

        let mut buf = Vec::new();
        idx.write_to(&mut buf).expect("write index");

        // Corrupt the last fanout slot (bytes 7 + 255*4 ..) down to zero.
        let at = 7 + 255 * 4;
        buf[at..at + 4].copy_from_slice(&[0, 0, 0, 0]);

        let err = IndexReader::read_from(&mut Cursor::new(buf)).expect_err("bad fanout");
        assert!(matches!(err, Error::Format(_)));
    }
}
