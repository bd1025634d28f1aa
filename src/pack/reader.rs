use std::io::{Read, Seek, SeekFrom};

use byteorder::{BigEndian, ReadBytesExt};

use super::{read_full_or_eof, PACK_MAGIC, PACK_VERSION};
use crate::errformat;
use crate::error::Result;
use crate::hash::{Hash, KEY_SIZE};

struct BlockHeader {
    key: Hash,
    size: u32,
}

/// Sequential and random-access reader over a pack file.
///
/// The reader owns a single seekable cursor. Concurrent random reads on a
/// shared reader must be serialized by the caller; the registry wraps cached
/// readers in a mutex for exactly that reason.
pub struct PackReader<R> {
    r: R,
    got_header: bool,
}

impl<R: Read + Seek> PackReader<R> {
    pub fn new(r: R) -> Self {
        Self {
            r,
            got_header: false,
        }
    }

    /// Reads and validates the pack header. Idempotent; `next` and `skip`
    /// call it before the first record.
    pub fn read_header(&mut self) -> Result<()> {
        if self.got_header {
            return Ok(());
        }

        let mut magic = [0u8; PACK_MAGIC.len()];
        self.r.read_exact(&mut magic)?;
        if &magic != PACK_MAGIC {
            return Err(errformat!("not a pack file: bad magic"));
        }

        let version = self.r.read_u32::<BigEndian>()?;
        if version != PACK_VERSION {
            return Err(errformat!("unsupported pack version {version}"));
        }

        self.got_header = true;
        Ok(())
    }

    /// Returns the next `(key hash, body)` record in insertion order, or
    /// `None` at the end of the pack.
    pub fn next(&mut self) -> Result<Option<(Hash, Vec<u8>)>> {
        self.read_header()?;
        let header = match self.read_block_header()? {
            Some(h) => h,
            None => return Ok(None),
        };

        let mut body = vec![0u8; header.size as usize];
        self.r.read_exact(&mut body)?;
        Ok(Some((header.key, body)))
    }

    /// Advances past the next record without materializing its body.
    pub fn skip(&mut self) -> Result<()> {
        self.read_header()?;
        let header = match self.read_block_header()? {
            Some(h) => h,
            None => return Err(errformat!("skip past end of pack")),
        };

        self.r.seek(SeekFrom::Current(i64::from(header.size)))?;
        Ok(())
    }

    /// Reads the record starting at `pos`, which must be an offset handed
    /// out by the pack writer. Alignment is not re-validated; a wild offset
    /// surfaces as a format or IO error.
    pub fn read_value_at(&mut self, pos: u64) -> Result<(Hash, Vec<u8>)> {
        self.r.seek(SeekFrom::Start(pos))?;
        let header = match self.read_block_header()? {
            Some(h) => h,
            None => return Err(errformat!("no block record at offset {pos}")),
        };

        let mut body = vec![0u8; header.size as usize];
        self.r.read_exact(&mut body)?;
        Ok((header.key, body))
    }

    fn read_block_header(&mut self) -> Result<Option<BlockHeader>> {
        let mut key = [0u8; KEY_SIZE];
        if !read_full_or_eof(&mut self.r, &mut key)? {
            return Ok(None);
        }

        let size = self.r.read_u32::<BigEndian>()?;
        Ok(Some(BlockHeader { key, size }))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::hash;
    use crate::pack::{PackWriter, PACK_HEADER_SIZE};
    use crate::Error;

    fn sample_pack() -> (Vec<u8>, u64) {
        let mut w = PackWriter::new(Vec::new());
        w.write_header().expect("header");
        w.write_block(b"hello", 5, &mut &b"world"[..]).expect("block");
        let pos_ttt = w
            .write_block(b"ttt", 9, &mut &b"somevalue"[..])
            .expect("block");
        w.write_block(b"bye", 11, &mut &b"cruel world"[..])
            .expect("block");
        let (_, bytes) = w.finish().expect("finish");
        (bytes, pos_ttt)
    }

    #[test]
    fn test_sequential_read_skip_and_random_access() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.pack");

        let (bytes, pos_ttt) = sample_pack();
        std::fs::write(&path, &bytes).expect("write pack");

        let file = std::fs::File::open(&path).expect("open pack");
        let mut r = PackReader::new(file);

        let (k1, v1) = r.next().expect("next").expect("first record");
        assert_eq!(k1, hash::sum(b"hello"));
        assert_eq!(v1, b"world");

        r.skip().expect("skip second record");

        let (k3, v3) = r.next().expect("next").expect("third record");
        assert_eq!(k3, hash::sum(b"bye"));
        assert_eq!(v3, b"cruel world");

        assert!(r.next().expect("next at end").is_none());

        let (k2, v2) = r.read_value_at(pos_ttt).expect("read at offset");
        assert_eq!(k2, hash::sum(b"ttt"));
        assert_eq!(v2, b"somevalue");
    }

    #[test]
    fn test_positions_match_format_layout() {
        let (_, pos_ttt) = sample_pack();
        // header + first record (32 + 4 + 5).
        assert_eq!(pos_ttt, PACK_HEADER_SIZE + 41);
    }

    #[test]
    fn test_bad_magic() {
        let mut r = PackReader::new(Cursor::new(b"XXX\x00\x00\x00\x00".to_vec()));
        let err = r.next().expect_err("bad magic");
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn test_unsupported_version() {
        let mut r = PackReader::new(Cursor::new(b"SPB\x00\x00\x00\x01".to_vec()));
        let err = r.next().expect_err("future version");
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn test_torn_record_is_detected() {
        let (mut bytes, _) = sample_pack();
        // Chop the file in the middle of the last record's key hash.
        bytes.truncate(bytes.len() - 20);

        let mut r = PackReader::new(Cursor::new(bytes));
        loop {
            match r.next() {
                Ok(Some(_)) => continue,
                Ok(None) => panic!("truncation not detected"),
                Err(e) => {
                    assert!(matches!(e, Error::Format(_) | Error::IO(_)));
                    break;
                }
            }
        }
    }

    #[test]
    fn test_empty_pack_yields_no_records() {
        let mut w = PackWriter::new(Vec::new());
        w.write_header().expect("header");
        let (_, bytes) = w.finish().expect("finish");

        let mut r = PackReader::new(Cursor::new(bytes));
        assert!(r.next().expect("next").is_none());
    }
}
