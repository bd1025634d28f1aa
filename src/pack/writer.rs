use std::io::{BufWriter, Read, Write};

use byteorder::{BigEndian, WriteBytesExt};

use super::{PACK_MAGIC, PACK_VERSION};
use crate::error::Result;
use crate::fsio::HashingWriter;
use crate::hash;
use crate::Error;

/// Append-only writer producing a pack body.
///
/// The writer keeps a running SHA-256 over every byte it emits, header
/// included; the hex digest at [`finish`](PackWriter::finish) is the pack's
/// stable name. Output is buffered but flushed at the end of every record,
/// so a reader opened on the same path observes all completed records.
pub struct PackWriter<W: Write> {
    w: HashingWriter<BufWriter<W>>,
    pos: u64,
}

impl<W: Write> PackWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            w: HashingWriter::new(BufWriter::new(sink)),
            pos: 0,
        }
    }

    /// Emits the pack magic and version. Must be called once, before the
    /// first block.
    pub fn write_header(&mut self) -> Result<()> {
        self.w.write_all(PACK_MAGIC)?;
        self.w.write_u32::<BigEndian>(PACK_VERSION)?;
        self.pos += PACK_MAGIC.len() as u64 + 4;
        self.w.flush()?;
        Ok(())
    }

    /// Appends one block record and returns the offset of its first byte,
    /// the start of the key hash.
    ///
    /// Exactly `size` bytes are copied from `body`; a source that runs dry
    /// early is an error, and the pack is then unusable and must not be
    /// published.
    pub fn write_block(&mut self, key: &[u8], size: u32, body: &mut impl Read) -> Result<u64> {
        let pos = self.pos;

        let k = hash::sum(key);
        self.w.write_all(&k)?;
        self.pos += hash::KEY_SIZE as u64;

        self.w.write_u32::<BigEndian>(size)?;
        self.pos += 4;

        let copied = std::io::copy(&mut body.take(u64::from(size)), &mut self.w)?;
        if copied != u64::from(size) {
            return Err(Error::IO(format!(
                "block body ended after {copied} of {size} bytes"
            )));
        }
        self.pos += copied;

        self.w.flush()?;
        Ok(pos)
    }

    /// Hex digest of every byte written so far.
    pub fn hash_hex(&self) -> String {
        self.w.hash_hex()
    }

    /// Flushes buffered output and returns the pack name together with the
    /// underlying sink, so the caller can sync and close it.
    pub fn finish(mut self) -> Result<(String, W)> {
        self.w.flush()?;
        let name = self.w.hash_hex();
        let sink = self
            .w
            .into_inner()
            .into_inner()
            .map_err(|e| Error::IO(e.to_string()))?;
        Ok((name, sink))
    }
}
