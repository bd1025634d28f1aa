//! The pack file format: an append-only container of content-addressed
//! blocks.
//!
//! ```text
//! +--------------------+
//! | magic "SPB"        |  3 bytes
//! | version            |  u32, big-endian, currently 0
//! +--------------------+
//! | key hash           |  32 bytes (SHA-256 of the caller's key)
//! | size               |  u32, big-endian            \  one block
//! | body               |  `size` bytes               /  record
//! +--------------------+
//! | ...                |  records repeat to end of file
//! +--------------------+
//! ```
//!
//! Offsets handed out by the writer and consumed by `read_value_at` point at
//! the first byte of a record, i.e. at its key hash. Records appear in
//! insertion order; the sibling index file provides sorted lookup.

mod reader;
mod writer;

pub use reader::PackReader;
pub use writer::PackWriter;

use std::io::Read;

use crate::error::Result;
use crate::errformat;

/// Pack file signature.
pub const PACK_MAGIC: &[u8; 3] = b"SPB";

/// Current pack format version.
pub const PACK_VERSION: u32 = 0;

/// Bytes occupied by the pack header.
pub const PACK_HEADER_SIZE: u64 = 7;

/// Fills `buf` completely, distinguishing a clean end of stream (zero bytes
/// read, returns `false`) from a torn record (partial fill, format error).
pub(crate) fn read_full_or_eof(r: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    let mut n = 0;
    while n < buf.len() {
        match r.read(&mut buf[n..]) {
            Ok(0) => break,
            Ok(m) => n += m,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    if n == 0 {
        Ok(false)
    } else if n < buf.len() {
        Err(errformat!(
            "unexpected end of pack: got {n} of {} header bytes",
            buf.len()
        ))
    } else {
        Ok(true)
    }
}
