//! Filesystem helpers shared by the pack, index, and tombstone code.
//!
//! Every open and rename here creates missing parent directories first, so
//! callers can address files under `packs/` and `processing/` without
//! worrying about whether the layout exists yet.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use sha2::{Digest, Sha256};

fn create_parent(path: &Path) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Creates (or truncates) a file for writing, creating parent directories.
pub fn create(path: &Path) -> std::io::Result<File> {
    create_parent(path)?;
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
}

/// Opens a file for reading.
pub fn open(path: &Path) -> std::io::Result<File> {
    File::open(path)
}

/// Opens (or creates) a file for reading and appending, creating parent
/// directories.
pub fn open_rw(path: &Path) -> std::io::Result<File> {
    create_parent(path)?;
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)
}

/// Renames a file, creating the destination's parent directories.
pub fn rename(from: &Path, to: &Path) -> std::io::Result<()> {
    create_parent(to)?;
    std::fs::rename(from, to)
}

/// A `Write` adapter that feeds a running SHA-256 with every byte written
/// through it. The digest is what names a finished pack.
pub struct HashingWriter<W> {
    writer: W,
    hasher: Sha256,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            hasher: Sha256::new(),
        }
    }

    /// Hex digest of everything written so far.
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }

    /// Returns the underlying writer, discarding the digest state.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    #[test]
    fn test_create_makes_parent_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a/b/c.bin");

        let mut f = create(&path).expect("create with parents");
        f.write_all(b"x").expect("write");

        assert!(path.exists());
    }

    #[test]
    fn test_rename_makes_parent_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let from = dir.path().join("src.bin");
        create(&from).expect("create");

        let to = dir.path().join("deep/nested/dst.bin");
        rename(&from, &to).expect("rename with parents");

        assert!(!from.exists());
        assert!(to.exists());
    }

    #[test]
    fn test_hashing_writer_matches_direct_digest() {
        let mut w = HashingWriter::new(Vec::new());
        w.write_all(b"hello ").expect("write");
        w.write_all(b"world").expect("write");

        let expected = hex::encode(Sha256::digest(b"hello world"));
        assert_eq!(w.hash_hex(), expected);
        assert_eq!(w.into_inner(), b"hello world".to_vec());
    }
}
