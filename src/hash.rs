use sha2::{Digest, Sha256};

/// Size in bytes of a key digest.
pub const KEY_SIZE: usize = 32;

/// A 32-byte key digest. Every key entering the store is reduced to its
/// SHA-256 before indexing, deduplication, or tombstoning.
pub type Hash = [u8; KEY_SIZE];

/// Digests raw key bytes into a [`Hash`].
pub fn sum(data: &[u8]) -> Hash {
    Sha256::digest(data).into()
}

/// The fanout bucket of a hash is its first byte.
pub fn bucket(h: &Hash) -> usize {
    h[0] as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_is_sha256() {
        // SHA-256 of the empty input, a fixed vector.
        let h = sum(b"");
        assert_eq!(
            hex::encode(h),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_bucket_is_first_byte() {
        let h = sum(b"some key");
        assert_eq!(bucket(&h), h[0] as usize);
    }
}
