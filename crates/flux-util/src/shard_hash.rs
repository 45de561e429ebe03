use sha2::{Digest, Sha256};

/// Maps a key to a shard index via a strong content hash modulo
/// `shard_count` (spec §4.K "Sharding hash"). Used by the sharders and by
/// multi-file readers that need to agree on ownership without coordinating
/// directly.
///
/// SHA-256 is the teacher's hash of choice for exactly this purpose
/// (`spark-core` depends on `sha2` for content hashing); this port takes
/// the first 8 bytes of the digest as a big-endian `u64` rather than the
/// teacher's full-digest comparisons, since a shard index only needs
/// uniform distribution, not collision resistance.
pub fn shard_index(key: &[u8], shard_count: usize) -> usize {
    assert!(shard_count > 0, "shard_count must be positive");
    let digest = Sha256::digest(key);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    let value = u64::from_be_bytes(bytes);
    (value % shard_count as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn same_key_always_maps_to_the_same_shard() {
        let a = shard_index(b"alpha", 16);
        let b = shard_index(b"alpha", 16);
        assert_eq!(a, b);
    }

    #[test]
    fn hash_is_within_range() {
        for n in 0..500 {
            let key = format!("key-{n}");
            let idx = shard_index(key.as_bytes(), 7);
            assert!(idx < 7);
        }
    }

    #[test]
    fn distribution_uses_more_than_one_shard() {
        let mut seen: HashMap<usize, usize> = HashMap::new();
        for n in 0..1000 {
            let key = format!("key-{n}");
            *seen.entry(shard_index(key.as_bytes(), 10)).or_default() += 1;
        }
        assert!(seen.len() > 1, "hash collapsed onto a single shard");
    }
}
