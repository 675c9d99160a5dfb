//! Key hashing
//!
//! Fixed and unkeyed: a key set chosen to collide will pile up in one chain.
//! Bytes are taken as signed and shifts are arithmetic so hashes cached in
//! existing data files stay valid.

/// Polynomial string hash, `h = 31 * h + byte`
pub fn hash_code(key: &[u8]) -> i32 {
    key.iter()
        .fold(0i32, |h, &b| h.wrapping_mul(31).wrapping_add(b as i8 as i32))
}

/// Spread high bits into the low bits used for bucket selection
pub fn mix(h: i32) -> i32 {
    let h = h ^ (h >> 20) ^ (h >> 12);
    h ^ (h >> 7) ^ (h >> 4)
}

/// Hash cached in every entry
pub fn key_hash(key: &[u8]) -> i32 {
    mix(hash_code(key))
}

/// Bucket for a mixed hash; `bucket_count` is a power of two
pub fn bucket_index(hash: i32, bucket_count: usize) -> usize {
    (hash & (bucket_count as i32 - 1)) as usize
}
