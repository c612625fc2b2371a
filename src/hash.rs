//! Bucket-selection hash.
//!
//! `h := 0; for each byte b: h := (h * 33) + b`, using wrapping 32-bit
//! arithmetic, reinterpreted as unsigned before the modulo against the
//! bucket count. This mirrors the source's `use integer` 32-bit wrapping
//! multiply/add followed by a `no integer` (arbitrary-precision) modulo —
//! the wrapping math happens once, the mod never truncates.
pub fn bucket_index(key_bytes: &[u8], buckets: u32) -> u32 {
    let mut h: u32 = 0;
    for &b in key_bytes {
        h = h.wrapping_mul(33).wrapping_add(b as u32);
    }
    h % buckets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_hashes_to_bucket_zero() {
        assert_eq!(bucket_index(b"", 13), 0);
    }

    #[test]
    fn deterministic() {
        let a = bucket_index(b"hello world", 13);
        let b = bucket_index(b"hello world", 13);
        assert_eq!(a, b);
    }

    #[test]
    fn within_range() {
        for k in ["a", "ab", "abc", "a really quite long key indeed"] {
            let idx = bucket_index(k.as_bytes(), 7);
            assert!(idx < 7);
        }
    }

    #[test]
    fn wraps_without_panicking_on_long_keys() {
        let key = vec![0xffu8; 10_000];
        let _ = bucket_index(&key, 1);
    }
}
