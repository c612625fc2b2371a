//! The bucket engine — the heart of the cache.
//!
//! Operates purely on a bucket's raw bytes (the 40-byte bucket header
//! plus its packed entry list) and wire-encoded key/value byte strings.
//! It never decodes a key/value into a host type — that's the codec's
//! job, one layer up in `Cache`. A bucket is a flat packed byte array
//! with prepend-and-compact semantics, not a fixed-slot slab with a
//! separate open-addressing hash table and intrusive linked list — it
//! *is* its own tiny append/evict log, searched linearly.

use std::path::Path;

use crate::error::{CacheError, Result};
use crate::shm::layout::{BucketHeader, EntryHeader, BHEADSIZE, EHEADSIZE, ENTRY_FLAG_DIRTY};

/// Everything `_find` needs to report about a match.
pub struct FoundEntry {
    /// Offset of the entry immediately preceding this one in the bucket's
    /// live range, or `None` if this entry is already the bucket head.
    pub previous_off: Option<usize>,
    pub off: usize,
    pub size: usize,
    pub klen: usize,
    pub vlen: usize,
    pub flags: i32,
    pub expired: bool,
}

impl FoundEntry {
    pub fn dirty(&self) -> bool {
        self.flags & ENTRY_FLAG_DIRTY != 0
    }
}

/// An entry discarded by `_insert`'s tail eviction, carried back up so
/// the caller can write dirty ones through to the backing store.
pub struct EvictedEntry {
    pub key_wire: Vec<u8>,
    pub value_wire: Vec<u8>,
    pub dirty: bool,
}

fn capacity(bucketsize: usize) -> usize {
    bucketsize - BHEADSIZE
}

fn body(bucket: &[u8]) -> &[u8] {
    &bucket[BHEADSIZE..]
}

fn body_mut(bucket: &mut [u8]) -> &mut [u8] {
    &mut bucket[BHEADSIZE..]
}

/// Walk the bucket's live entries, calling `visit(offset, header)` for
/// each. Stops and returns `Ok(true)` if `visit` returns `true` (meaning
/// "this is the one, stop"). Detects the two corruption conditions
/// names: a zero-sized entry, or an entry whose claimed
/// `size` would run past the bucket's capacity.
fn walk_entries(
    bucket: &[u8],
    bucketsize: usize,
    path: &Path,
    bucket_offset: u64,
    mut visit: impl FnMut(usize, EntryHeader) -> bool,
) -> Result<Option<usize>> {
    let cap = capacity(bucketsize);
    let filled = BucketHeader::filled(bucket) as usize;
    let body = body(bucket);

    let mut cursor = 0usize;
    while cursor < filled {
        if cursor + EHEADSIZE > cap {
            return Err(CacheError::corruption(
                path,
                bucket_offset + BHEADSIZE as u64 + cursor as u64,
                "Super-sized entry",
                &body[cursor..],
            ));
        }
        let header = EntryHeader::read(&body[cursor..cursor + EHEADSIZE]);
        if header.size == 0 {
            return Err(CacheError::corruption(
                path,
                bucket_offset + BHEADSIZE as u64 + cursor as u64,
                "Zero-sized entry",
                &body[cursor..],
            ));
        }
        let size = header.size as usize;
        if cursor + size > cap {
            return Err(CacheError::corruption(
                path,
                bucket_offset + BHEADSIZE as u64 + cursor as u64,
                "Super-sized entry",
                &body[cursor..],
            ));
        }

        if visit(cursor, header) {
            return Ok(Some(cursor));
        }
        cursor += size;
    }
    Ok(None)
}

/// `_find`: locate `key_wire` in the bucket.
pub fn find(
    bucket: &[u8],
    bucketsize: usize,
    key_wire: &[u8],
    now: i64,
    expiry_secs: u32,
    path: &Path,
    bucket_offset: u64,
) -> Result<Option<FoundEntry>> {
    let body = body(bucket);
    let mut previous_off = None;
    let mut result = None;

    walk_entries(bucket, bucketsize, path, bucket_offset, |off, header| {
        let klen = header.klen as usize;
        let key_start = off + EHEADSIZE;
        let stored_key = &body[key_start..key_start + klen];

        if stored_key == key_wire {
            let expired = expiry_secs != 0 && (now - header.time as i64) > expiry_secs as i64;
            result = Some(FoundEntry {
                previous_off,
                off,
                size: header.size as usize,
                klen,
                vlen: header.vlen as usize,
                flags: header.flags,
                expired,
            });
            true
        } else {
            previous_off = Some(off);
            false
        }
    })?;

    Ok(result)
}

/// Borrow the key/value wire bytes of a previously located entry. Must
/// be called before any mutation (`swap_with_predecessor`, `remove_at`,
/// `insert`) that could move the entry's bytes.
pub fn entry_wire_bytes<'a>(bucket: &'a [u8], found: &FoundEntry) -> (&'a [u8], &'a [u8]) {
    let body = body(bucket);
    let key_start = found.off + EHEADSIZE;
    let value_start = key_start + found.klen;
    (
        &body[key_start..key_start + found.klen],
        &body[value_start..value_start + found.vlen],
    )
}

/// Swap a found entry with its immediate predecessor, drifting it one
/// slot toward the bucket head. Cheap
/// and local by design, in place of an O(n) move-to-front shift.
pub fn swap_with_predecessor(bucket: &mut [u8], found: &FoundEntry) {
    let Some(prev_off) = found.previous_off else {
        return;
    };
    let prev_size = found.off - prev_off;
    let found_size = found.size;

    let body = body_mut(bucket);
    let mut combined = Vec::with_capacity(prev_size + found_size);
    combined.extend_from_slice(&body[found.off..found.off + found_size]);
    combined.extend_from_slice(&body[prev_off..prev_off + prev_size]);
    body[prev_off..prev_off + prev_size + found_size].copy_from_slice(&combined);
}

/// Remove the entry at `off` (size `size`), compacting the bucket by
/// shifting everything after it left (used by `delete` and by the
/// clean-expired drop on `read`).
pub fn remove_at(bucket: &mut [u8], bucketsize: usize, off: usize, size: usize) {
    let cap = capacity(bucketsize);
    let filled = BucketHeader::filled(bucket) as usize;
    let body = body_mut(bucket);

    let tail_start = off + size;
    let tail_len = filled - tail_start;
    body.copy_within(tail_start..tail_start + tail_len, off);
    let new_filled = filled - size;
    body[new_filled..cap.min(filled)].fill(0);

    BucketHeader::set_filled(bucket, new_filled as i32);
}

/// `_insert`: prepend a new entry, evicting from the tail
/// if the bucket overflows. Returns the entries evicted to make room
/// (possibly empty), in oldest-to-newest tail order, for the caller to
/// write back if they're dirty.
#[allow(clippy::too_many_arguments)]
pub fn insert(
    bucket: &mut [u8],
    bucketsize: usize,
    key_wire: &[u8],
    value_wire: &[u8],
    now: i32,
    dirty: bool,
) -> Vec<EvictedEntry> {
    let cap = capacity(bucketsize);
    let size = EHEADSIZE + key_wire.len() + value_wire.len();
    if size > cap {
        return Vec::new();
    }

    let new_header = EntryHeader {
        size: size as i32,
        time: now,
        klen: key_wire.len() as i32,
        vlen: value_wire.len() as i32,
        flags: if dirty { ENTRY_FLAG_DIRTY } else { 0 },
    };

    let mut new_entry = vec![0u8; size];
    new_header.write(&mut new_entry[..EHEADSIZE]);
    new_entry[EHEADSIZE..EHEADSIZE + key_wire.len()].copy_from_slice(key_wire);
    new_entry[EHEADSIZE + key_wire.len()..].copy_from_slice(value_wire);

    let filled = BucketHeader::filled(bucket) as usize;
    let mut combined = Vec::with_capacity(size + filled);
    combined.extend_from_slice(&new_entry);
    combined.extend_from_slice(&body(bucket)[..filled]);

    let (keep_len, evicted) = if combined.len() <= cap {
        (combined.len(), Vec::new())
    } else {
        let mut cursor = 0usize;
        loop {
            let header = EntryHeader::read(&combined[cursor..cursor + EHEADSIZE]);
            let entry_size = header.size as usize;
            if cursor + entry_size > cap {
                break;
            }
            cursor += entry_size;
        }
        let poff = cursor;

        let mut evicted = Vec::new();
        let mut ecursor = poff;
        while ecursor < combined.len() {
            let header = EntryHeader::read(&combined[ecursor..ecursor + EHEADSIZE]);
            let klen = header.klen as usize;
            let vlen = header.vlen as usize;
            let key_start = ecursor + EHEADSIZE;
            let value_start = key_start + klen;
            evicted.push(EvictedEntry {
                key_wire: combined[key_start..key_start + klen].to_vec(),
                value_wire: combined[value_start..value_start + vlen].to_vec(),
                dirty: header.dirty(),
            });
            ecursor += header.size as usize;
        }
        (poff, evicted)
    };

    let body = body_mut(bucket);
    body[..keep_len].copy_from_slice(&combined[..keep_len]);
    body[keep_len..cap].fill(0);
    BucketHeader::set_filled(bucket, keep_len as i32);

    evicted
}

/// One enumerated entry, at the detail level the caller requested
/// (`entries`).
pub struct RawEntry {
    pub key_wire: Vec<u8>,
    pub value_wire: Vec<u8>,
    pub time: i32,
    pub dirty: bool,
}

/// Walk every live, non-expired entry in the bucket. Always returns
/// full key/value/time/dirty data; the
/// caller (`Cache::entries`) trims to the requested detail level and
/// decodes through the codec.
pub fn list_live_entries(
    bucket: &[u8],
    bucketsize: usize,
    now: i64,
    expiry_secs: u32,
    path: &Path,
    bucket_offset: u64,
) -> Result<Vec<RawEntry>> {
    let body = body(bucket);
    let mut out = Vec::new();

    walk_entries(bucket, bucketsize, path, bucket_offset, |off, header| {
        let expired = expiry_secs != 0 && (now - header.time as i64) > expiry_secs as i64;
        if !expired {
            let klen = header.klen as usize;
            let vlen = header.vlen as usize;
            let key_start = off + EHEADSIZE;
            let value_start = key_start + klen;
            out.push(RawEntry {
                key_wire: body[key_start..key_start + klen].to_vec(),
                value_wire: body[value_start..value_start + vlen].to_vec(),
                time: header.time,
                dirty: header.dirty(),
            });
        }
        false
    })?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_path() -> PathBuf {
        PathBuf::from("test.cache")
    }

    fn new_bucket(bucketsize: usize) -> Vec<u8> {
        vec![0u8; bucketsize]
    }

    #[test]
    fn insert_then_find_round_trips() {
        let mut bucket = new_bucket(256);
        insert(&mut bucket, 256, b" k1", b" v1", 1000, false);
        let found = find(&bucket, 256, b" k1", 1000, 0, &test_path(), 0)
            .unwrap()
            .unwrap();
        assert_eq!(found.previous_off, None);
        assert_eq!(found.vlen, 3);
    }

    #[test]
    fn fresh_insert_becomes_new_head() {
        let mut bucket = new_bucket(256);
        insert(&mut bucket, 256, b" k1", b" v1", 1000, false);
        insert(&mut bucket, 256, b" k2", b" v2", 1001, false);
        let found = find(&bucket, 256, b" k2", 1001, 0, &test_path(), 0)
            .unwrap()
            .unwrap();
        assert_eq!(found.previous_off, None, "most recent insert is the head");
    }

    #[test]
    fn swap_with_predecessor_moves_entry_toward_head() {
        let mut bucket = new_bucket(256);
        insert(&mut bucket, 256, b" k1", b" v1", 1000, false);
        insert(&mut bucket, 256, b" k2", b" v2", 1001, false);
        // k1 sits behind k2 (k2 is head).
        let found = find(&bucket, 256, b" k1", 1001, 0, &test_path(), 0)
            .unwrap()
            .unwrap();
        assert!(found.previous_off.is_some());
        swap_with_predecessor(&mut bucket, &found);
        let found_again = find(&bucket, 256, b" k1", 1001, 0, &test_path(), 0)
            .unwrap()
            .unwrap();
        assert_eq!(found_again.previous_off, None, "k1 is now the head");
    }

    #[test]
    fn oversize_entry_is_never_stored() {
        let mut bucket = new_bucket(100);
        let big_value = vec![b'x'; 1000];
        let evicted = insert(&mut bucket, 100, b" k1", &big_value, 1000, false);
        assert!(evicted.is_empty());
        assert_eq!(BucketHeader::filled(&bucket), 0);
    }

    #[test]
    fn overflow_evicts_from_tail() {
        let mut bucket = new_bucket(128); // cap = 88 bytes of entries
        // Each entry is EHEADSIZE(40) + 2 + 2 = 44 bytes; two fit exactly, a third evicts the tail.
        insert(&mut bucket, 128, b" a", b" 1", 1, true);
        insert(&mut bucket, 128, b" b", b" 2", 2, true);
        let evicted = insert(&mut bucket, 128, b" c", b" 3", 3, true);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].key_wire, b" a");
        assert!(evicted[0].dirty);

        assert!(find(&bucket, 128, b" a", 3, 0, &test_path(), 0)
            .unwrap()
            .is_none());
        assert!(find(&bucket, 128, b" c", 3, 0, &test_path(), 0)
            .unwrap()
            .is_some());
    }

    #[test]
    fn remove_compacts_bucket() {
        let mut bucket = new_bucket(256);
        insert(&mut bucket, 256, b" k1", b" v1", 1000, false);
        insert(&mut bucket, 256, b" k2", b" v2", 1001, false);
        let found = find(&bucket, 256, b" k1", 1001, 0, &test_path(), 0)
            .unwrap()
            .unwrap();
        remove_at(&mut bucket, 256, found.off, found.size);
        assert!(find(&bucket, 256, b" k1", 1001, 0, &test_path(), 0)
            .unwrap()
            .is_none());
        assert!(find(&bucket, 256, b" k2", 1001, 0, &test_path(), 0)
            .unwrap()
            .is_some());
    }

    #[test]
    fn zero_sized_entry_is_corruption() {
        let mut bucket = new_bucket(256);
        insert(&mut bucket, 256, b" k1", b" v1", 1000, false);
        // Corrupt: force the entry's size field to 0.
        BucketHeader::set_filled(&mut bucket, 40);
        body_mut(&mut bucket)[0..4].copy_from_slice(&0i32.to_le_bytes());
        let err = find(&bucket, 256, b" k1", 1000, 0, &test_path(), 0).unwrap_err();
        assert!(matches!(err, CacheError::Corruption { .. }));
    }

    #[test]
    fn super_sized_entry_is_corruption() {
        let mut bucket = new_bucket(256);
        insert(&mut bucket, 256, b" k1", b" v1", 1000, false);
        BucketHeader::set_filled(&mut bucket, 1000);
        body_mut(&mut bucket)[0..4].copy_from_slice(&10_000i32.to_le_bytes());
        let err = find(&bucket, 256, b" k1", 1000, 0, &test_path(), 0).unwrap_err();
        assert!(matches!(err, CacheError::Corruption { .. }));
    }

    #[test]
    fn expiry_is_detected_but_not_removed_by_find() {
        let mut bucket = new_bucket(256);
        insert(&mut bucket, 256, b" k1", b" v1", 1000, false);
        let found = find(&bucket, 256, b" k1", 2000, 5, &test_path(), 0)
            .unwrap()
            .unwrap();
        assert!(found.expired);
    }

    #[test]
    fn list_live_entries_skips_expired() {
        let mut bucket = new_bucket(256);
        insert(&mut bucket, 256, b" k1", b" v1", 1000, false);
        insert(&mut bucket, 256, b" k2", b" v2", 1990, false);
        let entries = list_live_entries(&bucket, 256, 2000, 5, &test_path(), 0).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key_wire, b" k2");
    }
}
