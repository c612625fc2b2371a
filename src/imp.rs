//! The public surface: `Cache<V, C, B>` composes the
//! bucket engine with the locking discipline and the optional
//! backing-store callbacks. A `parking_lot::Mutex` wraps the engine
//! handle and serializes same-process callers ahead of the `fcntl`
//! byte-range lock rather than replacing it: two processes (or, in
//! tests, two `Cache` handles on two threads) still contend on the OS
//! lock correctly — the mutex only protects the single mutable mmap
//! borrow within this process.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::callbacks::BackingStore;
use crate::codec::{self, Payload, ValueCodec};
use crate::error::{CacheError, Result};
use crate::options::CacheOptions;
use crate::shm::layout::{self, BHEADSIZE, EHEADSIZE};
use crate::shm::lock::FileLock;
use crate::shm::region::ShmRegion;
use crate::shm::bucket::{self, EvictedEntry};

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// In-process, non-persisted hit/miss counters (supplementing this cache's
/// on-disk format with nothing — these never touch the mapped file).
#[derive(Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }
}

/// One entry as reported by [`Cache::entries`], trimmed to the
/// requested detail level.
pub struct EntryRecord<V> {
    pub key: Vec<u8>,
    pub time: Option<i64>,
    pub dirty: Option<bool>,
    pub value: Option<V>,
}

/// A shared, persistent, fixed-size key/value cache backed by a single
/// memory-mapped file.
///
/// `C` maps the host value type `V` to/from opaque bytes; `B` is the
/// optional backing store consulted on miss and written through to (or
/// written back from, on eviction). Pass [`crate::callbacks::NoBackingStore`]
/// for a pure cache with no upstream.
pub struct Cache<V, C, B>
where
    C: ValueCodec<V>,
    B: BackingStore<V>,
{
    region: Mutex<ShmRegion>,
    codec: C,
    backing: B,
    buckets: u32,
    bucketsize: u32,
    pagesize: u32,
    strings: bool,
    expiry_secs: u32,
    cachenegative: bool,
    writethrough: bool,
    context: Mutex<Option<Arc<dyn std::any::Any + Send + Sync>>>,
    stats: CacheStats,
    _value: PhantomData<V>,
}

impl<V, C, B> Cache<V, C, B>
where
    C: ValueCodec<V>,
    B: BackingStore<V>,
{
    /// Open an existing cache file or create a new one.
    pub fn open(path: impl AsRef<Path>, options: CacheOptions, codec: C, backing: B) -> Result<Self> {
        let options = options.normalized()?;
        let region = ShmRegion::open_or_create(path.as_ref(), &options)?;
        let header = region.header();

        Ok(Cache {
            region: Mutex::new(region),
            codec,
            backing,
            buckets: header.buckets as u32,
            bucketsize: header.bucketsize as u32,
            pagesize: header.pagesize as u32,
            strings: header.strings(),
            expiry_secs: options.expiry_secs,
            cachenegative: options.cachenegative,
            writethrough: options.writethrough,
            context: Mutex::new(None),
            stats: CacheStats::default(),
            _value: PhantomData,
        })
    }

    fn bucket_index_and_offset(&self, key: &[u8]) -> (u32, u64) {
        let idx = crate::hash::bucket_index(key, self.buckets);
        (idx, layout::bucket_offset(self.pagesize, self.bucketsize, idx))
    }

    /// Flush entries evicted by `bucket::insert` back to the backing
    /// store. Only entries still `dirty` and only when *this handle's*
    /// `writethrough` is false get flushed: `writethrough` is a per-handle
    /// option, never persisted to the on-disk header, so a dirty entry
    /// written by another process/handle running `writethrough = false`
    /// must still be discarded — not flushed — if this handle evicts it
    /// while itself configured with `writethrough = true`.
    fn writeback_evicted(&self, evicted: Vec<EvictedEntry>) -> Result<()> {
        for ev in evicted {
            if ev.dirty && !self.writethrough {
                let key_payload = codec::decode_wire(&ev.key_wire)?;
                let value_payload = codec::decode_wire(&ev.value_wire)?;
                let value = self.codec.from_payload(&value_payload)?;
                self.backing.write(key_payload.raw_bytes(), &value)?;
            }
        }
        Ok(())
    }

    /// Read a key.
    pub fn read(&self, key: &[u8]) -> Result<(bool, Option<V>)> {
        let (bucket_idx, bucket_off) = self.bucket_index_and_offset(key);
        let key_wire = codec::encode_wire(&Payload::Bytes(key.to_vec()));

        let mut region = self.region.lock();
        let fd = region.fd();
        let path = region.path().to_path_buf();
        tracing::trace!(offset = bucket_off, length = self.bucketsize, "acquiring bucket lock");
        let _lock = FileLock::acquire(fd, bucket_off, self.bucketsize as u64, true)?;
        let now = now_secs();

        let bucket_bytes = region.bucket_mut(self.pagesize, self.bucketsize, bucket_idx);
        let found = match bucket::find(
            bucket_bytes,
            self.bucketsize as usize,
            &key_wire,
            now,
            self.expiry_secs,
            &path,
            bucket_off,
        ) {
            Ok(found) => found,
            Err(e) => {
                tracing::error!(path = %path.display(), offset = bucket_off, error = %e, "corruption detected");
                return Err(e);
            }
        };

        let hit_value_wire = match &found {
            Some(f) if f.expired && !f.dirty() => {
                bucket::remove_at(bucket_bytes, self.bucketsize as usize, f.off, f.size);
                None
            }
            Some(f) => {
                let (_, value_wire) = bucket::entry_wire_bytes(bucket_bytes, f);
                let value_wire = value_wire.to_vec();
                bucket::swap_with_predecessor(bucket_bytes, f);
                Some(value_wire)
            }
            None => None,
        };

        if let Some(value_wire) = hit_value_wire {
            self.stats.record_hit();
            let payload = codec::decode_wire(&value_wire)?;
            if matches!(payload, Payload::Absent) {
                // A negatively-cached miss: the backing store confirmed
                // absence on an earlier read, so don't re-query it.
                return Ok((false, None));
            }
            let value = self.codec.from_payload(&payload)?;
            return Ok((true, Some(value)));
        }

        self.stats.record_miss();

        let fetched = self.backing.read(key)?;
        if fetched.is_some() || self.cachenegative {
            let value_wire = match &fetched {
                Some(v) => codec::encode_wire(&self.codec.to_payload(v)?),
                None => codec::encode_wire(&Payload::Absent),
            };
            let evicted = bucket::insert(
                bucket_bytes,
                self.bucketsize as usize,
                &key_wire,
                &value_wire,
                now as i32,
                false,
            );
            self.writeback_evicted(evicted)?;
        }

        let found = fetched.is_some();
        Ok((found, fetched))
    }

    /// Write a key/value pair.
    pub fn write(&self, key: &[u8], value: &V) -> Result<()> {
        let (bucket_idx, bucket_off) = self.bucket_index_and_offset(key);
        let key_wire = codec::encode_wire(&Payload::Bytes(key.to_vec()));
        let value_wire = codec::encode_wire(&self.codec.to_payload(value)?);
        let size = EHEADSIZE + key_wire.len() + value_wire.len();
        let capacity = self.bucketsize as usize - BHEADSIZE;

        let mut region = self.region.lock();
        let fd = region.fd();
        let path = region.path().to_path_buf();
        let _lock = FileLock::acquire(fd, bucket_off, self.bucketsize as u64, true)?;
        let now = now_secs();
        let bucket_bytes = region.bucket_mut(self.pagesize, self.bucketsize, bucket_idx);

        if size > capacity {
            tracing::warn!(size, capacity, "entry exceeds bucket capacity, bypassing cache");
            if let Some(found) = bucket::find(
                bucket_bytes,
                self.bucketsize as usize,
                &key_wire,
                now,
                self.expiry_secs,
                &path,
                bucket_off,
            )? {
                if !found.dirty() {
                    let (_, old_value_wire) = bucket::entry_wire_bytes(bucket_bytes, &found);
                    let old_value_wire = old_value_wire.to_vec();
                    bucket::remove_at(bucket_bytes, self.bucketsize as usize, found.off, found.size);
                    let payload = codec::decode_wire(&old_value_wire)?;
                    let old_value = self.codec.from_payload(&payload)?;
                    self.backing.delete(key, &old_value)?;
                } else {
                    bucket::remove_at(bucket_bytes, self.bucketsize as usize, found.off, found.size);
                }
            }
            self.backing.write(key, value)?;
            return Ok(());
        }

        if let Some(found) = bucket::find(
            bucket_bytes,
            self.bucketsize as usize,
            &key_wire,
            now,
            self.expiry_secs,
            &path,
            bucket_off,
        )? {
            bucket::remove_at(bucket_bytes, self.bucketsize as usize, found.off, found.size);
        }

        let dirty = !self.writethrough;
        let evicted = bucket::insert(
            bucket_bytes,
            self.bucketsize as usize,
            &key_wire,
            &value_wire,
            now as i32,
            dirty,
        );

        self.writeback_evicted(evicted)?;

        if self.writethrough {
            self.backing.write(key, value)?;
        }

        Ok(())
    }

    /// Delete a key.
    pub fn delete(&self, key: &[u8]) -> Result<(bool, Option<V>)> {
        let (bucket_idx, bucket_off) = self.bucket_index_and_offset(key);
        let key_wire = codec::encode_wire(&Payload::Bytes(key.to_vec()));

        let mut region = self.region.lock();
        let fd = region.fd();
        let path = region.path().to_path_buf();
        let _lock = FileLock::acquire(fd, bucket_off, self.bucketsize as u64, true)?;
        let now = now_secs();
        let bucket_bytes = region.bucket_mut(self.pagesize, self.bucketsize, bucket_idx);

        let found = match bucket::find(
            bucket_bytes,
            self.bucketsize as usize,
            &key_wire,
            now,
            self.expiry_secs,
            &path,
            bucket_off,
        )? {
            Some(f) => f,
            None => return Ok((false, None)),
        };

        let (_, value_wire) = bucket::entry_wire_bytes(bucket_bytes, &found);
        let value_wire = value_wire.to_vec();
        let dirty = found.dirty();
        bucket::remove_at(bucket_bytes, self.bucketsize as usize, found.off, found.size);

        let payload = codec::decode_wire(&value_wire)?;
        let value = self.codec.from_payload(&payload)?;

        if !dirty {
            self.backing.delete(key, &value)?;
        }

        Ok((true, Some(value)))
    }

    /// Point-in-time enumeration of live entries. `detail` 0 = keys only, 1 = adds time+dirty, 2 =
    /// adds the decoded value. Buckets are walked and locked in
    /// sequence — not a globally consistent snapshot.
    pub fn entries(&self, detail: u8) -> Result<Vec<EntryRecord<V>>> {
        let region = self.region.lock();
        let fd = region.fd();
        let path = region.path().to_path_buf();
        let now = now_secs();
        let mut out = Vec::new();

        for idx in 0..self.buckets {
            let bucket_off = layout::bucket_offset(self.pagesize, self.bucketsize, idx);
            let _lock = FileLock::acquire(fd, bucket_off, self.bucketsize as u64, true)?;
            let bucket_bytes = region.bucket(self.pagesize, self.bucketsize, idx);
            let raw = bucket::list_live_entries(
                bucket_bytes,
                self.bucketsize as usize,
                now,
                self.expiry_secs,
                &path,
                bucket_off,
            )?;

            for entry in raw {
                let key_payload = codec::decode_wire(&entry.key_wire)?;
                let key = key_payload.raw_bytes().to_vec();
                let (time, dirty) = if detail >= 1 {
                    (Some(entry.time as i64), Some(entry.dirty))
                } else {
                    (None, None)
                };
                let value = if detail >= 2 {
                    let value_payload = codec::decode_wire(&entry.value_wire)?;
                    Some(self.codec.from_payload(&value_payload)?)
                } else {
                    None
                };
                out.push(EntryRecord { key, time, dirty, value });
            }
        }

        Ok(out)
    }

    /// Zero every bucket, leaving the header untouched. Dirty entries
    /// are discarded without flushing.
    pub fn quick_clear(&self) -> Result<()> {
        let mut region = self.region.lock();
        let fd = region.fd();
        let _lock = FileLock::acquire(fd, 0, layout::HEADSIZE as u64, true)?;
        tracing::warn!(
            path = %region.path().display(),
            "quick_clear discarding all buckets; dirty entries are not flushed"
        );
        region.zero_all_buckets(self.pagesize);
        Ok(())
    }

    pub fn buckets(&self) -> u32 {
        self.buckets
    }

    pub fn bucketsize(&self) -> u32 {
        self.bucketsize
    }

    pub fn pagesize(&self) -> u32 {
        self.pagesize
    }

    pub fn strings(&self) -> bool {
        self.strings
    }

    pub fn expiry(&self) -> u32 {
        self.expiry_secs
    }

    pub fn writethrough(&self) -> bool {
        self.writethrough
    }

    pub fn cachenegative(&self) -> bool {
        self.cachenegative
    }

    pub fn context(&self) -> Option<Arc<dyn std::any::Any + Send + Sync>> {
        self.context.lock().clone()
    }

    pub fn set_context(&self, context: Arc<dyn std::any::Any + Send + Sync>) {
        *self.context.lock() = Some(context);
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

// SAFETY invariant: every mutable touch of the mapped region goes
// through `self.region`'s mutex, and `codec`/`backing` are required to
// be `Send + Sync` by their trait bounds.
unsafe impl<V, C, B> Sync for Cache<V, C, B>
where
    C: ValueCodec<V>,
    B: BackingStore<V>,
{
}
