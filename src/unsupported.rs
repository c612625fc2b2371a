//! Windows stand-in: the mmap/`fcntl` implementation only targets Unix,
//! but the same public types exist here so the crate doesn't refuse to
//! compile outright on Windows. Every operation fails with a clear
//! "unsupported platform" error instead.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use crate::callbacks::BackingStore;
use crate::codec::ValueCodec;
use crate::error::{CacheError, Result};
use crate::options::CacheOptions;

pub struct CacheStats;

impl CacheStats {
    pub fn hits(&self) -> u64 {
        0
    }

    pub fn misses(&self) -> u64 {
        0
    }
}

pub struct EntryRecord<V> {
    pub key: Vec<u8>,
    pub time: Option<i64>,
    pub dirty: Option<bool>,
    pub value: Option<V>,
}

pub struct Cache<V, C, B> {
    _value: PhantomData<V>,
    _codec: PhantomData<C>,
    _backing: PhantomData<B>,
}

fn unsupported() -> CacheError {
    CacheError::Io(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "shared mmap-backed cache is not supported on this platform",
    ))
}

impl<V, C, B> Cache<V, C, B>
where
    C: ValueCodec<V>,
    B: BackingStore<V>,
{
    pub fn open(_path: impl AsRef<Path>, _options: CacheOptions, _codec: C, _backing: B) -> Result<Self> {
        Err(unsupported())
    }

    pub fn read(&self, _key: &[u8]) -> Result<(bool, Option<V>)> {
        Err(unsupported())
    }

    pub fn write(&self, _key: &[u8], _value: &V) -> Result<()> {
        Err(unsupported())
    }

    pub fn delete(&self, _key: &[u8]) -> Result<(bool, Option<V>)> {
        Err(unsupported())
    }

    pub fn entries(&self, _detail: u8) -> Result<Vec<EntryRecord<V>>> {
        Err(unsupported())
    }

    pub fn quick_clear(&self) -> Result<()> {
        Err(unsupported())
    }

    pub fn buckets(&self) -> u32 {
        0
    }

    pub fn bucketsize(&self) -> u32 {
        0
    }

    pub fn pagesize(&self) -> u32 {
        0
    }

    pub fn strings(&self) -> bool {
        false
    }

    pub fn expiry(&self) -> u32 {
        0
    }

    pub fn writethrough(&self) -> bool {
        true
    }

    pub fn cachenegative(&self) -> bool {
        false
    }

    pub fn context(&self) -> Option<Arc<dyn std::any::Any + Send + Sync>> {
        None
    }

    pub fn set_context(&self, _context: Arc<dyn std::any::Any + Send + Sync>) {}

    pub fn stats(&self) -> &CacheStats {
        &CacheStats
    }
}
