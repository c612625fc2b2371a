//! A shared, persistent, fixed-size key/value cache backed by a single
//! memory-mapped file. Multiple independent processes may
//! concurrently read and mutate the same file; mutual exclusion is
//! provided by byte-range advisory locks on the file itself, not by
//! this crate's own in-process mutex (which only serializes callers
//! within one process — `fcntl` locks do not do that on their own).

pub mod callbacks;
pub mod codec;
pub mod error;
pub mod hash;
pub mod options;

#[cfg(not(target_os = "windows"))]
mod shm;

#[cfg(target_os = "windows")]
mod unsupported;

#[cfg(not(target_os = "windows"))]
mod imp;
#[cfg(not(target_os = "windows"))]
pub use imp::{Cache, CacheStats, EntryRecord};

#[cfg(target_os = "windows")]
pub use unsupported::{Cache, CacheStats, EntryRecord};

pub use callbacks::{BackingStore, NoBackingStore};
pub use codec::{BytesCodec, Payload, ValueCodec};
pub use error::{CacheError, Result};
pub use options::CacheOptions;
