//! The backing-store collaborator: `read`/`write`/
//! `delete` callbacks the cache calls at defined points, with no opinion
//! on what they actually talk to. Invoked while the bucket lock is held
//! — implementations must not re-enter the same cache.

use crate::error::Result;

/// A backing data source a [`crate::Cache`] pulls from on miss and pushes
/// to on write/eviction. `V` is the host value type chosen by the caller
/// (paired with a [`crate::codec::ValueCodec<V>`]).
pub trait BackingStore<V>: Send + Sync {
    /// Fetch on cache miss. `Ok(None)` means "not found upstream either".
    /// Errors propagate to the caller of `read` after the bucket lock is
    /// released (`CallbackError`).
    fn read(&self, key: &[u8]) -> Result<Option<V>>;

    /// Commit a write. Called synchronously from `write` when
    /// `writethrough`, or deferred to eviction of a dirty entry when not.
    fn write(&self, key: &[u8], value: &V) -> Result<()>;

    /// Remove a key. Only called when the cached entry being deleted is
    /// not dirty — a dirty entry's value was never committed upstream.
    fn delete(&self, key: &[u8], cached_value: &V) -> Result<()>;
}

/// No backing store configured — reads always miss upstream, writes and
/// deletes are no-ops. The default for a pure cache-only setup.
pub struct NoBackingStore;

impl<V> BackingStore<V> for NoBackingStore {
    fn read(&self, _key: &[u8]) -> Result<Option<V>> {
        Ok(None)
    }

    fn write(&self, _key: &[u8], _value: &V) -> Result<()> {
        Ok(())
    }

    fn delete(&self, _key: &[u8], _cached_value: &V) -> Result<()> {
        Ok(())
    }
}
