//! Construction options. On an existing file, geometry and
//! `strings` are overridden from the on-disk header at open time — these
//! are only authoritative for a freshly created file.

use crate::error::{CacheError, Result};

pub const DEFAULT_BUCKETS: u32 = 13;
pub const DEFAULT_BUCKETSIZE: u32 = 1024;
pub const DEFAULT_PAGESIZE: u32 = 1024;
pub const DEFAULT_PERMISSIONS: u32 = 0o600;
pub const MIN_PAGESIZE: u32 = 40; // max(headsize, bheadsize, eheadsize)

#[derive(Clone, Debug)]
pub struct CacheOptions {
    pub(crate) buckets: u32,
    pub(crate) bucketsize: u32,
    pub(crate) pagesize: u32,
    pub(crate) strings: bool,
    pub(crate) expiry_secs: u32,
    pub(crate) permissions: u32,
    pub(crate) cachenegative: bool,
    pub(crate) writethrough: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        CacheOptions {
            buckets: DEFAULT_BUCKETS,
            bucketsize: DEFAULT_BUCKETSIZE,
            pagesize: DEFAULT_PAGESIZE,
            strings: false,
            expiry_secs: 0,
            permissions: DEFAULT_PERMISSIONS,
            cachenegative: false,
            writethrough: true,
        }
    }
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buckets(mut self, buckets: u32) -> Self {
        self.buckets = buckets;
        self
    }

    pub fn bucketsize(mut self, bucketsize: u32) -> Self {
        self.bucketsize = bucketsize;
        self
    }

    pub fn pagesize(mut self, pagesize: u32) -> Self {
        self.pagesize = pagesize;
        self
    }

    pub fn strings(mut self, strings: bool) -> Self {
        self.strings = strings;
        self
    }

    /// Seconds; 0 disables expiry.
    pub fn expiry_secs(mut self, expiry_secs: u32) -> Self {
        self.expiry_secs = expiry_secs;
        self
    }

    pub fn permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn cachenegative(mut self, cachenegative: bool) -> Self {
        self.cachenegative = cachenegative;
        self
    }

    pub fn writethrough(mut self, writethrough: bool) -> Self {
        self.writethrough = writethrough;
        self
    }

    /// Validate and round `bucketsize` up to the next multiple of
    /// `pagesize`. Invalid numeric options are a fatal
    /// construction error (`CacheError::Config`).
    pub(crate) fn normalized(mut self) -> Result<Self> {
        if self.buckets == 0 {
            return Err(CacheError::Config("buckets must be positive".into()));
        }
        if self.bucketsize == 0 {
            return Err(CacheError::Config("bucketsize must be positive".into()));
        }
        if self.pagesize < MIN_PAGESIZE {
            return Err(CacheError::Config(format!(
                "pagesize must be >= {MIN_PAGESIZE}"
            )));
        }
        let rem = self.bucketsize % self.pagesize;
        if rem != 0 {
            self.bucketsize += self.pagesize - rem;
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucketsize_rounds_up_to_next_pagesize_multiple() {
        let opts = CacheOptions::new()
            .pagesize(100)
            .bucketsize(150)
            .normalized()
            .unwrap();
        assert_eq!(opts.bucketsize, 200);
    }

    #[test]
    fn bucketsize_already_aligned_is_unchanged() {
        let opts = CacheOptions::new()
            .pagesize(100)
            .bucketsize(200)
            .normalized()
            .unwrap();
        assert_eq!(opts.bucketsize, 200);
    }

    #[test]
    fn zero_buckets_is_rejected() {
        let err = CacheOptions::new().buckets(0).normalized().unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }

    #[test]
    fn pagesize_below_minimum_is_rejected() {
        let err = CacheOptions::new().pagesize(10).normalized().unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }
}
