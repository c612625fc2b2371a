//! File lifecycle and mmap: opening/creating the backing file, growing
//! it to the required size, and mapping it (`memmap2::MmapMut`). An
//! existing file's on-disk geometry and `strings` flag always win over
//! the caller's requested options — they are never silently re-created
//! to match a mismatched request.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::error::{CacheError, Result};
use crate::options::CacheOptions;
use crate::shm::layout::{self, FileHeader, FLAG_STRINGS, FORMAT_VERSION, HEADSIZE, MAGIC};
use crate::shm::lock::FileLock;

const GROW_CHUNK: usize = 1024;

pub struct ShmRegion {
    mmap: MmapMut,
    file: File,
    path: PathBuf,
}

impl ShmRegion {
    /// Open an existing cache file or create a new one, resolving the
    /// effective geometry and mapping it.
    pub fn open_or_create(path: &Path, requested: &CacheOptions) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(requested.permissions)
            .open(path)?;

        // Exclusive lock on the header region while we negotiate geometry
        // so only one process initializes a newly created file. Released
        // on every exit path via the guard's `Drop`.
        let _header_lock = FileLock::acquire(file.as_raw_fd(), 0, HEADSIZE as u64, true)?;

        let existing_len = file.metadata()?.len();
        let fresh = existing_len < HEADSIZE as u64;

        let header = if fresh {
            tracing::debug!(path = %path.display(), "initializing new cache file header");
            FileHeader {
                magic: MAGIC,
                buckets: requested.buckets as i32,
                bucketsize: requested.bucketsize as i32,
                pagesize: requested.pagesize as i32,
                flags: if requested.strings { FLAG_STRINGS } else { 0 },
                format_version: FORMAT_VERSION,
            }
        } else {
            let mut hbuf = [0u8; HEADSIZE];
            file.read_exact_at(&mut hbuf, 0)?;
            let h = FileHeader::read(&hbuf);
            if h.magic != MAGIC {
                return Err(CacheError::Format(format!(
                    "{}: not a valid cache file",
                    path.display()
                )));
            }
            if h.format_version != FORMAT_VERSION {
                return Err(CacheError::Format(format!(
                    "{}: only supports v1 (found version {})",
                    path.display(),
                    h.format_version
                )));
            }
            tracing::debug!(
                path = %path.display(),
                buckets = h.buckets,
                bucketsize = h.bucketsize,
                "geometry taken from on-disk header"
            );
            h
        };

        let total = layout::total_size(
            header.pagesize as u32,
            header.buckets as u32,
            header.bucketsize as u32,
        );
        if existing_len < total {
            grow_zeroed(&file, existing_len, total)?;
        }
        let final_len = file.metadata()?.len();
        if final_len != total {
            return Err(CacheError::Io(std::io::Error::other(format!(
                "{}: expected size {total} after growth, got {final_len}",
                path.display()
            ))));
        }

        if fresh {
            let mut hbuf = [0u8; HEADSIZE];
            header.write(&mut hbuf);
            file.write_all_at(&hbuf, 0)?;
        }

        // SAFETY: `file` is open read/write and sized to exactly `total`
        // bytes; no other mapping of this crate touches it concurrently
        // without going through the same header/bucket lock discipline.
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(ShmRegion {
            mmap,
            file,
            path: path.to_path_buf(),
        })
        // `_header_lock` drops here, releasing the header lock.
    }

    pub fn header(&self) -> FileHeader {
        FileHeader::read(&self.mmap[..HEADSIZE])
    }

    pub fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bucket(&self, pagesize: u32, bucketsize: u32, index: u32) -> &[u8] {
        let off = layout::bucket_offset(pagesize, bucketsize, index) as usize;
        &self.mmap[off..off + bucketsize as usize]
    }

    pub fn bucket_mut(&mut self, pagesize: u32, bucketsize: u32, index: u32) -> &mut [u8] {
        let off = layout::bucket_offset(pagesize, bucketsize, index) as usize;
        &mut self.mmap[off..off + bucketsize as usize]
    }

    /// Zero every bucket's bytes, leaving the header untouched.
    pub fn zero_all_buckets(&mut self, pagesize: u32) {
        let len = self.mmap.len();
        self.mmap[pagesize as usize..len].fill(0);
    }
}

/// Append zero bytes in `GROW_CHUNK`-sized pieces until the file reaches
/// `total` bytes.
fn grow_zeroed(file: &File, from: u64, total: u64) -> Result<()> {
    let pad = [0u8; GROW_CHUNK];
    let mut offset = from;
    while offset < total {
        let chunk = (total - offset).min(GROW_CHUNK as u64) as usize;
        file.write_all_at(&pad[..chunk], offset)?;
        offset += chunk as u64;
    }
    Ok(())
}
