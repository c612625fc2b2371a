//! Byte-range advisory file locks via `fcntl`/`libc::flock`, generalized
//! to an arbitrary `(offset, length)` range and blocking mode
//! (`F_SETLKW`): the header lock and each bucket lock cover only their
//! own byte range, and acquisition blocks until granted rather than
//! failing immediately.
//!
//! Only one lock is held at a time by a given operation; a
//! single file descriptor can therefore safely own at most one
//! outstanding [`FileLock`] guard, which releases on drop even if the
//! body between acquire and drop unwinds.

use std::io;
use std::os::unix::io::RawFd;

/// Acquire a blocking byte-range lock on `fd` covering
/// `[offset, offset + length)`. Blocks until the lock is granted
/// (`F_SETLKW`) — fatal I/O errors propagate to the caller.
pub fn lock(fd: RawFd, offset: u64, length: u64, exclusive: bool) -> io::Result<()> {
    let flock = make_flock(offset, length, exclusive);
    loop {
        // SAFETY: `fd` is a valid, open file descriptor owned by the
        // caller for the duration of this call; `flock` is a fully
        // initialized `libc::flock`.
        let ret = unsafe { libc::fcntl(fd, libc::F_SETLKW, &flock) };
        if ret != -1 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        return Err(err);
    }
}

/// Release every lock this file descriptor holds (offset 0, length 0 is
/// POSIX shorthand for "the whole file", releasing regardless of which
/// byte range was last locked).
pub fn unlock(fd: RawFd) -> io::Result<()> {
    let flock = make_flock(0, 0, false);
    let mut flock = flock;
    flock.l_type = libc::F_UNLCK as libc::c_short;
    // SAFETY: see `lock`.
    let ret = unsafe { libc::fcntl(fd, libc::F_SETLK, &flock) };
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn make_flock(offset: u64, length: u64, exclusive: bool) -> libc::flock {
    let lock_type = if exclusive {
        libc::F_WRLCK
    } else {
        libc::F_RDLCK
    };
    // SAFETY: libc::flock is a plain-old-data struct; zeroing then
    // filling the fields used by fcntl is well-defined.
    let mut flock: libc::flock = unsafe { std::mem::zeroed() };
    flock.l_type = lock_type as libc::c_short;
    flock.l_whence = libc::SEEK_SET as libc::c_short;
    flock.l_start = offset as libc::off_t;
    flock.l_len = length as libc::off_t;
    flock
}

/// RAII guard releasing the lock it holds on drop, so a callback panic
/// or early return can't leave a bucket or the header locked forever.
pub struct FileLock {
    fd: RawFd,
}

impl FileLock {
    pub fn acquire(fd: RawFd, offset: u64, length: u64, exclusive: bool) -> io::Result<Self> {
        lock(fd, offset, length, exclusive)?;
        Ok(FileLock { fd })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = unlock(self.fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;

    fn scratch_file() -> (tempfile::TempDir, std::fs::File) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock.bin");
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .unwrap();
        file.set_len(4096).unwrap();
        (dir, file)
    }

    #[test]
    fn guard_releases_lock_on_drop() {
        let (_dir, file) = scratch_file();
        let fd = file.as_raw_fd();
        {
            let _guard = FileLock::acquire(fd, 0, 40, true).unwrap();
        }
        // A second acquisition on the same fd must succeed now that the
        // guard dropped; POSIX record locks are per-process, so this only
        // proves release happened, not cross-process exclusion.
        let _guard2 = FileLock::acquire(fd, 0, 40, true).unwrap();
    }

    #[test]
    fn distinct_byte_ranges_do_not_conflict() {
        let (_dir, file) = scratch_file();
        let fd = file.as_raw_fd();
        // Both ranges are acquired from this same process/fd, so this can
        // only prove no panic/error occurs when locking disjoint ranges —
        // POSIX record locks are per-process, not per-call, so it cannot
        // detect a real conflict between independent holders.
        let _a = FileLock::acquire(fd, 0, 40, true).unwrap();
        lock(fd, 40, 40, true).unwrap();
        unlock(fd).unwrap();
    }
}
