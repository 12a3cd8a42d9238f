#![allow(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::types::{Result, StoreError};

const LOCK_BYTE: u64 = 0;

/// Exclusive lock over a data directory.
///
/// Held through an advisory region lock on `<dir>/lock`, so a second process
/// opening the same directory fails with [`StoreError::Locked`]. Region locks
/// do not conflict inside one process, so directories locked by this process
/// are also tracked in a process-wide set.
pub struct DirLock {
    file: Arc<File>,
    key: PathBuf,
}

// fcntl record locks never conflict within one process, so handles opened
// by this process are tracked here as well.
fn held_dirs() -> &'static Mutex<FxHashSet<PathBuf>> {
    static HELD: OnceLock<Mutex<FxHashSet<PathBuf>>> = OnceLock::new();
    HELD.get_or_init(|| Mutex::new(FxHashSet::default()))
}

impl DirLock {
    /// Locks `dir`, failing immediately when someone else holds it.
    pub fn acquire(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let key = dir.canonicalize().map_err(StoreError::from)?;
        {
            let mut held = held_dirs().lock();
            if !held.insert(key.clone()) {
                return Err(StoreError::Locked);
            }
        }
        match Self::lock_file(&dir.join("lock")) {
            Ok(file) => {
                debug!(dir = %key.display(), "data directory locked");
                Ok(Self { file, key })
            }
            Err(err) => {
                held_dirs().lock().remove(&key);
                Err(err)
            }
        }
    }

    fn lock_file(path: &Path) -> Result<Arc<File>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(StoreError::from)?;
        if file.metadata()?.len() < 1 {
            file.set_len(1)?;
        }
        let file = Arc::new(file);
        if !lock_region(&file, LOCK_BYTE, 1)? {
            return Err(StoreError::Locked);
        }
        Ok(file)
    }

    /// Directory this lock protects.
    pub fn dir(&self) -> &Path {
        &self.key
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(err) = unlock_region(&self.file, LOCK_BYTE, 1) {
            debug!(error = %err, "failed to release directory lock");
        }
        held_dirs().lock().remove(&self.key);
    }
}

fn lock_region(file: &Arc<File>, start: u64, len: u64) -> io::Result<bool> {
    #[cfg(unix)]
    {
        unix::lock_region(file, start, len)
    }
    #[cfg(windows)]
    {
        windows::lock_region(file, start, len)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = (file, start, len);
        Ok(true)
    }
}

fn unlock_region(file: &Arc<File>, start: u64, len: u64) -> io::Result<()> {
    #[cfg(unix)]
    {
        unix::unlock_region(file, start, len)
    }
    #[cfg(windows)]
    {
        windows::unlock_region(file, start, len)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = (file, start, len);
        Ok(())
    }
}

#[cfg(unix)]
mod unix {
    use super::*;
    use std::os::unix::io::AsRawFd;

    pub fn lock_region(file: &Arc<File>, start: u64, len: u64) -> io::Result<bool> {
        let fd = file.as_raw_fd();
        let mut flock = libc::flock {
            l_type: libc::F_WRLCK as _,
            l_whence: libc::SEEK_SET as _,
            l_start: start as libc::off_t,
            l_len: len as libc::off_t,
            l_pid: 0,
        };
        let res = unsafe { libc::fcntl(fd, libc::F_SETLK, &mut flock) };
        if res == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EAGAIN) | Some(libc::EACCES) => Ok(false),
            _ => Err(err),
        }
    }

    pub fn unlock_region(file: &Arc<File>, start: u64, len: u64) -> io::Result<()> {
        let fd = file.as_raw_fd();
        let mut flock = libc::flock {
            l_type: libc::F_UNLCK as _,
            l_whence: libc::SEEK_SET as _,
            l_start: start as libc::off_t,
            l_len: len as libc::off_t,
            l_pid: 0,
        };
        let res = unsafe { libc::fcntl(fd, libc::F_SETLK, &mut flock) };
        if res == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(windows)]
mod windows {
    use super::*;
    use std::mem::zeroed;
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::ERROR_LOCK_VIOLATION;
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, UnlockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };
    use windows_sys::Win32::System::IO::OVERLAPPED;

    pub fn lock_region(file: &Arc<File>, start: u64, len: u64) -> io::Result<bool> {
        unsafe {
            let handle = file.as_raw_handle();
            let mut overlapped: OVERLAPPED = zeroed();
            overlapped.Anonymous.Anonymous.Offset = start as u32;
            overlapped.Anonymous.Anonymous.OffsetHigh = (start >> 32) as u32;
            let flags = LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY;
            let res = LockFileEx(
                handle as isize,
                flags,
                0,
                len as u32,
                (len >> 32) as u32,
                &mut overlapped,
            );
            if res != 0 {
                Ok(true)
            } else {
                let err = io::Error::last_os_error();
                if matches!(err.raw_os_error(), Some(code) if code == ERROR_LOCK_VIOLATION as i32)
                {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    pub fn unlock_region(file: &Arc<File>, start: u64, len: u64) -> io::Result<()> {
        unsafe {
            let handle = file.as_raw_handle();
            let mut overlapped: OVERLAPPED = zeroed();
            overlapped.Anonymous.Anonymous.Offset = start as u32;
            overlapped.Anonymous.Anonymous.OffsetHigh = (start >> 32) as u32;
            let res = UnlockFileEx(
                handle as isize,
                0,
                len as u32,
                (len >> 32) as u32,
                &mut overlapped,
            );
            if res != 0 {
                Ok(())
            } else {
                Err(io::Error::last_os_error())
            }
        }
    }
}
