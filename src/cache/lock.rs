use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Exclusive advisory lock on a sidecar file, released on drop.
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Opens (creating if needed) `path` and takes the lock without waiting.
    /// Returns `Ok(None)` when another holder has it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        if !try_lock(&file)? {
            return Ok(None);
        }
        Ok(Some(Self { file }))
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        unlock(&self.file);
    }
}

pub fn lock_path_for(cache_file: &Path) -> PathBuf {
    let mut name = cache_file.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

#[cfg(unix)]
fn try_lock(file: &File) -> Result<bool> {
    use std::os::unix::io::AsRawFd;

    let res = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if res == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == std::io::ErrorKind::WouldBlock {
        return Ok(false);
    }
    Err(Error::Io(err))
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;

    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

#[cfg(not(unix))]
fn try_lock(_file: &File) -> Result<bool> {
    Ok(true)
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn second_handle_cannot_lock_until_release() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("registry.cache.lock");

        let held = FileLock::try_acquire(&path)?.expect("first lock");
        assert!(path.exists());
        assert!(FileLock::try_acquire(&path)?.is_none());

        drop(held);
        assert!(FileLock::try_acquire(&path)?.is_some());
        Ok(())
    }

    #[test]
    fn lock_path_appends_suffix() {
        let path = lock_path_for(Path::new("/tmp/a/registry.cache"));
        assert_eq!(path, PathBuf::from("/tmp/a/registry.cache.lock"));
    }
}
