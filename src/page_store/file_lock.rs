use crate::DatabaseError;
use std::fs::File;
#[cfg(unix)]
use std::io;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;

// Advisory exclusive lock on the backing file, held for the lifetime of the store.
// Only enforced between processes that also take the lock.
pub(crate) struct FileLock {
    #[cfg(unix)]
    fd: libc::c_int,
}

impl FileLock {
    #[cfg(unix)]
    pub(crate) fn new(file: &File) -> Result<Self, DatabaseError> {
        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result != 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                Err(DatabaseError::DatabaseAlreadyOpen)
            } else {
                Err(err.into())
            }
        } else {
            Ok(Self { fd })
        }
    }

    // No advisory locking on this platform
    #[cfg(not(unix))]
    pub(crate) fn new(_file: &File) -> Result<Self, DatabaseError> {
        Ok(Self {})
    }
}

#[cfg(unix)]
impl Drop for FileLock {
    fn drop(&mut self) {
        unsafe { libc::flock(self.fd, libc::LOCK_UN) };
    }
}

#[cfg(all(test, unix))]
mod test {
    use crate::page_store::file_lock::FileLock;
    use crate::DatabaseError;
    use std::fs::OpenOptions;
    use tempfile::NamedTempFile;

    #[test]
    fn exclusive() {
        let tmpfile = NamedTempFile::new().unwrap();
        let first = OpenOptions::new()
            .read(true)
            .write(true)
            .open(tmpfile.path())
            .unwrap();
        let second = OpenOptions::new()
            .read(true)
            .write(true)
            .open(tmpfile.path())
            .unwrap();

        let lock = FileLock::new(&first).unwrap();
        assert!(matches!(
            FileLock::new(&second),
            Err(DatabaseError::DatabaseAlreadyOpen)
        ));
        drop(lock);
        FileLock::new(&second).unwrap();
    }
}
