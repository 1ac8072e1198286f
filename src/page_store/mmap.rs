use crate::StorageError;
use memmap2::MmapOptions;
use std::fs::File;
use std::ops::Range;

// Shared, read-only mapping of the start of the backing file. Writes go through the file handle.
pub(crate) struct Mmap {
    inner: memmap2::Mmap,
}

impl Mmap {
    /// Maps `len` bytes. `len` may exceed the file's length, but bytes past the end of the file
    /// must not be read.
    pub(crate) fn new(file: &File, len: u64) -> Result<Self, StorageError> {
        let len: usize = len.try_into().map_err(|_| {
            StorageError::Corrupted(format!("Mapping of {len} bytes exceeds the address space"))
        })?;
        // Safety: the file is exclusively locked by this process, and is only modified through
        // positional writes that never touch pages reachable from the authoritative meta
        let inner = unsafe { MmapOptions::new().len(len).map(file)? };

        // Accesses jump between b-tree nodes, so will be to random pages
        #[cfg(unix)]
        inner.advise(memmap2::Advice::Random)?;

        Ok(Self { inner })
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    pub(crate) fn get_memory(&self, range: Range<usize>) -> &[u8] {
        assert!(range.end <= self.inner.len());
        &self.inner[range]
    }
}
