use crate::page_store::{
    get_page_size, mmap_size, read_exact_at, select_meta, write_all_at, BucketRoot, FileLock,
    Freelist, MetaRecord, Mmap, PageFlags, PageId, PageView, PageViewMut, StoreLimits,
    INITIAL_FREELIST_PAGE, INITIAL_PAGES, INITIAL_ROOT_PAGE, MAX_MMAP_STEP, MAX_PAGE_SIZE,
    META_PAGE_0, META_PAGE_1, MIN_PAGE_SIZE, PAGE_SIZE_PROBE_LEN,
};
use crate::{DatabaseError, StorageError};
#[cfg(feature = "logging")]
use log::{info, warn};
use std::fmt::{Debug, Formatter};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard};

const DEFAULT_FILE_MODE: u32 = 0o600;

/// Fields of the next meta record. The store fills in the rest.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CommitRequest {
    pub root: BucketRoot,
    pub freelist: PageId,
    pub allocator_cursor: PageId,
}

/// A single-file page store, memory-mapped for reads.
///
/// Pages are read through [`Store::pages`]. New page contents are written through the file
/// handle with [`Store::write_pages`], and become authoritative once [`Store::commit`] writes a
/// new meta record.
///
/// # Examples
///
/// ```rust
/// use bottledb::*;
/// # use tempfile::NamedTempFile;
///
/// # fn main() -> Result<(), Error> {
/// # let tmpfile: NamedTempFile = NamedTempFile::new().unwrap();
/// # let filename = tmpfile.path();
/// let store = Store::open(filename)?;
/// let meta = store.current_meta()?;
/// assert_eq!(meta.transaction_id, 1);
/// let pages = store.pages()?;
/// let freelist = pages.page(meta.freelist)?;
/// assert_eq!(freelist.kind(), Some(PageKind::Freelist));
/// # Ok(())
/// # }
/// ```
pub struct Store {
    // Declared before the file, so that the mapping is dropped before the file is closed
    mmap: RwLock<Mmap>,
    freelist: Mutex<Freelist>,
    commit_lock: Mutex<()>,
    file_len: AtomicU64,
    page_size: usize,
    limits: StoreLimits,
    _lock: FileLock,
    file: File,
}

impl Store {
    /// Opens the specified file, creating and initializing it if it is missing or empty.
    ///
    /// Convenience method for [`Builder::open`] with the default configuration
    pub fn open(path: impl AsRef<Path>) -> Result<Store, DatabaseError> {
        Builder::new().open(path)
    }

    /// Convenience method for [`Builder::new`]
    pub fn builder() -> Builder {
        Builder::new()
    }

    fn new(file: File, builder: &Builder) -> Result<Self, DatabaseError> {
        let lock = FileLock::new(&file)?;

        let mut file_len = file.metadata()?.len();
        let page_size = if file_len == 0 {
            let page_size = builder.page_size.unwrap_or_else(get_page_size);
            initialize(&file, page_size)?;
            file_len = file.metadata()?.len();
            page_size
        } else {
            detect_page_size(&file, file_len, builder.page_size)?
        };

        let mmap = map_validated(&file, file_len, 0, page_size, &builder.limits)?;

        let mut freelist = Freelist::new();
        {
            let meta = select_meta(
                &read_meta(&mmap, file_len, page_size, META_PAGE_0)?,
                &read_meta(&mmap, file_len, page_size, META_PAGE_1)?,
            )?;
            let page = read_page(&mmap, file_len, page_size, meta.freelist)?;
            freelist.read(&page)?;
        }

        Ok(Self {
            mmap: RwLock::new(mmap),
            freelist: Mutex::new(freelist),
            commit_lock: Mutex::new(()),
            file_len: AtomicU64::new(file_len),
            page_size,
            limits: builder.limits,
            _lock: lock,
            file,
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn limits(&self) -> &StoreLimits {
        &self.limits
    }

    /// Length of the current mapping in bytes
    pub fn mapped_len(&self) -> Result<u64, StorageError> {
        Ok(self.mmap.read()?.len() as u64)
    }

    /// Length of the backing file, as last observed by this store
    pub fn file_len(&self) -> u64 {
        self.file_len.load(Ordering::Acquire)
    }

    /// Returns a guard through which pages can be read. [`Store::remap`] blocks until every guard
    /// is dropped, so a guard must not be held by the thread that remaps.
    pub fn pages(&self) -> Result<MappedPages<'_>, StorageError> {
        Ok(MappedPages {
            mmap: self.mmap.read()?,
            file_len: self.file_len(),
            page_size: self.page_size,
        })
    }

    /// The authoritative meta record, chosen between the two meta pages
    pub fn current_meta(&self) -> Result<MetaRecord, DatabaseError> {
        self.pages()?.meta()
    }

    /// The in-memory freelist. Callers must serialize mutations with their own commits.
    pub fn freelist(&self) -> Result<MutexGuard<'_, Freelist>, StorageError> {
        Ok(self.freelist.lock()?)
    }

    /// Re-establishes the mapping so that it covers at least `min_size` bytes, and at least the
    /// whole file.
    ///
    /// On failure the previous mapping is kept.
    pub fn remap(&self, min_size: u64) -> Result<(), DatabaseError> {
        let file_len = self.file.metadata()?.len();
        let mmap = map_validated(&self.file, file_len, min_size, self.page_size, &self.limits)?;
        self.file_len.fetch_max(file_len, Ordering::AcqRel);

        let mut current = self.mmap.write()?;
        #[cfg(feature = "logging")]
        info!("Remapped store from {} to {} bytes", current.len(), mmap.len());
        // The old mapping is unmapped here, after every reader has released it
        *current = mmap;

        Ok(())
    }

    /// Writes whole pages starting at page `id`. Meta pages cannot be written this way.
    ///
    /// The pages are not durable until [`Store::sync`] or [`Store::commit`], and are not readable
    /// through [`Store::pages`] until the mapping covers them.
    pub fn write_pages(&self, id: PageId, data: &[u8]) -> Result<(), StorageError> {
        assert!(id > META_PAGE_1, "page {id} is a meta page");
        assert_eq!(data.len() % self.page_size, 0);
        let offset = id
            .checked_mul(self.page_size as u64)
            .ok_or_else(|| StorageError::Corrupted(format!("Page {id} is out of range")))?;
        write_all_at(&self.file, data, offset)?;
        self.file_len
            .fetch_max(offset + data.len() as u64, Ordering::AcqRel);
        Ok(())
    }

    /// Encodes the freelist, including pending ids, into the page run starting at `id`.
    /// The run must hold [`Freelist::page_count`] pages.
    pub fn write_freelist(&self, id: PageId) -> Result<(), StorageError> {
        let buffer = {
            let freelist = self.freelist()?;
            let pages = freelist.page_count(self.page_size);
            let mut buffer = vec![0; pages * self.page_size];
            let mut page = PageViewMut::new(&mut buffer)?;
            page.set_id(id);
            freelist.write(&mut page)?;
            page.set_overflow((pages - 1) as u32);
            buffer
        };
        self.write_pages(id, &buffer)
    }

    /// Flushes written pages to disk. Only file data is synced, not metadata such as mtime.
    pub fn sync(&self) -> Result<(), StorageError> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Makes the written pages authoritative by writing a new meta record.
    ///
    /// Data pages are synced first. The record is then written to the meta page that is not
    /// currently authoritative, with the next transaction id, and synced. A crash at any point
    /// leaves at least one valid meta record.
    pub fn commit(&self, request: CommitRequest) -> Result<MetaRecord, DatabaseError> {
        let _guard = self.commit_lock.lock()?;
        let current = self.current_meta()?;

        self.sync()?;

        let mut meta = current;
        meta.root = request.root;
        meta.freelist = request.freelist;
        meta.allocator_cursor = request.allocator_cursor;
        meta.transaction_id = current.next_transaction_id()?;
        meta.finalize();

        let page_id = current.next_commit_page();
        let mut buffer = vec![0; self.page_size];
        let mut page = PageViewMut::new(&mut buffer)?;
        page.set_id(page_id);
        page.set_flags(PageFlags::META);
        page.write_meta(&meta)?;
        write_all_at(&self.file, &buffer, page_id * self.page_size as u64)?;

        self.sync()?;

        Ok(meta)
    }

    /// Unmaps the file, then releases the lock and closes it
    pub fn close(self) {
        drop(self);
    }
}

impl Debug for Store {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("page_size", &self.page_size)
            .field("file_len", &self.file_len())
            .finish()
    }
}

/// Read access to the current mapping. Views returned from it cannot outlive it.
pub struct MappedPages<'a> {
    mmap: RwLockReadGuard<'a, Mmap>,
    file_len: u64,
    page_size: usize,
}

impl<'a> MappedPages<'a> {
    /// Returns the page run starting at `id`, including its overflow pages
    pub fn page(&self, id: PageId) -> Result<PageView<'_>, StorageError> {
        read_page(&self.mmap, self.file_len, self.page_size, id)
    }

    /// Applies dual-meta selection to the two meta pages of this mapping
    pub fn meta(&self) -> Result<MetaRecord, DatabaseError> {
        select_meta(
            &read_meta(&self.mmap, self.file_len, self.page_size, META_PAGE_0)?,
            &read_meta(&self.mmap, self.file_len, self.page_size, META_PAGE_1)?,
        )
    }

    /// Bytes that can be read: the smaller of the mapping and the file
    pub fn readable_len(&self) -> u64 {
        (self.mmap.len() as u64).min(self.file_len)
    }
}

fn read_page(
    mmap: &Mmap,
    file_len: u64,
    page_size: usize,
    id: PageId,
) -> Result<PageView<'_>, StorageError> {
    let readable = (mmap.len() as u64).min(file_len);
    let out_of_bounds = || StorageError::PageOutOfBounds {
        page: id,
        len: readable,
    };

    let start = id.checked_mul(page_size as u64).ok_or_else(out_of_bounds)?;
    let end = start.checked_add(page_size as u64).ok_or_else(out_of_bounds)?;
    if end > readable {
        return Err(out_of_bounds());
    }
    let header = PageView::new(mmap.get_memory(start as usize..end as usize))?;

    let run_pages = u64::from(header.overflow()) + 1;
    let run_end = run_pages
        .checked_mul(page_size as u64)
        .and_then(|len| start.checked_add(len))
        .ok_or_else(out_of_bounds)?;
    if run_end > readable {
        return Err(out_of_bounds());
    }
    PageView::new(mmap.get_memory(start as usize..run_end as usize))
}

// Meta pages are decoded from their first page only, whatever their overflow field says
fn read_meta(
    mmap: &Mmap,
    file_len: u64,
    page_size: usize,
    id: PageId,
) -> Result<MetaRecord, StorageError> {
    let readable = (mmap.len() as u64).min(file_len);
    let start = id * page_size as u64;
    let end = start + page_size as u64;
    if end > readable {
        return Err(StorageError::PageOutOfBounds {
            page: id,
            len: readable,
        });
    }
    PageView::new(mmap.get_memory(start as usize..end as usize))?.meta()
}

// Maps the file and checks that at least one meta record validates in the new mapping
fn map_validated(
    file: &File,
    file_len: u64,
    min_size: u64,
    page_size: usize,
    limits: &StoreLimits,
) -> Result<Mmap, DatabaseError> {
    let required = 2 * page_size as u64;
    if file_len < required {
        return Err(StorageError::FileTooSmall {
            len: file_len,
            required,
        }
        .into());
    }

    let len = mmap_size(min_size.max(file_len), page_size, limits)?;
    let mmap = Mmap::new(file, len)?;
    let meta0 = read_meta(&mmap, file_len, page_size, META_PAGE_0)?;
    let meta1 = read_meta(&mmap, file_len, page_size, META_PAGE_1)?;
    #[cfg_attr(not(feature = "logging"), allow(unused_variables))]
    let selected = select_meta(&meta0, &meta1)?;

    // Reads select again on every access, so the fallback is reported here only
    #[cfg(feature = "logging")]
    {
        let latest = meta0.transaction_id.max(meta1.transaction_id);
        if selected.transaction_id != latest {
            warn!(
                "Meta record with transaction id {} is invalid. Falling back to transaction id {}",
                latest, selected.transaction_id
            );
        }
    }

    Ok(mmap)
}

// Writes the two meta pages, an empty freelist and an empty root leaf
fn initialize(file: &File, page_size: usize) -> Result<(), StorageError> {
    let mut buffer = vec![0; INITIAL_PAGES * page_size];
    for (i, chunk) in buffer.chunks_exact_mut(page_size).enumerate() {
        let id = i as PageId;
        let mut page = PageViewMut::new(chunk)?;
        page.set_id(id);
        match id {
            META_PAGE_0 | META_PAGE_1 => {
                page.set_flags(PageFlags::META);
                page.write_meta(&MetaRecord::initial(page_size, id))?;
            }
            INITIAL_FREELIST_PAGE => {
                page.set_flags(PageFlags::FREELIST);
                page.set_count(0);
            }
            INITIAL_ROOT_PAGE => {
                page.set_flags(PageFlags::LEAF);
                page.set_count(0);
            }
            _ => unreachable!(),
        }
    }

    write_all_at(file, &buffer, 0)?;
    file.sync_data()?;

    #[cfg(feature = "logging")]
    info!("Initialized new store with page size {}", page_size);

    Ok(())
}

// Reads the page size from meta page 0. Falls back to the configured or host page size if the
// record does not validate.
fn detect_page_size(
    file: &File,
    file_len: u64,
    fallback: Option<usize>,
) -> Result<usize, StorageError> {
    let mut buffer = vec![0; (PAGE_SIZE_PROBE_LEN as u64).min(file_len) as usize];
    read_exact_at(file, &mut buffer, 0)?;

    let detected = PageView::new(&buffer)
        .and_then(|page| page.meta())
        .ok()
        .filter(|meta| meta.validate().is_ok())
        .map(|meta| meta.page_size)
        .filter(|size| {
            size.is_power_of_two()
                && (MIN_PAGE_SIZE as u64..=MAX_PAGE_SIZE as u64).contains(size)
        });

    match detected {
        Some(page_size) => Ok(page_size as usize),
        None => {
            let page_size = fallback.unwrap_or_else(get_page_size);
            #[cfg(feature = "logging")]
            warn!(
                "Meta page 0 is invalid. Using a page size of {} to open the store",
                page_size
            );
            Ok(page_size)
        }
    }
}

pub struct Builder {
    page_size: Option<usize>,
    limits: StoreLimits,
    #[cfg_attr(not(unix), allow(dead_code))]
    file_mode: u32,
}

impl Builder {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            page_size: None,
            limits: StoreLimits::default(),
            file_mode: DEFAULT_FILE_MODE,
        }
    }

    /// Set the page size used when creating a new file
    /// It is also used to open a file whose first meta page is invalid
    /// Defaults to the native OS page size
    pub fn set_page_size(&mut self, size: usize) -> &mut Self {
        assert!(size.is_power_of_two());
        assert!((MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&size));
        self.page_size = Some(size);
        self
    }

    /// Set the largest mapping the store may create. Must be at least 1GiB.
    /// Defaults to 256TiB on 64-bit platforms
    pub fn set_max_map_size(&mut self, size: u64) -> &mut Self {
        assert!(size >= MAX_MMAP_STEP);
        self.limits.max_map_size = size;
        self
    }

    /// Set the permissions of a newly created file. Ignored on non-unix platforms.
    /// Defaults to 0o600
    pub fn set_file_mode(&mut self, mode: u32) -> &mut Self {
        self.file_mode = mode;
        self
    }

    /// Opens the specified file as a store.
    /// * if the file does not exist, or is an empty file, a new store will be initialized in it
    /// * if either meta page is valid, it will be opened
    /// * otherwise this function will return an error
    pub fn open(&self, path: impl AsRef<Path>) -> Result<Store, DatabaseError> {
        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(self.file_mode);
        }
        let file = options.open(path.as_ref())?;

        let store = Store::new(file, self)?;

        #[cfg(feature = "logging")]
        info!(
            "Opened store at {} with page size {}",
            path.as_ref().display(),
            store.page_size
        );

        Ok(store)
    }
}
