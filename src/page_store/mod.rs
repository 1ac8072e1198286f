mod base;
mod constants;
mod fast_hash;
mod file_lock;
mod freelist;
mod layout;
mod meta;
mod mmap;
mod utils;

pub use base::{
    BucketRoot, PageFlags, PageId, PageKind, PageView, PageViewMut, TransactionId, PAGE_HEADER_SIZE,
};
pub use constants::{
    FILE_FORMAT_VERSION, MAGIC, MAX_MAP_SIZE, MAX_MMAP_STEP, MAX_PAGE_SIZE, MIN_PAGE_SIZE,
};
pub use freelist::Freelist;
pub use layout::StoreLimits;
pub use meta::{MetaRecord, META_SIZE};

pub(crate) use constants::{
    INITIAL_FREELIST_PAGE, INITIAL_PAGES, INITIAL_ROOT_PAGE, META_PAGE_0, META_PAGE_1,
    PAGE_SIZE_PROBE_LEN,
};
pub(crate) use file_lock::FileLock;
pub(crate) use layout::mmap_size;
pub(crate) use meta::select_meta;
pub(crate) use mmap::Mmap;
pub(crate) use utils::{get_page_size, read_exact_at, write_all_at};
