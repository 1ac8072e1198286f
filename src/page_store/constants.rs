use crate::page_store::PageId;

// Identifies a bottledb file. Stored in every meta record.
pub const MAGIC: u32 = 0xED0C_DBBD;
// Both the initializer and the validator use this version
pub const FILE_FORMAT_VERSION: u32 = 2;

// Pages 0 and 1 hold the two copies of the meta record
pub(crate) const META_PAGE_0: PageId = 0;
pub(crate) const META_PAGE_1: PageId = 1;
// Initial locations on a freshly created file. The meta record is authoritative afterwards.
pub(crate) const INITIAL_FREELIST_PAGE: PageId = 2;
pub(crate) const INITIAL_ROOT_PAGE: PageId = 3;
pub(crate) const INITIAL_ALLOCATOR_CURSOR: PageId = 4;
pub(crate) const INITIAL_PAGES: usize = 4;

pub const MIN_PAGE_SIZE: usize = 512;
pub const MAX_PAGE_SIZE: usize = 64 * 1024;

// Bytes read from the start of an existing file to discover its page size
pub(crate) const PAGE_SIZE_PROBE_LEN: usize = 0x1000;

// Mappings start at 32KiB and double until 1GiB, then grow 1GiB at a time
pub(crate) const MIN_MMAP_SIZE_SHIFT: u32 = 15;
pub(crate) const MAX_MMAP_DOUBLING_SHIFT: u32 = 30;
pub const MAX_MMAP_STEP: u64 = 1 << 30;

#[cfg(target_pointer_width = "64")]
pub const MAX_MAP_SIZE: u64 = 0xFFFF_FFFF_FFFF; // 256TiB
#[cfg(not(target_pointer_width = "64"))]
pub const MAX_MAP_SIZE: u64 = 0x7FFF_FFFF; // 2GiB

// A freelist page whose count field holds this value stores its real length in the first element
pub(crate) const FREELIST_OVERFLOW_COUNT: u16 = 0xFFFF;
