use crate::page_store::meta::MetaRecord;
use crate::StorageError;
use std::fmt::{Debug, Formatter};
use std::mem::size_of;

pub type PageId = u64;
pub type TransactionId = u64;

// Page layout:
// 8 bytes: page id
// 2 bytes: flags
// 2 bytes: count (meaning depends on the page kind)
// 4 bytes: overflow (number of additional contiguous pages)
// remainder: payload
//
// Only the first page of an overflow run carries a header.
const ID_OFFSET: usize = 0;
const FLAGS_OFFSET: usize = ID_OFFSET + size_of::<u64>();
const COUNT_OFFSET: usize = FLAGS_OFFSET + size_of::<u16>();
const OVERFLOW_OFFSET: usize = COUNT_OFFSET + size_of::<u16>();
pub const PAGE_HEADER_SIZE: usize = OVERFLOW_OFFSET + size_of::<u32>();

const PAGE_ID_SIZE: usize = size_of::<PageId>();
const BUCKET_ROOT_SIZE: usize = size_of::<PageId>() + size_of::<u64>();

fn get_u16(data: &[u8]) -> u16 {
    u16::from_le_bytes(data[..size_of::<u16>()].try_into().unwrap())
}

fn get_u32(data: &[u8]) -> u32 {
    u32::from_le_bytes(data[..size_of::<u32>()].try_into().unwrap())
}

fn get_u64(data: &[u8]) -> u64 {
    u64::from_le_bytes(data[..size_of::<u64>()].try_into().unwrap())
}

#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct PageFlags(u16);

impl PageFlags {
    pub const BRANCH: PageFlags = PageFlags(0x01);
    pub const LEAF: PageFlags = PageFlags(0x02);
    pub const META: PageFlags = PageFlags(0x04);
    pub const FREELIST: PageFlags = PageFlags(0x10);
    // Set on the first page of a run that spans more than one page
    pub const OVERFLOW: PageFlags = PageFlags(0x20);

    const KIND_MASK: u16 = 0x01 | 0x02 | 0x04 | 0x10;

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: PageFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: PageFlags) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn difference(self, other: PageFlags) -> Self {
        Self(self.0 & !other.0)
    }

    /// Returns the page kind, or `None` unless exactly one kind bit is set
    pub fn kind(self) -> Option<PageKind> {
        match self.0 & Self::KIND_MASK {
            0x01 => Some(PageKind::Branch),
            0x02 => Some(PageKind::Leaf),
            0x04 => Some(PageKind::Meta),
            0x10 => Some(PageKind::Freelist),
            _ => None,
        }
    }
}

impl From<PageKind> for PageFlags {
    fn from(kind: PageKind) -> Self {
        match kind {
            PageKind::Branch => PageFlags::BRANCH,
            PageKind::Leaf => PageFlags::LEAF,
            PageKind::Meta => PageFlags::META,
            PageKind::Freelist => PageFlags::FREELIST,
        }
    }
}

impl Debug for PageFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.kind())?;
        if self.contains(PageFlags::OVERFLOW) {
            write!(f, "+overflow")?;
        }
        write!(f, " ({:#06x})", self.0)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PageKind {
    Branch,
    Leaf,
    Meta,
    Freelist,
}

/// Root of the top level bucket, stored in the meta record
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct BucketRoot {
    /// Page id of the bucket's root page
    pub root: PageId,
    /// Monotonically increasing sequence number
    pub sequence: u64,
}

impl BucketRoot {
    pub const fn new(root: PageId, sequence: u64) -> Self {
        Self { root, sequence }
    }

    pub(crate) const fn serialized_size() -> usize {
        BUCKET_ROOT_SIZE
    }

    pub(crate) fn from_le_bytes(bytes: [u8; BUCKET_ROOT_SIZE]) -> Self {
        Self {
            root: get_u64(&bytes[..size_of::<PageId>()]),
            sequence: get_u64(&bytes[size_of::<PageId>()..]),
        }
    }

    pub(crate) fn to_le_bytes(self) -> [u8; BUCKET_ROOT_SIZE] {
        let mut result = [0; BUCKET_ROOT_SIZE];
        result[..size_of::<PageId>()].copy_from_slice(&self.root.to_le_bytes());
        result[size_of::<PageId>()..].copy_from_slice(&self.sequence.to_le_bytes());
        result
    }
}

/// Read-only view of a page in the mapping or in a buffer. Never copies the page.
///
/// The view covers the first page of the run plus any overflow pages that the caller
/// included when slicing `mem`.
#[derive(Copy, Clone)]
pub struct PageView<'a> {
    mem: &'a [u8],
}

impl<'a> PageView<'a> {
    pub fn new(mem: &'a [u8]) -> Result<Self, StorageError> {
        if mem.len() < PAGE_HEADER_SIZE {
            return Err(StorageError::Corrupted(format!(
                "Page buffer of {} bytes cannot hold a {PAGE_HEADER_SIZE} byte header",
                mem.len()
            )));
        }
        Ok(Self { mem })
    }

    pub fn id(&self) -> PageId {
        get_u64(&self.mem[ID_OFFSET..])
    }

    pub fn flags(&self) -> PageFlags {
        PageFlags(get_u16(&self.mem[FLAGS_OFFSET..]))
    }

    pub fn kind(&self) -> Option<PageKind> {
        self.flags().kind()
    }

    pub fn count(&self) -> u16 {
        get_u16(&self.mem[COUNT_OFFSET..])
    }

    pub fn overflow(&self) -> u32 {
        get_u32(&self.mem[OVERFLOW_OFFSET..])
    }

    pub fn memory(&self) -> &'a [u8] {
        self.mem
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.mem[PAGE_HEADER_SIZE..]
    }

    /// Number of whole page ids that fit in the payload
    pub fn page_id_capacity(&self) -> usize {
        self.payload().len() / PAGE_ID_SIZE
    }

    pub fn page_id_at(&self, index: usize) -> Option<PageId> {
        let start = index.checked_mul(PAGE_ID_SIZE)?;
        let end = start.checked_add(PAGE_ID_SIZE)?;
        self.payload().get(start..end).map(get_u64)
    }

    /// Interprets the payload as a sequence of little-endian page ids
    pub fn page_ids(&self) -> impl Iterator<Item = PageId> + 'a {
        self.payload().chunks_exact(PAGE_ID_SIZE).map(get_u64)
    }

    /// Decodes the payload as a meta record. Does not validate it.
    pub fn meta(&self) -> Result<MetaRecord, StorageError> {
        MetaRecord::from_bytes(self.payload())
    }
}

impl<'a> Debug for PageView<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageView")
            .field("id", &self.id())
            .field("flags", &self.flags())
            .field("count", &self.count())
            .field("overflow", &self.overflow())
            .field("len", &self.mem.len())
            .finish()
    }
}

/// Writable view of a page buffer. Writes go straight to the underlying bytes.
pub struct PageViewMut<'a> {
    mem: &'a mut [u8],
}

impl<'a> PageViewMut<'a> {
    pub fn new(mem: &'a mut [u8]) -> Result<Self, StorageError> {
        if mem.len() < PAGE_HEADER_SIZE {
            return Err(StorageError::Corrupted(format!(
                "Page buffer of {} bytes cannot hold a {PAGE_HEADER_SIZE} byte header",
                mem.len()
            )));
        }
        Ok(Self { mem })
    }

    pub fn as_view(&self) -> PageView<'_> {
        PageView { mem: &*self.mem }
    }

    pub fn set_id(&mut self, id: PageId) {
        self.mem[ID_OFFSET..(ID_OFFSET + size_of::<u64>())].copy_from_slice(&id.to_le_bytes());
    }

    pub fn set_flags(&mut self, flags: PageFlags) {
        self.mem[FLAGS_OFFSET..(FLAGS_OFFSET + size_of::<u16>())]
            .copy_from_slice(&flags.bits().to_le_bytes());
    }

    pub fn set_count(&mut self, count: u16) {
        self.mem[COUNT_OFFSET..(COUNT_OFFSET + size_of::<u16>())]
            .copy_from_slice(&count.to_le_bytes());
    }

    /// Sets the overflow count, and the overflow marker flag to match
    pub fn set_overflow(&mut self, overflow: u32) {
        self.mem[OVERFLOW_OFFSET..(OVERFLOW_OFFSET + size_of::<u32>())]
            .copy_from_slice(&overflow.to_le_bytes());
        let flags = self.as_view().flags();
        if overflow > 0 {
            self.set_flags(flags.union(PageFlags::OVERFLOW));
        } else {
            self.set_flags(flags.difference(PageFlags::OVERFLOW));
        }
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.mem[PAGE_HEADER_SIZE..]
    }

    pub fn set_page_id_at(&mut self, index: usize, id: PageId) -> Result<(), StorageError> {
        let start = index.saturating_mul(PAGE_ID_SIZE);
        let payload = self.payload_mut();
        let len = payload.len();
        match payload.get_mut(start..start.saturating_add(PAGE_ID_SIZE)) {
            Some(slot) => {
                slot.copy_from_slice(&id.to_le_bytes());
                Ok(())
            }
            None => Err(StorageError::Corrupted(format!(
                "Page id slot {index} is outside a payload of {len} bytes"
            ))),
        }
    }

    pub fn write_meta(&mut self, meta: &MetaRecord) -> Result<(), StorageError> {
        let bytes = meta.to_bytes();
        let payload = self.payload_mut();
        if payload.len() < bytes.len() {
            return Err(StorageError::Corrupted(format!(
                "Payload of {} bytes cannot hold a {} byte meta record",
                payload.len(),
                bytes.len()
            )));
        }
        payload[..bytes.len()].copy_from_slice(&bytes);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::page_store::base::{
        BucketRoot, PageFlags, PageKind, PageView, PageViewMut, PAGE_HEADER_SIZE,
    };
    use crate::StorageError;

    #[test]
    fn header_layout() {
        let mut buffer = vec![0u8; 64];
        {
            let mut page = PageViewMut::new(&mut buffer).unwrap();
            page.set_id(0x0102_0304_0506_0708);
            page.set_flags(PageFlags::LEAF);
            page.set_count(7);
            page.set_overflow(3);
        }
        assert_eq!(&buffer[..8], &0x0102_0304_0506_0708u64.to_le_bytes());
        assert_eq!(&buffer[8..10], &(0x02u16 | 0x20).to_le_bytes());
        assert_eq!(&buffer[10..12], &7u16.to_le_bytes());
        assert_eq!(&buffer[12..16], &3u32.to_le_bytes());

        let page = PageView::new(&buffer).unwrap();
        assert_eq!(page.id(), 0x0102_0304_0506_0708);
        assert_eq!(page.kind(), Some(PageKind::Leaf));
        assert!(page.flags().contains(PageFlags::OVERFLOW));
        assert_eq!(page.count(), 7);
        assert_eq!(page.overflow(), 3);
        assert_eq!(page.payload().len(), 64 - PAGE_HEADER_SIZE);
    }

    #[test]
    fn clearing_overflow_clears_marker() {
        let mut buffer = vec![0u8; 32];
        let mut page = PageViewMut::new(&mut buffer).unwrap();
        page.set_flags(PageFlags::FREELIST);
        page.set_overflow(2);
        page.set_overflow(0);
        assert_eq!(page.as_view().flags(), PageFlags::FREELIST);
    }

    #[test]
    fn kind_requires_exactly_one_bit() {
        assert_eq!(PageFlags::BRANCH.kind(), Some(PageKind::Branch));
        assert_eq!(PageFlags::META.kind(), Some(PageKind::Meta));
        assert_eq!(
            PageFlags::FREELIST.union(PageFlags::OVERFLOW).kind(),
            Some(PageKind::Freelist)
        );
        assert_eq!(PageFlags::default().kind(), None);
        assert_eq!(PageFlags::LEAF.union(PageFlags::BRANCH).kind(), None);
        assert_eq!(PageFlags::from(PageKind::Freelist), PageFlags::FREELIST);
    }

    #[test]
    fn page_ids() {
        let mut buffer = vec![0u8; PAGE_HEADER_SIZE + 3 * 8 + 5];
        {
            let mut page = PageViewMut::new(&mut buffer).unwrap();
            page.set_page_id_at(0, 11).unwrap();
            page.set_page_id_at(1, 7).unwrap();
            page.set_page_id_at(2, 42).unwrap();
            assert!(matches!(
                page.set_page_id_at(3, 1),
                Err(StorageError::Corrupted(_))
            ));
        }
        let page = PageView::new(&buffer).unwrap();
        assert_eq!(page.page_id_capacity(), 3);
        assert_eq!(page.page_ids().collect::<Vec<_>>(), vec![11, 7, 42]);
        assert_eq!(page.page_id_at(2), Some(42));
        assert_eq!(page.page_id_at(3), None);
        assert_eq!(page.page_id_at(usize::MAX), None);
    }

    #[test]
    fn short_buffer() {
        let buffer = [0u8; PAGE_HEADER_SIZE - 1];
        assert!(PageView::new(&buffer).is_err());
    }

    #[test]
    fn bucket_root_bytes() {
        let root = BucketRoot::new(3, 99);
        let bytes = root.to_le_bytes();
        assert_eq!(&bytes[..8], &3u64.to_le_bytes());
        assert_eq!(&bytes[8..], &99u64.to_le_bytes());
        assert_eq!(BucketRoot::from_le_bytes(bytes), root);
    }
}
