use crate::page_store::base::{BucketRoot, PageId, TransactionId};
use crate::page_store::constants::{
    FILE_FORMAT_VERSION, INITIAL_ALLOCATOR_CURSOR, INITIAL_FREELIST_PAGE, INITIAL_ROOT_PAGE, MAGIC,
};
use crate::page_store::fast_hash::fnv1a_64;
use crate::{DatabaseError, MetaError, StorageError};
use std::mem::size_of;

// Meta record layout, stored as the payload of pages 0 and 1. Fields are little-endian with no
// padding between them:
// 4 bytes: magic number
// 4 bytes: file format version
// 8 bytes: page size
// 4 bytes: flags (reserved)
// 8 bytes: root bucket page id
// 8 bytes: root bucket sequence
// 8 bytes: freelist page id
// 8 bytes: allocator cursor (first never allocated page id)
// 8 bytes: transaction id
// 8 bytes: checksum of all preceding bytes
const MAGIC_OFFSET: usize = 0;
const VERSION_OFFSET: usize = MAGIC_OFFSET + size_of::<u32>();
const PAGE_SIZE_OFFSET: usize = VERSION_OFFSET + size_of::<u32>();
const FLAGS_OFFSET: usize = PAGE_SIZE_OFFSET + size_of::<u64>();
const ROOT_OFFSET: usize = FLAGS_OFFSET + size_of::<u32>();
const FREELIST_OFFSET: usize = ROOT_OFFSET + BucketRoot::serialized_size();
const ALLOCATOR_CURSOR_OFFSET: usize = FREELIST_OFFSET + size_of::<PageId>();
const TRANSACTION_ID_OFFSET: usize = ALLOCATOR_CURSOR_OFFSET + size_of::<PageId>();
const CHECKSUM_OFFSET: usize = TRANSACTION_ID_OFFSET + size_of::<TransactionId>();
pub const META_SIZE: usize = CHECKSUM_OFFSET + size_of::<u64>();

fn get_u32(data: &[u8]) -> u32 {
    u32::from_le_bytes(data[..size_of::<u32>()].try_into().unwrap())
}

fn get_u64(data: &[u8]) -> u64 {
    u64::from_le_bytes(data[..size_of::<u64>()].try_into().unwrap())
}

/// The root-of-trust record. Two copies are kept, in pages 0 and 1.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MetaRecord {
    pub magic: u32,
    pub version: u32,
    pub page_size: u64,
    pub flags: u32,
    pub root: BucketRoot,
    pub freelist: PageId,
    pub allocator_cursor: PageId,
    pub transaction_id: TransactionId,
    /// Zero means the record was never finalized, and is accepted without verification
    pub checksum: u64,
}

impl MetaRecord {
    // Record written to meta page `transaction_id` of a freshly initialized file
    pub(crate) fn initial(page_size: usize, transaction_id: TransactionId) -> Self {
        let mut meta = Self {
            magic: MAGIC,
            version: FILE_FORMAT_VERSION,
            page_size: page_size as u64,
            flags: 0,
            root: BucketRoot::new(INITIAL_ROOT_PAGE, 0),
            freelist: INITIAL_FREELIST_PAGE,
            allocator_cursor: INITIAL_ALLOCATOR_CURSOR,
            transaction_id,
            checksum: 0,
        };
        meta.finalize();
        meta
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, StorageError> {
        if data.len() < META_SIZE {
            return Err(StorageError::Corrupted(format!(
                "Meta record requires {META_SIZE} bytes, found {}",
                data.len()
            )));
        }
        Ok(Self {
            magic: get_u32(&data[MAGIC_OFFSET..]),
            version: get_u32(&data[VERSION_OFFSET..]),
            page_size: get_u64(&data[PAGE_SIZE_OFFSET..]),
            flags: get_u32(&data[FLAGS_OFFSET..]),
            root: BucketRoot::from_le_bytes(
                data[ROOT_OFFSET..(ROOT_OFFSET + BucketRoot::serialized_size())]
                    .try_into()
                    .unwrap(),
            ),
            freelist: get_u64(&data[FREELIST_OFFSET..]),
            allocator_cursor: get_u64(&data[ALLOCATOR_CURSOR_OFFSET..]),
            transaction_id: get_u64(&data[TRANSACTION_ID_OFFSET..]),
            checksum: get_u64(&data[CHECKSUM_OFFSET..]),
        })
    }

    pub fn to_bytes(&self) -> [u8; META_SIZE] {
        let mut result = [0; META_SIZE];
        result[MAGIC_OFFSET..(MAGIC_OFFSET + size_of::<u32>())]
            .copy_from_slice(&self.magic.to_le_bytes());
        result[VERSION_OFFSET..(VERSION_OFFSET + size_of::<u32>())]
            .copy_from_slice(&self.version.to_le_bytes());
        result[PAGE_SIZE_OFFSET..(PAGE_SIZE_OFFSET + size_of::<u64>())]
            .copy_from_slice(&self.page_size.to_le_bytes());
        result[FLAGS_OFFSET..(FLAGS_OFFSET + size_of::<u32>())]
            .copy_from_slice(&self.flags.to_le_bytes());
        result[ROOT_OFFSET..(ROOT_OFFSET + BucketRoot::serialized_size())]
            .copy_from_slice(&self.root.to_le_bytes());
        result[FREELIST_OFFSET..(FREELIST_OFFSET + size_of::<PageId>())]
            .copy_from_slice(&self.freelist.to_le_bytes());
        result[ALLOCATOR_CURSOR_OFFSET..(ALLOCATOR_CURSOR_OFFSET + size_of::<PageId>())]
            .copy_from_slice(&self.allocator_cursor.to_le_bytes());
        result[TRANSACTION_ID_OFFSET..(TRANSACTION_ID_OFFSET + size_of::<TransactionId>())]
            .copy_from_slice(&self.transaction_id.to_le_bytes());
        result[CHECKSUM_OFFSET..(CHECKSUM_OFFSET + size_of::<u64>())]
            .copy_from_slice(&self.checksum.to_le_bytes());
        result
    }

    /// FNV-1a over the encoded bytes of every field before the checksum
    pub fn compute_checksum(&self) -> u64 {
        fnv1a_64(&self.to_bytes()[..CHECKSUM_OFFSET])
    }

    /// Stores the checksum of the current field values. Must be the last mutation before writing.
    pub fn finalize(&mut self) {
        self.checksum = self.compute_checksum();
    }

    pub fn validate(&self) -> Result<(), MetaError> {
        if self.magic != MAGIC {
            return Err(MetaError::InvalidMagic(self.magic));
        }
        if self.version != FILE_FORMAT_VERSION {
            return Err(MetaError::VersionMismatch(self.version));
        }
        if self.checksum != 0 {
            let computed = self.compute_checksum();
            if computed != self.checksum {
                return Err(MetaError::ChecksumMismatch {
                    stored: self.checksum,
                    computed,
                });
            }
        }
        Ok(())
    }

    /// Page the next commit must write: always the copy that is not authoritative now
    pub(crate) fn next_commit_page(&self) -> PageId {
        (self.transaction_id % 2) ^ 1
    }

    /// Transaction id of the next commit. Ids never wrap, since selection relies on them increasing.
    pub(crate) fn next_transaction_id(&self) -> Result<TransactionId, StorageError> {
        self.transaction_id.checked_add(1).ok_or_else(|| {
            StorageError::Corrupted(format!(
                "Transaction id exhausted at {}",
                self.transaction_id
            ))
        })
    }
}

// Picks the authoritative record: the one with the higher transaction id if it validates,
// otherwise the other one if it validates.
pub(crate) fn select_meta(
    meta0: &MetaRecord,
    meta1: &MetaRecord,
) -> Result<MetaRecord, DatabaseError> {
    let (higher, lower) = if meta1.transaction_id > meta0.transaction_id {
        (meta1, meta0)
    } else {
        (meta0, meta1)
    };

    let higher_err = match higher.validate() {
        Ok(()) => return Ok(*higher),
        Err(err) => err,
    };
    let lower_err = match lower.validate() {
        Ok(()) => return Ok(*lower),
        Err(err) => err,
    };

    let (meta0_err, meta1_err) = if std::ptr::eq(higher, meta0) {
        (higher_err, lower_err)
    } else {
        (lower_err, higher_err)
    };
    Err(DatabaseError::Unrecoverable {
        meta0: meta0_err,
        meta1: meta1_err,
    })
}

#[cfg(test)]
mod test {
    use crate::page_store::base::BucketRoot;
    use crate::page_store::constants::{FILE_FORMAT_VERSION, MAGIC};
    use crate::page_store::meta::{select_meta, MetaRecord, CHECKSUM_OFFSET, META_SIZE};
    use crate::{DatabaseError, MetaError, StorageError};

    fn record(transaction_id: u64) -> MetaRecord {
        let mut meta = MetaRecord {
            magic: MAGIC,
            version: FILE_FORMAT_VERSION,
            page_size: 4096,
            flags: 0,
            root: BucketRoot::new(17, 5),
            freelist: 12,
            allocator_cursor: 40,
            transaction_id,
            checksum: 0,
        };
        meta.finalize();
        meta
    }

    fn corrupt(mut meta: MetaRecord) -> MetaRecord {
        meta.checksum ^= 1;
        meta
    }

    #[test]
    fn layout() {
        assert_eq!(CHECKSUM_OFFSET, 60);
        assert_eq!(META_SIZE, 68);

        let meta = record(9);
        let bytes = meta.to_bytes();
        assert_eq!(&bytes[0..4], &MAGIC.to_le_bytes());
        assert_eq!(&bytes[4..8], &FILE_FORMAT_VERSION.to_le_bytes());
        assert_eq!(&bytes[8..16], &4096u64.to_le_bytes());
        assert_eq!(&bytes[20..28], &17u64.to_le_bytes());
        assert_eq!(&bytes[28..36], &5u64.to_le_bytes());
        assert_eq!(&bytes[36..44], &12u64.to_le_bytes());
        assert_eq!(&bytes[44..52], &40u64.to_le_bytes());
        assert_eq!(&bytes[52..60], &9u64.to_le_bytes());
        assert_eq!(&bytes[60..68], &meta.checksum.to_le_bytes());
        assert_eq!(MetaRecord::from_bytes(&bytes).unwrap(), meta);
    }

    #[test]
    fn short_buffer() {
        assert!(MetaRecord::from_bytes(&[0u8; META_SIZE - 1]).is_err());
    }

    #[test]
    fn finalized_record_validates() {
        for txid in [0, 1, 2, u64::MAX] {
            record(txid).validate().unwrap();
        }
    }

    #[test]
    fn any_field_change_breaks_checksum() {
        let base = record(3);
        let mutations: [fn(&mut MetaRecord); 7] = [
            |m| m.page_size = 8192,
            |m| m.flags = 1,
            |m| m.root.root += 1,
            |m| m.root.sequence += 1,
            |m| m.freelist += 1,
            |m| m.allocator_cursor += 1,
            |m| m.transaction_id += 1,
        ];
        for mutate in mutations {
            let mut meta = base;
            mutate(&mut meta);
            assert!(matches!(
                meta.validate(),
                Err(MetaError::ChecksumMismatch { .. })
            ));
        }
    }

    #[test]
    fn unfinalized_record_is_accepted() {
        let mut meta = record(3);
        meta.checksum = 0;
        meta.allocator_cursor = 1000;
        meta.validate().unwrap();
    }

    #[test]
    fn invalid_magic() {
        let mut meta = record(3);
        meta.magic = 0xDEAD_BEEF;
        meta.finalize();
        assert_eq!(meta.validate(), Err(MetaError::InvalidMagic(0xDEAD_BEEF)));
    }

    #[test]
    fn version_mismatch() {
        let mut meta = record(3);
        meta.version = 1;
        meta.finalize();
        assert_eq!(meta.validate(), Err(MetaError::VersionMismatch(1)));
    }

    #[test]
    fn magic_checked_before_checksum() {
        let mut meta = corrupt(record(3));
        meta.magic = 0;
        assert_eq!(meta.validate(), Err(MetaError::InvalidMagic(0)));
    }

    #[test]
    fn selects_higher_transaction() {
        let newer = record(5);
        let older = record(3);
        assert_eq!(select_meta(&newer, &older).unwrap(), newer);
        assert_eq!(select_meta(&older, &newer).unwrap(), newer);
    }

    #[test]
    fn falls_back_to_lower_transaction() {
        let newer = corrupt(record(5));
        let older = record(3);
        assert_eq!(select_meta(&newer, &older).unwrap(), older);
        assert_eq!(select_meta(&older, &newer).unwrap(), older);
    }

    #[test]
    fn both_invalid_is_unrecoverable() {
        let mut meta0 = record(5);
        meta0.magic = 7;
        let meta1 = corrupt(record(3));
        match select_meta(&meta0, &meta1) {
            Err(DatabaseError::Unrecoverable { meta0, meta1 }) => {
                assert_eq!(meta0, MetaError::InvalidMagic(7));
                assert!(matches!(meta1, MetaError::ChecksumMismatch { .. }));
            }
            other => panic!("expected unrecoverable, got {other:?}"),
        }
    }

    #[test]
    fn commits_alternate_pages() {
        assert_eq!(record(0).next_commit_page(), 1);
        assert_eq!(record(1).next_commit_page(), 0);
        assert_eq!(record(6).next_commit_page(), 1);
        assert_eq!(record(u64::MAX).next_commit_page(), 0);
    }

    #[test]
    fn transaction_id_exhausted() {
        assert_eq!(record(7).next_transaction_id().unwrap(), 8);
        assert!(matches!(
            record(u64::MAX).next_transaction_id(),
            Err(StorageError::Corrupted(_))
        ));
    }
}
