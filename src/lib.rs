//! A single-file page store for an embedded key/value engine.
//!
//! The file is a sequence of fixed-size pages. Pages 0 and 1 each hold a copy of the meta record,
//! and commits alternate between them, so a torn write can only damage the copy that was not yet
//! authoritative. Reads go through a shared memory mapping that is grown by remapping as the file
//! grows.

pub use db::{Builder, CommitRequest, MappedPages, Store};
pub use error::{DatabaseError, Error, MetaError, StorageError};
pub use page_store::{
    BucketRoot, Freelist, MetaRecord, PageFlags, PageId, PageKind, PageView, PageViewMut,
    StoreLimits, TransactionId, FILE_FORMAT_VERSION, MAGIC, MAX_MAP_SIZE, MAX_MMAP_STEP,
    MAX_PAGE_SIZE, META_SIZE, MIN_PAGE_SIZE, PAGE_HEADER_SIZE,
};

mod db;
mod error;
mod page_store;
