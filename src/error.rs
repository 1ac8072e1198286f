use crate::page_store::{PageId, FILE_FORMAT_VERSION, MAGIC};
use std::fmt::{Display, Formatter};
use std::sync::PoisonError;
use std::{io, panic};

/// Reasons a meta record failed validation
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum MetaError {
    /// The magic number does not identify this file format
    InvalidMagic(u32),
    /// The record was written by an unsupported version of the file format
    VersionMismatch(u32),
    /// The stored checksum does not match the record's contents
    ChecksumMismatch { stored: u64, computed: u64 },
}

impl Display for MetaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MetaError::InvalidMagic(found) => {
                write!(f, "Invalid magic number {found:#010x}, expected {MAGIC:#010x}")
            }
            MetaError::VersionMismatch(found) => {
                write!(
                    f,
                    "File format version mismatch. Expected {FILE_FORMAT_VERSION}, found {found}"
                )
            }
            MetaError::ChecksumMismatch { stored, computed } => {
                write!(
                    f,
                    "Meta checksum mismatch (stored={stored:#018x}, computed={computed:#018x})"
                )
            }
        }
    }
}

impl std::error::Error for MetaError {}

/// General errors directly from the storage layer
#[derive(Debug)]
#[non_exhaustive]
pub enum StorageError {
    /// The store is corrupted
    Corrupted(String),
    /// The backing file is too short to contain both meta pages
    FileTooSmall { len: u64, required: u64 },
    /// The requested mapping exceeds the configured maximum
    MapSizeExceeded { requested: u64, max: u64 },
    /// The page, including its overflow run, is not inside the readable mapping
    PageOutOfBounds { page: PageId, len: u64 },
    Io(io::Error),
    LockPoisoned(&'static panic::Location<'static>),
}

impl<T> From<PoisonError<T>> for StorageError {
    fn from(_: PoisonError<T>) -> StorageError {
        StorageError::LockPoisoned(panic::Location::caller())
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> StorageError {
        StorageError::Io(err)
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Error {
        match err {
            StorageError::Corrupted(msg) => Error::Corrupted(msg),
            StorageError::FileTooSmall { len, required } => Error::FileTooSmall { len, required },
            StorageError::MapSizeExceeded { requested, max } => {
                Error::MapSizeExceeded { requested, max }
            }
            StorageError::PageOutOfBounds { page, len } => Error::PageOutOfBounds { page, len },
            StorageError::Io(x) => Error::Io(x),
            StorageError::LockPoisoned(location) => Error::LockPoisoned(location),
        }
    }
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Corrupted(msg) => {
                write!(f, "Store corrupted: {msg}")
            }
            StorageError::FileTooSmall { len, required } => {
                write!(
                    f,
                    "File size too small: {len} bytes, at least {required} bytes required"
                )
            }
            StorageError::MapSizeExceeded { requested, max } => {
                write!(
                    f,
                    "Requested mapping of {requested} bytes exceeds the maximum of {max} bytes"
                )
            }
            StorageError::PageOutOfBounds { page, len } => {
                write!(f, "Page {page} is outside the readable region of {len} bytes")
            }
            StorageError::Io(err) => {
                write!(f, "I/O error: {err}")
            }
            StorageError::LockPoisoned(location) => {
                write!(f, "Poisoned internal lock: {location}")
            }
        }
    }
}

impl std::error::Error for StorageError {}

/// Errors related to opening, remapping or committing a store
#[derive(Debug)]
#[non_exhaustive]
pub enum DatabaseError {
    /// The store is already open. Cannot acquire lock.
    DatabaseAlreadyOpen,
    /// Neither meta page validates. The store cannot be used.
    ///
    /// This is only reachable when both copies were damaged outside of the
    /// commit protocol, and must not be treated as a retryable failure.
    Unrecoverable { meta0: MetaError, meta1: MetaError },
    /// Error from underlying storage
    Storage(StorageError),
}

impl From<DatabaseError> for Error {
    fn from(err: DatabaseError) -> Error {
        match err {
            DatabaseError::DatabaseAlreadyOpen => Error::DatabaseAlreadyOpen,
            DatabaseError::Unrecoverable { meta0, meta1 } => Error::Unrecoverable { meta0, meta1 },
            DatabaseError::Storage(storage) => storage.into(),
        }
    }
}

impl From<io::Error> for DatabaseError {
    fn from(err: io::Error) -> DatabaseError {
        DatabaseError::Storage(StorageError::Io(err))
    }
}

impl From<StorageError> for DatabaseError {
    fn from(err: StorageError) -> DatabaseError {
        DatabaseError::Storage(err)
    }
}

impl<T> From<PoisonError<T>> for DatabaseError {
    fn from(_: PoisonError<T>) -> DatabaseError {
        DatabaseError::Storage(StorageError::LockPoisoned(panic::Location::caller()))
    }
}

impl Display for DatabaseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseError::DatabaseAlreadyOpen => {
                write!(f, "Store already open. Cannot acquire lock.")
            }
            DatabaseError::Unrecoverable { meta0, meta1 } => {
                write!(
                    f,
                    "Unrecoverable store: both meta pages are invalid (page 0: {meta0}; page 1: {meta1})"
                )
            }
            DatabaseError::Storage(storage) => storage.fmt(f),
        }
    }
}

impl std::error::Error for DatabaseError {}

/// Superset of all other errors that can occur. Convenience enum so that users can convert all errors into a single type
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The store is already open. Cannot acquire lock.
    DatabaseAlreadyOpen,
    /// Neither meta page validates
    Unrecoverable { meta0: MetaError, meta1: MetaError },
    /// A single meta record failed validation
    InvalidMeta(MetaError),
    /// The store is corrupted
    Corrupted(String),
    /// The backing file is too short to contain both meta pages
    FileTooSmall { len: u64, required: u64 },
    /// The requested mapping exceeds the configured maximum
    MapSizeExceeded { requested: u64, max: u64 },
    /// The page, including its overflow run, is not inside the readable mapping
    PageOutOfBounds { page: PageId, len: u64 },
    Io(io::Error),
    LockPoisoned(&'static panic::Location<'static>),
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_: PoisonError<T>) -> Error {
        Error::LockPoisoned(panic::Location::caller())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<MetaError> for Error {
    fn from(err: MetaError) -> Error {
        Error::InvalidMeta(err)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::DatabaseAlreadyOpen => {
                write!(f, "Store already open. Cannot acquire lock.")
            }
            Error::Unrecoverable { meta0, meta1 } => {
                write!(
                    f,
                    "Unrecoverable store: both meta pages are invalid (page 0: {meta0}; page 1: {meta1})"
                )
            }
            Error::InvalidMeta(err) => err.fmt(f),
            Error::Corrupted(msg) => {
                write!(f, "Store corrupted: {msg}")
            }
            Error::FileTooSmall { len, required } => {
                write!(
                    f,
                    "File size too small: {len} bytes, at least {required} bytes required"
                )
            }
            Error::MapSizeExceeded { requested, max } => {
                write!(
                    f,
                    "Requested mapping of {requested} bytes exceeds the maximum of {max} bytes"
                )
            }
            Error::PageOutOfBounds { page, len } => {
                write!(f, "Page {page} is outside the readable region of {len} bytes")
            }
            Error::Io(err) => {
                write!(f, "I/O error: {err}")
            }
            Error::LockPoisoned(location) => {
                write!(f, "Poisoned internal lock: {location}")
            }
        }
    }
}

impl std::error::Error for Error {}
