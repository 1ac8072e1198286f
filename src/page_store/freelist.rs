use crate::page_store::base::{
    PageFlags, PageId, PageKind, PageView, PageViewMut, TransactionId, PAGE_HEADER_SIZE,
};
use crate::page_store::constants::{FREELIST_OVERFLOW_COUNT, META_PAGE_1};
use crate::page_store::fast_hash::PageIdHashSet;
use crate::StorageError;
use std::collections::BTreeMap;
use std::mem::size_of;

// Freelist page payload:
// count < 0xFFFF: count page ids
// count == 0xFFFF: 8 byte length, followed by that many page ids
//
// Pending ids are written alongside the free ones, and load as free

/// Tracks page ids that can be reused, and ids freed by transactions that are still in flight
#[derive(Debug, Default)]
pub struct Freelist {
    // Sorted ascending, no duplicates
    ids: Vec<PageId>,
    // Freed by a transaction, but may still be visible to older readers
    pending: BTreeMap<TransactionId, Vec<PageId>>,
    // Union of ids and every pending list
    cache: PageIdHashSet,
}

impl Freelist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the free ids with those stored in `page`. Pending ids are kept.
    pub fn read(&mut self, page: &PageView) -> Result<(), StorageError> {
        if page.kind() != Some(PageKind::Freelist) {
            return Err(StorageError::Corrupted(format!(
                "Page {} is not a freelist page: {:?}",
                page.id(),
                page.flags()
            )));
        }

        let (start, count) = if page.count() == FREELIST_OVERFLOW_COUNT {
            let count = page.page_id_at(0).ok_or_else(|| {
                StorageError::Corrupted(format!("Freelist page {} is truncated", page.id()))
            })?;
            (1, count)
        } else {
            (0, u64::from(page.count()))
        };

        let count: usize = count.try_into().map_err(|_| {
            StorageError::Corrupted(format!("Freelist length {count} is too large"))
        })?;
        if page.page_id_capacity().saturating_sub(start) < count {
            return Err(StorageError::Corrupted(format!(
                "Freelist page {} holds {count} ids but only has room for {}",
                page.id(),
                page.page_id_capacity().saturating_sub(start)
            )));
        }

        let mut ids: Vec<PageId> = page.page_ids().skip(start).take(count).collect();
        // The on-disk order is not guaranteed
        ids.sort_unstable();
        ids.dedup();
        self.ids = ids;

        self.rebuild();
        Ok(())
    }

    /// Like [`Self::read`], but drops ids that are still pending in memory
    pub fn reload(&mut self, page: &PageView) -> Result<(), StorageError> {
        self.read(page)?;

        let pending: PageIdHashSet = self.pending.values().flatten().copied().collect();
        self.ids.retain(|id| !pending.contains(id));

        self.rebuild();
        Ok(())
    }

    // Must be called after any change to ids or pending
    fn rebuild(&mut self) {
        let mut cache = PageIdHashSet::default();
        cache.reserve(self.ids.len());
        cache.extend(self.ids.iter().copied());
        for pending_ids in self.pending.values() {
            cache.extend(pending_ids.iter().copied());
        }
        self.cache = cache;
    }

    /// Returns true if the id is free or pending
    pub fn is_tracked(&self, id: PageId) -> bool {
        self.cache.contains(&id)
    }

    /// Records that `transaction_id` freed the page run starting at `id`
    pub fn free(
        &mut self,
        transaction_id: TransactionId,
        id: PageId,
        overflow: u32,
    ) -> Result<(), StorageError> {
        if id <= META_PAGE_1 {
            return Err(StorageError::Corrupted(format!(
                "Cannot free meta page {id}"
            )));
        }
        let last = id.checked_add(u64::from(overflow)).ok_or_else(|| {
            StorageError::Corrupted(format!("Page run {id}+{overflow} overflows"))
        })?;
        if let Some(freed) = (id..=last).find(|x| self.cache.contains(x)) {
            return Err(StorageError::Corrupted(format!(
                "Page {freed} already freed"
            )));
        }

        let pending = self.pending.entry(transaction_id).or_default();
        for page in id..=last {
            pending.push(page);
            self.cache.insert(page);
        }
        Ok(())
    }

    /// Makes the pages freed by every transaction up to and including `transaction_id` reusable
    pub fn release(&mut self, transaction_id: TransactionId) {
        let still_pending = match transaction_id.checked_add(1) {
            Some(next) => self.pending.split_off(&next),
            None => BTreeMap::new(),
        };
        let released = std::mem::replace(&mut self.pending, still_pending);
        if released.is_empty() {
            return;
        }

        let mut ids: Vec<PageId> = released.into_values().flatten().collect();
        ids.extend_from_slice(&self.ids);
        ids.sort_unstable();
        ids.dedup();
        self.ids = ids;

        self.rebuild();
    }

    /// Discards the pages freed by an aborted transaction. They do not become free.
    pub fn rollback(&mut self, transaction_id: TransactionId) {
        if self.pending.remove(&transaction_id).is_some() {
            self.rebuild();
        }
    }

    /// Removes and returns the first run of `n` contiguous free ids, if there is one
    pub fn allocate(&mut self, n: usize) -> Result<Option<PageId>, StorageError> {
        if n == 0 {
            return Ok(None);
        }

        let mut initial = 0;
        let mut previous: Option<PageId> = None;
        for (i, &id) in self.ids.iter().enumerate() {
            if id <= META_PAGE_1 {
                return Err(StorageError::Corrupted(format!(
                    "Meta page {id} is in the freelist"
                )));
            }
            if previous.map_or(true, |prev| id - prev != 1) {
                initial = id;
            }
            if id - initial + 1 == n as u64 {
                self.ids.drain((i + 1 - n)..=i);
                for page in initial..=id {
                    self.cache.remove(&page);
                }
                return Ok(Some(initial));
            }
            previous = Some(id);
        }
        Ok(None)
    }

    /// Free ids, sorted ascending
    pub fn ids(&self) -> &[PageId] {
        &self.ids
    }

    pub fn pending(&self, transaction_id: TransactionId) -> &[PageId] {
        self.pending
            .get(&transaction_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn free_count(&self) -> usize {
        self.ids.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    pub fn count(&self) -> usize {
        self.free_count() + self.pending_count()
    }

    /// Free and pending ids, sorted ascending
    pub fn all_ids(&self) -> Vec<PageId> {
        let mut result = Vec::with_capacity(self.count());
        result.extend_from_slice(&self.ids);
        for pending_ids in self.pending.values() {
            result.extend_from_slice(pending_ids);
        }
        result.sort_unstable();
        result
    }

    /// Bytes needed to store this freelist, including the page header
    pub fn encoded_size(&self) -> usize {
        let mut elements = self.count();
        if elements >= FREELIST_OVERFLOW_COUNT as usize {
            elements += 1;
        }
        PAGE_HEADER_SIZE + elements * size_of::<PageId>()
    }

    /// Number of contiguous pages needed to store this freelist
    pub fn page_count(&self, page_size: usize) -> usize {
        (self.encoded_size() + page_size - 1) / page_size
    }

    /// Writes the flags, count and ids into `page`. The caller sets the id and overflow.
    pub fn write(&self, page: &mut PageViewMut) -> Result<(), StorageError> {
        let required = self.encoded_size();
        let available = page.as_view().memory().len();
        if available < required {
            return Err(StorageError::Corrupted(format!(
                "Freelist needs {required} bytes, but the page run has {available}"
            )));
        }

        page.set_flags(PageFlags::FREELIST);
        let ids = self.all_ids();
        let start = if ids.len() < FREELIST_OVERFLOW_COUNT as usize {
            page.set_count(ids.len() as u16);
            0
        } else {
            page.set_count(FREELIST_OVERFLOW_COUNT);
            page.set_page_id_at(0, ids.len() as u64)?;
            1
        };
        for (i, id) in ids.into_iter().enumerate() {
            page.set_page_id_at(start + i, id)?;
        }
        Ok(())
    }
}
