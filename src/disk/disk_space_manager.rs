use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::errors::{DbError, Result};

pub const PAGE_SIZE: usize = 4096;

/// Page numbers encode their partition: partition `p` owns the page numbers
/// `[p * PAGES_PER_PARTITION, (p + 1) * PAGES_PER_PARTITION)`.
pub const PAGES_PER_PARTITION: u64 = 10_000_000_000;

/// Partition 0 is reserved for the log.
pub const LOG_PARTITION: u32 = 0;

/// Partitioned page store. The real partitioner is out of scope here; this
/// keeps pages in memory and exposes just the allocate/free/read/write
/// contract the recovery manager and buffer manager consume. Allocation and
/// free are tolerant of replay: redoing them must be idempotent.
pub struct DiskSpaceManager {
    inner: Mutex<DiskInner>,
}

#[derive(Default)]
struct DiskInner {
    partitions: HashSet<u32>,
    pages: HashMap<u64, Vec<u8>>,
}

impl DiskSpaceManager {
    pub fn new() -> DiskSpaceManager {
        DiskSpaceManager {
            inner: Mutex::new(DiskInner::default()),
        }
    }

    pub fn get_part_num(page_num: u64) -> u32 {
        (page_num / PAGES_PER_PARTITION) as u32
    }

    pub fn page_num(part_num: u32, index: u64) -> u64 {
        part_num as u64 * PAGES_PER_PARTITION + index
    }

    pub fn alloc_part(&self, part_num: u32) {
        self.inner.lock().unwrap().partitions.insert(part_num);
    }

    pub fn free_part(&self, part_num: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.partitions.remove(&part_num);
        inner
            .pages
            .retain(|page_num, _| Self::get_part_num(*page_num) != part_num);
    }

    pub fn alloc_page(&self, page_num: u64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.partitions.contains(&Self::get_part_num(page_num)) {
            return Err(DbError::Storage(format!(
                "partition {} of page {} is not allocated",
                Self::get_part_num(page_num),
                page_num
            )));
        }
        inner
            .pages
            .entry(page_num)
            .or_insert_with(|| vec![0; PAGE_SIZE]);
        Ok(())
    }

    pub fn free_page(&self, page_num: u64) {
        self.inner.lock().unwrap().pages.remove(&page_num);
    }

    pub fn is_allocated(&self, page_num: u64) -> bool {
        self.inner.lock().unwrap().pages.contains_key(&page_num)
    }

    pub fn read_page(&self, page_num: u64, buf: &mut [u8]) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        match inner.pages.get(&page_num) {
            Some(data) => {
                buf.copy_from_slice(data);
                Ok(())
            }
            None => Err(DbError::Storage(format!(
                "page {} is not allocated",
                page_num
            ))),
        }
    }

    pub fn write_page(&self, page_num: u64, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.pages.get_mut(&page_num) {
            Some(stored) => {
                stored.copy_from_slice(data);
                Ok(())
            }
            None => Err(DbError::Storage(format!(
                "page {} is not allocated",
                page_num
            ))),
        }
    }
}

impl Default for DiskSpaceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_num_encoding() {
        assert_eq!(DiskSpaceManager::get_part_num(0), 0);
        assert_eq!(
            DiskSpaceManager::get_part_num(DiskSpaceManager::page_num(3, 17)),
            3
        );
        assert_eq!(DiskSpaceManager::page_num(1, 5), PAGES_PER_PARTITION + 5);
    }

    #[test]
    fn alloc_read_write() {
        let dsm = DiskSpaceManager::new();
        let page = DiskSpaceManager::page_num(1, 0);
        dsm.alloc_part(1);
        dsm.alloc_page(page).unwrap();

        let mut data = vec![0u8; PAGE_SIZE];
        data[0] = 42;
        dsm.write_page(page, &data).unwrap();

        let mut read = vec![0u8; PAGE_SIZE];
        dsm.read_page(page, &mut read).unwrap();
        assert_eq!(read[0], 42);
    }

    #[test]
    fn alloc_is_idempotent() {
        let dsm = DiskSpaceManager::new();
        let page = DiskSpaceManager::page_num(1, 0);
        dsm.alloc_part(1);
        dsm.alloc_page(page).unwrap();

        let data = vec![7u8; PAGE_SIZE];
        dsm.write_page(page, &data).unwrap();
        // Replaying the allocation must not wipe the page.
        dsm.alloc_page(page).unwrap();
        let mut read = vec![0u8; PAGE_SIZE];
        dsm.read_page(page, &mut read).unwrap();
        assert_eq!(read[0], 7);
    }

    #[test]
    fn alloc_page_requires_partition() {
        let dsm = DiskSpaceManager::new();
        assert!(dsm.alloc_page(DiskSpaceManager::page_num(2, 0)).is_err());
    }

    #[test]
    fn free_part_drops_pages() {
        let dsm = DiskSpaceManager::new();
        dsm.alloc_part(1);
        let page = DiskSpaceManager::page_num(1, 3);
        dsm.alloc_page(page).unwrap();
        dsm.free_part(1);
        assert!(!dsm.is_allocated(page));
    }
}
