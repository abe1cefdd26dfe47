use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::disk::disk_space_manager::{DiskSpaceManager, PAGE_SIZE};
use crate::errors::Result;
use crate::log::Lsn;

/// Bytes at the head of every data page reserved for the pageLSN.
pub const RESERVED_SPACE: usize = 8;

/// Usable bytes of a data page.
pub const EFFECTIVE_PAGE_SIZE: usize = PAGE_SIZE - RESERVED_SPACE;

/// What the buffer manager needs from the recovery manager. Injected after
/// construction because the two depend on each other: `page_flush_hook` runs
/// before a dirty page is written out (the WAL rule: the log must reach the
/// page's pageLSN first), `disk_io_hook` after the write has succeeded.
pub trait RecoveryHooks: Send + Sync {
    fn page_flush_hook(&self, page_lsn: Lsn) -> Result<()>;
    fn disk_io_hook(&self, page_num: u64);
}

struct Frame {
    data: Vec<u8>,
    dirty: bool,
    pins: u32,
}

/// Pinned handle to a buffered page. Offsets address the effective region,
/// after the pageLSN header.
pub struct Page {
    page_num: u64,
    frame: Arc<Mutex<Frame>>,
}

impl Page {
    pub fn page_num(&self) -> u64 {
        self.page_num
    }

    pub fn page_lsn(&self) -> Lsn {
        let frame = self.frame.lock().unwrap();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&frame.data[..RESERVED_SPACE]);
        Lsn::from_be_bytes(bytes)
    }

    pub fn set_page_lsn(&self, lsn: Lsn) {
        let mut frame = self.frame.lock().unwrap();
        frame.data[..RESERVED_SPACE].copy_from_slice(&lsn.to_be_bytes());
        frame.dirty = true;
    }

    pub fn read_bytes(&self, offset: usize, len: usize) -> Vec<u8> {
        assert!(offset + len <= EFFECTIVE_PAGE_SIZE);
        let frame = self.frame.lock().unwrap();
        frame.data[RESERVED_SPACE + offset..RESERVED_SPACE + offset + len].to_vec()
    }

    pub fn write_bytes(&self, offset: usize, bytes: &[u8]) {
        assert!(offset + bytes.len() <= EFFECTIVE_PAGE_SIZE);
        let mut frame = self.frame.lock().unwrap();
        frame.data[RESERVED_SPACE + offset..RESERVED_SPACE + offset + bytes.len()]
            .copy_from_slice(bytes);
        frame.dirty = true;
    }

    pub fn unpin(&self) {
        let mut frame = self.frame.lock().unwrap();
        frame.pins = frame.pins.saturating_sub(1);
    }
}

/// Page-granular frame table over the disk space manager. There is no
/// replacement policy at this layer; frames stay resident until flushed out
/// or freed.
pub struct BufferManager {
    disk_space_manager: Arc<DiskSpaceManager>,
    recovery: Mutex<Option<Weak<dyn RecoveryHooks>>>,
    frames: Mutex<HashMap<u64, Arc<Mutex<Frame>>>>,
}

impl BufferManager {
    pub fn new(disk_space_manager: Arc<DiskSpaceManager>) -> BufferManager {
        BufferManager {
            disk_space_manager,
            recovery: Mutex::new(None),
            frames: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_recovery_manager(&self, hooks: Weak<dyn RecoveryHooks>) {
        *self.recovery.lock().unwrap() = Some(hooks);
    }

    fn hooks(&self) -> Option<Arc<dyn RecoveryHooks>> {
        self.recovery
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|weak| weak.upgrade())
    }

    /// Fetches and pins `page_num`, reading it in from disk on a miss.
    pub fn fetch_page(&self, page_num: u64) -> Result<Page> {
        let mut frames = self.frames.lock().unwrap();
        if let Some(frame) = frames.get(&page_num) {
            frame.lock().unwrap().pins += 1;
            return Ok(Page {
                page_num,
                frame: Arc::clone(frame),
            });
        }
        let mut data = vec![0u8; PAGE_SIZE];
        self.disk_space_manager.read_page(page_num, &mut data)?;
        let frame = Arc::new(Mutex::new(Frame {
            data,
            dirty: false,
            pins: 1,
        }));
        frames.insert(page_num, Arc::clone(&frame));
        Ok(Page { page_num, frame })
    }

    /// Writes `page_num` back if dirty. The log is flushed to the page's
    /// pageLSN first, and `disk_io_hook` fires after the successful write.
    pub fn flush_page(&self, page_num: u64) -> Result<()> {
        let frame = self.frames.lock().unwrap().get(&page_num).cloned();
        let Some(frame) = frame else {
            return Ok(());
        };
        let (data, page_lsn) = {
            let frame = frame.lock().unwrap();
            if !frame.dirty {
                return Ok(());
            }
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&frame.data[..RESERVED_SPACE]);
            (frame.data.clone(), Lsn::from_be_bytes(bytes))
        };
        if let Some(hooks) = self.hooks() {
            hooks.page_flush_hook(page_lsn)?;
        }
        self.disk_space_manager.write_page(page_num, &data)?;
        frame.lock().unwrap().dirty = false;
        if let Some(hooks) = self.hooks() {
            hooks.disk_io_hook(page_num);
        }
        Ok(())
    }

    pub fn flush_all(&self) -> Result<()> {
        let page_nums: Vec<u64> = self.frames.lock().unwrap().keys().copied().collect();
        for page_num in page_nums {
            self.flush_page(page_num)?;
        }
        Ok(())
    }

    /// Drops the frame and frees the page on disk. Used when redoing frees;
    /// nothing is written back.
    pub fn free_page(&self, page_num: u64) {
        self.frames.lock().unwrap().remove(&page_num);
        self.disk_space_manager.free_page(page_num);
    }

    /// Visits every buffered page with its dirty flag.
    pub fn iter_page_nums(&self, mut f: impl FnMut(u64, bool)) {
        let frames = self.frames.lock().unwrap();
        for (page_num, frame) in frames.iter() {
            f(*page_num, frame.lock().unwrap().dirty);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::disk_space_manager::DiskSpaceManager;

    struct HookLog {
        calls: Mutex<Vec<String>>,
    }

    impl RecoveryHooks for HookLog {
        fn page_flush_hook(&self, page_lsn: Lsn) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("flush_log:{}", page_lsn));
            Ok(())
        }

        fn disk_io_hook(&self, page_num: u64) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("disk_io:{}", page_num));
        }
    }

    fn setup() -> (Arc<DiskSpaceManager>, BufferManager, u64) {
        let dsm = Arc::new(DiskSpaceManager::new());
        dsm.alloc_part(1);
        let page_num = DiskSpaceManager::page_num(1, 0);
        dsm.alloc_page(page_num).unwrap();
        let bm = BufferManager::new(Arc::clone(&dsm));
        (dsm, bm, page_num)
    }

    #[test]
    fn write_read_and_page_lsn() {
        let (_dsm, bm, page_num) = setup();
        let page = bm.fetch_page(page_num).unwrap();
        page.write_bytes(10, b"hello");
        page.set_page_lsn(99);
        assert_eq!(page.read_bytes(10, 5), b"hello");
        assert_eq!(page.page_lsn(), 99);
        page.unpin();
    }

    #[test]
    fn flush_respects_wal_order() {
        let (dsm, bm, page_num) = setup();
        let hooks = Arc::new(HookLog {
            calls: Mutex::new(Vec::new()),
        });
        bm.set_recovery_manager(Arc::downgrade(&(Arc::clone(&hooks) as Arc<dyn RecoveryHooks>)));

        let page = bm.fetch_page(page_num).unwrap();
        page.write_bytes(0, &[1, 2, 3]);
        page.set_page_lsn(42);
        page.unpin();

        bm.flush_page(page_num).unwrap();
        let calls = hooks.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec!["flush_log:42".to_string(), format!("disk_io:{}", page_num)]
        );

        let mut data = vec![0u8; PAGE_SIZE];
        dsm.read_page(page_num, &mut data).unwrap();
        assert_eq!(&data[RESERVED_SPACE..RESERVED_SPACE + 3], &[1, 2, 3]);
    }

    #[test]
    fn clean_page_is_not_rewritten() {
        let (_dsm, bm, page_num) = setup();
        let hooks = Arc::new(HookLog {
            calls: Mutex::new(Vec::new()),
        });
        bm.set_recovery_manager(Arc::downgrade(&(Arc::clone(&hooks) as Arc<dyn RecoveryHooks>)));

        let page = bm.fetch_page(page_num).unwrap();
        page.unpin();
        bm.flush_page(page_num).unwrap();
        assert!(hooks.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn iter_page_nums_reports_dirty_flags() {
        let (dsm, bm, page_num) = setup();
        let other = DiskSpaceManager::page_num(1, 1);
        dsm.alloc_page(other).unwrap();

        let dirty = bm.fetch_page(page_num).unwrap();
        dirty.write_bytes(0, &[9]);
        dirty.unpin();
        let clean = bm.fetch_page(other).unwrap();
        clean.unpin();

        let mut seen = Vec::new();
        bm.iter_page_nums(|num, dirty| seen.push((num, dirty)));
        seen.sort();
        assert_eq!(seen, vec![(page_num, true), (other, false)]);
    }
}
