use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Mutex;

use crate::errors::{DbError, Result};
use crate::tx::recovery::log_record::LogRecord;

use super::log_iterator::LogIterator;

/// Log sequence number: the byte offset of a record in the log file. LSN 0 is
/// the master record.
pub type Lsn = u64;

/// Size of one log page. Must hold the largest update record: two half-page
/// before/after images plus the record header.
pub const LOG_PAGE_SIZE: usize = 8192;

/// Append-only write-ahead log. Page 0 holds only the fixed-size master
/// record; records pack forward into the following pages and never span a
/// page boundary (a zero type tag marks padding up to the next page).
///
/// Appends go to a buffered tail page; full pages are written out and synced
/// when the tail rolls over, and `flush_to_lsn` forces the tail out early.
/// LSNs are stable across restarts, so the tail position is rediscovered by
/// scanning forward on reopen.
pub struct LogManager {
    inner: Mutex<LogInner>,
}

struct LogInner {
    file: File,
    tail_page: Vec<u8>,
    tail_page_num: u64,
    /// LSN the next appended record will receive.
    next_lsn: Lsn,
    /// Every record with LSN strictly below this is on stable storage.
    durable_lsn: Lsn,
}

impl LogInner {
    fn flush_tail(&mut self) -> Result<()> {
        self.file
            .write_all_at(&self.tail_page, self.tail_page_num * LOG_PAGE_SIZE as u64)?;
        self.file.sync_all()?;
        self.durable_lsn = self.next_lsn;
        Ok(())
    }

    fn page_bytes(&self, page_num: u64) -> Result<Vec<u8>> {
        if page_num == self.tail_page_num {
            return Ok(self.tail_page.clone());
        }
        let mut page = vec![0u8; LOG_PAGE_SIZE];
        read_page_at(&self.file, page_num, &mut page)?;
        Ok(page)
    }
}

fn read_page_at(file: &File, page_num: u64, page: &mut [u8]) -> Result<()> {
    let offset = page_num * LOG_PAGE_SIZE as u64;
    let len = file.metadata()?.len();
    if offset >= len {
        page.fill(0);
        return Ok(());
    }
    let available = ((len - offset) as usize).min(page.len());
    file.read_exact_at(&mut page[..available], offset)?;
    page[available..].fill(0);
    Ok(())
}

impl LogManager {
    pub fn new(path: &Path) -> Result<LogManager> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let len = file.metadata()?.len();
        if len < LOG_PAGE_SIZE as u64 {
            // Fresh log: reserve the master page; records start on page 1.
            let master_page = vec![0u8; LOG_PAGE_SIZE];
            file.write_all_at(&master_page, 0)?;
            file.sync_all()?;
            return Ok(LogManager {
                inner: Mutex::new(LogInner {
                    file,
                    tail_page: vec![0; LOG_PAGE_SIZE],
                    tail_page_num: 1,
                    next_lsn: LOG_PAGE_SIZE as Lsn,
                    durable_lsn: LOG_PAGE_SIZE as Lsn,
                }),
            });
        }

        // Reopen: walk forward from page 1 to rediscover the tail position.
        let total_pages = (len as usize).div_ceil(LOG_PAGE_SIZE) as u64;
        let mut tail_page = vec![0u8; LOG_PAGE_SIZE];
        let mut tail_page_num = 1;
        let mut tail_offset = 0;
        for page_num in 1..total_pages {
            let mut page = vec![0u8; LOG_PAGE_SIZE];
            read_page_at(&file, page_num, &mut page)?;
            let mut pos = 0;
            while pos < LOG_PAGE_SIZE && page[pos] != 0 {
                let (_, consumed) = LogRecord::from_bytes(&page[pos..])?;
                pos += consumed;
            }
            tail_page = page;
            tail_page_num = page_num;
            tail_offset = pos;
            if pos == 0 {
                break;
            }
        }
        let next_lsn = tail_page_num * LOG_PAGE_SIZE as u64 + tail_offset as u64;
        Ok(LogManager {
            inner: Mutex::new(LogInner {
                file,
                tail_page,
                tail_page_num,
                next_lsn,
                durable_lsn: next_lsn,
            }),
        })
    }

    /// Appends `record`, assigning it the next LSN (also stored into the
    /// record). The record is buffered; it is durable only once the log has
    /// been flushed past it.
    pub fn append_to_log(&self, record: &mut LogRecord) -> Result<Lsn> {
        let bytes = record.to_bytes();
        assert!(bytes.len() <= LOG_PAGE_SIZE, "log record exceeds a log page");
        let mut inner = self.inner.lock().unwrap();

        let page_of_next = inner.next_lsn / LOG_PAGE_SIZE as u64;
        if page_of_next != inner.tail_page_num {
            // Previous append filled the page exactly.
            inner.flush_tail()?;
            inner.tail_page.fill(0);
            inner.tail_page_num = page_of_next;
        }
        let mut offset = (inner.next_lsn % LOG_PAGE_SIZE as u64) as usize;
        if offset + bytes.len() > LOG_PAGE_SIZE {
            inner.flush_tail()?;
            inner.tail_page.fill(0);
            inner.tail_page_num += 1;
            inner.next_lsn = inner.tail_page_num * LOG_PAGE_SIZE as u64;
            offset = 0;
        }
        let lsn = inner.next_lsn;
        inner.tail_page[offset..offset + bytes.len()].copy_from_slice(&bytes);
        inner.next_lsn = lsn + bytes.len() as u64;
        record.set_lsn(lsn);
        Ok(lsn)
    }

    /// Guarantees every record with LSN ≤ `lsn` is on stable storage.
    /// Idempotent.
    pub fn flush_to_lsn(&self, lsn: Lsn) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if lsn >= inner.durable_lsn {
            inner.flush_tail()?;
        }
        Ok(())
    }

    pub fn fetch_log_record(&self, lsn: Lsn) -> Result<LogRecord> {
        let inner = self.inner.lock().unwrap();
        if lsn == 0 {
            let mut page = vec![0u8; LOG_PAGE_SIZE];
            read_page_at(&inner.file, 0, &mut page)?;
            if page[0] == 0 {
                return Err(DbError::CorruptLog("no master record".to_string()));
            }
            let (mut record, _) = LogRecord::from_bytes(&page)?;
            record.set_lsn(0);
            return Ok(record);
        }
        if lsn >= inner.next_lsn {
            return Err(DbError::CorruptLog(format!(
                "lsn {} is past the end of the log",
                lsn
            )));
        }
        let page = inner.page_bytes(lsn / LOG_PAGE_SIZE as u64)?;
        let offset = (lsn % LOG_PAGE_SIZE as u64) as usize;
        if page[offset] == 0 {
            return Err(DbError::CorruptLog(format!("no record at lsn {}", lsn)));
        }
        let (mut record, _) = LogRecord::from_bytes(&page[offset..])?;
        record.set_lsn(lsn);
        Ok(record)
    }

    /// The record following position `lsn`, skipping page padding, together
    /// with the position after it. `None` at the end of the log.
    pub(crate) fn read_next_record(&self, lsn: Lsn) -> Result<Option<(LogRecord, Lsn)>> {
        let inner = self.inner.lock().unwrap();
        let mut lsn = lsn.max(LOG_PAGE_SIZE as Lsn);
        loop {
            if lsn >= inner.next_lsn {
                return Ok(None);
            }
            let page_num = lsn / LOG_PAGE_SIZE as u64;
            let offset = (lsn % LOG_PAGE_SIZE as u64) as usize;
            let page = inner.page_bytes(page_num)?;
            if page[offset] == 0 {
                lsn = (page_num + 1) * LOG_PAGE_SIZE as u64;
                continue;
            }
            let (mut record, consumed) = LogRecord::from_bytes(&page[offset..])?;
            record.set_lsn(lsn);
            return Ok(Some((record, lsn + consumed as u64)));
        }
    }

    /// Forward scan over all records with LSN ≥ `lsn`. Finite: ends at the
    /// current end of the log.
    pub fn scan_from(&self, lsn: Lsn) -> LogIterator<'_> {
        LogIterator::new(self, lsn)
    }

    /// Atomically replaces the master record at LSN 0 and flushes it.
    pub fn rewrite_master_record(&self, record: &mut LogRecord) -> Result<()> {
        let bytes = record.to_bytes();
        assert!(bytes.len() <= LOG_PAGE_SIZE);
        let inner = self.inner.lock().unwrap();
        inner.file.write_all_at(&bytes, 0)?;
        inner.file.sync_all()?;
        record.set_lsn(0);
        Ok(())
    }

    /// One past the LSN of the last appended record.
    pub fn end_lsn(&self) -> Lsn {
        self.inner.lock().unwrap().next_lsn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::recovery::log_record::{LogRecord, RecordData};
    use tempfile::TempDir;

    fn commit(trans_num: u64, prev_lsn: Lsn) -> LogRecord {
        LogRecord::new(RecordData::CommitTransaction {
            trans_num,
            prev_lsn,
        })
    }

    #[test]
    fn append_assigns_monotonic_lsns() {
        let dir = TempDir::new().unwrap();
        let lm = LogManager::new(&dir.path().join("test.log")).unwrap();

        let mut first = commit(1, 0);
        let mut second = commit(2, 0);
        let lsn1 = lm.append_to_log(&mut first).unwrap();
        let lsn2 = lm.append_to_log(&mut second).unwrap();

        assert_eq!(lsn1, LOG_PAGE_SIZE as u64);
        assert!(lsn2 > lsn1);
        assert_eq!(first.lsn(), lsn1);

        let fetched = lm.fetch_log_record(lsn2).unwrap();
        assert_eq!(fetched, second);
    }

    #[test]
    fn records_roll_over_page_boundaries() {
        let dir = TempDir::new().unwrap();
        let lm = LogManager::new(&dir.path().join("test.log")).unwrap();

        let mut lsns = Vec::new();
        for trans_num in 0..1000 {
            let mut record = commit(trans_num, 0);
            lsns.push(lm.append_to_log(&mut record).unwrap());
        }
        // 1000 * 17 bytes is well past one page.
        assert!(*lsns.last().unwrap() >= 2 * LOG_PAGE_SIZE as u64);

        for (trans_num, lsn) in lsns.iter().enumerate() {
            let record = lm.fetch_log_record(*lsn).unwrap();
            assert_eq!(record.trans_num(), Some(trans_num as u64));
        }

        let scanned: Vec<_> = lm
            .scan_from(0)
            .map(|record| record.unwrap().lsn())
            .collect();
        assert_eq!(scanned, lsns);
    }

    #[test]
    fn scan_from_mid_log() {
        let dir = TempDir::new().unwrap();
        let lm = LogManager::new(&dir.path().join("test.log")).unwrap();

        let mut lsns = Vec::new();
        for trans_num in 0..10 {
            let mut record = commit(trans_num, 0);
            lsns.push(lm.append_to_log(&mut record).unwrap());
        }
        let scanned: Vec<_> = lm
            .scan_from(lsns[4])
            .map(|record| record.unwrap().lsn())
            .collect();
        assert_eq!(scanned, lsns[4..]);
    }

    #[test]
    fn flushed_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.log");
        let last_lsn = {
            let lm = LogManager::new(&path).unwrap();
            let mut last = 0;
            for trans_num in 0..5 {
                let mut record = commit(trans_num, 0);
                last = lm.append_to_log(&mut record).unwrap();
            }
            lm.flush_to_lsn(last).unwrap();
            lm.flush_to_lsn(last).unwrap(); // idempotent
            last
        };

        let lm = LogManager::new(&path).unwrap();
        let scanned: Vec<_> = lm
            .scan_from(0)
            .map(|record| record.unwrap().lsn())
            .collect();
        assert_eq!(scanned.len(), 5);
        assert_eq!(*scanned.last().unwrap(), last_lsn);

        // New appends continue past the recovered tail.
        let mut record = commit(99, 0);
        let lsn = lm.append_to_log(&mut record).unwrap();
        assert!(lsn > last_lsn);
    }

    #[test]
    fn unflushed_tail_is_lost_on_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.log");
        {
            let lm = LogManager::new(&path).unwrap();
            let mut durable = commit(1, 0);
            let lsn = lm.append_to_log(&mut durable).unwrap();
            lm.flush_to_lsn(lsn).unwrap();
            let mut lost = commit(2, 0);
            lm.append_to_log(&mut lost).unwrap();
            // No flush: the second record never reaches the file.
        }
        let lm = LogManager::new(&path).unwrap();
        let scanned: Vec<_> = lm.scan_from(0).collect();
        assert_eq!(scanned.len(), 1);
    }

    #[test]
    fn master_record_rewrite() {
        let dir = TempDir::new().unwrap();
        let lm = LogManager::new(&dir.path().join("test.log")).unwrap();

        assert!(lm.fetch_log_record(0).is_err());

        let mut master = LogRecord::new(RecordData::Master {
            last_checkpoint_lsn: 0,
        });
        lm.rewrite_master_record(&mut master).unwrap();
        assert_eq!(lm.fetch_log_record(0).unwrap(), master);

        let mut updated = LogRecord::new(RecordData::Master {
            last_checkpoint_lsn: 12345,
        });
        lm.rewrite_master_record(&mut updated).unwrap();
        match lm.fetch_log_record(0).unwrap().data() {
            RecordData::Master {
                last_checkpoint_lsn,
            } => assert_eq!(*last_checkpoint_lsn, 12345),
            other => panic!("unexpected record {:?}", other),
        }
    }
}
