use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tracing::info;

use crate::buffer::buffer_manager::{BufferManager, RecoveryHooks, EFFECTIVE_PAGE_SIZE};
use crate::disk::disk_space_manager::{DiskSpaceManager, LOG_PARTITION};
use crate::errors::{DbError, Result};
use crate::log::log_manager::{LogManager, Lsn};
use crate::tx::transaction::{Status, Transaction};

use super::log_record::{LogKind, LogRecord, RecordData};

/// Entry of the transaction table: the live transaction handle, the LSN of
/// its most recent log record, and its savepoints.
pub struct TransactionTableEntry {
    pub transaction: Arc<Transaction>,
    pub last_lsn: Lsn,
    savepoints: HashMap<String, Lsn>,
}

impl TransactionTableEntry {
    fn new(transaction: Arc<Transaction>) -> TransactionTableEntry {
        TransactionTableEntry {
            transaction,
            last_lsn: 0,
            savepoints: HashMap::new(),
        }
    }
}

type NewTransactionFn = Box<dyn Fn(u64) -> Arc<Transaction> + Send + Sync>;

/// ARIES recovery manager: forward logging, savepoints and rollback,
/// checkpointing, and three-pass restart recovery.
///
/// Owns the log manager. The disk space manager and buffer manager are
/// injected after construction (`set_managers`) because the buffer manager
/// needs the recovery manager's flush hooks and the recovery manager needs
/// the buffer manager for redo.
pub struct RecoveryManager {
    log_manager: LogManager,
    disk_space_manager: OnceLock<Arc<DiskSpaceManager>>,
    buffer_manager: OnceLock<Arc<BufferManager>>,
    new_transaction: NewTransactionFn,
    dirty_page_table: Mutex<BTreeMap<u64, Lsn>>,
    transaction_table: Mutex<BTreeMap<u64, TransactionTableEntry>>,
    /// Guards the DPT against `disk_io_hook` pruning while redo still needs
    /// the recLSNs.
    redo_complete: AtomicBool,
}

fn entry_mut<'a>(
    table: &'a mut BTreeMap<u64, TransactionTableEntry>,
    trans_num: u64,
) -> &'a mut TransactionTableEntry {
    table
        .get_mut(&trans_num)
        .unwrap_or_else(|| panic!("transaction {} not in transaction table", trans_num))
}

impl RecoveryManager {
    pub fn new(log_manager: LogManager, new_transaction: NewTransactionFn) -> RecoveryManager {
        RecoveryManager {
            log_manager,
            disk_space_manager: OnceLock::new(),
            buffer_manager: OnceLock::new(),
            new_transaction,
            dirty_page_table: Mutex::new(BTreeMap::new()),
            transaction_table: Mutex::new(BTreeMap::new()),
            redo_complete: AtomicBool::new(false),
        }
    }

    pub fn set_managers(
        &self,
        disk_space_manager: Arc<DiskSpaceManager>,
        buffer_manager: Arc<BufferManager>,
    ) {
        assert!(
            self.disk_space_manager.set(disk_space_manager).is_ok()
                && self.buffer_manager.set(buffer_manager).is_ok(),
            "managers already injected"
        );
    }

    fn dsm(&self) -> &Arc<DiskSpaceManager> {
        self.disk_space_manager
            .get()
            .expect("disk space manager not injected")
    }

    fn bm(&self) -> &Arc<BufferManager> {
        self.buffer_manager
            .get()
            .expect("buffer manager not injected")
    }

    pub fn log_manager(&self) -> &LogManager {
        &self.log_manager
    }

    /// First-time setup of the log: master record plus an initial checkpoint.
    /// A fresh log has nothing to redo, so DPT pruning on page writes is
    /// enabled immediately.
    pub fn initialize(&self) -> Result<()> {
        let mut master = LogRecord::new(RecordData::Master {
            last_checkpoint_lsn: 0,
        });
        self.log_manager.rewrite_master_record(&mut master)?;
        self.checkpoint()?;
        self.redo_complete.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn start_transaction(&self, transaction: Arc<Transaction>) {
        self.transaction_table
            .lock()
            .unwrap()
            .insert(transaction.trans_num(), TransactionTableEntry::new(transaction));
    }

    fn append_and_update(
        &self,
        table: &mut BTreeMap<u64, TransactionTableEntry>,
        trans_num: u64,
        record: RecordData,
    ) -> Result<Lsn> {
        let mut record = LogRecord::new(record);
        let lsn = self.log_manager.append_to_log(&mut record)?;
        entry_mut(table, trans_num).last_lsn = lsn;
        Ok(lsn)
    }

    /// Appends the commit record, moves the transaction to COMMITTING, and
    /// makes the commit durable.
    pub fn commit(&self, trans_num: u64) -> Result<Lsn> {
        let lsn = {
            let mut table = self.transaction_table.lock().unwrap();
            let prev_lsn = entry_mut(&mut table, trans_num).last_lsn;
            let lsn = self.append_and_update(
                &mut table,
                trans_num,
                RecordData::CommitTransaction { trans_num, prev_lsn },
            )?;
            entry_mut(&mut table, trans_num)
                .transaction
                .set_status(Status::Committing);
            lsn
        };
        self.log_manager.flush_to_lsn(lsn)?;
        Ok(lsn)
    }

    /// Appends the abort record and moves the transaction to ABORTING. No
    /// rollback happens here; `end` performs it.
    pub fn abort(&self, trans_num: u64) -> Result<Lsn> {
        let mut table = self.transaction_table.lock().unwrap();
        let prev_lsn = entry_mut(&mut table, trans_num).last_lsn;
        let lsn = self.append_and_update(
            &mut table,
            trans_num,
            RecordData::AbortTransaction { trans_num, prev_lsn },
        )?;
        entry_mut(&mut table, trans_num)
            .transaction
            .set_status(Status::Aborting);
        Ok(lsn)
    }

    /// Finishes the transaction: rolls back all of its work first if it is
    /// aborting, then appends the end record and drops it from the table.
    pub fn end(&self, trans_num: u64) -> Result<Lsn> {
        let status = {
            let mut table = self.transaction_table.lock().unwrap();
            entry_mut(&mut table, trans_num).transaction.status()
        };
        if status == Status::Aborting {
            self.rollback_to_lsn(trans_num, 0)?;
        }
        let mut table = self.transaction_table.lock().unwrap();
        let entry = entry_mut(&mut table, trans_num);
        entry.transaction.set_status(Status::Complete);
        let prev_lsn = entry.last_lsn;
        let lsn = self.append_and_update(
            &mut table,
            trans_num,
            RecordData::EndTransaction { trans_num, prev_lsn },
        )?;
        table.remove(&trans_num);
        Ok(lsn)
    }

    /// Undoes the transaction's records with LSN > `limit_lsn`, newest first.
    /// Each undoable record gets a CLR (appended, then redone to apply the
    /// physical undo); `undo_next_lsn` chains let the walk skip work already
    /// compensated.
    fn rollback_to_lsn(&self, trans_num: u64, limit_lsn: Lsn) -> Result<()> {
        let mut table = self.transaction_table.lock().unwrap();
        let last_lsn = entry_mut(&mut table, trans_num).last_lsn;
        let last_record = self.log_manager.fetch_log_record(last_lsn)?;
        let mut current_lsn = last_record.undo_next_lsn().unwrap_or(last_record.lsn());
        while current_lsn > limit_lsn {
            let record = self.log_manager.fetch_log_record(current_lsn)?;
            if record.is_undoable() {
                let prev_last_lsn = entry_mut(&mut table, trans_num).last_lsn;
                let mut clr = record.undo(prev_last_lsn);
                let clr_lsn = self.log_manager.append_to_log(&mut clr)?;
                entry_mut(&mut table, trans_num).last_lsn = clr_lsn;
                clr.redo(self, self.dsm(), self.bm())?;
            }
            match record.prev_lsn() {
                Some(prev_lsn) => {
                    current_lsn = record.undo_next_lsn().unwrap_or(prev_lsn);
                }
                None => break,
            }
        }
        Ok(())
    }

    /// Logs a page write. `before` and `after` must be the same length and at
    /// most half a page, so that an update record always fits in a log page.
    pub fn log_page_write(
        &self,
        trans_num: u64,
        page_num: u64,
        offset: u16,
        before: &[u8],
        after: &[u8],
    ) -> Result<Lsn> {
        assert_eq!(before.len(), after.len());
        assert!(before.len() <= EFFECTIVE_PAGE_SIZE / 2);
        let lsn = {
            let mut table = self.transaction_table.lock().unwrap();
            let prev_lsn = entry_mut(&mut table, trans_num).last_lsn;
            self.append_and_update(
                &mut table,
                trans_num,
                RecordData::UpdatePage {
                    trans_num,
                    page_num,
                    prev_lsn,
                    offset,
                    before: before.to_vec(),
                    after: after.to_vec(),
                },
            )?
        };
        self.dirty_page_table
            .lock()
            .unwrap()
            .entry(page_num)
            .or_insert(lsn);
        Ok(lsn)
    }

    /// Logs a partition allocation and flushes: the change is visible on disk
    /// as soon as this returns. Returns `None` for the log partition.
    pub fn log_alloc_part(&self, trans_num: u64, part_num: u32) -> Result<Option<Lsn>> {
        if part_num == LOG_PARTITION {
            return Ok(None);
        }
        let lsn = {
            let mut table = self.transaction_table.lock().unwrap();
            let prev_lsn = entry_mut(&mut table, trans_num).last_lsn;
            self.append_and_update(
                &mut table,
                trans_num,
                RecordData::AllocPart {
                    trans_num,
                    part_num,
                    prev_lsn,
                },
            )?
        };
        self.log_manager.flush_to_lsn(lsn)?;
        Ok(Some(lsn))
    }

    pub fn log_free_part(&self, trans_num: u64, part_num: u32) -> Result<Option<Lsn>> {
        if part_num == LOG_PARTITION {
            return Ok(None);
        }
        let lsn = {
            let mut table = self.transaction_table.lock().unwrap();
            let prev_lsn = entry_mut(&mut table, trans_num).last_lsn;
            self.append_and_update(
                &mut table,
                trans_num,
                RecordData::FreePart {
                    trans_num,
                    part_num,
                    prev_lsn,
                },
            )?
        };
        self.log_manager.flush_to_lsn(lsn)?;
        Ok(Some(lsn))
    }

    pub fn log_alloc_page(&self, trans_num: u64, page_num: u64) -> Result<Option<Lsn>> {
        if DiskSpaceManager::get_part_num(page_num) == LOG_PARTITION {
            return Ok(None);
        }
        let lsn = {
            let mut table = self.transaction_table.lock().unwrap();
            let prev_lsn = entry_mut(&mut table, trans_num).last_lsn;
            self.append_and_update(
                &mut table,
                trans_num,
                RecordData::AllocPage {
                    trans_num,
                    page_num,
                    prev_lsn,
                },
            )?
        };
        self.log_manager.flush_to_lsn(lsn)?;
        Ok(Some(lsn))
    }

    pub fn log_free_page(&self, trans_num: u64, page_num: u64) -> Result<Option<Lsn>> {
        if DiskSpaceManager::get_part_num(page_num) == LOG_PARTITION {
            return Ok(None);
        }
        let lsn = {
            let mut table = self.transaction_table.lock().unwrap();
            let prev_lsn = entry_mut(&mut table, trans_num).last_lsn;
            self.append_and_update(
                &mut table,
                trans_num,
                RecordData::FreePage {
                    trans_num,
                    page_num,
                    prev_lsn,
                },
            )?
        };
        self.dirty_page_table.lock().unwrap().remove(&page_num);
        self.log_manager.flush_to_lsn(lsn)?;
        Ok(Some(lsn))
    }

    /// Captures the transaction's current lastLSN under `name`, replacing any
    /// savepoint with the same name.
    pub fn savepoint(&self, trans_num: u64, name: &str) {
        let mut table = self.transaction_table.lock().unwrap();
        let entry = entry_mut(&mut table, trans_num);
        let last_lsn = entry.last_lsn;
        entry.savepoints.insert(name.to_string(), last_lsn);
    }

    pub fn release_savepoint(&self, trans_num: u64, name: &str) {
        let mut table = self.transaction_table.lock().unwrap();
        entry_mut(&mut table, trans_num).savepoints.remove(name);
    }

    /// Undoes everything the transaction did after the savepoint, in reverse
    /// order, writing CLRs. The transaction's status is unchanged.
    pub fn rollback_to_savepoint(&self, trans_num: u64, name: &str) -> Result<()> {
        let savepoint_lsn = {
            let mut table = self.transaction_table.lock().unwrap();
            entry_mut(&mut table, trans_num)
                .savepoints
                .get(name)
                .copied()
        };
        match savepoint_lsn {
            Some(savepoint_lsn) => self.rollback_to_lsn(trans_num, savepoint_lsn),
            None => Err(DbError::UnknownSavepoint(format!(
                "transaction {} has no savepoint {}",
                trans_num, name
            ))),
        }
    }

    /// Writes a checkpoint: a begin record, end records packed with as many
    /// DPT and transaction-table entries as fit (spilling into additional end
    /// records as needed), a flush, and the master record rewrite.
    pub fn checkpoint(&self) -> Result<Lsn> {
        let mut begin = LogRecord::new(RecordData::BeginCheckpoint);
        let begin_lsn = self.log_manager.append_to_log(&mut begin)?;

        let dpt_snapshot: Vec<(u64, Lsn)> = {
            let dpt = self.dirty_page_table.lock().unwrap();
            dpt.iter().map(|(page, lsn)| (*page, *lsn)).collect()
        };
        let txn_snapshot: Vec<(u64, (Status, Lsn))> = {
            let table = self.transaction_table.lock().unwrap();
            table
                .iter()
                .map(|(trans_num, entry)| {
                    (*trans_num, (entry.transaction.status(), entry.last_lsn))
                })
                .collect()
        };

        let mut chkpt_dpt = BTreeMap::new();
        let mut chkpt_txn: BTreeMap<u64, (Status, Lsn)> = BTreeMap::new();
        for (page_num, rec_lsn) in dpt_snapshot {
            if !LogRecord::fits_in_one_record(chkpt_dpt.len() + 1, chkpt_txn.len()) {
                let mut end = LogRecord::new(RecordData::EndCheckpoint {
                    dirty_page_table: std::mem::take(&mut chkpt_dpt),
                    transaction_table: std::mem::take(&mut chkpt_txn),
                });
                self.log_manager.append_to_log(&mut end)?;
            }
            chkpt_dpt.insert(page_num, rec_lsn);
        }
        for (trans_num, status_and_lsn) in txn_snapshot {
            if !LogRecord::fits_in_one_record(chkpt_dpt.len(), chkpt_txn.len() + 1) {
                let mut end = LogRecord::new(RecordData::EndCheckpoint {
                    dirty_page_table: std::mem::take(&mut chkpt_dpt),
                    transaction_table: std::mem::take(&mut chkpt_txn),
                });
                self.log_manager.append_to_log(&mut end)?;
            }
            chkpt_txn.insert(trans_num, status_and_lsn);
        }
        let mut end = LogRecord::new(RecordData::EndCheckpoint {
            dirty_page_table: chkpt_dpt,
            transaction_table: chkpt_txn,
        });
        let end_lsn = self.log_manager.append_to_log(&mut end)?;

        self.log_manager.flush_to_lsn(end_lsn)?;
        let mut master = LogRecord::new(RecordData::Master {
            last_checkpoint_lsn: begin_lsn,
        });
        self.log_manager.rewrite_master_record(&mut master)?;
        info!(begin_lsn, "checkpoint complete");
        Ok(begin_lsn)
    }

    pub fn flush_to_lsn(&self, lsn: Lsn) -> Result<()> {
        self.log_manager.flush_to_lsn(lsn)
    }

    /// Records `page_num` as dirty since `lsn`. Keeps the smallest recLSN if
    /// a later record beat an earlier one to the insertion.
    pub fn dirty_page(&self, page_num: u64, lsn: Lsn) {
        let mut dpt = self.dirty_page_table.lock().unwrap();
        dpt.entry(page_num)
            .and_modify(|rec_lsn| {
                if lsn < *rec_lsn {
                    *rec_lsn = lsn;
                }
            })
            .or_insert(lsn);
    }

    /// Checkpoint on shutdown to bound the next restart.
    pub fn close(&self) -> Result<()> {
        self.checkpoint()?;
        Ok(())
    }

    pub fn dirty_page_table_snapshot(&self) -> BTreeMap<u64, Lsn> {
        self.dirty_page_table.lock().unwrap().clone()
    }

    pub fn transaction_table_snapshot(&self) -> Vec<(u64, Status, Lsn)> {
        let table = self.transaction_table.lock().unwrap();
        table
            .iter()
            .map(|(trans_num, entry)| (*trans_num, entry.transaction.status(), entry.last_lsn))
            .collect()
    }

    // Restart recovery ////////////////////////////////////////////////////

    /// Three-pass restart. Between redo and undo the DPT is pruned to pages
    /// the buffer manager actually holds dirty, and a fresh checkpoint bounds
    /// the next restart.
    pub fn restart(&self) -> Result<()> {
        info!("restart recovery: analysis");
        self.restart_analysis()?;
        info!("restart recovery: redo");
        self.restart_redo()?;
        self.redo_complete.store(true, Ordering::SeqCst);
        self.clean_dpt();
        info!("restart recovery: undo");
        self.restart_undo()?;
        self.checkpoint()?;
        info!("restart recovery complete");
        Ok(())
    }

    /// Reconstructs the DPT and transaction table by scanning forward from
    /// the last checkpoint named by the master record.
    fn restart_analysis(&self) -> Result<()> {
        let master = self.log_manager.fetch_log_record(0)?;
        let checkpoint_lsn = match master.data() {
            RecordData::Master {
                last_checkpoint_lsn,
            } => *last_checkpoint_lsn,
            other => panic!("log record at lsn 0 is {:?}, not a master record", other),
        };
        let mut ended_transactions: HashSet<u64> = HashSet::new();

        for record in self.log_manager.scan_from(checkpoint_lsn) {
            let record = record?;

            if let Some(trans_num) = record.trans_num() {
                let mut table = self.transaction_table.lock().unwrap();
                table
                    .entry(trans_num)
                    .or_insert_with(|| {
                        TransactionTableEntry::new((self.new_transaction)(trans_num))
                    })
                    .last_lsn = record.lsn();
            }

            if let Some(page_num) = record.page_num() {
                match record.kind() {
                    LogKind::UpdatePage | LogKind::UndoUpdatePage => {
                        self.dirty_page(page_num, record.lsn());
                    }
                    LogKind::FreePage | LogKind::UndoAllocPage => {
                        self.dirty_page_table.lock().unwrap().remove(&page_num);
                    }
                    _ => {}
                }
            }

            match record.data() {
                RecordData::CommitTransaction { trans_num, .. } => {
                    let mut table = self.transaction_table.lock().unwrap();
                    entry_mut(&mut table, *trans_num)
                        .transaction
                        .set_status(Status::Committing);
                }
                RecordData::AbortTransaction { trans_num, .. } => {
                    let mut table = self.transaction_table.lock().unwrap();
                    entry_mut(&mut table, *trans_num)
                        .transaction
                        .set_status(Status::RecoveryAborting);
                }
                RecordData::EndTransaction { trans_num, .. } => {
                    let mut table = self.transaction_table.lock().unwrap();
                    if let Some(entry) = table.remove(trans_num) {
                        entry.transaction.cleanup();
                        entry.transaction.set_status(Status::Complete);
                    }
                    ended_transactions.insert(*trans_num);
                }
                RecordData::EndCheckpoint {
                    dirty_page_table,
                    transaction_table,
                } => {
                    {
                        let mut dpt = self.dirty_page_table.lock().unwrap();
                        for (page_num, rec_lsn) in dirty_page_table {
                            dpt.insert(*page_num, *rec_lsn);
                        }
                    }
                    let mut table = self.transaction_table.lock().unwrap();
                    for (trans_num, (chkpt_status, chkpt_last_lsn)) in transaction_table {
                        if ended_transactions.contains(trans_num) {
                            continue;
                        }
                        let entry = table.entry(*trans_num).or_insert_with(|| {
                            let transaction = (self.new_transaction)(*trans_num);
                            transaction.set_status(*chkpt_status);
                            TransactionTableEntry::new(transaction)
                        });
                        entry.last_lsn = entry.last_lsn.max(*chkpt_last_lsn);
                        if entry.transaction.status().rank() < chkpt_status.rank() {
                            entry.transaction.set_status(*chkpt_status);
                        }
                        // Nothing may stay plain ABORTING across a restart.
                        if entry.transaction.status() == Status::Aborting {
                            entry.transaction.set_status(Status::RecoveryAborting);
                        }
                    }
                }
                _ => {}
            }
        }

        // Finish off what the scan left: committing transactions end now,
        // running ones become recovery-aborting.
        let trans_nums: Vec<u64> = {
            let table = self.transaction_table.lock().unwrap();
            table.keys().copied().collect()
        };
        for trans_num in trans_nums {
            let mut table = self.transaction_table.lock().unwrap();
            let entry = entry_mut(&mut table, trans_num);
            match entry.transaction.status() {
                Status::Committing => {
                    entry.transaction.cleanup();
                    entry.transaction.set_status(Status::Complete);
                    let prev_lsn = entry.last_lsn;
                    self.append_and_update(
                        &mut table,
                        trans_num,
                        RecordData::EndTransaction { trans_num, prev_lsn },
                    )?;
                    table.remove(&trans_num);
                }
                Status::Running => {
                    entry.transaction.set_status(Status::RecoveryAborting);
                    let prev_lsn = entry.last_lsn;
                    self.append_and_update(
                        &mut table,
                        trans_num,
                        RecordData::AbortTransaction { trans_num, prev_lsn },
                    )?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Replays redoable records from the smallest recLSN forward. Partition
    /// records and page allocations replay unconditionally; page
    /// modifications replay only when the DPT and the page's own pageLSN say
    /// the effect is missing.
    fn restart_redo(&self) -> Result<()> {
        let start_lsn = {
            let dpt = self.dirty_page_table.lock().unwrap();
            dpt.values().min().copied()
        };
        let Some(start_lsn) = start_lsn else {
            return Ok(());
        };
        for record in self.log_manager.scan_from(start_lsn) {
            let record = record?;
            if !record.is_redoable() {
                continue;
            }
            let needs_redo = match record.kind() {
                LogKind::AllocPart
                | LogKind::FreePart
                | LogKind::UndoAllocPart
                | LogKind::UndoFreePart
                | LogKind::AllocPage
                | LogKind::UndoFreePage => true,
                LogKind::UpdatePage
                | LogKind::UndoUpdatePage
                | LogKind::UndoAllocPage
                | LogKind::FreePage => {
                    let page_num = record
                        .page_num()
                        .unwrap_or_else(|| panic!("page record without page number"));
                    let rec_lsn = self.dirty_page_table.lock().unwrap().get(&page_num).copied();
                    match rec_lsn {
                        Some(rec_lsn) if record.lsn() >= rec_lsn => {
                            let page = self.bm().fetch_page(page_num)?;
                            let stale = page.page_lsn() < record.lsn();
                            page.unpin();
                            stale
                        }
                        _ => false,
                    }
                }
                _ => false,
            };
            if needs_redo {
                record.redo(self, self.dsm(), self.bm())?;
            }
        }
        Ok(())
    }

    /// Drops DPT entries for pages the buffer manager no longer holds dirty.
    fn clean_dpt(&self) {
        let mut dirty_pages = HashSet::new();
        self.bm().iter_page_nums(|page_num, dirty| {
            if dirty {
                dirty_pages.insert(page_num);
            }
        });
        let mut dpt = self.dirty_page_table.lock().unwrap();
        dpt.retain(|page_num, _| dirty_pages.contains(page_num));
    }

    /// Undoes every surviving transaction, largest LSN first across all of
    /// them, ending each one as its walk reaches the start sentinel.
    fn restart_undo(&self) -> Result<()> {
        let mut heap: BinaryHeap<Lsn> = {
            let table = self.transaction_table.lock().unwrap();
            table.values().map(|entry| entry.last_lsn).collect()
        };
        while let Some(lsn) = heap.pop() {
            if lsn == 0 {
                continue;
            }
            let record = self.log_manager.fetch_log_record(lsn)?;
            let trans_num = record
                .trans_num()
                .unwrap_or_else(|| panic!("undo reached record {} without a transaction", lsn));
            if record.is_undoable() {
                let mut table = self.transaction_table.lock().unwrap();
                let prev_last_lsn = entry_mut(&mut table, trans_num).last_lsn;
                let mut clr = record.undo(prev_last_lsn);
                let clr_lsn = self.log_manager.append_to_log(&mut clr)?;
                entry_mut(&mut table, trans_num).last_lsn = clr_lsn;
                drop(table);
                clr.redo(self, self.dsm(), self.bm())?;
            }
            let next_lsn = record
                .undo_next_lsn()
                .or(record.prev_lsn())
                .unwrap_or(0);
            if next_lsn == 0 {
                self.end(trans_num)?;
            } else {
                heap.push(next_lsn);
            }
        }
        Ok(())
    }
}

impl RecoveryHooks for RecoveryManager {
    /// WAL rule: a page may only reach disk once the log covers its pageLSN.
    fn page_flush_hook(&self, page_lsn: Lsn) -> Result<()> {
        self.log_manager.flush_to_lsn(page_lsn)
    }

    /// A page written to disk is clean, but the DPT must keep its recLSN
    /// until redo no longer needs it.
    fn disk_io_hook(&self, page_num: u64) {
        if self.redo_complete.load(Ordering::SeqCst) {
            self.dirty_page_table.lock().unwrap().remove(&page_num);
        }
    }
}
