use std::collections::BTreeMap;

use crate::buffer::buffer_manager::BufferManager;
use crate::disk::disk_space_manager::DiskSpaceManager;
use crate::errors::{DbError, Result};
use crate::log::log_manager::{Lsn, LOG_PAGE_SIZE};
use crate::tx::transaction::Status;

use super::recovery_manager::RecoveryManager;

// Type tags of the on-disk record images. Tag 0 marks padding at the end of
// a log page and never identifies a record.
const TAG_MASTER: u8 = 1;
const TAG_ALLOC_PART: u8 = 2;
const TAG_UNDO_ALLOC_PART: u8 = 3;
const TAG_FREE_PART: u8 = 4;
const TAG_UNDO_FREE_PART: u8 = 5;
const TAG_ALLOC_PAGE: u8 = 6;
const TAG_UNDO_ALLOC_PAGE: u8 = 7;
const TAG_UPDATE_PAGE: u8 = 8;
const TAG_UNDO_UPDATE_PAGE: u8 = 9;
const TAG_FREE_PAGE: u8 = 10;
const TAG_UNDO_FREE_PAGE: u8 = 11;
const TAG_COMMIT_TRANSACTION: u8 = 12;
const TAG_ABORT_TRANSACTION: u8 = 13;
const TAG_END_TRANSACTION: u8 = 14;
const TAG_BEGIN_CHECKPOINT: u8 = 15;
const TAG_END_CHECKPOINT: u8 = 16;

const END_CHECKPOINT_HEADER_BYTES: usize = 1 + 4 + 4;
const DPT_ENTRY_BYTES: usize = 8 + 8;
const TXN_ENTRY_BYTES: usize = 8 + 1 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Master,
    AllocPart,
    UndoAllocPart,
    FreePart,
    UndoFreePart,
    AllocPage,
    UndoAllocPage,
    UpdatePage,
    UndoUpdatePage,
    FreePage,
    UndoFreePage,
    CommitTransaction,
    AbortTransaction,
    EndTransaction,
    BeginCheckpoint,
    EndCheckpoint,
}

/// Payload of a log record. `prev_lsn` chains a transaction's records
/// backwards (0 for its first record); `undo_next_lsn` on compensation
/// records points past the record they compensate.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordData {
    Master {
        last_checkpoint_lsn: Lsn,
    },
    BeginCheckpoint,
    EndCheckpoint {
        dirty_page_table: BTreeMap<u64, Lsn>,
        transaction_table: BTreeMap<u64, (Status, Lsn)>,
    },
    CommitTransaction {
        trans_num: u64,
        prev_lsn: Lsn,
    },
    AbortTransaction {
        trans_num: u64,
        prev_lsn: Lsn,
    },
    EndTransaction {
        trans_num: u64,
        prev_lsn: Lsn,
    },
    AllocPart {
        trans_num: u64,
        part_num: u32,
        prev_lsn: Lsn,
    },
    FreePart {
        trans_num: u64,
        part_num: u32,
        prev_lsn: Lsn,
    },
    UndoAllocPart {
        trans_num: u64,
        part_num: u32,
        prev_lsn: Lsn,
        undo_next_lsn: Lsn,
    },
    UndoFreePart {
        trans_num: u64,
        part_num: u32,
        prev_lsn: Lsn,
        undo_next_lsn: Lsn,
    },
    AllocPage {
        trans_num: u64,
        page_num: u64,
        prev_lsn: Lsn,
    },
    FreePage {
        trans_num: u64,
        page_num: u64,
        prev_lsn: Lsn,
    },
    UndoAllocPage {
        trans_num: u64,
        page_num: u64,
        prev_lsn: Lsn,
        undo_next_lsn: Lsn,
    },
    UndoFreePage {
        trans_num: u64,
        page_num: u64,
        prev_lsn: Lsn,
        undo_next_lsn: Lsn,
    },
    UpdatePage {
        trans_num: u64,
        page_num: u64,
        prev_lsn: Lsn,
        offset: u16,
        before: Vec<u8>,
        after: Vec<u8>,
    },
    UndoUpdatePage {
        trans_num: u64,
        page_num: u64,
        prev_lsn: Lsn,
        undo_next_lsn: Lsn,
        offset: u16,
        before: Vec<u8>,
    },
}

/// One log record: its LSN (assigned on append, recovered on fetch) and its
/// payload. Each record emits a self-describing fixed-format byte image.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    lsn: Lsn,
    data: RecordData,
}

impl LogRecord {
    pub fn new(data: RecordData) -> LogRecord {
        LogRecord { lsn: 0, data }
    }

    pub fn lsn(&self) -> Lsn {
        self.lsn
    }

    pub(crate) fn set_lsn(&mut self, lsn: Lsn) {
        self.lsn = lsn;
    }

    pub fn data(&self) -> &RecordData {
        &self.data
    }

    pub fn kind(&self) -> LogKind {
        match self.data {
            RecordData::Master { .. } => LogKind::Master,
            RecordData::BeginCheckpoint => LogKind::BeginCheckpoint,
            RecordData::EndCheckpoint { .. } => LogKind::EndCheckpoint,
            RecordData::CommitTransaction { .. } => LogKind::CommitTransaction,
            RecordData::AbortTransaction { .. } => LogKind::AbortTransaction,
            RecordData::EndTransaction { .. } => LogKind::EndTransaction,
            RecordData::AllocPart { .. } => LogKind::AllocPart,
            RecordData::FreePart { .. } => LogKind::FreePart,
            RecordData::UndoAllocPart { .. } => LogKind::UndoAllocPart,
            RecordData::UndoFreePart { .. } => LogKind::UndoFreePart,
            RecordData::AllocPage { .. } => LogKind::AllocPage,
            RecordData::FreePage { .. } => LogKind::FreePage,
            RecordData::UndoAllocPage { .. } => LogKind::UndoAllocPage,
            RecordData::UndoFreePage { .. } => LogKind::UndoFreePage,
            RecordData::UpdatePage { .. } => LogKind::UpdatePage,
            RecordData::UndoUpdatePage { .. } => LogKind::UndoUpdatePage,
        }
    }

    pub fn trans_num(&self) -> Option<u64> {
        match &self.data {
            RecordData::Master { .. }
            | RecordData::BeginCheckpoint
            | RecordData::EndCheckpoint { .. } => None,
            RecordData::CommitTransaction { trans_num, .. }
            | RecordData::AbortTransaction { trans_num, .. }
            | RecordData::EndTransaction { trans_num, .. }
            | RecordData::AllocPart { trans_num, .. }
            | RecordData::FreePart { trans_num, .. }
            | RecordData::UndoAllocPart { trans_num, .. }
            | RecordData::UndoFreePart { trans_num, .. }
            | RecordData::AllocPage { trans_num, .. }
            | RecordData::FreePage { trans_num, .. }
            | RecordData::UndoAllocPage { trans_num, .. }
            | RecordData::UndoFreePage { trans_num, .. }
            | RecordData::UpdatePage { trans_num, .. }
            | RecordData::UndoUpdatePage { trans_num, .. } => Some(*trans_num),
        }
    }

    pub fn page_num(&self) -> Option<u64> {
        match &self.data {
            RecordData::AllocPage { page_num, .. }
            | RecordData::FreePage { page_num, .. }
            | RecordData::UndoAllocPage { page_num, .. }
            | RecordData::UndoFreePage { page_num, .. }
            | RecordData::UpdatePage { page_num, .. }
            | RecordData::UndoUpdatePage { page_num, .. } => Some(*page_num),
            _ => None,
        }
    }

    pub fn part_num(&self) -> Option<u32> {
        match &self.data {
            RecordData::AllocPart { part_num, .. }
            | RecordData::FreePart { part_num, .. }
            | RecordData::UndoAllocPart { part_num, .. }
            | RecordData::UndoFreePart { part_num, .. } => Some(*part_num),
            _ => None,
        }
    }

    pub fn prev_lsn(&self) -> Option<Lsn> {
        match &self.data {
            RecordData::Master { .. }
            | RecordData::BeginCheckpoint
            | RecordData::EndCheckpoint { .. } => None,
            RecordData::CommitTransaction { prev_lsn, .. }
            | RecordData::AbortTransaction { prev_lsn, .. }
            | RecordData::EndTransaction { prev_lsn, .. }
            | RecordData::AllocPart { prev_lsn, .. }
            | RecordData::FreePart { prev_lsn, .. }
            | RecordData::UndoAllocPart { prev_lsn, .. }
            | RecordData::UndoFreePart { prev_lsn, .. }
            | RecordData::AllocPage { prev_lsn, .. }
            | RecordData::FreePage { prev_lsn, .. }
            | RecordData::UndoAllocPage { prev_lsn, .. }
            | RecordData::UndoFreePage { prev_lsn, .. }
            | RecordData::UpdatePage { prev_lsn, .. }
            | RecordData::UndoUpdatePage { prev_lsn, .. } => Some(*prev_lsn),
        }
    }

    pub fn undo_next_lsn(&self) -> Option<Lsn> {
        match &self.data {
            RecordData::UndoAllocPart { undo_next_lsn, .. }
            | RecordData::UndoFreePart { undo_next_lsn, .. }
            | RecordData::UndoAllocPage { undo_next_lsn, .. }
            | RecordData::UndoFreePage { undo_next_lsn, .. }
            | RecordData::UndoUpdatePage { undo_next_lsn, .. } => Some(*undo_next_lsn),
            _ => None,
        }
    }

    /// Records with a logical inverse. Compensation records are not undoable;
    /// master and checkpoint records are neither undoable nor redoable.
    pub fn is_undoable(&self) -> bool {
        matches!(
            self.data,
            RecordData::AllocPart { .. }
                | RecordData::FreePart { .. }
                | RecordData::AllocPage { .. }
                | RecordData::FreePage { .. }
                | RecordData::UpdatePage { .. }
        )
    }

    pub fn is_redoable(&self) -> bool {
        matches!(
            self.data,
            RecordData::AllocPart { .. }
                | RecordData::FreePart { .. }
                | RecordData::UndoAllocPart { .. }
                | RecordData::UndoFreePart { .. }
                | RecordData::AllocPage { .. }
                | RecordData::FreePage { .. }
                | RecordData::UndoAllocPage { .. }
                | RecordData::UndoFreePage { .. }
                | RecordData::UpdatePage { .. }
                | RecordData::UndoUpdatePage { .. }
        )
    }

    /// Builds the compensation record for this record. `prev_last_lsn` is the
    /// transaction's current lastLSN and becomes the CLR's prevLSN; the CLR's
    /// undoNextLSN points at this record's predecessor (0 when there is
    /// none). The physical undo itself happens when the CLR is redone.
    pub fn undo(&self, prev_last_lsn: Lsn) -> LogRecord {
        let undo_next_lsn = self.prev_lsn().unwrap_or(0);
        let data = match &self.data {
            RecordData::AllocPart {
                trans_num,
                part_num,
                ..
            } => RecordData::UndoAllocPart {
                trans_num: *trans_num,
                part_num: *part_num,
                prev_lsn: prev_last_lsn,
                undo_next_lsn,
            },
            RecordData::FreePart {
                trans_num,
                part_num,
                ..
            } => RecordData::UndoFreePart {
                trans_num: *trans_num,
                part_num: *part_num,
                prev_lsn: prev_last_lsn,
                undo_next_lsn,
            },
            RecordData::AllocPage {
                trans_num,
                page_num,
                ..
            } => RecordData::UndoAllocPage {
                trans_num: *trans_num,
                page_num: *page_num,
                prev_lsn: prev_last_lsn,
                undo_next_lsn,
            },
            RecordData::FreePage {
                trans_num,
                page_num,
                ..
            } => RecordData::UndoFreePage {
                trans_num: *trans_num,
                page_num: *page_num,
                prev_lsn: prev_last_lsn,
                undo_next_lsn,
            },
            RecordData::UpdatePage {
                trans_num,
                page_num,
                offset,
                before,
                ..
            } => RecordData::UndoUpdatePage {
                trans_num: *trans_num,
                page_num: *page_num,
                prev_lsn: prev_last_lsn,
                undo_next_lsn,
                offset: *offset,
                before: before.clone(),
            },
            other => panic!("log record {:?} is not undoable", other),
        };
        LogRecord::new(data)
    }

    /// Re-executes the record's physical action. Idempotent: page writes are
    /// skipped unless the page's pageLSN is older than this record.
    pub fn redo(
        &self,
        recovery_manager: &RecoveryManager,
        disk_space_manager: &DiskSpaceManager,
        buffer_manager: &BufferManager,
    ) -> Result<()> {
        match &self.data {
            RecordData::AllocPart { part_num, .. }
            | RecordData::UndoFreePart { part_num, .. } => {
                disk_space_manager.alloc_part(*part_num);
                Ok(())
            }
            RecordData::FreePart { part_num, .. }
            | RecordData::UndoAllocPart { part_num, .. } => {
                disk_space_manager.free_part(*part_num);
                Ok(())
            }
            RecordData::AllocPage { page_num, .. }
            | RecordData::UndoFreePage { page_num, .. } => {
                disk_space_manager.alloc_page(*page_num)
            }
            RecordData::FreePage { page_num, .. }
            | RecordData::UndoAllocPage { page_num, .. } => {
                buffer_manager.free_page(*page_num);
                Ok(())
            }
            RecordData::UpdatePage {
                page_num,
                offset,
                after,
                ..
            } => self.redo_page_write(recovery_manager, buffer_manager, *page_num, *offset, after),
            RecordData::UndoUpdatePage {
                page_num,
                offset,
                before,
                ..
            } => self.redo_page_write(recovery_manager, buffer_manager, *page_num, *offset, before),
            other => panic!("log record {:?} is not redoable", other),
        }
    }

    fn redo_page_write(
        &self,
        recovery_manager: &RecoveryManager,
        buffer_manager: &BufferManager,
        page_num: u64,
        offset: u16,
        bytes: &[u8],
    ) -> Result<()> {
        let page = buffer_manager.fetch_page(page_num)?;
        if page.page_lsn() < self.lsn {
            page.write_bytes(offset as usize, bytes);
            page.set_page_lsn(self.lsn);
            recovery_manager.dirty_page(page_num, self.lsn);
        }
        page.unpin();
        Ok(())
    }

    /// Whether an end-checkpoint record with the given entry counts still
    /// fits in one log page.
    pub fn fits_in_one_record(dpt_entries: usize, txn_entries: usize) -> bool {
        END_CHECKPOINT_HEADER_BYTES
            + dpt_entries * DPT_ENTRY_BYTES
            + txn_entries * TXN_ENTRY_BYTES
            <= LOG_PAGE_SIZE
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match &self.data {
            RecordData::Master {
                last_checkpoint_lsn,
            } => {
                out.push(TAG_MASTER);
                out.extend_from_slice(&last_checkpoint_lsn.to_be_bytes());
            }
            RecordData::BeginCheckpoint => {
                out.push(TAG_BEGIN_CHECKPOINT);
            }
            RecordData::EndCheckpoint {
                dirty_page_table,
                transaction_table,
            } => {
                out.push(TAG_END_CHECKPOINT);
                out.extend_from_slice(&(dirty_page_table.len() as u32).to_be_bytes());
                out.extend_from_slice(&(transaction_table.len() as u32).to_be_bytes());
                for (page_num, rec_lsn) in dirty_page_table {
                    out.extend_from_slice(&page_num.to_be_bytes());
                    out.extend_from_slice(&rec_lsn.to_be_bytes());
                }
                for (trans_num, (status, last_lsn)) in transaction_table {
                    out.extend_from_slice(&trans_num.to_be_bytes());
                    out.push(status.rank());
                    out.extend_from_slice(&last_lsn.to_be_bytes());
                }
            }
            RecordData::CommitTransaction {
                trans_num,
                prev_lsn,
            } => {
                out.push(TAG_COMMIT_TRANSACTION);
                out.extend_from_slice(&trans_num.to_be_bytes());
                out.extend_from_slice(&prev_lsn.to_be_bytes());
            }
            RecordData::AbortTransaction {
                trans_num,
                prev_lsn,
            } => {
                out.push(TAG_ABORT_TRANSACTION);
                out.extend_from_slice(&trans_num.to_be_bytes());
                out.extend_from_slice(&prev_lsn.to_be_bytes());
            }
            RecordData::EndTransaction {
                trans_num,
                prev_lsn,
            } => {
                out.push(TAG_END_TRANSACTION);
                out.extend_from_slice(&trans_num.to_be_bytes());
                out.extend_from_slice(&prev_lsn.to_be_bytes());
            }
            RecordData::AllocPart {
                trans_num,
                part_num,
                prev_lsn,
            } => {
                out.push(TAG_ALLOC_PART);
                out.extend_from_slice(&trans_num.to_be_bytes());
                out.extend_from_slice(&part_num.to_be_bytes());
                out.extend_from_slice(&prev_lsn.to_be_bytes());
            }
            RecordData::FreePart {
                trans_num,
                part_num,
                prev_lsn,
            } => {
                out.push(TAG_FREE_PART);
                out.extend_from_slice(&trans_num.to_be_bytes());
                out.extend_from_slice(&part_num.to_be_bytes());
                out.extend_from_slice(&prev_lsn.to_be_bytes());
            }
            RecordData::UndoAllocPart {
                trans_num,
                part_num,
                prev_lsn,
                undo_next_lsn,
            } => {
                out.push(TAG_UNDO_ALLOC_PART);
                out.extend_from_slice(&trans_num.to_be_bytes());
                out.extend_from_slice(&part_num.to_be_bytes());
                out.extend_from_slice(&prev_lsn.to_be_bytes());
                out.extend_from_slice(&undo_next_lsn.to_be_bytes());
            }
            RecordData::UndoFreePart {
                trans_num,
                part_num,
                prev_lsn,
                undo_next_lsn,
            } => {
                out.push(TAG_UNDO_FREE_PART);
                out.extend_from_slice(&trans_num.to_be_bytes());
                out.extend_from_slice(&part_num.to_be_bytes());
                out.extend_from_slice(&prev_lsn.to_be_bytes());
                out.extend_from_slice(&undo_next_lsn.to_be_bytes());
            }
            RecordData::AllocPage {
                trans_num,
                page_num,
                prev_lsn,
            } => {
                out.push(TAG_ALLOC_PAGE);
                out.extend_from_slice(&trans_num.to_be_bytes());
                out.extend_from_slice(&page_num.to_be_bytes());
                out.extend_from_slice(&prev_lsn.to_be_bytes());
            }
            RecordData::FreePage {
                trans_num,
                page_num,
                prev_lsn,
            } => {
                out.push(TAG_FREE_PAGE);
                out.extend_from_slice(&trans_num.to_be_bytes());
                out.extend_from_slice(&page_num.to_be_bytes());
                out.extend_from_slice(&prev_lsn.to_be_bytes());
            }
            RecordData::UndoAllocPage {
                trans_num,
                page_num,
                prev_lsn,
                undo_next_lsn,
            } => {
                out.push(TAG_UNDO_ALLOC_PAGE);
                out.extend_from_slice(&trans_num.to_be_bytes());
                out.extend_from_slice(&page_num.to_be_bytes());
                out.extend_from_slice(&prev_lsn.to_be_bytes());
                out.extend_from_slice(&undo_next_lsn.to_be_bytes());
            }
            RecordData::UndoFreePage {
                trans_num,
                page_num,
                prev_lsn,
                undo_next_lsn,
            } => {
                out.push(TAG_UNDO_FREE_PAGE);
                out.extend_from_slice(&trans_num.to_be_bytes());
                out.extend_from_slice(&page_num.to_be_bytes());
                out.extend_from_slice(&prev_lsn.to_be_bytes());
                out.extend_from_slice(&undo_next_lsn.to_be_bytes());
            }
            RecordData::UpdatePage {
                trans_num,
                page_num,
                prev_lsn,
                offset,
                before,
                after,
            } => {
                out.push(TAG_UPDATE_PAGE);
                out.extend_from_slice(&trans_num.to_be_bytes());
                out.extend_from_slice(&page_num.to_be_bytes());
                out.extend_from_slice(&prev_lsn.to_be_bytes());
                out.extend_from_slice(&offset.to_be_bytes());
                out.extend_from_slice(&(before.len() as u16).to_be_bytes());
                out.extend_from_slice(before);
                out.extend_from_slice(after);
            }
            RecordData::UndoUpdatePage {
                trans_num,
                page_num,
                prev_lsn,
                undo_next_lsn,
                offset,
                before,
            } => {
                out.push(TAG_UNDO_UPDATE_PAGE);
                out.extend_from_slice(&trans_num.to_be_bytes());
                out.extend_from_slice(&page_num.to_be_bytes());
                out.extend_from_slice(&prev_lsn.to_be_bytes());
                out.extend_from_slice(&undo_next_lsn.to_be_bytes());
                out.extend_from_slice(&offset.to_be_bytes());
                out.extend_from_slice(&(before.len() as u16).to_be_bytes());
                out.extend_from_slice(before);
            }
        }
        out
    }

    /// Parses one record from the front of `bytes`, returning it (with LSN
    /// unset) and the number of bytes consumed.
    pub fn from_bytes(bytes: &[u8]) -> Result<(LogRecord, usize)> {
        let mut reader = ByteReader::new(bytes);
        let tag = reader.u8()?;
        let data = match tag {
            TAG_MASTER => RecordData::Master {
                last_checkpoint_lsn: reader.u64()?,
            },
            TAG_BEGIN_CHECKPOINT => RecordData::BeginCheckpoint,
            TAG_END_CHECKPOINT => {
                let dpt_entries = reader.u32()? as usize;
                let txn_entries = reader.u32()? as usize;
                let mut dirty_page_table = BTreeMap::new();
                for _ in 0..dpt_entries {
                    let page_num = reader.u64()?;
                    let rec_lsn = reader.u64()?;
                    dirty_page_table.insert(page_num, rec_lsn);
                }
                let mut transaction_table = BTreeMap::new();
                for _ in 0..txn_entries {
                    let trans_num = reader.u64()?;
                    let status = Status::from_rank(reader.u8()?).ok_or_else(|| {
                        DbError::CorruptLog("bad transaction status in checkpoint".to_string())
                    })?;
                    let last_lsn = reader.u64()?;
                    transaction_table.insert(trans_num, (status, last_lsn));
                }
                RecordData::EndCheckpoint {
                    dirty_page_table,
                    transaction_table,
                }
            }
            TAG_COMMIT_TRANSACTION => RecordData::CommitTransaction {
                trans_num: reader.u64()?,
                prev_lsn: reader.u64()?,
            },
            TAG_ABORT_TRANSACTION => RecordData::AbortTransaction {
                trans_num: reader.u64()?,
                prev_lsn: reader.u64()?,
            },
            TAG_END_TRANSACTION => RecordData::EndTransaction {
                trans_num: reader.u64()?,
                prev_lsn: reader.u64()?,
            },
            TAG_ALLOC_PART => RecordData::AllocPart {
                trans_num: reader.u64()?,
                part_num: reader.u32()?,
                prev_lsn: reader.u64()?,
            },
            TAG_FREE_PART => RecordData::FreePart {
                trans_num: reader.u64()?,
                part_num: reader.u32()?,
                prev_lsn: reader.u64()?,
            },
            TAG_UNDO_ALLOC_PART => RecordData::UndoAllocPart {
                trans_num: reader.u64()?,
                part_num: reader.u32()?,
                prev_lsn: reader.u64()?,
                undo_next_lsn: reader.u64()?,
            },
            TAG_UNDO_FREE_PART => RecordData::UndoFreePart {
                trans_num: reader.u64()?,
                part_num: reader.u32()?,
                prev_lsn: reader.u64()?,
                undo_next_lsn: reader.u64()?,
            },
            TAG_ALLOC_PAGE => RecordData::AllocPage {
                trans_num: reader.u64()?,
                page_num: reader.u64()?,
                prev_lsn: reader.u64()?,
            },
            TAG_FREE_PAGE => RecordData::FreePage {
                trans_num: reader.u64()?,
                page_num: reader.u64()?,
                prev_lsn: reader.u64()?,
            },
            TAG_UNDO_ALLOC_PAGE => RecordData::UndoAllocPage {
                trans_num: reader.u64()?,
                page_num: reader.u64()?,
                prev_lsn: reader.u64()?,
                undo_next_lsn: reader.u64()?,
            },
            TAG_UNDO_FREE_PAGE => RecordData::UndoFreePage {
                trans_num: reader.u64()?,
                page_num: reader.u64()?,
                prev_lsn: reader.u64()?,
                undo_next_lsn: reader.u64()?,
            },
            TAG_UPDATE_PAGE => {
                let trans_num = reader.u64()?;
                let page_num = reader.u64()?;
                let prev_lsn = reader.u64()?;
                let offset = reader.u16()?;
                let len = reader.u16()? as usize;
                let before = reader.bytes(len)?.to_vec();
                let after = reader.bytes(len)?.to_vec();
                RecordData::UpdatePage {
                    trans_num,
                    page_num,
                    prev_lsn,
                    offset,
                    before,
                    after,
                }
            }
            TAG_UNDO_UPDATE_PAGE => {
                let trans_num = reader.u64()?;
                let page_num = reader.u64()?;
                let prev_lsn = reader.u64()?;
                let undo_next_lsn = reader.u64()?;
                let offset = reader.u16()?;
                let len = reader.u16()? as usize;
                let before = reader.bytes(len)?.to_vec();
                RecordData::UndoUpdatePage {
                    trans_num,
                    page_num,
                    prev_lsn,
                    undo_next_lsn,
                    offset,
                    before,
                }
            }
            other => {
                return Err(DbError::CorruptLog(format!(
                    "unknown log record tag {}",
                    other
                )))
            }
        };
        Ok((LogRecord::new(data), reader.consumed()))
    }
}

impl std::fmt::Display for LogRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.data {
            RecordData::Master {
                last_checkpoint_lsn,
            } => write!(f, "<MASTER {}>", last_checkpoint_lsn),
            RecordData::BeginCheckpoint => write!(f, "<BEGIN_CHECKPOINT>"),
            RecordData::EndCheckpoint {
                dirty_page_table,
                transaction_table,
            } => write!(
                f,
                "<END_CHECKPOINT dpt={} txns={}>",
                dirty_page_table.len(),
                transaction_table.len()
            ),
            RecordData::CommitTransaction { trans_num, .. } => {
                write!(f, "<COMMIT {}>", trans_num)
            }
            RecordData::AbortTransaction { trans_num, .. } => write!(f, "<ABORT {}>", trans_num),
            RecordData::EndTransaction { trans_num, .. } => write!(f, "<END {}>", trans_num),
            RecordData::AllocPart {
                trans_num,
                part_num,
                ..
            } => write!(f, "<ALLOC_PART {} {}>", trans_num, part_num),
            RecordData::FreePart {
                trans_num,
                part_num,
                ..
            } => write!(f, "<FREE_PART {} {}>", trans_num, part_num),
            RecordData::UndoAllocPart {
                trans_num,
                part_num,
                ..
            } => write!(f, "<UNDO_ALLOC_PART {} {}>", trans_num, part_num),
            RecordData::UndoFreePart {
                trans_num,
                part_num,
                ..
            } => write!(f, "<UNDO_FREE_PART {} {}>", trans_num, part_num),
            RecordData::AllocPage {
                trans_num,
                page_num,
                ..
            } => write!(f, "<ALLOC_PAGE {} {}>", trans_num, page_num),
            RecordData::FreePage {
                trans_num,
                page_num,
                ..
            } => write!(f, "<FREE_PAGE {} {}>", trans_num, page_num),
            RecordData::UndoAllocPage {
                trans_num,
                page_num,
                ..
            } => write!(f, "<UNDO_ALLOC_PAGE {} {}>", trans_num, page_num),
            RecordData::UndoFreePage {
                trans_num,
                page_num,
                ..
            } => write!(f, "<UNDO_FREE_PAGE {} {}>", trans_num, page_num),
            RecordData::UpdatePage {
                trans_num,
                page_num,
                offset,
                ..
            } => write!(f, "<UPDATE_PAGE {} {} {}>", trans_num, page_num, offset),
            RecordData::UndoUpdatePage {
                trans_num,
                page_num,
                offset,
                ..
            } => write!(f, "<UNDO_UPDATE_PAGE {} {} {}>", trans_num, page_num, offset),
        }
    }
}

struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn consumed(&self) -> usize {
        self.pos
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.buf.len() {
            return Err(DbError::CorruptLog(
                "log record truncated".to_string(),
            ));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.bytes(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.bytes(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.bytes(8)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_images_round_trip() {
        let mut dirty_page_table = BTreeMap::new();
        dirty_page_table.insert(7, 30);
        let mut transaction_table = BTreeMap::new();
        transaction_table.insert(1, (Status::Committing, 40));
        let records = vec![
            LogRecord::new(RecordData::Master {
                last_checkpoint_lsn: 8192,
            }),
            LogRecord::new(RecordData::BeginCheckpoint),
            LogRecord::new(RecordData::EndCheckpoint {
                dirty_page_table,
                transaction_table,
            }),
            LogRecord::new(RecordData::CommitTransaction {
                trans_num: 1,
                prev_lsn: 10,
            }),
            LogRecord::new(RecordData::AbortTransaction {
                trans_num: 2,
                prev_lsn: 0,
            }),
            LogRecord::new(RecordData::AllocPart {
                trans_num: 1,
                part_num: 3,
                prev_lsn: 5,
            }),
            LogRecord::new(RecordData::UndoFreePart {
                trans_num: 1,
                part_num: 3,
                prev_lsn: 5,
                undo_next_lsn: 2,
            }),
            LogRecord::new(RecordData::AllocPage {
                trans_num: 1,
                page_num: 10_000_000_001,
                prev_lsn: 5,
            }),
            LogRecord::new(RecordData::UpdatePage {
                trans_num: 4,
                page_num: 9,
                prev_lsn: 77,
                offset: 12,
                before: vec![1, 2, 3],
                after: vec![4, 5, 6],
            }),
            LogRecord::new(RecordData::UndoUpdatePage {
                trans_num: 4,
                page_num: 9,
                prev_lsn: 90,
                undo_next_lsn: 77,
                offset: 12,
                before: vec![1, 2, 3],
            }),
        ];
        for record in records {
            let bytes = record.to_bytes();
            let (parsed, consumed) = LogRecord::from_bytes(&bytes).unwrap();
            assert_eq!(consumed, bytes.len());
            assert_eq!(parsed, record);
        }
    }

    #[test]
    fn undo_builds_compensation_record() {
        let mut update = LogRecord::new(RecordData::UpdatePage {
            trans_num: 1,
            page_num: 5,
            prev_lsn: 20,
            offset: 8,
            before: vec![9, 9],
            after: vec![1, 1],
        });
        update.set_lsn(30);

        let clr = update.undo(45);
        match clr.data() {
            RecordData::UndoUpdatePage {
                trans_num,
                page_num,
                prev_lsn,
                undo_next_lsn,
                offset,
                before,
            } => {
                assert_eq!(*trans_num, 1);
                assert_eq!(*page_num, 5);
                assert_eq!(*prev_lsn, 45);
                assert_eq!(*undo_next_lsn, 20);
                assert_eq!(*offset, 8);
                assert_eq!(before, &vec![9, 9]);
            }
            other => panic!("unexpected CLR {:?}", other),
        }
        assert!(clr.is_redoable());
        assert!(!clr.is_undoable());
    }

    #[test]
    fn undo_of_first_record_points_at_sentinel() {
        let alloc = LogRecord::new(RecordData::AllocPage {
            trans_num: 1,
            page_num: 5,
            prev_lsn: 0,
        });
        let clr = alloc.undo(60);
        assert_eq!(clr.undo_next_lsn(), Some(0));
        assert_eq!(clr.kind(), LogKind::UndoAllocPage);
    }

    #[test]
    fn undoable_redoable_classification() {
        let master = LogRecord::new(RecordData::Master {
            last_checkpoint_lsn: 0,
        });
        assert!(!master.is_undoable());
        assert!(!master.is_redoable());

        let begin = LogRecord::new(RecordData::BeginCheckpoint);
        assert!(!begin.is_undoable());
        assert!(!begin.is_redoable());

        let commit = LogRecord::new(RecordData::CommitTransaction {
            trans_num: 1,
            prev_lsn: 0,
        });
        assert!(!commit.is_undoable());
        assert!(!commit.is_redoable());

        let free = LogRecord::new(RecordData::FreePage {
            trans_num: 1,
            page_num: 2,
            prev_lsn: 0,
        });
        assert!(free.is_undoable());
        assert!(free.is_redoable());
    }

    #[test]
    fn end_checkpoint_size_predicate() {
        assert!(LogRecord::fits_in_one_record(0, 0));
        // One entry over the capacity of a page must not fit.
        let max_dpt = (LOG_PAGE_SIZE - END_CHECKPOINT_HEADER_BYTES) / DPT_ENTRY_BYTES;
        assert!(LogRecord::fits_in_one_record(max_dpt, 0));
        assert!(!LogRecord::fits_in_one_record(max_dpt + 1, 0));

        let max_txn = (LOG_PAGE_SIZE - END_CHECKPOINT_HEADER_BYTES) / TXN_ENTRY_BYTES;
        assert!(LogRecord::fits_in_one_record(0, max_txn));
        assert!(!LogRecord::fits_in_one_record(0, max_txn + 1));
    }

    #[test]
    fn to_string() {
        let mut record = LogRecord::new(RecordData::UpdatePage {
            trans_num: 1,
            page_num: 5,
            prev_lsn: 0,
            offset: 16,
            before: vec![0],
            after: vec![1],
        });
        record.set_lsn(8192);
        assert_eq!(record.to_string(), "<UPDATE_PAGE 1 5 16>");
    }
}
