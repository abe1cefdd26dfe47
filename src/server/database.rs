use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::buffer::buffer_manager::{BufferManager, RecoveryHooks};
use crate::disk::disk_space_manager::DiskSpaceManager;
use crate::errors::Result;
use crate::log::log_manager::LogManager;
use crate::tx::concurrency::lock_manager::LockManager;
use crate::tx::recovery::recovery_manager::RecoveryManager;
use crate::tx::transaction::Transaction;

pub const LOG_FILE: &str = "acorndb.log";

/// Top-level assembly of the transactional core: wires the disk space
/// manager, buffer manager, lock manager, and recovery manager together and
/// hands out transactions. A fresh directory gets an initialized log; an
/// existing one goes through restart recovery before any new work starts.
pub struct Database {
    disk_space_manager: Arc<DiskSpaceManager>,
    buffer_manager: Arc<BufferManager>,
    lock_manager: Arc<LockManager>,
    recovery_manager: Arc<RecoveryManager>,
    next_trans_num: AtomicU64,
}

impl Database {
    pub fn new(dir: &Path) -> Result<Database> {
        std::fs::create_dir_all(dir)?;
        let log_path = dir.join(LOG_FILE);
        let fresh = !log_path.exists();

        let log_manager = LogManager::new(&log_path)?;
        let disk_space_manager = Arc::new(DiskSpaceManager::new());
        let buffer_manager = Arc::new(BufferManager::new(Arc::clone(&disk_space_manager)));
        let lock_manager = Arc::new(LockManager::new());
        let recovery_manager = Arc::new(RecoveryManager::new(
            log_manager,
            Box::new(Transaction::new),
        ));
        recovery_manager.set_managers(
            Arc::clone(&disk_space_manager),
            Arc::clone(&buffer_manager),
        );
        let hooks: Arc<dyn RecoveryHooks> = recovery_manager.clone();
        buffer_manager.set_recovery_manager(Arc::downgrade(&hooks));

        if fresh {
            info!("creating new database");
            recovery_manager.initialize()?;
        } else {
            info!("recovering existing database");
            recovery_manager.restart()?;
        }

        Ok(Database {
            disk_space_manager,
            buffer_manager,
            lock_manager,
            recovery_manager,
            next_trans_num: AtomicU64::new(1),
        })
    }

    /// Starts a new transaction, registering it with the recovery manager.
    pub fn new_transaction(&self) -> Arc<Transaction> {
        let trans_num = self.next_trans_num.fetch_add(1, Ordering::SeqCst);
        let transaction = Transaction::new(trans_num);
        self.recovery_manager
            .start_transaction(Arc::clone(&transaction));
        transaction
    }

    pub fn commit(&self, transaction: &Arc<Transaction>) -> Result<()> {
        self.recovery_manager.commit(transaction.trans_num())?;
        self.recovery_manager.end(transaction.trans_num())?;
        Ok(())
    }

    pub fn abort(&self, transaction: &Arc<Transaction>) -> Result<()> {
        self.recovery_manager.abort(transaction.trans_num())?;
        self.recovery_manager.end(transaction.trans_num())?;
        Ok(())
    }

    /// Flushes buffered pages and checkpoints so the next startup restarts
    /// from a small log suffix.
    pub fn close(&self) -> Result<()> {
        self.buffer_manager.flush_all()?;
        self.recovery_manager.close()
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn recovery_manager(&self) -> &Arc<RecoveryManager> {
        &self.recovery_manager
    }

    pub fn buffer_manager(&self) -> &Arc<BufferManager> {
        &self.buffer_manager
    }

    pub fn disk_space_manager(&self) -> &Arc<DiskSpaceManager> {
        &self.disk_space_manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::concurrency::lock_type::LockType;
    use crate::tx::transaction::Status;
    use tempfile::TempDir;

    #[test]
    fn fresh_database_initializes_and_runs_transactions() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path()).unwrap();

        let t1 = db.new_transaction();
        let t2 = db.new_transaction();
        assert_ne!(t1.trans_num(), t2.trans_num());

        db.commit(&t1).unwrap();
        assert_eq!(t1.status(), Status::Complete);
        db.abort(&t2).unwrap();
        assert_eq!(t2.status(), Status::Complete);
        assert!(db.recovery_manager().transaction_table_snapshot().is_empty());
    }

    #[test]
    fn transactions_share_the_lock_hierarchy() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path()).unwrap();

        let t1 = db.new_transaction();
        let context = db.lock_manager().database_context();
        context.acquire(&t1, LockType::IX).unwrap();
        let table = context.child_context("students");
        table.acquire(&t1, LockType::X).unwrap();
        assert_eq!(table.get_explicit_lock_type(&t1), LockType::X);
    }

    #[test]
    fn logged_work_survives_a_clean_close() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path()).unwrap();

        let t1 = db.new_transaction();
        let dsm = db.disk_space_manager();
        dsm.alloc_part(1);
        let page_num = DiskSpaceManager::page_num(1, 0);
        dsm.alloc_page(page_num).unwrap();

        let page = db.buffer_manager().fetch_page(page_num).unwrap();
        let lsn = db
            .recovery_manager()
            .log_page_write(t1.trans_num(), page_num, 0, &[0], &[8])
            .unwrap();
        page.write_bytes(0, &[8]);
        page.set_page_lsn(lsn);
        page.unpin();
        db.commit(&t1).unwrap();
        db.close().unwrap();

        // The close flushed the page and checkpointed; the DPT is empty.
        assert!(db.recovery_manager().dirty_page_table_snapshot().is_empty());
    }
}
