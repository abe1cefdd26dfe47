use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::util::CondMutex;

/// Lifecycle of a transaction. The only legal transitions move forward along
/// RUNNING < COMMITTING < ABORTING < RECOVERY_ABORTING < COMPLETE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running,
    Committing,
    Aborting,
    RecoveryAborting,
    Complete,
}

impl Status {
    /// Position in the status progression. Comparisons go through this rather
    /// than any declaration-order artifact.
    pub fn rank(self) -> u8 {
        match self {
            Status::Running => 0,
            Status::Committing => 1,
            Status::Aborting => 2,
            Status::RecoveryAborting => 3,
            Status::Complete => 4,
        }
    }

    pub fn from_rank(rank: u8) -> Option<Status> {
        match rank {
            0 => Some(Status::Running),
            1 => Some(Status::Committing),
            2 => Some(Status::Aborting),
            3 => Some(Status::RecoveryAborting),
            4 => Some(Status::Complete),
            _ => None,
        }
    }
}

/// Handle for one transaction: its number, status, the one-shot latch the
/// lock manager parks it on, and a marker for out-of-log resource cleanup.
///
/// The latch is armed with `prepare_block` while the lock manager's monitor
/// is still held, and parked on with `block` after the monitor is released,
/// so an `unblock` that races ahead of `block` is never lost.
pub struct Transaction {
    trans_num: u64,
    status: Mutex<Status>,
    parked: CondMutex<bool>,
    cleaned_up: AtomicBool,
}

impl Transaction {
    pub fn new(trans_num: u64) -> Arc<Transaction> {
        Arc::new(Transaction {
            trans_num,
            status: Mutex::new(Status::Running),
            parked: CondMutex::new(false),
            cleaned_up: AtomicBool::new(false),
        })
    }

    pub fn trans_num(&self) -> u64 {
        self.trans_num
    }

    pub fn status(&self) -> Status {
        *self.status.lock().unwrap()
    }

    pub fn set_status(&self, status: Status) {
        *self.status.lock().unwrap() = status;
    }

    pub fn prepare_block(&self) {
        *self.parked.lock() = true;
    }

    pub fn block(&self) {
        let mut armed = self.parked.lock();
        while *armed {
            armed = self.parked.wait(armed);
        }
    }

    pub fn unblock(&self) {
        *self.parked.lock() = false;
        self.parked.notify_all();
    }

    pub fn is_blocked(&self) -> bool {
        *self.parked.lock()
    }

    /// Releases the transaction's resources outside the log. Recorded here so
    /// restart recovery can be observed to have cleaned up.
    pub fn cleanup(&self) {
        self.cleaned_up.store(true, Ordering::SeqCst);
    }

    pub fn cleaned_up(&self) -> bool {
        self.cleaned_up.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("trans_num", &self.trans_num)
            .field("status", &self.status())
            .finish()
    }
}
