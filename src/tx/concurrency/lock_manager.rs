use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::errors::{DbError, Result};
use crate::tx::transaction::Transaction;

use super::lock_context::LockContext;
use super::lock_type::LockType;
use super::resource_name::ResourceName;

/// A granted lock: one mode held by one transaction on one resource. A
/// transaction holds at most one lock per resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    pub name: ResourceName,
    pub lock_type: LockType,
    pub trans_num: u64,
}

/// A request parked on a resource's wait queue. `released_locks` are applied
/// atomically with the grant when the request comes off the queue.
struct LockRequest {
    transaction: Arc<Transaction>,
    lock: Lock,
    released_locks: Vec<Lock>,
}

#[derive(Default)]
struct ResourceEntry {
    /// Granted locks, in acquisition order.
    locks: Vec<Lock>,
    /// Requests that could not be satisfied when they were made.
    waiting_queue: VecDeque<LockRequest>,
}

#[derive(Default)]
struct LockManagerInner {
    resource_entries: HashMap<ResourceName, ResourceEntry>,
    /// Locks held by each transaction, in acquisition order. Kept coherent
    /// with `resource_entries`; an in-place mode change keeps its position.
    transaction_locks: HashMap<u64, Vec<Lock>>,
}

impl LockManagerInner {
    fn lock_type(&self, trans_num: u64, name: &ResourceName) -> LockType {
        self.resource_entries
            .get(name)
            .and_then(|entry| entry.locks.iter().find(|lock| lock.trans_num == trans_num))
            .map_or(LockType::NL, |lock| lock.lock_type)
    }

    fn find_lock(&self, trans_num: u64, name: &ResourceName) -> Option<Lock> {
        self.resource_entries
            .get(name)
            .and_then(|entry| entry.locks.iter().find(|lock| lock.trans_num == trans_num))
            .cloned()
    }

    /// Whether `lock_type` is compatible with every granted lock on `name`,
    /// ignoring locks held by `except` (the requester's own lock may be
    /// replaced rather than conflicted with).
    fn check_compatible(&self, name: &ResourceName, lock_type: LockType, except: u64) -> bool {
        match self.resource_entries.get(name) {
            Some(entry) => entry
                .locks
                .iter()
                .filter(|lock| lock.trans_num != except)
                .all(|lock| LockType::compatible(lock.lock_type, lock_type)),
            None => true,
        }
    }

    fn queue_is_empty(&self, name: &ResourceName) -> bool {
        self.resource_entries
            .get(name)
            .map_or(true, |entry| entry.waiting_queue.is_empty())
    }

    /// Grants `lock`, replacing in place (in both indexes, keeping the
    /// original acquisition position) if the transaction already holds a lock
    /// on the resource.
    fn grant_or_update(&mut self, lock: Lock) {
        let entry = self.resource_entries.entry(lock.name.clone()).or_default();
        if let Some(held) = entry
            .locks
            .iter_mut()
            .find(|held| held.trans_num == lock.trans_num)
        {
            held.lock_type = lock.lock_type;
            if let Some(acquired) = self.transaction_locks.get_mut(&lock.trans_num) {
                if let Some(mirror) = acquired.iter_mut().find(|held| held.name == lock.name) {
                    mirror.lock_type = lock.lock_type;
                }
            }
        } else {
            entry.locks.push(lock.clone());
            self.transaction_locks
                .entry(lock.trans_num)
                .or_default()
                .push(lock);
        }
    }

    /// Removes the transaction's lock on `name` from both indexes and drains
    /// the resource's queue.
    fn release_lock(&mut self, trans_num: u64, name: &ResourceName) {
        if let Some(entry) = self.resource_entries.get_mut(name) {
            entry.locks.retain(|lock| lock.trans_num != trans_num);
        }
        if let Some(acquired) = self.transaction_locks.get_mut(&trans_num) {
            acquired.retain(|lock| &lock.name != name);
        }
        self.process_queue(name);
    }

    /// Grants queued requests front to back, stopping at the first one that
    /// is not compatible with the granted set. Never skips a blocked request
    /// to serve a later one.
    fn process_queue(&mut self, name: &ResourceName) {
        loop {
            let front = match self
                .resource_entries
                .get(name)
                .and_then(|entry| entry.waiting_queue.front())
            {
                Some(request) => (request.lock.lock_type, request.lock.trans_num),
                None => return,
            };
            if !self.check_compatible(name, front.0, front.1) {
                return;
            }
            let request = match self
                .resource_entries
                .get_mut(name)
                .and_then(|entry| entry.waiting_queue.pop_front())
            {
                Some(request) => request,
                None => return,
            };
            self.grant_request(request);
        }
    }

    /// Installs the requested lock, applies the carried release set (each
    /// release drains its own resource's queue), and wakes the waiter.
    fn grant_request(&mut self, request: LockRequest) {
        let granted_name = request.lock.name.clone();
        let trans_num = request.lock.trans_num;
        self.grant_or_update(request.lock);
        for released in &request.released_locks {
            if released.name != granted_name {
                self.release_lock(trans_num, &released.name);
            }
        }
        request.transaction.unblock();
    }
}

/// Flat lock manager: bookkeeping of which transactions hold which locks on
/// which resources, plus the wait-queue logic. Multigranularity rules live in
/// `LockContext`; callers go through a context rather than this type.
///
/// All public operations serialize on one monitor. A request that cannot be
/// granted arms the transaction's latch while the monitor is held and parks
/// on it after the monitor is released; the queue drain on a release wakes it.
pub struct LockManager {
    inner: Mutex<LockManagerInner>,
    contexts: Mutex<HashMap<String, Arc<LockContext>>>,
}

impl LockManager {
    pub fn new() -> LockManager {
        LockManager {
            inner: Mutex::new(LockManagerInner::default()),
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire `lock_type` on `name`. Blocks (queued at the back) if the mode
    /// conflicts with another transaction's lock or the queue is non-empty.
    pub fn acquire(
        &self,
        transaction: &Arc<Transaction>,
        name: &ResourceName,
        lock_type: LockType,
    ) -> Result<()> {
        let trans_num = transaction.trans_num();
        let mut should_block = false;
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.lock_type(trans_num, name) != LockType::NL {
                return Err(DbError::DuplicateLockRequest(format!(
                    "transaction {} already holds a lock on {}",
                    trans_num, name
                )));
            }
            let lock = Lock {
                name: name.clone(),
                lock_type,
                trans_num,
            };
            if inner.check_compatible(name, lock_type, trans_num) && inner.queue_is_empty(name) {
                inner.grant_or_update(lock);
            } else {
                let entry = inner.resource_entries.entry(name.clone()).or_default();
                entry.waiting_queue.push_back(LockRequest {
                    transaction: Arc::clone(transaction),
                    lock,
                    released_locks: Vec::new(),
                });
                transaction.prepare_block();
                should_block = true;
            }
        }
        if should_block {
            transaction.block();
        }
        Ok(())
    }

    /// Acquire `lock_type` on `name` and release every lock in
    /// `release_names` as one atomic action. A lock on `name` itself in the
    /// release set is replaced in place, keeping its acquisition position.
    /// Blocks (queued at the front) on conflict with other transactions.
    pub fn acquire_and_release(
        &self,
        transaction: &Arc<Transaction>,
        name: &ResourceName,
        lock_type: LockType,
        release_names: &[ResourceName],
    ) -> Result<()> {
        let trans_num = transaction.trans_num();
        let mut should_block = false;
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.lock_type(trans_num, name) == lock_type {
                return Err(DbError::DuplicateLockRequest(format!(
                    "transaction {} already holds {} on {}",
                    trans_num, lock_type, name
                )));
            }
            let mut released_locks = Vec::with_capacity(release_names.len());
            for release_name in release_names {
                match inner.find_lock(trans_num, release_name) {
                    Some(lock) => released_locks.push(lock),
                    None => {
                        return Err(DbError::NoLockHeld(format!(
                            "transaction {} holds no lock on {}",
                            trans_num, release_name
                        )))
                    }
                }
            }
            let lock = Lock {
                name: name.clone(),
                lock_type,
                trans_num,
            };
            if inner.check_compatible(name, lock_type, trans_num) {
                inner.grant_or_update(lock);
                for released in &released_locks {
                    if &released.name != name {
                        inner.release_lock(trans_num, &released.name);
                    }
                }
                // The in-place swap may have weakened the mode on `name`.
                inner.process_queue(name);
            } else {
                let entry = inner.resource_entries.entry(name.clone()).or_default();
                entry.waiting_queue.push_front(LockRequest {
                    transaction: Arc::clone(transaction),
                    lock,
                    released_locks,
                });
                transaction.prepare_block();
                should_block = true;
            }
        }
        if should_block {
            transaction.block();
        }
        Ok(())
    }

    /// Release the transaction's lock on `name` and drain the queue.
    pub fn release(&self, transaction: &Arc<Transaction>, name: &ResourceName) -> Result<()> {
        let trans_num = transaction.trans_num();
        let mut inner = self.inner.lock().unwrap();
        if inner.lock_type(trans_num, name) == LockType::NL {
            return Err(DbError::NoLockHeld(format!(
                "transaction {} holds no lock on {}",
                trans_num, name
            )));
        }
        inner.release_lock(trans_num, name);
        Ok(())
    }

    /// Replace the transaction's lock on `name` with `new_lock_type`, which
    /// must be a strict promotion of the held mode. The replacement keeps the
    /// lock's acquisition position. Blocks (queued at the front) on conflict.
    pub fn promote(
        &self,
        transaction: &Arc<Transaction>,
        name: &ResourceName,
        new_lock_type: LockType,
    ) -> Result<()> {
        let trans_num = transaction.trans_num();
        let mut should_block = false;
        {
            let mut inner = self.inner.lock().unwrap();
            let held = inner.lock_type(trans_num, name);
            if held == new_lock_type {
                return Err(DbError::DuplicateLockRequest(format!(
                    "transaction {} already holds {} on {}",
                    trans_num, new_lock_type, name
                )));
            }
            if held == LockType::NL {
                return Err(DbError::NoLockHeld(format!(
                    "transaction {} holds no lock on {}",
                    trans_num, name
                )));
            }
            if !LockType::substitutable(new_lock_type, held) {
                return Err(DbError::InvalidLock(format!(
                    "{} cannot substitute for {} on {}",
                    new_lock_type, held, name
                )));
            }
            let lock = Lock {
                name: name.clone(),
                lock_type: new_lock_type,
                trans_num,
            };
            if inner.check_compatible(name, new_lock_type, trans_num) {
                inner.grant_or_update(lock);
                inner.process_queue(name);
            } else {
                let entry = inner.resource_entries.entry(name.clone()).or_default();
                entry.waiting_queue.push_front(LockRequest {
                    transaction: Arc::clone(transaction),
                    lock,
                    released_locks: Vec::new(),
                });
                transaction.prepare_block();
                should_block = true;
            }
        }
        if should_block {
            transaction.block();
        }
        Ok(())
    }

    /// The mode `trans_num` holds on `name`, or NL.
    pub fn get_lock_type(&self, trans_num: u64, name: &ResourceName) -> LockType {
        self.inner.lock().unwrap().lock_type(trans_num, name)
    }

    /// Locks granted on `name`, in acquisition order.
    pub fn get_locks_on_resource(&self, name: &ResourceName) -> Vec<Lock> {
        self.inner
            .lock()
            .unwrap()
            .resource_entries
            .get(name)
            .map_or_else(Vec::new, |entry| entry.locks.clone())
    }

    /// Locks held by `trans_num`, in acquisition order.
    pub fn get_locks_of_transaction(&self, trans_num: u64) -> Vec<Lock> {
        self.inner
            .lock()
            .unwrap()
            .transaction_locks
            .get(&trans_num)
            .cloned()
            .unwrap_or_default()
    }

    /// Root lock context for `name`, fabricated on first use.
    pub fn context(self: &Arc<Self>, name: &str) -> Arc<LockContext> {
        let mut contexts = self.contexts.lock().unwrap();
        Arc::clone(
            contexts
                .entry(name.to_string())
                .or_insert_with(|| LockContext::new_root(Arc::clone(self), name)),
        )
    }

    /// The root context of the lock hierarchy.
    pub fn database_context(self: &Arc<Self>) -> Arc<LockContext> {
        self.context("database")
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}
