use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::errors::{DbError, Result};
use crate::tx::transaction::Transaction;

use super::lock_manager::LockManager;
use super::lock_type::LockType;
use super::resource_name::ResourceName;

/// One node of the lock hierarchy. Wraps the flat `LockManager` with the
/// multigranularity rules: a lock here must be permitted by the parent's
/// effective mode, and a node cannot be released while the transaction still
/// holds locks on its descendants.
///
/// Child contexts are fabricated lazily and cached. A readonly context
/// rejects every mutating call; `disable_child_locks` makes all future
/// children readonly (used for indices and temporary tables).
pub struct LockContext {
    lockman: Arc<LockManager>,
    parent: Option<Arc<LockContext>>,
    name: ResourceName,
    readonly: bool,
    child_locks_disabled: AtomicBool,
    /// Per transaction, the number of locks held on strict descendants.
    num_child_locks: Mutex<HashMap<u64, usize>>,
    children: Mutex<HashMap<String, Arc<LockContext>>>,
}

impl LockContext {
    pub(crate) fn new_root(lockman: Arc<LockManager>, name: &str) -> Arc<LockContext> {
        Arc::new(LockContext {
            lockman,
            parent: None,
            name: ResourceName::new(name),
            readonly: false,
            child_locks_disabled: AtomicBool::new(false),
            num_child_locks: Mutex::new(HashMap::new()),
            children: Mutex::new(HashMap::new()),
        })
    }

    /// Walks `name` down from its root context, fabricating nodes as needed.
    pub fn from_resource_name(
        lockman: &Arc<LockManager>,
        name: &ResourceName,
    ) -> Arc<LockContext> {
        let segments = name.names();
        let mut context = lockman.context(&segments[0]);
        for segment in &segments[1..] {
            context = context.child_context(segment);
        }
        context
    }

    pub fn name(&self) -> &ResourceName {
        &self.name
    }

    pub fn parent_context(&self) -> Option<Arc<LockContext>> {
        self.parent.clone()
    }

    pub fn child_context(self: &Arc<Self>, name: &str) -> Arc<LockContext> {
        let mut children = self.children.lock().unwrap();
        Arc::clone(children.entry(name.to_string()).or_insert_with(|| {
            let readonly = self.readonly || self.child_locks_disabled.load(Ordering::SeqCst);
            Arc::new(LockContext {
                lockman: Arc::clone(&self.lockman),
                parent: Some(Arc::clone(self)),
                name: self.name.child(name),
                readonly,
                child_locks_disabled: AtomicBool::new(readonly),
                num_child_locks: Mutex::new(HashMap::new()),
                children: Mutex::new(HashMap::new()),
            })
        }))
    }

    /// All future children of this context are fabricated readonly.
    pub fn disable_child_locks(&self) {
        self.child_locks_disabled.store(true, Ordering::SeqCst);
    }

    /// Number of locks `transaction` holds on strict descendants of this node.
    pub fn get_num_children(&self, transaction: &Arc<Transaction>) -> usize {
        self.num_child_locks
            .lock()
            .unwrap()
            .get(&transaction.trans_num())
            .copied()
            .unwrap_or(0)
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(DbError::Unsupported(format!(
                "lock context {} is readonly",
                self.name
            )));
        }
        Ok(())
    }

    /// Adjusts this node's descendant-lock count for `trans_num` and
    /// propagates the same adjustment up the ancestor chain.
    fn adjust_child_locks(&self, trans_num: u64, delta: i64) {
        {
            let mut counts = self.num_child_locks.lock().unwrap();
            let count = counts.entry(trans_num).or_insert(0);
            if delta >= 0 {
                *count += delta as usize;
            } else {
                *count = count.saturating_sub(delta.unsigned_abs() as usize);
            }
        }
        if let Some(parent) = &self.parent {
            parent.adjust_child_locks(trans_num, delta);
        }
    }

    /// Acquire `lock_type` here. The parent's effective mode must permit it.
    pub fn acquire(
        self: &Arc<Self>,
        transaction: &Arc<Transaction>,
        lock_type: LockType,
    ) -> Result<()> {
        self.check_writable()?;
        if let Some(parent) = &self.parent {
            let parent_type = parent.get_effective_lock_type(transaction);
            if !LockType::can_be_parent_lock(parent_type, lock_type) {
                return Err(DbError::InvalidLock(format!(
                    "{} on {} not permitted under parent holding {}",
                    lock_type, self.name, parent_type
                )));
            }
        }
        self.lockman.acquire(transaction, &self.name, lock_type)?;
        if let Some(parent) = &self.parent {
            parent.adjust_child_locks(transaction.trans_num(), 1);
        }
        Ok(())
    }

    /// Release the lock held here. Invalid while descendant locks remain.
    pub fn release(&self, transaction: &Arc<Transaction>) -> Result<()> {
        self.check_writable()?;
        if self.get_num_children(transaction) > 0 {
            return Err(DbError::InvalidLock(format!(
                "releasing {} would leave descendant locks dangling",
                self.name
            )));
        }
        self.lockman.release(transaction, &self.name)?;
        if let Some(parent) = &self.parent {
            parent.adjust_child_locks(transaction.trans_num(), -1);
        }
        Ok(())
    }

    /// Promote the lock held here to `new_lock_type`.
    ///
    /// S→IX is rewritten to S→SIX (IX alone would drop the S coverage), and
    /// any promotion to SIX atomically releases every S/IS lock the
    /// transaction holds on descendants, which SIX makes redundant.
    pub fn promote(
        self: &Arc<Self>,
        transaction: &Arc<Transaction>,
        new_lock_type: LockType,
    ) -> Result<()> {
        self.check_writable()?;
        if matches!(new_lock_type, LockType::S | LockType::IS | LockType::SIX)
            && self.has_six_ancestor(transaction)
        {
            return Err(DbError::InvalidLock(format!(
                "{} on {} is redundant under a SIX ancestor",
                new_lock_type, self.name
            )));
        }
        let held = self.get_explicit_lock_type(transaction);
        if held == LockType::NL {
            return Err(DbError::NoLockHeld(format!(
                "transaction {} holds no lock on {}",
                transaction.trans_num(),
                self.name
            )));
        }
        if held == new_lock_type {
            return Err(DbError::DuplicateLockRequest(format!(
                "transaction {} already holds {} on {}",
                transaction.trans_num(),
                new_lock_type,
                self.name
            )));
        }
        let new_lock_type = if held == LockType::S && new_lock_type == LockType::IX {
            LockType::SIX
        } else {
            new_lock_type
        };
        if !LockType::substitutable(new_lock_type, held) {
            return Err(DbError::InvalidLock(format!(
                "{} cannot substitute for {} on {}",
                new_lock_type, held, self.name
            )));
        }
        if let Some(parent) = &self.parent {
            let parent_type = parent.get_effective_lock_type(transaction);
            if !LockType::can_be_parent_lock(parent_type, new_lock_type) {
                return Err(DbError::InvalidLock(format!(
                    "{} on {} not permitted under parent holding {}",
                    new_lock_type, self.name, parent_type
                )));
            }
        }

        if new_lock_type == LockType::SIX {
            let descendants = self.sis_descendants(transaction);
            let mut release_names = descendants.clone();
            release_names.push(self.name.clone());
            self.lockman
                .acquire_and_release(transaction, &self.name, LockType::SIX, &release_names)?;
            for name in &descendants {
                let context = Self::from_resource_name(&self.lockman, name);
                if let Some(parent) = &context.parent {
                    parent.adjust_child_locks(transaction.trans_num(), -1);
                }
            }
            Ok(())
        } else {
            self.lockman.promote(transaction, &self.name, new_lock_type)
        }
    }

    /// Consolidate all of the transaction's descendant locks into one S or X
    /// lock on this node, in a single atomic call to the lock manager. X is
    /// chosen iff this node or any descendant lock is IX, SIX, or X.
    pub fn escalate(self: &Arc<Self>, transaction: &Arc<Transaction>) -> Result<()> {
        self.check_writable()?;
        let held = self.get_explicit_lock_type(transaction);
        if held == LockType::NL {
            return Err(DbError::NoLockHeld(format!(
                "transaction {} holds no lock on {}",
                transaction.trans_num(),
                self.name
            )));
        }

        let mut exclusive = !matches!(held, LockType::S | LockType::IS);
        let mut descendants = Vec::new();
        for lock in self
            .lockman
            .get_locks_of_transaction(transaction.trans_num())
        {
            if lock.name.is_descendant_of(&self.name) {
                if !matches!(lock.lock_type, LockType::S | LockType::IS) {
                    exclusive = true;
                }
                descendants.push(lock.name);
            }
        }
        let new_lock_type = if exclusive { LockType::X } else { LockType::S };
        if new_lock_type == held {
            return Ok(());
        }

        let mut release_names = descendants.clone();
        release_names.push(self.name.clone());
        self.lockman
            .acquire_and_release(transaction, &self.name, new_lock_type, &release_names)?;
        for name in &descendants {
            let context = Self::from_resource_name(&self.lockman, name);
            if let Some(parent) = &context.parent {
                parent.adjust_child_locks(transaction.trans_num(), -1);
            }
        }
        Ok(())
    }

    /// The mode held explicitly at this node, or NL.
    pub fn get_explicit_lock_type(&self, transaction: &Arc<Transaction>) -> LockType {
        self.lockman
            .get_lock_type(transaction.trans_num(), &self.name)
    }

    /// The mode in force at this node, explicitly or inherited: an ancestor's
    /// S or X applies here, SIX contributes its S half, and intent-only
    /// ancestors contribute nothing.
    pub fn get_effective_lock_type(&self, transaction: &Arc<Transaction>) -> LockType {
        let explicit = self.get_explicit_lock_type(transaction);
        if explicit != LockType::NL {
            return explicit;
        }
        if let Some(parent) = &self.parent {
            let inherited = parent.get_effective_lock_type(transaction);
            if inherited == LockType::SIX {
                return LockType::S;
            }
            if !inherited.is_intent() {
                return inherited;
            }
        }
        LockType::NL
    }

    fn has_six_ancestor(&self, transaction: &Arc<Transaction>) -> bool {
        self.lockman
            .get_locks_of_transaction(transaction.trans_num())
            .iter()
            .any(|lock| {
                lock.lock_type == LockType::SIX && self.name.is_descendant_of(&lock.name)
            })
    }

    /// Names of the transaction's S and IS locks on strict descendants.
    fn sis_descendants(&self, transaction: &Arc<Transaction>) -> Vec<ResourceName> {
        self.lockman
            .get_locks_of_transaction(transaction.trans_num())
            .into_iter()
            .filter(|lock| {
                lock.name.is_descendant_of(&self.name)
                    && matches!(lock.lock_type, LockType::S | LockType::IS)
            })
            .map(|lock| lock.name)
            .collect()
    }
}

impl std::fmt::Debug for LockContext {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "LockContext({})", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy() -> (Arc<LockManager>, Arc<LockContext>, Arc<LockContext>) {
        let lockman = Arc::new(LockManager::new());
        let db = lockman.database_context();
        let table = db.child_context("students");
        (lockman, db, table)
    }

    #[test]
    fn acquire_requires_legal_parent() {
        let (_lockman, db, table) = hierarchy();
        let t1 = Transaction::new(1);

        let err = table.acquire(&t1, LockType::X).unwrap_err();
        assert!(matches!(err, DbError::InvalidLock(_)));

        db.acquire(&t1, LockType::IX).unwrap();
        table.acquire(&t1, LockType::X).unwrap();
        assert_eq!(table.get_explicit_lock_type(&t1), LockType::X);
        assert_eq!(db.get_num_children(&t1), 1);
    }

    #[test]
    fn release_with_descendants_is_invalid() {
        let (_lockman, db, table) = hierarchy();
        let t1 = Transaction::new(1);

        db.acquire(&t1, LockType::IS).unwrap();
        table.acquire(&t1, LockType::S).unwrap();

        let err = db.release(&t1).unwrap_err();
        assert!(matches!(err, DbError::InvalidLock(_)));

        table.release(&t1).unwrap();
        assert_eq!(db.get_num_children(&t1), 0);
        db.release(&t1).unwrap();
        assert_eq!(db.get_explicit_lock_type(&t1), LockType::NL);
    }

    #[test]
    fn counters_track_descendant_locks() {
        let (_lockman, db, table) = hierarchy();
        let t1 = Transaction::new(1);
        let page1 = table.child_context("1");
        let page2 = table.child_context("2");

        db.acquire(&t1, LockType::IX).unwrap();
        table.acquire(&t1, LockType::IX).unwrap();
        page1.acquire(&t1, LockType::S).unwrap();
        page2.acquire(&t1, LockType::X).unwrap();

        assert_eq!(db.get_num_children(&t1), 3);
        assert_eq!(table.get_num_children(&t1), 2);
        assert_eq!(page1.get_num_children(&t1), 0);

        page1.release(&t1).unwrap();
        assert_eq!(db.get_num_children(&t1), 2);
        assert_eq!(table.get_num_children(&t1), 1);
    }

    #[test]
    fn promote_to_six_releases_sis_descendants() {
        // T holds IS(db), IS(table), S(page1), S(page2); promoting the table
        // to SIX swallows both page locks.
        let (lockman, db, table) = hierarchy();
        let t1 = Transaction::new(1);
        let page1 = table.child_context("1");
        let page2 = table.child_context("2");

        db.acquire(&t1, LockType::IX).unwrap();
        table.acquire(&t1, LockType::IS).unwrap();
        page1.acquire(&t1, LockType::S).unwrap();
        page2.acquire(&t1, LockType::S).unwrap();

        table.promote(&t1, LockType::SIX).unwrap();

        assert_eq!(table.get_explicit_lock_type(&t1), LockType::SIX);
        assert_eq!(page1.get_explicit_lock_type(&t1), LockType::NL);
        assert_eq!(page2.get_explicit_lock_type(&t1), LockType::NL);
        assert_eq!(db.get_num_children(&t1), 1);
        assert_eq!(table.get_num_children(&t1), 0);
        assert_eq!(lockman.get_locks_of_transaction(1).len(), 2);
    }

    #[test]
    fn promote_s_to_ix_becomes_six() {
        let (_lockman, db, table) = hierarchy();
        let t1 = Transaction::new(1);

        db.acquire(&t1, LockType::IX).unwrap();
        table.acquire(&t1, LockType::S).unwrap();
        table.promote(&t1, LockType::IX).unwrap();
        assert_eq!(table.get_explicit_lock_type(&t1), LockType::SIX);
    }

    #[test]
    fn promote_under_six_ancestor_is_redundant() {
        let (_lockman, db, table) = hierarchy();
        let t1 = Transaction::new(1);
        let page = table.child_context("1");

        db.acquire(&t1, LockType::IX).unwrap();
        table.acquire(&t1, LockType::SIX).unwrap();
        page.acquire(&t1, LockType::IX).unwrap();

        let err = page.promote(&t1, LockType::SIX).unwrap_err();
        assert!(matches!(err, DbError::InvalidLock(_)));
    }

    #[test]
    fn escalate_to_x() {
        // IX(table), S(page1), X(page2) collapse into X(table).
        let (lockman, db, table) = hierarchy();
        let t1 = Transaction::new(1);
        let page1 = table.child_context("1");
        let page2 = table.child_context("2");

        db.acquire(&t1, LockType::IX).unwrap();
        table.acquire(&t1, LockType::IX).unwrap();
        page1.acquire(&t1, LockType::S).unwrap();
        page2.acquire(&t1, LockType::X).unwrap();

        table.escalate(&t1).unwrap();

        assert_eq!(table.get_explicit_lock_type(&t1), LockType::X);
        assert_eq!(page1.get_explicit_lock_type(&t1), LockType::NL);
        assert_eq!(page2.get_explicit_lock_type(&t1), LockType::NL);
        assert_eq!(table.get_num_children(&t1), 0);
        assert_eq!(db.get_num_children(&t1), 1);
        assert_eq!(lockman.get_locks_of_transaction(1).len(), 2);
    }

    #[test]
    fn escalate_to_s() {
        let (_lockman, db, table) = hierarchy();
        let t1 = Transaction::new(1);
        let page = table.child_context("1");

        db.acquire(&t1, LockType::IX).unwrap();
        table.acquire(&t1, LockType::IS).unwrap();
        page.acquire(&t1, LockType::S).unwrap();

        table.escalate(&t1).unwrap();
        assert_eq!(table.get_explicit_lock_type(&t1), LockType::S);
        assert_eq!(page.get_explicit_lock_type(&t1), LockType::NL);
    }

    #[test]
    fn repeated_escalate_is_a_noop() {
        let (_lockman, db, table) = hierarchy();
        let t1 = Transaction::new(1);

        db.acquire(&t1, LockType::IX).unwrap();
        table.acquire(&t1, LockType::S).unwrap();
        table.escalate(&t1).unwrap();
        table.escalate(&t1).unwrap();
        assert_eq!(table.get_explicit_lock_type(&t1), LockType::S);
    }

    #[test]
    fn effective_lock_type_inherits() {
        let (_lockman, db, table) = hierarchy();
        let t1 = Transaction::new(1);
        let page = table.child_context("1");

        db.acquire(&t1, LockType::IX).unwrap();
        table.acquire(&t1, LockType::SIX).unwrap();

        // SIX passes S down; the intent-only db node passes nothing.
        assert_eq!(page.get_effective_lock_type(&t1), LockType::S);
        assert_eq!(table.get_effective_lock_type(&t1), LockType::SIX);
        assert_eq!(db.get_effective_lock_type(&t1), LockType::IX);

        let t2 = Transaction::new(2);
        db.acquire(&t2, LockType::IS).unwrap();
        assert_eq!(page.get_effective_lock_type(&t2), LockType::NL);
    }

    #[test]
    fn readonly_context_rejects_mutations() {
        let (_lockman, db, table) = hierarchy();
        let t1 = Transaction::new(1);

        db.acquire(&t1, LockType::IX).unwrap();
        table.acquire(&t1, LockType::IX).unwrap();
        table.disable_child_locks();
        let index = table.child_context("index");

        assert!(matches!(
            index.acquire(&t1, LockType::S).unwrap_err(),
            DbError::Unsupported(_)
        ));
        assert!(matches!(
            index.escalate(&t1).unwrap_err(),
            DbError::Unsupported(_)
        ));
        // Children of a readonly context are readonly too.
        let leaf = index.child_context("leaf");
        assert!(matches!(
            leaf.acquire(&t1, LockType::S).unwrap_err(),
            DbError::Unsupported(_)
        ));
    }

    #[test]
    fn from_resource_name_reaches_the_same_node() {
        let (lockman, _db, table) = hierarchy();
        let t1 = Transaction::new(1);
        let name = table.name().clone();

        let again = LockContext::from_resource_name(&lockman, &name);
        assert_eq!(again.name(), table.name());

        // Same cached node, not a twin: lock state is visible through both.
        let db = lockman.database_context();
        db.acquire(&t1, LockType::IS).unwrap();
        again.acquire(&t1, LockType::S).unwrap();
        assert_eq!(table.get_explicit_lock_type(&t1), LockType::S);
    }
}
