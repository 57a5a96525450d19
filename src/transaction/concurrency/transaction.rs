use std::collections::HashSet;
use parking_lot::Mutex;

use crate::common::types::{Rid, TxnId};

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Transaction states under strict two-phase locking: a transaction grows
/// its lock set until the first release, shrinks afterwards, and ends
/// committed or aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// An active database transaction.
///
/// Shared as `Arc<Transaction>` between the thread driving it and the
/// lock manager, which mutates peer transactions when wounding them, so
/// state and lock sets sit behind their own mutexes.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    shared_lock_set: Mutex<HashSet<Rid>>,
    exclusive_lock_set: Mutex<HashSet<Rid>>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    /// Snapshot of the RIDs this transaction holds shared locks on
    pub fn shared_lock_set(&self) -> HashSet<Rid> {
        self.shared_lock_set.lock().clone()
    }

    /// Snapshot of the RIDs this transaction holds exclusive locks on
    pub fn exclusive_lock_set(&self) -> HashSet<Rid> {
        self.exclusive_lock_set.lock().clone()
    }

    pub fn is_shared_locked(&self, rid: &Rid) -> bool {
        self.shared_lock_set.lock().contains(rid)
    }

    pub fn is_exclusive_locked(&self, rid: &Rid) -> bool {
        self.exclusive_lock_set.lock().contains(rid)
    }

    pub(crate) fn insert_shared(&self, rid: Rid) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub(crate) fn erase_shared(&self, rid: &Rid) {
        self.shared_lock_set.lock().remove(rid);
    }

    pub(crate) fn insert_exclusive(&self, rid: Rid) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub(crate) fn erase_exclusive(&self, rid: &Rid) {
        self.exclusive_lock_set.lock().remove(rid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_growing_with_empty_lock_sets() {
        let txn = Transaction::new(1, IsolationLevel::RepeatableRead);
        assert_eq!(txn.id(), 1);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert!(txn.shared_lock_set().is_empty());
        assert!(txn.exclusive_lock_set().is_empty());
    }

    #[test]
    fn lock_set_bookkeeping() {
        let txn = Transaction::new(2, IsolationLevel::ReadCommitted);
        let rid = Rid::new(1, 0);

        txn.insert_shared(rid);
        assert!(txn.is_shared_locked(&rid));
        assert!(!txn.is_exclusive_locked(&rid));

        txn.erase_shared(&rid);
        txn.insert_exclusive(rid);
        assert!(!txn.is_shared_locked(&rid));
        assert!(txn.is_exclusive_locked(&rid));
    }
}
