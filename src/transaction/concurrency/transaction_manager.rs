use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState,
};

/// Registry of live transactions.
///
/// The lock manager holds a handle to this registry so it can look up
/// peer transactions when wounding them; no process-wide state is
/// involved.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Start a transaction. IDs increase monotonically, so a smaller ID
    /// always marks the older transaction under wound-wait.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.transactions.lock().insert(txn_id, Arc::clone(&txn));
        txn
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.transactions.lock().get(&txn_id).cloned()
    }

    /// Commit: release every lock still held, then retire the transaction
    pub fn commit(&self, txn: &Arc<Transaction>, lock_manager: &LockManager) {
        self.release_all_locks(txn, lock_manager);
        txn.set_state(TransactionState::Committed);
        self.transactions.lock().remove(&txn.id());
    }

    /// Abort: same unlock walk, ending in the aborted state. Also the
    /// cleanup path for wounded transactions.
    pub fn abort(&self, txn: &Arc<Transaction>, lock_manager: &LockManager) {
        self.release_all_locks(txn, lock_manager);
        txn.set_state(TransactionState::Aborted);
        self.transactions.lock().remove(&txn.id());
    }

    fn release_all_locks(&self, txn: &Arc<Transaction>, lock_manager: &LockManager) {
        for rid in txn.exclusive_lock_set() {
            lock_manager.unlock(txn, rid);
        }
        for rid in txn.shared_lock_set() {
            lock_manager.unlock(txn, rid);
        }
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_increase_monotonically() {
        let txn_manager = TransactionManager::new();
        let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
        let t2 = txn_manager.begin(IsolationLevel::ReadCommitted);
        assert!(t1.id() < t2.id());
        assert!(txn_manager.get_transaction(t1.id()).is_some());
    }

    #[test]
    fn commit_retires_the_transaction() {
        let txn_manager = Arc::new(TransactionManager::new());
        let lock_manager = LockManager::new(Arc::clone(&txn_manager));

        let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
        txn_manager.commit(&txn, &lock_manager);

        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(txn_manager.get_transaction(txn.id()).is_none());
    }
}
