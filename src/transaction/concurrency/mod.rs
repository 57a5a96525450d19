pub mod lock_manager;
pub mod transaction;
pub mod transaction_manager;

pub use lock_manager::{DeadlockDetectionHandle, LockManager, LockMode};
pub use transaction::{IsolationLevel, Transaction, TransactionState};
pub use transaction_manager::TransactionManager;
