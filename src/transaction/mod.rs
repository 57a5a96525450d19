pub mod concurrency;

pub use concurrency::{
    IsolationLevel, LockManager, Transaction, TransactionManager, TransactionState,
};
