pub mod lock_manager;
pub mod transaction;
pub mod transaction_manager;

pub use lock_manager::{LockManager, LockMode};
pub use transaction::{
    IndexWriteRecord, IsolationLevel, TableWriteRecord, Transaction, TransactionError,
    TransactionState, WriteOp,
};
pub use transaction_manager::{TransactionManager, TransactionRegistry};
