use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IndexWriteRecord, IsolationLevel, TableWriteRecord, Transaction, TransactionError,
    TransactionState,
};

/// Process-wide map from transaction ID to transaction.
///
/// An explicit service rather than a global: the lock manager needs it to
/// reach wound victims, the transaction manager to track lifecycles, and
/// both receive the same instance at construction.
#[derive(Default)]
pub struct TransactionRegistry {
    txns: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, txn: Arc<Transaction>) {
        self.txns.lock().insert(txn.id(), txn);
    }

    /// Look up a transaction; the registry lock is released before return
    pub fn get(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.txns.lock().get(&txn_id).cloned()
    }

    pub fn remove(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.txns.lock().remove(&txn_id)
    }

    pub fn active_txn_ids(&self) -> Vec<TxnId> {
        self.txns.lock().keys().copied().collect()
    }
}

/// Transaction manager - creates transactions and finalizes them.
///
/// Commit and abort release every lock the transaction still holds and drain
/// its undo records; applying those records to the storage layer on abort is
/// the caller's responsibility.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    registry: Arc<TransactionRegistry>,
    lock_manager: Arc<LockManager>,
}

impl TransactionManager {
    pub fn new(registry: Arc<TransactionRegistry>, lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            registry,
            lock_manager,
        }
    }

    /// Begin a new transaction in the growing phase
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.registry.register(txn.clone());
        txn
    }

    /// Commit a transaction, releasing its locks
    pub fn commit(&self, txn_id: TxnId) -> Result<(), TransactionError> {
        let txn = self
            .registry
            .remove(txn_id)
            .ok_or(TransactionError::NotFound(txn_id))?;

        txn.take_write_sets();
        self.release_locks(&txn);
        txn.set_state(TransactionState::Committed);
        Ok(())
    }

    /// Abort a transaction, releasing its locks.
    ///
    /// Returns the drained undo records so the storage layer can roll the
    /// transaction's writes back.
    pub fn abort(
        &self,
        txn_id: TxnId,
    ) -> Result<(Vec<TableWriteRecord>, Vec<IndexWriteRecord>), TransactionError> {
        let txn = self
            .registry
            .remove(txn_id)
            .ok_or(TransactionError::NotFound(txn_id))?;

        let write_sets = txn.take_write_sets();
        self.release_locks(&txn);
        txn.set_state(TransactionState::Aborted);
        Ok(write_sets)
    }

    fn release_locks(&self, txn: &Transaction) {
        for rid in txn.locked_rids() {
            self.lock_manager.unlock(txn, rid);
        }
    }
}
