use std::collections::HashMap;
use std::sync::Arc;
use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TxnId};
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState,
};
use crate::transaction::concurrency::transaction_manager::TransactionRegistry;

/// Lock mode on a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

impl LockRequest {
    fn granted(txn_id: TxnId, mode: LockMode) -> Self {
        Self {
            txn_id,
            mode,
            granted: true,
        }
    }
}

struct LockRequestQueue {
    requests: Vec<LockRequest>,
    cv: Arc<Condvar>,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            requests: Vec::new(),
            cv: Arc::new(Condvar::new()),
        }
    }
}

/// Tuple-level lock manager implementing strict two-phase locking with
/// wound-wait deadlock prevention.
///
/// One mutex guards the whole lock table; each record's queue carries its
/// own condition variable. Transaction IDs double as ages: smaller is older.
/// An older transaction meeting a younger conflicter wounds it (aborts it
/// and strips its request); a younger transaction meeting an older one waits
/// on the shared and upgrade paths and dies on the exclusive path.
///
/// Only granted requests sit in the queues - a waiter re-scans from the top
/// before enqueueing, so wounding always targets holders. Waiters that were
/// wounded while blocked learn about it from the broadcast every wound and
/// unlock performs, and observe their aborted state on re-check.
pub struct LockManager {
    registry: Arc<TransactionRegistry>,
    lock_table: Mutex<HashMap<Rid, LockRequestQueue>>,
}

impl LockManager {
    pub fn new(registry: Arc<TransactionRegistry>) -> Self {
        Self {
            registry,
            lock_table: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a shared lock on `rid`.
    ///
    /// Fails (returning false) when the transaction is already aborted, runs
    /// at READ_UNCOMMITTED (dirty reads take no shared locks), or is
    /// shrinking under REPEATABLE_READ. Younger exclusive holders are
    /// wounded; older exclusive holders are waited on.
    pub fn lock_shared(&self, txn: &Transaction, rid: Rid) -> bool {
        let mut table = self.lock_table.lock();
        loop {
            if txn.state() == TransactionState::Aborted {
                return false;
            }
            if txn.isolation_level() == IsolationLevel::ReadUncommitted {
                txn.set_state(TransactionState::Aborted);
                return false;
            }
            if txn.isolation_level() == IsolationLevel::RepeatableRead
                && txn.state() == TransactionState::Shrinking
            {
                txn.set_state(TransactionState::Aborted);
                return false;
            }
            if txn.is_shared_locked(rid) {
                return true;
            }

            let registry = &self.registry;
            let wait_cv = {
                let queue = table.entry(rid).or_insert_with(LockRequestQueue::new);
                let mut must_wait = false;
                let mut wounded = false;
                queue.requests.retain(|req| {
                    if req.mode == LockMode::Exclusive {
                        if req.txn_id > txn.id() {
                            Self::wound(registry, req, rid);
                            wounded = true;
                            return false;
                        }
                        if req.txn_id < txn.id() {
                            must_wait = true;
                        }
                    }
                    true
                });
                if wounded {
                    queue.cv.notify_all();
                }
                if must_wait {
                    Some(queue.cv.clone())
                } else {
                    queue
                        .requests
                        .push(LockRequest::granted(txn.id(), LockMode::Shared));
                    None
                }
            };

            match wait_cv {
                Some(cv) => {
                    cv.wait(&mut table);
                }
                None => {
                    txn.set_state(TransactionState::Growing);
                    txn.add_shared_lock(rid);
                    return true;
                }
            }
        }
    }

    /// Acquire an exclusive lock on `rid`.
    ///
    /// Writes are allowed at every isolation level. Younger conflicters are
    /// wounded; meeting an older holder aborts this transaction immediately
    /// (wound-die - the exclusive path never waits).
    pub fn lock_exclusive(&self, txn: &Transaction, rid: Rid) -> bool {
        let mut table = self.lock_table.lock();

        if txn.state() == TransactionState::Aborted {
            return false;
        }
        if txn.isolation_level() == IsolationLevel::RepeatableRead
            && txn.state() == TransactionState::Shrinking
        {
            txn.set_state(TransactionState::Aborted);
            return false;
        }
        if txn.is_exclusive_locked(rid) {
            return true;
        }

        let registry = &self.registry;
        let queue = table.entry(rid).or_insert_with(LockRequestQueue::new);
        let mut must_die = false;
        let mut wounded = false;
        queue.requests.retain(|req| {
            if req.txn_id == txn.id() {
                return true;
            }
            if req.txn_id > txn.id() {
                Self::wound(registry, req, rid);
                wounded = true;
                return false;
            }
            must_die = true;
            true
        });
        if wounded {
            queue.cv.notify_all();
        }
        if must_die {
            txn.set_state(TransactionState::Aborted);
            return false;
        }

        queue
            .requests
            .push(LockRequest::granted(txn.id(), LockMode::Exclusive));
        txn.set_state(TransactionState::Growing);
        txn.add_exclusive_lock(rid);
        true
    }

    /// Upgrade a held shared lock on `rid` to exclusive.
    ///
    /// The transaction must hold the shared lock (else it is aborted).
    /// Younger peers on the record are wounded; older peers are waited on.
    /// Once the queue holds only this transaction's shared request, it is
    /// promoted in place.
    pub fn lock_upgrade(&self, txn: &Transaction, rid: Rid) -> bool {
        let mut table = self.lock_table.lock();
        loop {
            if txn.state() == TransactionState::Aborted {
                return false;
            }
            if txn.isolation_level() == IsolationLevel::RepeatableRead
                && txn.state() == TransactionState::Shrinking
            {
                txn.set_state(TransactionState::Aborted);
                return false;
            }
            if !txn.is_shared_locked(rid) {
                txn.set_state(TransactionState::Aborted);
                return false;
            }
            if txn.is_exclusive_locked(rid) {
                return true;
            }

            let registry = &self.registry;
            let wait_cv = {
                let queue = table.entry(rid).or_insert_with(LockRequestQueue::new);
                let mut must_wait = false;
                let mut wounded = false;
                queue.requests.retain(|req| {
                    if req.txn_id == txn.id() {
                        return true;
                    }
                    if req.txn_id > txn.id() {
                        Self::wound(registry, req, rid);
                        wounded = true;
                        return false;
                    }
                    must_wait = true;
                    true
                });
                if wounded {
                    queue.cv.notify_all();
                }
                if must_wait {
                    Some(queue.cv.clone())
                } else {
                    // Only this transaction's shared request survives
                    debug_assert_eq!(queue.requests.len(), 1);
                    if let Some(req) = queue
                        .requests
                        .iter_mut()
                        .find(|req| req.txn_id == txn.id())
                    {
                        req.mode = LockMode::Exclusive;
                        req.granted = true;
                    }
                    None
                }
            };

            match wait_cv {
                Some(cv) => {
                    cv.wait(&mut table);
                }
                None => {
                    txn.remove_shared_lock(rid);
                    txn.add_exclusive_lock(rid);
                    txn.set_state(TransactionState::Growing);
                    return true;
                }
            }
        }
    }

    /// Release this transaction's lock on `rid`.
    ///
    /// Under REPEATABLE_READ the first unlock moves a growing transaction
    /// into the shrinking phase (strict 2PL). Returns true iff a request was
    /// found and removed.
    pub fn unlock(&self, txn: &Transaction, rid: Rid) -> bool {
        let mut table = self.lock_table.lock();

        if txn.state() == TransactionState::Growing
            && txn.isolation_level() == IsolationLevel::RepeatableRead
        {
            txn.set_state(TransactionState::Shrinking);
        }

        let Some(queue) = table.get_mut(&rid) else {
            return false;
        };

        let mut found = false;
        queue.requests.retain(|req| {
            if req.txn_id == txn.id() {
                match req.mode {
                    LockMode::Shared => txn.remove_shared_lock(rid),
                    LockMode::Exclusive => txn.remove_exclusive_lock(rid),
                }
                found = true;
                return false;
            }
            true
        });

        if found {
            queue.cv.notify_all();
        }
        found
    }

    /// Abort a younger conflicter: strip the rid from its lock set and mark
    /// it aborted. It discovers the abort at its next lock-manager call.
    fn wound(registry: &TransactionRegistry, req: &LockRequest, rid: Rid) {
        if let Some(victim) = registry.get(req.txn_id) {
            match req.mode {
                LockMode::Shared => victim.remove_shared_lock(rid),
                LockMode::Exclusive => victim.remove_exclusive_lock(rid),
            }
            victim.set_state(TransactionState::Aborted);
            debug!("wound-wait: aborted younger transaction {}", req.txn_id);
        }
    }
}
