use std::thread;
use std::time::Duration;

use basaltdb::common::types::Rid;
use basaltdb::transaction::{IsolationLevel, TransactionState};

mod common;
use common::create_test_lock_manager;

#[test]
fn test_shared_lock_basic() {
    let (_, lock_manager, txn_manager) = create_test_lock_manager();
    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    assert!(lock_manager.lock_shared(&txn, rid));
    assert!(txn.is_shared_locked(rid));
    assert_eq!(txn.state(), TransactionState::Growing);

    // Re-acquiring a held shared lock succeeds
    assert!(lock_manager.lock_shared(&txn, rid));

    assert!(lock_manager.unlock(&txn, rid));
    assert!(!txn.is_shared_locked(rid));
}

#[test]
fn test_shared_locks_are_compatible() {
    let (_, lock_manager, txn_manager) = create_test_lock_manager();
    let a = txn_manager.begin(IsolationLevel::RepeatableRead);
    let b = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    assert!(lock_manager.lock_shared(&a, rid));
    assert!(lock_manager.lock_shared(&b, rid));
    assert_eq!(a.state(), TransactionState::Growing);
    assert_eq!(b.state(), TransactionState::Growing);
}

#[test]
fn test_read_uncommitted_rejects_shared_locks() {
    let (_, lock_manager, txn_manager) = create_test_lock_manager();
    let txn = txn_manager.begin(IsolationLevel::ReadUncommitted);
    let rid = Rid::new(1, 0);

    assert!(!lock_manager.lock_shared(&txn, rid));
    assert_eq!(txn.state(), TransactionState::Aborted);

    // Writes are still allowed at READ_UNCOMMITTED for a fresh transaction
    let writer = txn_manager.begin(IsolationLevel::ReadUncommitted);
    assert!(lock_manager.lock_exclusive(&writer, rid));
}

#[test]
fn test_strict_2pl_under_repeatable_read() {
    let (_, lock_manager, txn_manager) = create_test_lock_manager();
    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid_a = Rid::new(1, 0);
    let rid_b = Rid::new(2, 0);

    assert!(lock_manager.lock_shared(&txn, rid_a));
    assert!(lock_manager.unlock(&txn, rid_a));
    assert_eq!(txn.state(), TransactionState::Shrinking);

    // No lock may be acquired in the shrinking phase
    assert!(!lock_manager.lock_shared(&txn, rid_b));
    assert_eq!(txn.state(), TransactionState::Aborted);
}

#[test]
fn test_read_committed_can_relock_after_unlock() {
    let (_, lock_manager, txn_manager) = create_test_lock_manager();
    let txn = txn_manager.begin(IsolationLevel::ReadCommitted);
    let rid = Rid::new(1, 0);

    // READ_COMMITTED drops shared locks right after use and may take new ones
    assert!(lock_manager.lock_shared(&txn, rid));
    assert!(lock_manager.unlock(&txn, rid));
    assert_eq!(txn.state(), TransactionState::Growing);
    assert!(lock_manager.lock_shared(&txn, rid));
}

#[test]
fn test_wound_wait_older_aborts_younger_holder() {
    let (_, lock_manager, txn_manager) = create_test_lock_manager();
    let older = txn_manager.begin(IsolationLevel::RepeatableRead);
    let younger = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    // Younger transaction holds the exclusive lock
    assert!(lock_manager.lock_exclusive(&younger, rid));

    // The older transaction wounds it and takes the lock
    assert!(lock_manager.lock_exclusive(&older, rid));
    assert_eq!(younger.state(), TransactionState::Aborted);
    assert!(!younger.is_exclusive_locked(rid));
    assert!(older.is_exclusive_locked(rid));

    // The wounded transaction observes the abort on its next call
    assert!(!lock_manager.lock_shared(&younger, Rid::new(2, 0)));
}

#[test]
fn test_wound_die_younger_aborts_against_older_holder() {
    let (_, lock_manager, txn_manager) = create_test_lock_manager();
    let older = txn_manager.begin(IsolationLevel::RepeatableRead);
    let younger = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    // Older transaction holds the exclusive lock
    assert!(lock_manager.lock_exclusive(&older, rid));

    // The younger exclusive requester dies instead of waiting
    assert!(!lock_manager.lock_exclusive(&younger, rid));
    assert_eq!(younger.state(), TransactionState::Aborted);
    assert!(older.is_exclusive_locked(rid));
}

#[test]
fn test_older_shared_request_wounds_younger_exclusive_holder() {
    let (_, lock_manager, txn_manager) = create_test_lock_manager();
    let older = txn_manager.begin(IsolationLevel::RepeatableRead);
    let younger = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(3, 0);

    assert!(lock_manager.lock_exclusive(&younger, rid));
    assert!(lock_manager.lock_shared(&older, rid));
    assert_eq!(younger.state(), TransactionState::Aborted);
    assert!(older.is_shared_locked(rid));
}

#[test]
fn test_younger_shared_request_waits_for_older_exclusive() {
    let (_, lock_manager, txn_manager) = create_test_lock_manager();
    let older = txn_manager.begin(IsolationLevel::RepeatableRead);
    let younger = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    assert!(lock_manager.lock_exclusive(&older, rid));

    let lm = lock_manager.clone();
    let younger_clone = younger.clone();
    let waiter = thread::spawn(move || lm.lock_shared(&younger_clone, rid));

    // Give the waiter time to block, then release the exclusive lock
    thread::sleep(Duration::from_millis(50));
    assert!(lock_manager.unlock(&older, rid));

    assert!(waiter.join().unwrap());
    assert!(younger.is_shared_locked(rid));
}

#[test]
fn test_upgrade_wounds_younger_sharer() {
    let (_, lock_manager, txn_manager) = create_test_lock_manager();
    let older = txn_manager.begin(IsolationLevel::RepeatableRead);
    let younger = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    assert!(lock_manager.lock_shared(&older, rid));
    assert!(lock_manager.lock_shared(&younger, rid));

    // The older holder's upgrade wounds the younger sharer
    assert!(lock_manager.lock_upgrade(&older, rid));
    assert_eq!(younger.state(), TransactionState::Aborted);
    assert!(!younger.is_shared_locked(rid));
    assert!(older.is_exclusive_locked(rid));
    assert!(!older.is_shared_locked(rid));
}

#[test]
fn test_upgrade_waits_for_older_sharer() {
    let (_, lock_manager, txn_manager) = create_test_lock_manager();
    let older = txn_manager.begin(IsolationLevel::RepeatableRead);
    let younger = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    assert!(lock_manager.lock_shared(&older, rid));
    assert!(lock_manager.lock_shared(&younger, rid));

    let lm = lock_manager.clone();
    let younger_clone = younger.clone();
    let upgrader = thread::spawn(move || lm.lock_upgrade(&younger_clone, rid));

    // The younger upgrader must wait until the older sharer releases
    thread::sleep(Duration::from_millis(50));
    assert!(lock_manager.unlock(&older, rid));

    assert!(upgrader.join().unwrap());
    assert!(younger.is_exclusive_locked(rid));
    assert!(!younger.is_shared_locked(rid));
}

#[test]
fn test_upgrade_without_shared_lock_aborts() {
    let (_, lock_manager, txn_manager) = create_test_lock_manager();
    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    assert!(!lock_manager.lock_upgrade(&txn, rid));
    assert_eq!(txn.state(), TransactionState::Aborted);
}

#[test]
fn test_unlock_without_lock_returns_false() {
    let (_, lock_manager, txn_manager) = create_test_lock_manager();
    let txn = txn_manager.begin(IsolationLevel::ReadCommitted);

    assert!(!lock_manager.unlock(&txn, Rid::new(9, 9)));
}

#[test]
fn test_wounded_waiter_wakes_and_observes_abort() {
    let (_, lock_manager, txn_manager) = create_test_lock_manager();
    let oldest = txn_manager.begin(IsolationLevel::RepeatableRead);
    let middle = txn_manager.begin(IsolationLevel::RepeatableRead);
    let youngest = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    // Middle holds exclusive; youngest blocks waiting for a shared lock
    assert!(lock_manager.lock_exclusive(&middle, rid));

    let lm = lock_manager.clone();
    let youngest_clone = youngest.clone();
    let waiter = thread::spawn(move || lm.lock_shared(&youngest_clone, rid));
    thread::sleep(Duration::from_millis(50));

    // The oldest transaction wounds middle; the broadcast also wakes the
    // blocked youngest, which then acquires its shared lock alongside oldest
    assert!(lock_manager.lock_shared(&oldest, rid));
    assert_eq!(middle.state(), TransactionState::Aborted);

    assert!(waiter.join().unwrap());
    assert!(oldest.is_shared_locked(rid));
    assert!(youngest.is_shared_locked(rid));
}
