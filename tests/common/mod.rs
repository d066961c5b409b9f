use std::sync::Arc;
use anyhow::Result;
use tempfile::NamedTempFile;

use basaltdb::storage::buffer::{BufferPoolManager, ParallelBufferPoolManager};
use basaltdb::transaction::{LockManager, TransactionManager, TransactionRegistry};

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager with a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, path)?);
    Ok((buffer_pool, file))
}

// Create a striped buffer pool with a temporary database
#[allow(dead_code)]
pub fn create_test_parallel_pool(
    num_instances: u32,
    pool_size: usize,
) -> Result<(Arc<ParallelBufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let pool = Arc::new(ParallelBufferPoolManager::new(num_instances, pool_size, path)?);
    Ok((pool, file))
}

// Wire up a lock manager, its registry, and a transaction manager
#[allow(dead_code)]
pub fn create_test_lock_manager() -> (Arc<TransactionRegistry>, Arc<LockManager>, Arc<TransactionManager>) {
    let registry = Arc::new(TransactionRegistry::new());
    let lock_manager = Arc::new(LockManager::new(registry.clone()));
    let txn_manager = Arc::new(TransactionManager::new(registry.clone(), lock_manager.clone()));
    (registry, lock_manager, txn_manager)
}
