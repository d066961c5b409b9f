use std::path::Path;
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::{PageId, PagePtr};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::manager::BufferPoolManager;
use crate::storage::disk::DiskManager;

/// A striped buffer pool: N independent instances over one disk manager.
///
/// Every page ID belongs to exactly one instance (`page_id mod N`), so all
/// operations on a page route to its owner and the instances never contend
/// on a shared mutex. This is a throughput amenity; each instance on its own
/// upholds the pool invariants.
pub struct ParallelBufferPoolManager {
    instances: Vec<Arc<BufferPoolManager>>,
    next_instance: Mutex<usize>,
}

impl ParallelBufferPoolManager {
    /// Create `num_instances` pools of `pool_size` frames each over one
    /// database file
    pub fn new(
        num_instances: u32,
        pool_size: usize,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        assert!(num_instances > 0, "a pool needs at least one instance");

        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        let instances = (0..num_instances)
            .map(|i| {
                Arc::new(BufferPoolManager::with_instance(
                    pool_size,
                    num_instances,
                    i,
                    disk_manager.clone(),
                ))
            })
            .collect();

        Ok(Self {
            instances,
            next_instance: Mutex::new(0),
        })
    }

    /// Total number of frames across all instances
    pub fn pool_size(&self) -> usize {
        self.instances.len() * self.instances[0].pool_size()
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    /// The instance owning a page ID's residue class
    fn instance_for(&self, page_id: PageId) -> &Arc<BufferPoolManager> {
        &self.instances[page_id.rem_euclid(self.instances.len() as PageId) as usize]
    }

    /// Allocate a new page from any instance with a free frame.
    ///
    /// Starts at a round-robin position and gives each instance one chance,
    /// so allocation pressure spreads across the stripes.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let start = {
            let mut next = self.next_instance.lock();
            let start = *next;
            *next = (*next + 1) % self.instances.len();
            start
        };

        for offset in 0..self.instances.len() {
            let idx = (start + offset) % self.instances.len();
            match self.instances[idx].new_page() {
                Ok(result) => return Ok(result),
                Err(BufferPoolError::BufferPoolFull) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(BufferPoolError::BufferPoolFull)
    }

    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }
        self.instance_for(page_id).fetch_page(page_id)
    }

    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }
        self.instance_for(page_id).unpin_page(page_id, is_dirty)
    }

    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }
        self.instance_for(page_id).flush_page(page_id)
    }

    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }
        self.instance_for(page_id).delete_page(page_id)
    }

    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        for instance in &self.instances {
            instance.flush_all_pages()?;
        }
        Ok(())
    }
}
