use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::{LRUReplacer, Replacer};
use crate::storage::disk::DiskManager;

/// Hook invoked before a dirty page is written back to disk.
///
/// Lets a write-ahead log enforce its flush rule without the pool knowing
/// anything about log internals. The pool implements no logging itself.
pub trait LogHook: Send + Sync {
    fn before_page_write(&self, page_id: PageId);
}

/// Per-frame bookkeeping. Lives under the pool mutex; the page bytes
/// themselves are behind the page latch in `page`.
struct Frame {
    page: PagePtr,
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl Frame {
    fn new() -> Self {
        Self {
            page: Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))),
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }
}

struct PoolInner {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    next_page_id: PageId,
}

/// Buffer pool manager.
///
/// Owns a fixed array of frames, the page table, the free list and the
/// replacement policy. Every frame is in exactly one of three states: free
/// (on the free list), pinned (in the page table with pin_count > 0), or
/// evictable (in the page table with pin_count == 0 and registered with the
/// replacer). All public operations are atomic with respect to one internal
/// mutex; the per-page latches handed out through `PagePtr` are taken by
/// callers outside of it.
pub struct BufferPoolManager {
    pool_size: usize,
    num_instances: u32,
    instance_index: u32,
    inner: Mutex<PoolInner>,
    replacer: Box<dyn Replacer>,
    disk_manager: Arc<DiskManager>,
    log_hook: Option<Arc<dyn LogHook>>,
}

impl BufferPoolManager {
    /// Create a stand-alone buffer pool over its own database file
    pub fn new(pool_size: usize, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_instance(pool_size, 1, 0, disk_manager))
    }

    /// Create one instance of a striped pool.
    ///
    /// The instance allocates page IDs along the progression
    /// `instance_index, instance_index + num_instances, ...`, so every ID it
    /// owns satisfies `id % num_instances == instance_index`.
    pub fn with_instance(
        pool_size: usize,
        num_instances: u32,
        instance_index: u32,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        assert!(num_instances > 0, "a pool needs at least one instance");
        assert!(
            instance_index < num_instances,
            "instance index {} out of range for {} instances",
            instance_index,
            num_instances
        );

        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for frame_id in 0..pool_size {
            frames.push(Frame::new());
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            num_instances,
            instance_index,
            inner: Mutex::new(PoolInner {
                frames,
                page_table: HashMap::new(),
                free_list,
                next_page_id: instance_index as PageId,
            }),
            replacer: Box::new(LRUReplacer::new(pool_size)),
            disk_manager,
            log_hook: None,
        }
    }

    /// Install a log hook, invoked before every dirty write-back
    pub fn with_log_hook(mut self, hook: Arc<dyn LogHook>) -> Self {
        self.log_hook = Some(hook);
        self
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocate a frame and create a new zeroed page in it, pinned once.
    ///
    /// Fails with `BufferPoolFull` when every frame is pinned.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut inner = self.inner.lock();
        let frame_id = self.find_free_frame(&mut inner)?;

        let page_id = inner.next_page_id;
        inner.next_page_id += self.num_instances as PageId;
        debug_assert_eq!(
            page_id.rem_euclid(self.num_instances as PageId),
            self.instance_index as PageId
        );

        let frame = &mut inner.frames[frame_id];
        {
            let mut page = frame.page.write();
            page.reset();
            page.page_id = page_id;
        }
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;

        let page_ptr = frame.page.clone();
        inner.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);

        Ok((page_ptr, page_id))
    }

    /// Fetch a page from the pool, reading it from disk on a miss
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &mut inner.frames[frame_id];
            frame.pin_count += 1;
            let page_ptr = frame.page.clone();
            self.replacer.pin(frame_id);
            return Ok(page_ptr);
        }

        let frame_id = self.find_free_frame(&mut inner)?;
        let frame = &mut inner.frames[frame_id];

        {
            let mut page = frame.page.write();
            if let Err(e) = self.disk_manager.read_page(page_id, &mut page) {
                // The frame was already detached from its old page; return
                // it to the free list instead of leaking it.
                page.reset();
                page.page_id = INVALID_PAGE_ID;
                drop(page);
                frame.page_id = INVALID_PAGE_ID;
                inner.free_list.push_back(frame_id);
                return Err(e.into());
            }
        }

        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;

        let page_ptr = frame.page.clone();
        inner.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);

        Ok(page_ptr)
    }

    /// Drop one pin on a page, OR-ing in the caller's dirty flag.
    ///
    /// Unpinning an absent page or a page with no pins is a caller error.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = *inner
            .page_table
            .get(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let frame = &mut inner.frames[frame_id];
        if frame.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }

        if is_dirty {
            frame.is_dirty = true;
        }
        frame.pin_count -= 1;
        if frame.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }

        Ok(())
    }

    /// Write a page through to disk if dirty
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = *inner
            .page_table
            .get(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        self.flush_frame(&mut inner, frame_id)
    }

    /// Write every dirty resident page through to disk; idempotent
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();
        for frame_id in 0..self.pool_size {
            if inner.frames[frame_id].page_id != INVALID_PAGE_ID {
                self.flush_frame(&mut inner, frame_id)?;
            }
        }
        Ok(())
    }

    /// Delete a page from the pool and release its disk storage.
    ///
    /// Deleting an absent page succeeds; deleting a pinned page fails.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return Ok(());
        };

        if inner.frames[frame_id].pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        self.flush_frame(&mut inner, frame_id)?;
        self.disk_manager.deallocate_page(page_id);

        inner.page_table.remove(&page_id);
        let frame = &mut inner.frames[frame_id];
        {
            let mut page = frame.page.write();
            page.reset();
            page.page_id = INVALID_PAGE_ID;
        }
        frame.page_id = INVALID_PAGE_ID;
        frame.is_dirty = false;

        // The frame was evictable; it is free now
        self.replacer.pin(frame_id);
        inner.free_list.push_back(frame_id);

        Ok(())
    }

    /// Source a frame from the free list, else by evicting the LRU victim.
    ///
    /// The returned frame is detached: not on the free list, not in the page
    /// table, not in the replacer.
    fn find_free_frame(&self, inner: &mut PoolInner) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self
            .replacer
            .victim()
            .ok_or(BufferPoolError::BufferPoolFull)?;

        let frame = &mut inner.frames[frame_id];
        debug_assert_eq!(frame.pin_count, 0);

        if frame.is_dirty {
            debug!("evicting dirty page {} from frame {}", frame.page_id, frame_id);
            if let Some(hook) = &self.log_hook {
                hook.before_page_write(frame.page_id);
            }
            let page = frame.page.read();
            self.disk_manager.write_page(&page)?;
            drop(page);
            frame.is_dirty = false;
        }

        let old_page_id = frame.page_id;
        inner.page_table.remove(&old_page_id);

        Ok(frame_id)
    }

    fn flush_frame(&self, inner: &mut PoolInner, frame_id: FrameId) -> Result<(), BufferPoolError> {
        let frame = &mut inner.frames[frame_id];
        if frame.is_dirty {
            if let Some(hook) = &self.log_hook {
                hook.before_page_write(frame.page_id);
            }
            let page = frame.page.read();
            self.disk_manager.write_page(&page)?;
            drop(page);
            frame.is_dirty = false;
        }
        Ok(())
    }
}
