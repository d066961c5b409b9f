use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use log::debug;
use parking_lot::RwLock;

use crate::common::types::{PageId, PagePtr};
use crate::index::hash::bucket::HashBucketPage;
use crate::index::hash::codec::{DefaultKeyHasher, FixedCodec, KeyHasher};
use crate::index::hash::directory::{HashDirectoryPage, MAX_GLOBAL_DEPTH};
use crate::index::hash::error::HashTableError;
use crate::storage::buffer::BufferPoolManager;

enum InsertOutcome {
    Done(bool),
    NeedsSplit,
}

/// Extendible hash table backed by buffer pool pages.
///
/// One directory page maps the low bits of a key's hash to bucket pages;
/// buckets split when full and merge when empty, growing and shrinking the
/// directory as the can-shrink invariant allows.
///
/// The table latch separates read-like operations (get, in-place insert,
/// in-place remove) from structural ones (split, merge): structural changes
/// run under the write latch and are therefore atomic from every other
/// caller's perspective. Bucket mutation additionally happens under the
/// bucket page's own write latch. The table latch is always taken before any
/// page latch.
pub struct ExtendibleHashTable<K, V, H = DefaultKeyHasher> {
    buffer_pool: Arc<BufferPoolManager>,
    directory_page_id: PageId,
    table_latch: RwLock<()>,
    hasher: H,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, H> ExtendibleHashTable<K, V, H>
where
    K: FixedCodec + Hash,
    V: FixedCodec,
    H: KeyHasher<K>,
{
    /// Create a table with an empty directory pointing at one empty bucket
    pub fn new(buffer_pool: Arc<BufferPoolManager>) -> Result<Self, HashTableError> {
        let (dir_page, dir_page_id) = buffer_pool.new_page()?;
        let (bucket_page, bucket_page_id) = buffer_pool.new_page()?;

        let mut directory = HashDirectoryPage::new(dir_page_id);
        directory.set_bucket_page_id(0, bucket_page_id);
        directory.set_local_depth(0, 0);
        {
            let mut page = dir_page.write();
            directory.to_bytes(&mut page.data);
        }
        {
            let mut page = bucket_page.write();
            HashBucketPage::<K, V>::new().to_bytes(&mut page.data);
        }

        buffer_pool.unpin_page(dir_page_id, true)?;
        buffer_pool.unpin_page(bucket_page_id, true)?;

        Ok(Self {
            buffer_pool,
            directory_page_id: dir_page_id,
            table_latch: RwLock::new(()),
            hasher: H::default(),
            _marker: PhantomData,
        })
    }

    fn hash(&self, key: &K) -> u32 {
        self.hasher.hash_key(key)
    }

    /// Fetch and decode the directory page, returning the pinned page too
    fn fetch_directory(&self) -> Result<(PagePtr, HashDirectoryPage), HashTableError> {
        let page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let directory = {
            let guard = page.read();
            HashDirectoryPage::from_bytes(&guard.data)
        };
        Ok((page, directory))
    }

    /// Collect every value stored under `key`; empty means absent
    pub fn get(&self, key: &K) -> Result<Vec<V>, HashTableError> {
        let _read = self.table_latch.read();

        let (_dir_page, directory) = self.fetch_directory()?;
        let bucket_index = (self.hash(key) & directory.global_depth_mask()) as usize;
        let bucket_page_id = directory.bucket_page_id(bucket_index);

        let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
        let values = {
            let guard = bucket_page.read();
            HashBucketPage::<K, V>::from_bytes(&guard.data).get_value(key)
        };

        self.buffer_pool.unpin_page(bucket_page_id, false)?;
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(values)
    }

    /// Insert a (key, value) pair, splitting buckets as needed.
    ///
    /// Returns false when the exact pair is already present, or when the
    /// target bucket sits at the maximum depth and cannot split further.
    pub fn insert(&self, key: &K, value: &V) -> Result<bool, HashTableError> {
        loop {
            match self.try_insert(key, value)? {
                InsertOutcome::Done(ok) => return Ok(ok),
                InsertOutcome::NeedsSplit => {
                    if !self.split_insert(key)? {
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Insert into the target bucket if it has room
    fn try_insert(&self, key: &K, value: &V) -> Result<InsertOutcome, HashTableError> {
        let _read = self.table_latch.read();

        let (_dir_page, directory) = self.fetch_directory()?;
        let bucket_index = (self.hash(key) & directory.global_depth_mask()) as usize;
        let bucket_page_id = directory.bucket_page_id(bucket_index);

        let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
        let inserted = {
            let mut guard = bucket_page.write();
            let mut bucket = HashBucketPage::<K, V>::from_bytes(&guard.data);
            if bucket.is_full() {
                None
            } else {
                let ok = bucket.insert(key, value);
                if ok {
                    bucket.to_bytes(&mut guard.data);
                }
                Some(ok)
            }
        };

        self.buffer_pool
            .unpin_page(bucket_page_id, matches!(inserted, Some(true)))?;
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;

        Ok(match inserted {
            Some(ok) => InsertOutcome::Done(ok),
            None => InsertOutcome::NeedsSplit,
        })
    }

    /// Split the bucket `key` maps to.
    ///
    /// Runs under the table write latch. Grows the directory when the bucket
    /// is at global depth, allocates the split image, repoints every
    /// directory entry under the new local-depth mask, then rehashes the old
    /// bucket's pairs across the two pages. Returns false when the bucket is
    /// already at the maximum depth.
    fn split_insert(&self, key: &K) -> Result<bool, HashTableError> {
        let _write = self.table_latch.write();

        let (dir_page, mut directory) = self.fetch_directory()?;
        let bucket_index = (self.hash(key) & directory.global_depth_mask()) as usize;
        let local_depth = directory.local_depth(bucket_index);

        if local_depth >= MAX_GLOBAL_DEPTH {
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;
            return Ok(false);
        }

        let bucket_page_id = directory.bucket_page_id(bucket_index);
        if local_depth == directory.global_depth() {
            directory.incr_global_depth();
        }
        directory.incr_local_depth(bucket_index);
        let new_depth = directory.local_depth(bucket_index);
        let image_index = directory.split_image_index(bucket_index);

        let (image_page, image_page_id) = self.buffer_pool.new_page()?;

        // Repoint every entry congruent to the bucket (resp. its image)
        // under the new mask before touching any pair, so the rehash below
        // and the directory always agree
        let step = 1usize << new_depth;
        let bucket_low = bucket_index & (step - 1);
        let image_low = image_index & (step - 1);
        for i in 0..directory.size() {
            let low = i & (step - 1);
            if low == bucket_low {
                directory.set_bucket_page_id(i, bucket_page_id);
                directory.set_local_depth(i, new_depth);
            } else if low == image_low {
                directory.set_bucket_page_id(i, image_page_id);
                directory.set_local_depth(i, new_depth);
            }
        }

        let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
        {
            let mut bucket_guard = bucket_page.write();
            let mut image_guard = image_page.write();

            let old_bucket = HashBucketPage::<K, V>::from_bytes(&bucket_guard.data);
            let mut kept = HashBucketPage::<K, V>::new();
            let mut image = HashBucketPage::<K, V>::new();

            for (k, v) in old_bucket.readable_pairs() {
                if (self.hash(&k) as usize) & (step - 1) == image_low {
                    image.insert(&k, &v);
                } else {
                    kept.insert(&k, &v);
                }
            }

            kept.to_bytes(&mut bucket_guard.data);
            image.to_bytes(&mut image_guard.data);
        }

        {
            let mut guard = dir_page.write();
            directory.to_bytes(&mut guard.data);
        }

        debug!(
            "split bucket page {} into image page {} at depth {}",
            bucket_page_id, image_page_id, new_depth
        );

        self.buffer_pool.unpin_page(bucket_page_id, true)?;
        self.buffer_pool.unpin_page(image_page_id, true)?;
        self.buffer_pool.unpin_page(self.directory_page_id, true)?;
        Ok(true)
    }

    /// Remove a (key, value) pair, merging the bucket if it empties
    pub fn remove(&self, key: &K, value: &V) -> Result<bool, HashTableError> {
        let (removed, emptied) = {
            let _read = self.table_latch.read();

            let (_dir_page, directory) = self.fetch_directory()?;
            let bucket_index = (self.hash(key) & directory.global_depth_mask()) as usize;
            let bucket_page_id = directory.bucket_page_id(bucket_index);

            let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
            let (removed, emptied) = {
                let mut guard = bucket_page.write();
                let mut bucket = HashBucketPage::<K, V>::from_bytes(&guard.data);
                let removed = bucket.remove(key, value);
                if removed {
                    bucket.to_bytes(&mut guard.data);
                }
                (removed, removed && bucket.is_empty())
            };

            self.buffer_pool.unpin_page(bucket_page_id, removed)?;
            self.buffer_pool.unpin_page(self.directory_page_id, false)?;
            (removed, emptied)
        };

        if emptied {
            self.merge(key)?;
        }
        Ok(removed)
    }

    /// Merge the (empty) bucket `key` maps to into its split image,
    /// repeating while the merged bucket can keep collapsing.
    ///
    /// Runs under the table write latch. Stops quietly when the bucket is at
    /// depth zero, when it and its image are not merge partners, or when a
    /// concurrent insert repopulated it between the remove and this call.
    fn merge(&self, key: &K) -> Result<(), HashTableError> {
        let _write = self.table_latch.write();

        loop {
            let (dir_page, mut directory) = self.fetch_directory()?;
            let bucket_index = (self.hash(key) & directory.global_depth_mask()) as usize;
            let bucket_page_id = directory.bucket_page_id(bucket_index);
            let local_depth = directory.local_depth(bucket_index);

            if local_depth == 0 {
                self.buffer_pool.unpin_page(self.directory_page_id, false)?;
                return Ok(());
            }

            let image_index = directory.split_image_index(bucket_index);
            if directory.local_depth(image_index) != local_depth {
                self.buffer_pool.unpin_page(self.directory_page_id, false)?;
                return Ok(());
            }

            // Re-check emptiness: the latches were released between the
            // remove and this merge, so another transaction may have
            // repopulated the bucket
            let bucket_page = self.buffer_pool.fetch_page(bucket_page_id)?;
            let still_empty = {
                let guard = bucket_page.read();
                HashBucketPage::<K, V>::from_bytes(&guard.data).is_empty()
            };
            if !still_empty {
                self.buffer_pool.unpin_page(bucket_page_id, false)?;
                self.buffer_pool.unpin_page(self.directory_page_id, false)?;
                return Ok(());
            }

            self.buffer_pool.unpin_page(bucket_page_id, false)?;
            self.buffer_pool.delete_page(bucket_page_id)?;

            let image_page_id = directory.bucket_page_id(image_index);
            let new_depth = local_depth - 1;
            for i in 0..directory.size() {
                let page_id = directory.bucket_page_id(i);
                if page_id == bucket_page_id || page_id == image_page_id {
                    directory.set_bucket_page_id(i, image_page_id);
                    directory.set_local_depth(i, new_depth);
                }
            }

            while directory.can_shrink() {
                directory.decr_global_depth();
            }

            {
                let mut guard = dir_page.write();
                directory.to_bytes(&mut guard.data);
            }

            debug!(
                "merged bucket page {} into image page {}, global depth now {}",
                bucket_page_id,
                image_page_id,
                directory.global_depth()
            );

            self.buffer_pool.unpin_page(self.directory_page_id, true)?;
        }
    }

    pub fn global_depth(&self) -> Result<u32, HashTableError> {
        let _read = self.table_latch.read();
        let (_dir_page, directory) = self.fetch_directory()?;
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(directory.global_depth())
    }

    /// Number of distinct bucket pages currently reachable
    pub fn num_buckets(&self) -> Result<usize, HashTableError> {
        let _read = self.table_latch.read();
        let (_dir_page, directory) = self.fetch_directory()?;
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        Ok(directory.num_buckets())
    }

    /// Check the directory invariants
    pub fn verify_integrity(&self) -> Result<(), HashTableError> {
        let _read = self.table_latch.read();
        let (_dir_page, directory) = self.fetch_directory()?;
        self.buffer_pool.unpin_page(self.directory_page_id, false)?;
        directory.verify_integrity()
    }
}
