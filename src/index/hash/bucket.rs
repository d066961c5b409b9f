use crate::common::types::PAGE_SIZE;
use crate::index::hash::codec::FixedCodec;

/// Number of key/value slots a bucket page can hold.
///
/// Each slot costs its pair width plus two bits of bitmap; the formula
/// over-approximates and is then walked back until the layout fits the page.
pub fn bucket_capacity<K: FixedCodec, V: FixedCodec>() -> usize {
    let pair_size = K::ENCODED_SIZE + V::ENCODED_SIZE;
    let mut capacity = 4 * PAGE_SIZE / (4 * pair_size + 1);
    while 2 * capacity.div_ceil(8) + capacity * pair_size > PAGE_SIZE {
        capacity -= 1;
    }
    capacity
}

/// A bucket page of the extendible hash table.
///
/// Layout: an occupied bitmap, a readable bitmap, then fixed-width
/// key/value pairs. `occupied` records that a slot has ever held a pair;
/// `readable` records that it currently does. Removal clears only
/// `readable`, leaving a tombstone that later inserts may reuse.
pub struct HashBucketPage<K, V> {
    occupied: Vec<u8>,
    readable: Vec<u8>,
    pairs: Vec<(K, V)>,
}

impl<K: FixedCodec, V: FixedCodec> Default for HashBucketPage<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: FixedCodec, V: FixedCodec> HashBucketPage<K, V> {
    pub fn new() -> Self {
        let capacity = bucket_capacity::<K, V>();
        Self {
            occupied: vec![0; capacity.div_ceil(8)],
            readable: vec![0; capacity.div_ceil(8)],
            pairs: vec![(K::default(), V::default()); capacity],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let capacity = bucket_capacity::<K, V>();
        let bitmap_len = capacity.div_ceil(8);
        let pair_size = K::ENCODED_SIZE + V::ENCODED_SIZE;

        let occupied = bytes[0..bitmap_len].to_vec();
        let readable = bytes[bitmap_len..2 * bitmap_len].to_vec();

        let mut pairs = Vec::with_capacity(capacity);
        let base = 2 * bitmap_len;
        for i in 0..capacity {
            let off = base + i * pair_size;
            let key = K::decode_from(&bytes[off..off + K::ENCODED_SIZE]);
            let value =
                V::decode_from(&bytes[off + K::ENCODED_SIZE..off + pair_size]);
            pairs.push((key, value));
        }

        Self {
            occupied,
            readable,
            pairs,
        }
    }

    pub fn to_bytes(&self, bytes: &mut [u8]) {
        let bitmap_len = self.occupied.len();
        let pair_size = K::ENCODED_SIZE + V::ENCODED_SIZE;

        bytes[0..bitmap_len].copy_from_slice(&self.occupied);
        bytes[bitmap_len..2 * bitmap_len].copy_from_slice(&self.readable);

        let base = 2 * bitmap_len;
        for (i, (key, value)) in self.pairs.iter().enumerate() {
            let off = base + i * pair_size;
            key.encode_to(&mut bytes[off..off + K::ENCODED_SIZE]);
            value.encode_to(&mut bytes[off + K::ENCODED_SIZE..off + pair_size]);
        }
    }

    pub fn capacity(&self) -> usize {
        self.pairs.len()
    }

    fn is_readable(&self, idx: usize) -> bool {
        self.readable[idx / 8] & (1 << (idx % 8)) != 0
    }

    fn is_occupied(&self, idx: usize) -> bool {
        self.occupied[idx / 8] & (1 << (idx % 8)) != 0
    }

    fn set_readable(&mut self, idx: usize) {
        self.readable[idx / 8] |= 1 << (idx % 8);
    }

    fn clear_readable(&mut self, idx: usize) {
        self.readable[idx / 8] &= !(1 << (idx % 8));
    }

    fn set_occupied(&mut self, idx: usize) {
        self.occupied[idx / 8] |= 1 << (idx % 8);
    }

    /// Collect every value stored under `key`
    pub fn get_value(&self, key: &K) -> Vec<V> {
        let mut result = Vec::new();
        for i in 0..self.capacity() {
            if self.is_readable(i) && self.pairs[i].0 == *key {
                result.push(self.pairs[i].1.clone());
            }
        }
        result
    }

    /// Insert a pair into the first available slot.
    ///
    /// Returns false when the exact (key, value) pair is already present or
    /// the bucket is full. Tombstoned slots are reused.
    pub fn insert(&mut self, key: &K, value: &V) -> bool {
        let mut available = None;
        for i in 0..self.capacity() {
            if self.is_readable(i) {
                if self.pairs[i].0 == *key && self.pairs[i].1 == *value {
                    return false;
                }
            } else if available.is_none() {
                available = Some(i);
            }
        }

        match available {
            Some(i) => {
                self.set_occupied(i);
                self.set_readable(i);
                self.pairs[i] = (key.clone(), value.clone());
                true
            }
            None => false,
        }
    }

    /// Remove the matching pair, tombstoning its slot
    pub fn remove(&mut self, key: &K, value: &V) -> bool {
        for i in 0..self.capacity() {
            if self.is_readable(i) && self.pairs[i].0 == *key && self.pairs[i].1 == *value {
                self.clear_readable(i);
                return true;
            }
        }
        false
    }

    pub fn is_full(&self) -> bool {
        self.num_readable() == self.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.readable.iter().all(|&byte| byte == 0)
    }

    pub fn num_readable(&self) -> usize {
        self.readable
            .iter()
            .map(|byte| byte.count_ones() as usize)
            .sum()
    }

    /// Snapshot of every live pair, used when splitting a bucket
    pub fn readable_pairs(&self) -> Vec<(K, V)> {
        (0..self.capacity())
            .filter(|&i| self.is_readable(i))
            .map(|i| self.pairs[i].clone())
            .collect()
    }
}
