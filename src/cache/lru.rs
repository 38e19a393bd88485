//! Plain LRU store
//!
//! An index-linked recency list over a slot vector, with a hash index from
//! key to slot. Not synchronized: callers wrap it in their own lock.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// A cache entry with value and metadata
#[derive(Debug, Clone)]
pub struct CacheEntry<K, V> {
    /// The entry key
    pub key: K,
    /// The cached value
    pub value: V,
    /// When the entry was last written
    pub inserted_at: Instant,
    /// When the entry was last read or written
    pub last_accessed: Instant,
    /// Number of times this entry was read
    pub access_count: u64,
}

impl<K, V> CacheEntry<K, V> {
    fn new(key: K, value: V) -> Self {
        let now = Instant::now();
        Self {
            key,
            value,
            inserted_at: now,
            last_accessed: now,
            access_count: 0,
        }
    }

    /// Time since the entry was last written
    pub fn age(&self) -> Duration {
        self.inserted_at.elapsed()
    }

    /// Check if this entry is older than `ttl`
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.age() > ttl
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
        self.access_count += 1;
    }

    fn rewrite(&mut self, value: V) {
        let now = Instant::now();
        self.value = value;
        self.inserted_at = now;
        self.last_accessed = now;
    }
}

/// Node in the LRU linked list
#[derive(Debug)]
struct Slot<K, V> {
    entry: CacheEntry<K, V>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Least-recently-used store with a fixed capacity.
///
/// `head` is the most recently used slot, `tail` the least. Freed slots are
/// recycled through `free` so the slot vector never grows past `max_size`.
#[derive(Debug)]
pub struct LruStore<K, V> {
    max_size: usize,
    index: HashMap<K, usize>,
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K, V> LruStore<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a store holding at most `max_size` entries (minimum 1)
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            max_size,
            index: HashMap::with_capacity(max_size),
            slots: Vec::with_capacity(max_size),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Look up an entry and promote it to most recently used
    pub fn get(&mut self, key: &K) -> Option<&CacheEntry<K, V>> {
        let idx = *self.index.get(key)?;
        self.move_to_head(idx);
        let slot = self.slot_mut(idx)?;
        slot.entry.touch();
        Some(&slot.entry)
    }

    /// Look up an entry without changing its recency
    pub fn peek(&self, key: &K) -> Option<&CacheEntry<K, V>> {
        let idx = *self.index.get(key)?;
        self.slot(idx).map(|s| &s.entry)
    }

    /// Insert or overwrite `key`, promoting it to most recently used.
    ///
    /// Returns the entry evicted to make room, if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<CacheEntry<K, V>> {
        if let Some(&idx) = self.index.get(&key) {
            if let Some(slot) = self.slot_mut(idx) {
                slot.entry.rewrite(value);
            }
            self.move_to_head(idx);
            return None;
        }

        let evicted = if self.index.len() >= self.max_size {
            self.pop_lru()
        } else {
            None
        };

        let slot = Slot {
            entry: CacheEntry::new(key.clone(), value),
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.push_to_head(idx);

        evicted
    }

    /// Remove an entry
    pub fn remove(&mut self, key: &K) -> Option<CacheEntry<K, V>> {
        let idx = self.index.remove(key)?;
        self.unlink(idx);
        self.free.push(idx);
        self.slots.get_mut(idx).and_then(Option::take).map(|s| s.entry)
    }

    /// Remove and return the least recently used entry
    pub fn pop_lru(&mut self) -> Option<CacheEntry<K, V>> {
        let tail = self.tail?;
        let key = self.slot(tail)?.entry.key.clone();
        self.remove(&key)
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    /// Keys from most to least recently used
    pub fn keys(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            match self.slot(idx) {
                Some(slot) => {
                    keys.push(slot.entry.key.clone());
                    cursor = slot.next;
                }
                None => break,
            }
        }
        keys
    }

    /// Iterate over resident entries in no particular order
    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry<K, V>> {
        self.slots.iter().flatten().map(|s| &s.entry)
    }

    // Internal methods

    fn slot(&self, idx: usize) -> Option<&Slot<K, V>> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, idx: usize) -> Option<&mut Slot<K, V>> {
        self.slots.get_mut(idx).and_then(Option::as_mut)
    }

    fn move_to_head(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.push_to_head(idx);
    }

    fn push_to_head(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(slot) = self.slot_mut(idx) {
            slot.prev = None;
            slot.next = old_head;
        }
        match old_head {
            Some(h) => {
                if let Some(slot) = self.slot_mut(h) {
                    slot.prev = Some(idx);
                }
            }
            // List was empty
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    fn unlink(&mut self, idx: usize) {
        let Some((prev, next)) = self.slot(idx).map(|s| (s.prev, s.next)) else {
            return;
        };

        match prev {
            Some(p) => {
                if let Some(slot) = self.slot_mut(p) {
                    slot.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(slot) = self.slot_mut(n) {
                    slot.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(slot) = self.slot_mut(idx) {
            slot.prev = None;
            slot.next = None;
        }
    }
}
