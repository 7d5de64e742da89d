//! Bounded, thread-safe LRU cache.
//!
//! The coordinator mirrors COMPLETED records here to skip store round-trips for
//! hot keys. Entries are never authoritative: callers re-check expiry on every
//! hit, and the cache plays no part in the conditional-write decision.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};

const NIL: usize = usize::MAX;

struct Node<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

/// Slab-backed doubly linked list plus a key index. `head` is the most recently
/// accessed entry, `tail` the eviction candidate.
struct LruState<K, V> {
    index: HashMap<K, usize>,
    nodes: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
}

impl<K, V> LruState<K, V>
where
    K: Eq + Hash + Clone,
{
    fn with_capacity(capacity: usize) -> Self {
        Self {
            index: HashMap::with_capacity(capacity),
            nodes: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }

    fn node(&self, slot: usize) -> &Node<K, V> {
        self.nodes[slot].as_ref().expect("linked slot is occupied")
    }

    fn node_mut(&mut self, slot: usize) -> &mut Node<K, V> {
        self.nodes[slot].as_mut().expect("linked slot is occupied")
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let node = self.node(slot);
            (node.prev, node.next)
        };
        if prev == NIL {
            self.head = next;
        } else {
            self.node_mut(prev).next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.node_mut(next).prev = prev;
        }
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        {
            let node = self.node_mut(slot);
            node.prev = NIL;
            node.next = old_head;
        }
        if old_head == NIL {
            self.tail = slot;
        } else {
            self.node_mut(old_head).prev = slot;
        }
        self.head = slot;
    }

    fn touch(&mut self, slot: usize) {
        if self.head != slot {
            self.unlink(slot);
            self.push_front(slot);
        }
    }

    fn remove_slot(&mut self, slot: usize) -> Node<K, V> {
        self.unlink(slot);
        self.free.push(slot);
        self.nodes[slot].take().expect("linked slot is occupied")
    }

    fn allocate(&mut self, node: Node<K, V>) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }
}

/// Fixed-capacity cache evicting the least recently accessed entry.
///
/// Both [`try_get`](Self::try_get) and [`set`](Self::set) count as an access.
/// All operations take O(1) expected time under a single mutex.
pub struct LocalCache<K, V> {
    capacity: usize,
    state: Mutex<LruState<K, V>>,
}

impl<K, V> LocalCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a cache holding at most `capacity` entries.
    ///
    /// Returns `None` when `capacity` is zero.
    pub fn new(capacity: usize) -> Option<Self> {
        if capacity == 0 {
            return None;
        }
        Some(Self {
            capacity,
            state: Mutex::new(LruState::with_capacity(capacity)),
        })
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // A panic while holding the lock cannot leave the list half-linked in a way
    // later calls depend on, so a poisoned lock is recovered.
    fn lock(&self) -> MutexGuard<'_, LruState<K, V>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns a copy of the cached value and marks it most recently used.
    pub fn try_get(&self, key: &K) -> Option<V> {
        let mut state = self.lock();
        let slot = *state.index.get(key)?;
        state.touch(slot);
        Some(state.node(slot).value.clone())
    }

    /// Inserts or replaces `key`, evicting the least recently used entry if full.
    pub fn set(&self, key: K, value: V) {
        let mut state = self.lock();
        if let Some(&slot) = state.index.get(&key) {
            state.node_mut(slot).value = value;
            state.touch(slot);
            return;
        }

        if state.index.len() >= self.capacity {
            let tail = state.tail;
            if tail != NIL {
                let evicted = state.remove_slot(tail);
                state.index.remove(&evicted.key);
            }
        }

        let slot = state.allocate(Node {
            key: key.clone(),
            value,
            prev: NIL,
            next: NIL,
        });
        state.push_front(slot);
        state.index.insert(key, slot);
    }

    /// Removes `key`, returning its value if present.
    pub fn delete(&self, key: &K) -> Option<V> {
        let mut state = self.lock();
        let slot = state.index.remove(key)?;
        Some(state.remove_slot(slot).value)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.lock().index.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut state = self.lock();
        *state = LruState::with_capacity(self.capacity);
    }
}

impl<K, V> std::fmt::Debug for LocalCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
