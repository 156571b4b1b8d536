//! Fixed-capacity LRU over page handles.
//!
//! Entries live in an arena of slots; recency is an explicit doubly-linked
//! list threaded through slot indices (head = most recent, tail = least).

use ahash::AHashMap;

#[derive(Debug)]
struct LruSlot<V> {
    key: usize,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Least-recently-used map from page number to page payload.
#[derive(Debug)]
pub struct PageLru<V> {
    l_slots: Vec<Option<LruSlot<V>>>,
    l_slots_free: Vec<usize>,
    dict_slot_by_key: AHashMap<usize, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    capacity: usize,
}

impl<V> PageLru<V> {
    /// Empty LRU holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            l_slots: Vec::with_capacity(capacity),
            l_slots_free: Vec::new(),
            dict_slot_by_key: AHashMap::with_capacity(capacity),
            head: None,
            tail: None,
            capacity,
        }
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.dict_slot_by_key.len()
    }

    /// No resident entries.
    pub fn is_empty(&self) -> bool {
        self.dict_slot_by_key.is_empty()
    }

    /// Maximum resident entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether `key` is resident, without touching recency.
    pub fn contains(&self, key: usize) -> bool {
        self.dict_slot_by_key.contains_key(&key)
    }

    /// Borrow the payload of `key` and mark it most recently used.
    pub fn get(&mut self, key: usize) -> Option<&V> {
        let n_slot = *self.dict_slot_by_key.get(&key)?;
        self.detach(n_slot);
        self.attach_front(n_slot);
        self.l_slots[n_slot].as_ref().map(|slot| &slot.value)
    }

    /// Insert or replace `key` as most recently used.
    ///
    /// Returns the evicted `(key, value)` when capacity was exceeded.
    pub fn insert(&mut self, key: usize, value: V) -> Option<(usize, V)> {
        if let Some(&n_slot) = self.dict_slot_by_key.get(&key) {
            if let Some(slot) = self.l_slots[n_slot].as_mut() {
                slot.value = value;
            }
            self.detach(n_slot);
            self.attach_front(n_slot);
            return None;
        }

        let evicted = if self.dict_slot_by_key.len() >= self.capacity {
            self.pop_lru()
        } else {
            None
        };

        let slot = LruSlot {
            key,
            value,
            prev: None,
            next: None,
        };
        let n_slot = match self.l_slots_free.pop() {
            Some(n_slot) => {
                self.l_slots[n_slot] = Some(slot);
                n_slot
            }
            None => {
                self.l_slots.push(Some(slot));
                self.l_slots.len() - 1
            }
        };
        self.dict_slot_by_key.insert(key, n_slot);
        self.attach_front(n_slot);
        evicted
    }

    /// Remove the least recently used entry.
    pub fn pop_lru(&mut self) -> Option<(usize, V)> {
        let n_slot = self.tail?;
        self.remove_slot(n_slot)
    }

    /// Remove `key` if resident.
    pub fn remove(&mut self, key: usize) -> Option<V> {
        let n_slot = *self.dict_slot_by_key.get(&key)?;
        self.remove_slot(n_slot).map(|(_, value)| value)
    }

    /// Keys from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<usize> {
        let mut l_keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(n_slot) = cursor {
            let Some(slot) = self.l_slots[n_slot].as_ref() else {
                break;
            };
            l_keys.push(slot.key);
            cursor = slot.next;
        }
        l_keys
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.l_slots.clear();
        self.l_slots_free.clear();
        self.dict_slot_by_key.clear();
        self.head = None;
        self.tail = None;
    }

    fn remove_slot(&mut self, n_slot: usize) -> Option<(usize, V)> {
        self.detach(n_slot);
        let slot = self.l_slots[n_slot].take()?;
        self.dict_slot_by_key.remove(&slot.key);
        self.l_slots_free.push(n_slot);
        Some((slot.key, slot.value))
    }

    fn detach(&mut self, n_slot: usize) {
        let (prev, next) = match self.l_slots[n_slot].as_ref() {
            Some(slot) => (slot.prev, slot.next),
            None => return,
        };
        match prev {
            Some(n_prev) => {
                if let Some(slot_prev) = self.l_slots[n_prev].as_mut() {
                    slot_prev.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n_next) => {
                if let Some(slot_next) = self.l_slots[n_next].as_mut() {
                    slot_next.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(slot) = self.l_slots[n_slot].as_mut() {
            slot.prev = None;
            slot.next = None;
        }
    }

    fn attach_front(&mut self, n_slot: usize) {
        let head_old = self.head;
        if let Some(slot) = self.l_slots[n_slot].as_mut() {
            slot.prev = None;
            slot.next = head_old;
        }
        if let Some(n_head) = head_old
            && let Some(slot_head) = self.l_slots[n_head].as_mut()
        {
            slot_head.prev = Some(n_slot);
        }
        self.head = Some(n_slot);
        if self.tail.is_none() {
            self.tail = Some(n_slot);
        }
    }
}
