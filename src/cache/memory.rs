use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{CacheError, CacheLookup, OrderCache};
use crate::model::Order;

// ============================================================================
// Bounded In-Memory Cache (LRU)
// ============================================================================
//
// Fixed-capacity order cache with least-recently-used eviction. Entries live
// in a slab-backed doubly linked list ordered by recency; a side map gives
// O(1) key lookup. Every operation takes the single mutex once, so lookup +
// promotion and insert + eviction each appear atomic to concurrent callers.
//
// ============================================================================

/// Sentinel slot index for list ends.
const NIL: usize = usize::MAX;

struct Entry {
    key: String,
    order: Order,
    prev: usize,
    next: usize,
}

struct LruList {
    capacity: usize,
    map: HashMap<String, usize>,
    slots: Vec<Option<Entry>>,
    free: Vec<usize>,
    /// Most recently used.
    head: usize,
    /// Least recently used; evicted first.
    tail: usize,
}

impl LruList {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            map: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }

    fn get(&mut self, key: &str) -> Option<Order> {
        let idx = *self.map.get(key)?;
        self.detach(idx);
        self.attach_front(idx);
        self.slots[idx].as_ref().map(|e| e.order.clone())
    }

    fn put(&mut self, key: &str, order: Order) {
        if let Some(&idx) = self.map.get(key) {
            // Replace the snapshot and promote; never mutate in place.
            if let Some(entry) = self.slots[idx].as_mut() {
                entry.order = order;
            }
            self.detach(idx);
            self.attach_front(idx);
            return;
        }

        if self.map.len() >= self.capacity {
            self.evict_tail();
        }

        let entry = Entry {
            key: key.to_string(),
            order,
            prev: NIL,
            next: NIL,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(entry);
                idx
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.map.insert(key.to_string(), idx);
        self.attach_front(idx);
    }

    fn evict_tail(&mut self) {
        let tail = self.tail;
        if tail == NIL {
            return;
        }
        self.detach(tail);
        if let Some(evicted) = self.slots[tail].take() {
            self.map.remove(&evicted.key);
        }
        self.free.push(tail);
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = match self.slots[idx].as_ref() {
            Some(entry) => (entry.prev, entry.next),
            None => return,
        };
        match prev {
            NIL => self.head = next,
            _ => {
                if let Some(entry) = self.slots[prev].as_mut() {
                    entry.next = next;
                }
            }
        }
        match next {
            NIL => self.tail = prev,
            _ => {
                if let Some(entry) = self.slots[next].as_mut() {
                    entry.prev = prev;
                }
            }
        }
        if let Some(entry) = self.slots[idx].as_mut() {
            entry.prev = NIL;
            entry.next = NIL;
        }
    }

    fn attach_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(entry) = self.slots[idx].as_mut() {
            entry.prev = NIL;
            entry.next = old_head;
        }
        match old_head {
            NIL => self.tail = idx,
            _ => {
                if let Some(entry) = self.slots[old_head].as_mut() {
                    entry.prev = idx;
                }
            }
        }
        self.head = idx;
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

/// Capacity-bounded LRU cache safe for arbitrary concurrent callers.
pub struct MemoryCache {
    inner: Mutex<LruList>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruList::new(capacity)),
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[async_trait]
impl OrderCache for MemoryCache {
    async fn get(&self, uid: &str) -> Result<CacheLookup, CacheError> {
        let mut inner = self.inner.lock().await;
        match inner.get(uid) {
            Some(order) => Ok(CacheLookup::Hit(order)),
            None => Ok(CacheLookup::Miss),
        }
    }

    async fn put(&self, uid: &str, order: &Order) -> Result<(), CacheError> {
        let mut inner = self.inner.lock().await;
        inner.put(uid, order.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_fixtures::sample_order;

    #[tokio::test]
    async fn missing_key_is_a_miss_not_an_error() {
        let cache = MemoryCache::new(4);
        assert_eq!(cache.get("absent").await.unwrap(), CacheLookup::Miss);
    }

    #[tokio::test]
    async fn put_then_get_returns_the_snapshot() {
        let cache = MemoryCache::new(4);
        let order = sample_order("uid-1");
        cache.put("uid-1", &order).await.unwrap();
        assert_eq!(cache.get("uid-1").await.unwrap(), CacheLookup::Hit(order));
    }

    #[tokio::test]
    async fn overflow_evicts_exactly_the_least_recently_used_key() {
        let cache = MemoryCache::new(3);
        for uid in ["a", "b", "c"] {
            cache.put(uid, &sample_order(uid)).await.unwrap();
        }
        cache.put("d", &sample_order("d")).await.unwrap();

        assert_eq!(cache.get("a").await.unwrap(), CacheLookup::Miss);
        for uid in ["b", "c", "d"] {
            assert!(matches!(
                cache.get(uid).await.unwrap(),
                CacheLookup::Hit(_)
            ));
        }
        assert_eq!(cache.len().await, 3);
    }

    #[tokio::test]
    async fn get_promotes_an_entry_out_of_eviction_order() {
        let cache = MemoryCache::new(3);
        for uid in ["a", "b", "c"] {
            cache.put(uid, &sample_order(uid)).await.unwrap();
        }
        // Touch "a" so "b" becomes the eviction candidate.
        assert!(matches!(
            cache.get("a").await.unwrap(),
            CacheLookup::Hit(_)
        ));
        cache.put("d", &sample_order("d")).await.unwrap();

        assert!(matches!(cache.get("a").await.unwrap(), CacheLookup::Hit(_)));
        assert_eq!(cache.get("b").await.unwrap(), CacheLookup::Miss);
    }

    #[tokio::test]
    async fn put_for_an_existing_key_replaces_and_promotes() {
        let cache = MemoryCache::new(2);
        cache.put("a", &sample_order("a")).await.unwrap();
        cache.put("b", &sample_order("b")).await.unwrap();

        let mut replacement = sample_order("a");
        replacement.track_number = "UPDATED".to_string();
        cache.put("a", &replacement).await.unwrap();

        // "b" is now the LRU entry and gets evicted by the next insert.
        cache.put("c", &sample_order("c")).await.unwrap();
        assert_eq!(cache.get("b").await.unwrap(), CacheLookup::Miss);
        match cache.get("a").await.unwrap() {
            CacheLookup::Hit(order) => assert_eq!(order.track_number, "UPDATED"),
            CacheLookup::Miss => panic!("replaced entry must stay cached"),
        }
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn slots_are_reused_after_eviction() {
        let cache = MemoryCache::new(2);
        for i in 0..10 {
            let uid = format!("uid-{i}");
            cache.put(&uid, &sample_order(&uid)).await.unwrap();
        }
        assert_eq!(cache.len().await, 2);
        assert!(matches!(
            cache.get("uid-9").await.unwrap(),
            CacheLookup::Hit(_)
        ));
        assert!(matches!(
            cache.get("uid-8").await.unwrap(),
            CacheLookup::Hit(_)
        ));
    }

    #[tokio::test]
    async fn concurrent_writers_never_exceed_capacity() {
        use std::sync::Arc;

        let cache = Arc::new(MemoryCache::new(8));
        let mut handles = Vec::new();
        for task in 0..4 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    let uid = format!("t{task}-{i}");
                    cache.put(&uid, &sample_order(&uid)).await.unwrap();
                    let _ = cache.get(&uid).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(cache.len().await <= 8);
    }
}
