//! A bounded FIFO read cache (§4.1: "Hits an in-memory cache first (per-client
//! + global)"). Deliberately simple — insertion-order eviction rather than a
//! full LRU — since the workload here is dominated by sequential delivery.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::message::Guid;

pub struct BoundedCache {
    capacity: usize,
    entries: HashMap<Guid, Arc<[u8]>>,
    order: VecDeque<Guid>,
}

impl BoundedCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&self, guid: &Guid) -> Option<Arc<[u8]>> {
        self.entries.get(guid).cloned()
    }

    pub fn insert(&mut self, guid: Guid, bytes: Arc<[u8]>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(guid, bytes).is_some() {
            return;
        }
        self.order.push_back(guid);
        while self.order.len() > self.capacity {
            if let Some(evict) = self.order.pop_front() {
                self.entries.remove(&evict);
            }
        }
    }

    pub fn remove(&mut self, guid: &Guid) {
        self.entries.remove(guid);
    }
}
