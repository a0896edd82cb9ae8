//! Bounded in-memory exchange store owned by a correlator.
//!
//! Fixed-capacity FIFO queue plus map: inserting a new id at capacity evicts
//! the oldest entry.

use std::collections::{HashMap, VecDeque};

use graphlens_core::CapturedExchange;

pub struct ExchangeStore {
    capacity: usize,
    entries: HashMap<String, CapturedExchange>,
    order: VecDeque<String>,
}

impl ExchangeStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Insert or replace. Returns the evicted exchange, if any.
    pub fn insert(&mut self, exchange: CapturedExchange) -> Option<CapturedExchange> {
        if let Some(existing) = self.entries.get_mut(&exchange.id) {
            *existing = exchange;
            return None;
        }

        let evicted = if self.order.len() >= self.capacity {
            self.order
                .pop_front()
                .and_then(|oldest| self.entries.remove(&oldest))
        } else {
            None
        };

        self.order.push_back(exchange.id.clone());
        self.entries.insert(exchange.id.clone(), exchange);
        evicted
    }

    pub fn get(&self, id: &str) -> Option<&CapturedExchange> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut CapturedExchange> {
        self.entries.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
