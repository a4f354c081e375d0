//! Normalization of downstream status strings.

use dashmap::DashMap;

use super::OrderStatus;

/// Default number of distinct raw strings remembered
pub const DEFAULT_NORMALIZER_CAPACITY: usize = 256;

/// Maps free-form downstream statuses onto [`OrderStatus`].
///
/// Results are memoized in a bounded map. Once `capacity` distinct inputs
/// have been seen, new inputs are parsed every time and never cached.
pub struct StatusNormalizer {
    cache: DashMap<String, Option<OrderStatus>>,
    capacity: usize,
}

impl StatusNormalizer {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: DashMap::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn normalize(&self, raw: &str) -> Option<OrderStatus> {
        if let Some(hit) = self.cache.get(raw) {
            return *hit;
        }

        let parsed = parse_status(raw);
        // len() then insert may overshoot by the number of concurrent writers
        if self.cache.len() < self.capacity {
            self.cache.insert(raw.to_string(), parsed);
        }
        parsed
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for StatusNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_NORMALIZER_CAPACITY)
    }
}

fn parse_status(raw: &str) -> Option<OrderStatus> {
    let key: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect();

    match key.as_str() {
        "pending" | "new" | "pendingnew" => Some(OrderStatus::Pending),
        "submitted" | "sent" | "live" => Some(OrderStatus::Submitted),
        "accepted" | "acknowledged" | "ack" | "open" => Some(OrderStatus::Accepted),
        "partiallyfilled" | "partial" | "partialfill" => Some(OrderStatus::PartiallyFilled),
        "filled" | "done" | "executed" => Some(OrderStatus::Filled),
        "cancelled" | "canceled" => Some(OrderStatus::Cancelled),
        "rejected" => Some(OrderStatus::Rejected),
        "failed" | "error" => Some(OrderStatus::Failed),
        _ => None,
    }
}
