//! The `previous_response_id -> conversationId` cache (spec.md §9): a
//! short-lived convenience index, not the source of truth (the content
//! hash is). Bounded to 1,024 entries so long-running processes never
//! grow it without limit; eviction is plain insertion order (oldest
//! first), which is enough for a cache whose only job is "was this id
//! seen recently".

use std::collections::HashMap;
use std::collections::VecDeque;

const DEFAULT_CAPACITY: usize = 1_024;

/// Fixed-capacity FIFO map from a Responses-API `response.id` to the
/// conversation id it belongs to.
pub struct ResponseChainCache {
	capacity: usize,
	map: HashMap<String, String>,
	order: VecDeque<String>,
}

impl Default for ResponseChainCache {
	fn default() -> Self {
		Self::with_capacity(DEFAULT_CAPACITY)
	}
}

impl ResponseChainCache {
	pub fn with_capacity(capacity: usize) -> Self {
		Self { capacity, map: HashMap::new(), order: VecDeque::new() }
	}

	pub fn get(&self, response_id: &str) -> Option<String> {
		self.map.get(response_id).cloned()
	}

	/// Records `response_id -> conversation_id`, evicting the oldest
	/// entry first if the cache is already at capacity.
	pub fn insert(&mut self, response_id: String, conversation_id: String) {
		if self.map.contains_key(&response_id) {
			self.map.insert(response_id, conversation_id);
			return;
		}
		if self.order.len() >= self.capacity {
			if let Some(oldest) = self.order.pop_front() {
				self.map.remove(&oldest);
			}
		}
		self.order.push_back(response_id.clone());
		self.map.insert(response_id, conversation_id);
	}

	pub fn len(&self) -> usize {
		self.map.len()
	}

	pub fn is_empty(&self) -> bool {
		self.map.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_an_entry() {
		let mut cache = ResponseChainCache::default();
		cache.insert("resp_1".to_string(), "conv_a".to_string());
		assert_eq!(cache.get("resp_1").as_deref(), Some("conv_a"));
	}

	#[test]
	fn evicts_oldest_once_over_capacity() {
		let mut cache = ResponseChainCache::with_capacity(2);
		cache.insert("a".to_string(), "conv_a".to_string());
		cache.insert("b".to_string(), "conv_b".to_string());
		cache.insert("c".to_string(), "conv_c".to_string());
		assert_eq!(cache.len(), 2);
		assert_eq!(cache.get("a"), None);
		assert_eq!(cache.get("b").as_deref(), Some("conv_b"));
		assert_eq!(cache.get("c").as_deref(), Some("conv_c"));
	}

	#[test]
	fn missing_key_returns_none() {
		let cache = ResponseChainCache::default();
		assert_eq!(cache.get("nope"), None);
	}
}
