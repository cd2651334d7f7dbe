//! The simplest node store: sixteen sorted vectors.

use super::{NodeElement, NodeStore, id_part, shard_part};
use crate::error::{StoreError, StoreResult};
use parking_lot::Mutex;
use tileforge_core::{LatpLon, NodeId};

const NODE_SHARDS: usize = 16;

/// Keeps `(low id, coordinate)` pairs in one append vector per
/// top-four-bits shard; `finalize` sorts, `at` binary-searches.
/// Fastest store for small extracts.
pub struct BinarySearchNodeStore {
	shards: [Mutex<Vec<(u32, LatpLon)>>; NODE_SHARDS],
}

impl BinarySearchNodeStore {
	#[must_use]
	pub fn new() -> BinarySearchNodeStore {
		BinarySearchNodeStore {
			shards: std::array::from_fn(|_| Mutex::new(Vec::new())),
		}
	}

	fn lookup(&self, id: NodeId) -> Option<LatpLon> {
		let shard = self.shards[shard_part(id)].lock();
		let low = id_part(id);
		shard
			.binary_search_by_key(&low, |e| e.0)
			.ok()
			.map(|i| shard[i].1)
	}
}

impl Default for BinarySearchNodeStore {
	fn default() -> Self {
		BinarySearchNodeStore::new()
	}
}

impl NodeStore for BinarySearchNodeStore {
	fn insert(&self, elements: &[NodeElement]) {
		// Group locally so each shard lock is taken once per batch.
		let mut per_shard: [Vec<(u32, LatpLon)>; NODE_SHARDS] = std::array::from_fn(|_| Vec::new());
		for &(id, ll) in elements {
			per_shard[shard_part(id)].push((id_part(id), ll));
		}
		for (shard, new_entries) in self.shards.iter().zip(per_shard) {
			if !new_entries.is_empty() {
				shard.lock().extend(new_entries);
			}
		}
	}

	fn finalize(&self, _threads: usize) {
		for shard in &self.shards {
			shard.lock().sort_unstable_by_key(|e| e.0);
		}
	}

	fn at(&self, id: NodeId) -> StoreResult<LatpLon> {
		self.lookup(id).ok_or(StoreError::NotFound(id))
	}

	fn size(&self) -> usize {
		self.shards.iter().map(|s| s.lock().len()).sum()
	}

	fn contains(&self, _shard: usize, id: NodeId) -> bool {
		self.lookup(id).is_some()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trip() {
		let store = BinarySearchNodeStore::new();
		store.insert(&[
			(1, LatpLon::new(10, 20)),
			(5, LatpLon::new(30, 40)),
		]);
		store.finalize(1);
		assert_eq!(store.at(1), Ok(LatpLon::new(10, 20)));
		assert_eq!(store.at(5), Ok(LatpLon::new(30, 40)));
		assert_eq!(store.at(2), Err(StoreError::NotFound(2)));
		assert_eq!(store.size(), 2);
	}

	#[test]
	fn ids_spread_over_internal_shards() {
		let store = BinarySearchNodeStore::new();
		let a = 7u64;
		let b = (3u64 << 32) | 7;
		store.insert(&[(a, LatpLon::new(1, 1)), (b, LatpLon::new(2, 2))]);
		store.finalize(1);
		assert_eq!(store.at(a), Ok(LatpLon::new(1, 1)));
		assert_eq!(store.at(b), Ok(LatpLon::new(2, 2)));
		assert!(store.contains(0, a));
		assert!(!store.contains(0, 8));
	}
}
