//! Geographic sharding over any underlying way store.

use super::WayStore;
use crate::error::StoreResult;
use crate::node::NodeStore;
use std::cell::Cell;
use std::sync::Arc;
use tileforge_core::{LatpLon, NodeId, WayId};

thread_local! {
	static LAST_SHARD: Cell<usize> = const { Cell::new(0) };
}

/// One sub-store per node-store shard; each way lives in the shard that
/// holds most of its nodes.
pub struct ShardedWayStore<S> {
	stores: Vec<S>,
	node_store: Arc<dyn NodeStore>,
}

impl<S: WayStore> ShardedWayStore<S> {
	pub fn new(create: impl Fn() -> S, node_store: Arc<dyn NodeStore>) -> ShardedWayStore<S> {
		ShardedWayStore {
			stores: (0..node_store.shards()).map(|_| create()).collect(),
			node_store,
		}
	}

	fn pick_shard(&self, nodes: &[NodeId]) -> usize {
		let mut counts = vec![0usize; self.stores.len()];
		for node in nodes {
			for (shard, count) in counts.iter_mut().enumerate() {
				if self.node_store.contains(shard, *node) {
					*count += 1;
					break;
				}
			}
		}
		counts
			.iter()
			.enumerate()
			.max_by_key(|(_, c)| **c)
			.map_or(0, |(shard, _)| shard)
	}
}

impl<S: WayStore> WayStore for ShardedWayStore<S> {
	fn requires_nodes(&self) -> bool {
		true
	}

	fn insert_latplons(&self, _ways: &[(WayId, Vec<LatpLon>)]) {
		panic!("ShardedWayStore stores node ids, not latp/lon pairs");
	}

	fn insert_nodes(&self, ways: &[(WayId, Vec<NodeId>)]) {
		let mut per_store: Vec<Vec<(WayId, Vec<NodeId>)>> = vec![Vec::new(); self.stores.len()];
		for (id, nodes) in ways {
			per_store[self.pick_shard(nodes)].push((*id, nodes.clone()));
		}
		for (store, batch) in self.stores.iter().zip(per_store) {
			if !batch.is_empty() {
				store.insert_nodes(&batch);
			}
		}
	}

	fn batch_start(&self) {
		for store in &self.stores {
			store.batch_start();
		}
	}

	fn finalize(&self, threads: usize) {
		for store in &self.stores {
			store.finalize(threads);
		}
	}

	fn at(&self, id: WayId) -> StoreResult<Vec<LatpLon>> {
		let last = LAST_SHARD.get();
		let n = self.stores.len();
		for i in 0..n {
			let index = (last + i) % n;
			if self.stores[index].contains(0, id) {
				LAST_SHARD.set(index);
				return self.stores[index].at(id);
			}
		}
		self.stores[n - 1].at(id)
	}

	fn size(&self) -> usize {
		self.stores.iter().map(|s| s.size()).sum()
	}

	fn shards(&self) -> usize {
		self.stores.len()
	}

	fn contains(&self, shard: usize, id: WayId) -> bool {
		self.stores[shard].contains(0, id)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::StoreError;
	use crate::node::{BinarySearchNodeStore, ShardedNodeStore};
	use crate::way::SortedWayStore;
	use tileforge_core::arena::MmapArena;
	use tileforge_core::coordinates::lat2latp;

	fn ll(lat: f64, lon: f64) -> LatpLon {
		LatpLon::from_degrees(lat2latp(lat), lon)
	}

	#[test]
	fn ways_follow_their_nodes() {
		let node_store: Arc<dyn NodeStore> =
			Arc::new(ShardedNodeStore::new(BinarySearchNodeStore::new));
		// Two nodes in Europe, one in North America.
		node_store.insert(&[
			(1, ll(52.0, 13.0)),
			(2, ll(52.0, 13.1)),
			(3, ll(40.0, -100.0)),
		]);
		node_store.finalize(1);

		let arena = Arc::new(MmapArena::new_anonymous());
		let store = ShardedWayStore::new(
			|| SortedWayStore::new(true, node_store.clone(), arena.clone()),
			node_store.clone(),
		);
		store.insert_nodes(&[(100, vec![1, 2]), (101, vec![3])]);
		store.batch_start();
		store.finalize(1);

		assert_eq!(store.shards(), 8);
		assert_eq!(store.size(), 2);
		assert_eq!(store.at(100), Ok(vec![ll(52.0, 13.0), ll(52.0, 13.1)]));
		assert_eq!(store.at(101), Ok(vec![ll(40.0, -100.0)]));
		assert_eq!(store.at(102), Err(StoreError::NotFound(102)));

		// The two ways landed in different shards.
		let holding: Vec<usize> =
			(0..8).filter(|s| store.contains(*s, 100) || store.contains(*s, 101)).collect();
		assert_eq!(holding.len(), 2);
	}
}
