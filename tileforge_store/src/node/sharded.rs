//! Geographic sharding over any underlying node store.

use super::{NodeElement, NodeStore};
use crate::error::StoreResult;
use std::cell::Cell;
use tileforge_core::{LatpLon, NodeId, coordinates};

const SHARDS: usize = 8;

thread_local! {
	static LAST_SHARD: Cell<usize> = const { Cell::new(0) };
}

/// Assign a coordinate to one of eight world regions, chosen from its
/// z3 tile. Dense regions get their own shard so that a planet build
/// can work one region's nodes at a time.
#[must_use]
pub fn pick_shard(ll: &LatpLon) -> usize {
	let z3x = coordinates::lon2tilex(ll.lon_degrees(), 3) as usize;
	let z3y = coordinates::latp2tiley(ll.latp_degrees(), 3) as usize;

	match (z3x, z3y) {
		(4, 2) => return 4, // Central Europe
		(5, 2) => return 5, // Western Russia
		(4, 3) => return 6, // North Africa
		(5, 3) => return 7, // India
		_ => {}
	}

	match (z3x / 2, z3y / 2) {
		(3, 1) => 3, // Asia, Russia
		(1, 1) => 2, // North Atlantic Ocean and bordering countries
		(0, 1) => 1, // North America
		_ => 0,      // Arctic, Antarctica, Oceania
	}
}

/// Eight sub-stores, one per world region. Lookups probe the shard this
/// thread hit most recently first, so spatially coherent readers rarely
/// fall through.
pub struct ShardedNodeStore<S> {
	stores: Vec<S>,
}

impl<S: NodeStore> ShardedNodeStore<S> {
	pub fn new(create: impl Fn() -> S) -> ShardedNodeStore<S> {
		ShardedNodeStore {
			stores: (0..SHARDS).map(|_| create()).collect(),
		}
	}
}

impl<S: NodeStore> NodeStore for ShardedNodeStore<S> {
	fn insert(&self, elements: &[NodeElement]) {
		let mut per_store: Vec<Vec<NodeElement>> = vec![Vec::new(); SHARDS];
		for &(id, ll) in elements {
			per_store[pick_shard(&ll)].push((id, ll));
		}
		for (store, batch) in self.stores.iter().zip(per_store) {
			if !batch.is_empty() {
				store.insert(&batch);
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

	fn at(&self, id: NodeId) -> StoreResult<LatpLon> {
		let last = LAST_SHARD.get();
		for i in 0..SHARDS {
			let index = (last + i) % SHARDS;
			if self.stores[index].contains(0, id) {
				LAST_SHARD.set(index);
				return self.stores[index].at(id);
			}
		}
		self.stores[SHARDS - 1].at(id)
	}

	fn size(&self) -> usize {
		self.stores.iter().map(|s| s.size()).sum()
	}

	fn shards(&self) -> usize {
		SHARDS
	}

	fn contains(&self, shard: usize, id: NodeId) -> bool {
		self.stores[shard].contains(0, id)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::StoreError;
	use crate::node::BinarySearchNodeStore;
	use tileforge_core::coordinates::lat2latp;

	fn ll(lat: f64, lon: f64) -> LatpLon {
		LatpLon::from_degrees(lat2latp(lat), lon)
	}

	#[test]
	fn regions_pick_distinct_shards() {
		assert_eq!(pick_shard(&ll(50.0, 10.0)), 4); // Berlin-ish
		assert_eq!(pick_shard(&ll(55.0, 50.0)), 5); // Western Russia
		assert_eq!(pick_shard(&ll(40.0, -100.0)), 1); // North America
		assert_eq!(pick_shard(&ll(-35.0, 140.0)), 0); // Australia
	}

	#[test]
	fn round_trip_across_shards() {
		let store = ShardedNodeStore::new(BinarySearchNodeStore::new);
		let berlin = (1u64, ll(52.5, 13.4));
		let denver = (2u64, ll(39.7, -105.0));
		store.insert(&[berlin, denver]);
		store.finalize(1);

		assert_eq!(store.shards(), 8);
		assert_eq!(store.at(1), Ok(berlin.1));
		assert_eq!(store.at(2), Ok(denver.1));
		assert_eq!(store.at(3), Err(StoreError::NotFound(3)));
		assert_eq!(store.size(), 2);

		// The two nodes ended up in different shards.
		let holding: Vec<usize> = (0..8).filter(|s| store.contains(*s, 1) || store.contains(*s, 2)).collect();
		assert_eq!(holding.len(), 2);
	}
}
