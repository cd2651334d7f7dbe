//! Append-and-sort way store holding resolved coordinates.

use super::WayStore;
use crate::error::{StoreError, StoreResult};
use parking_lot::Mutex;
use tileforge_core::{LatpLon, NodeId, WayId};

pub struct BinarySearchWayStore {
	ways: Mutex<Vec<(WayId, Vec<LatpLon>)>>,
}

impl BinarySearchWayStore {
	#[must_use]
	pub fn new() -> BinarySearchWayStore {
		BinarySearchWayStore {
			ways: Mutex::new(Vec::new()),
		}
	}

	fn lookup(&self, id: WayId) -> Option<Vec<LatpLon>> {
		let ways = self.ways.lock();
		ways
			.binary_search_by_key(&id, |w| w.0)
			.ok()
			.map(|i| ways[i].1.clone())
	}
}

impl Default for BinarySearchWayStore {
	fn default() -> Self {
		BinarySearchWayStore::new()
	}
}

impl WayStore for BinarySearchWayStore {
	fn insert_latplons(&self, ways: &[(WayId, Vec<LatpLon>)]) {
		self.ways.lock().extend_from_slice(ways);
	}

	fn insert_nodes(&self, _ways: &[(WayId, Vec<NodeId>)]) {
		panic!("BinarySearchWayStore stores latp/lon pairs, not node ids");
	}

	fn finalize(&self, _threads: usize) {
		self.ways.lock().sort_unstable_by_key(|w| w.0);
	}

	fn at(&self, id: WayId) -> StoreResult<Vec<LatpLon>> {
		self.lookup(id).ok_or(StoreError::NotFound(id))
	}

	fn size(&self) -> usize {
		self.ways.lock().len()
	}

	fn contains(&self, _shard: usize, id: WayId) -> bool {
		let ways = self.ways.lock();
		ways.binary_search_by_key(&id, |w| w.0).is_ok()
	}
}
