//! Dense node store for renumbered inputs.

use super::{NodeElement, NodeStore};
use crate::error::{StoreError, StoreResult};
use parking_lot::Mutex;
use std::sync::Arc;
use tileforge_core::arena::{ArenaVec, MmapArena};
use tileforge_core::{LatpLon, NodeId};

/// A flat `LatpLon` array indexed directly by node id. O(1) lookup with
/// no per-node overhead, but the input must have been renumbered so
/// that ids are dense from zero.
///
/// This store cannot tell "never inserted" apart from a node stored at
/// (0, 0); callers that need real membership tests use the sorted or
/// sharded stores instead.
pub struct CompactNodeStore {
	values: Mutex<ArenaVec<LatpLon>>,
}

impl CompactNodeStore {
	#[must_use]
	pub fn new(arena: Arc<MmapArena>) -> CompactNodeStore {
		CompactNodeStore {
			values: Mutex::new(ArenaVec::new(arena)),
		}
	}
}

impl NodeStore for CompactNodeStore {
	fn insert(&self, elements: &[NodeElement]) {
		let mut values = self.values.lock();
		for &(id, ll) in elements {
			let index = id as usize;
			if values.len() <= index {
				values
					.resize(index + 1, LatpLon::default())
					.expect("node store allocation failed");
			}
			values.set(index, ll);
		}
	}

	fn finalize(&self, _threads: usize) {}

	fn at(&self, id: NodeId) -> StoreResult<LatpLon> {
		self
			.values
			.lock()
			.get(id as usize)
			.ok_or(StoreError::NotFound(id))
	}

	fn size(&self) -> usize {
		self.values.lock().len()
	}

	fn contains(&self, _shard: usize, id: NodeId) -> bool {
		(id as usize) < self.values.lock().len()
	}
}
