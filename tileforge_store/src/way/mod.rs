//! Way stores: ordered coordinate sequences keyed by way id.
//!
//! A store either accepts pre-resolved coordinates
//! (`requires_nodes() == false`) or node ids that it resolves through a
//! node store at lookup time. Either way, `at` hands back the resolved
//! coordinate sequence.

mod binary_search;
mod sharded;
mod sorted;

pub use binary_search::BinarySearchWayStore;
pub use sharded::ShardedWayStore;
pub use sorted::SortedWayStore;

use crate::error::StoreResult;
use tileforge_core::{LatpLon, NodeId, WayId};

pub trait WayStore: Send + Sync {
	/// Whether this store wants node ids rather than coordinates.
	fn requires_nodes(&self) -> bool {
		false
	}

	/// Insert pre-resolved ways. Panics on stores that require node ids.
	fn insert_latplons(&self, ways: &[(WayId, Vec<LatpLon>)]);

	/// Insert ways as node id lists. Panics on stores that don't.
	fn insert_nodes(&self, ways: &[(WayId, Vec<NodeId>)]);

	/// Called at thread-local batch boundaries.
	fn batch_start(&self) {}

	/// Must be called exactly once before any `at`.
	fn finalize(&self, threads: usize);

	/// Resolve a way to its coordinate sequence.
	fn at(&self, id: WayId) -> StoreResult<Vec<LatpLon>>;

	fn size(&self) -> usize;

	fn shards(&self) -> usize {
		1
	}

	fn contains(&self, shard: usize, id: WayId) -> bool;
}
