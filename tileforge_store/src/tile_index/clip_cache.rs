//! Shared cache of clipped geometries, reused down the tile pyramid.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tileforge_core::{TileXY, types::TileCoordinate};

const EVICT_AT: usize = 5_000;

type Key = (u8, TileXY, u64);

/// Caches the clip of an object to a tile, keyed
/// `(zoom, x, y, object id)`. Entries are immutable once inserted and
/// shared by reference count. Sharded by object id; a shard that grows
/// past its cap is reset wholesale.
pub struct ClipCache<G> {
	base_zoom: u8,
	shards: Vec<Mutex<(HashMap<Key, Arc<G>>, usize)>>,
}

impl<G> ClipCache<G> {
	#[must_use]
	pub fn new(threads: usize, base_zoom: u8) -> ClipCache<G> {
		let mut shards = Vec::new();
		shards.resize_with(threads.max(1) * 4, || Mutex::new((HashMap::new(), 0)));
		ClipCache { base_zoom, shards }
	}

	/// Look for a previously clipped version at z-1, z-2, ...
	#[must_use]
	pub fn get(&self, zoom: u8, x: TileCoordinate, y: TileCoordinate, object_id: u64) -> Option<Arc<G>> {
		let shard = self.shards[object_id as usize % self.shards.len()].lock();
		let (mut zoom, mut x, mut y) = (zoom, x, y);
		while zoom > 0 {
			zoom -= 1;
			x /= 2;
			y /= 2;
			if let Some(hit) = shard.0.get(&(zoom, TileXY::new(x, y), object_id)) {
				return Some(hit.clone());
			}
		}
		None
	}

	/// Remember the clip of `object_id` to the tile `(zoom, x, y)`.
	pub fn add(&self, zoom: u8, x: TileCoordinate, y: TileCoordinate, object_id: u64, clipped: G) {
		// Caching at the terminal zoom is pointless, nothing reuses it.
		if zoom >= self.base_zoom {
			return;
		}
		let mut shard = self.shards[object_id as usize % self.shards.len()].lock();
		shard.1 += 1;
		if shard.1 > EVICT_AT {
			shard.1 = 0;
			shard.0.clear();
		}
		shard.0.insert((zoom, TileXY::new(x, y), object_id), Arc::new(clipped));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hit_walks_up_the_pyramid() {
		let cache: ClipCache<String> = ClipCache::new(1, 14);
		cache.add(10, 4, 6, 99, "clip@10".to_string());

		// A descendant tile at z12 finds the z10 ancestor clip.
		let hit = cache.get(12, 17, 25, 99).expect("ancestor hit");
		assert_eq!(*hit, "clip@10");

		// A tile outside that ancestor misses.
		assert!(cache.get(12, 33, 25, 99).is_none());
		// Another object misses.
		assert!(cache.get(12, 17, 25, 100).is_none());
	}

	#[test]
	fn terminal_zoom_is_not_cached() {
		let cache: ClipCache<u32> = ClipCache::new(1, 14);
		cache.add(14, 0, 0, 1, 7);
		assert!(cache.get(15, 0, 0, 1).is_none());
	}

	#[test]
	fn shard_resets_when_full() {
		let cache: ClipCache<u32> = ClipCache::new(1, 14);
		// Same object id keeps hitting one shard.
		for i in 0..(EVICT_AT + 1) as u32 {
			cache.add(10, i as TileCoordinate % 1024, 0, 4, i);
		}
		// The shard was reset at the cap, so early entries are gone.
		assert!(cache.get(11, 0, 0, 4).is_none());
	}
}
