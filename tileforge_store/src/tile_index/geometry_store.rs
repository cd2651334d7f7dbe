//! Arenas for materialised geometries, written through leased shards.

use parking_lot::Mutex;

const HANDLE_OFFSET_BITS: u32 = 48;

/// One lane of materialised geometry (points, linestrings, ...),
/// sharded over the worker threads.
///
/// Writers take a [`StoreLease`] — a shard popped from a free list
/// under a short mutex, used exclusively, and returned on scope exit —
/// so the write path is contention-free.
pub struct GeometryStore<G> {
	shards: Vec<Mutex<Vec<G>>>,
	available: Mutex<Vec<usize>>,
}

impl<G: Clone> GeometryStore<G> {
	#[must_use]
	pub fn new(threads: usize) -> GeometryStore<G> {
		let threads = threads.max(1);
		let mut shards = Vec::new();
		shards.resize_with(threads, || Mutex::new(Vec::new()));
		GeometryStore {
			shards,
			available: Mutex::new((0..threads).collect()),
		}
	}

	/// Acquire a shard for exclusive writing.
	pub fn lease(&self) -> StoreLease<'_, G> {
		let shard = self
			.available
			.lock()
			.pop()
			.expect("no geometry store shard available to lease");
		StoreLease { store: self, shard }
	}

	/// Fetch a stored geometry by handle.
	#[must_use]
	pub fn get(&self, handle: u64) -> G {
		let shard = (handle >> HANDLE_OFFSET_BITS) as usize;
		let offset = (handle & ((1 << HANDLE_OFFSET_BITS) - 1)) as usize;
		self.shards[shard].lock()[offset].clone()
	}

	/// Total stored geometries across all shards.
	#[must_use]
	pub fn len(&self) -> usize {
		self.shards.iter().map(|s| s.lock().len()).sum()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Exclusive access to one shard of a [`GeometryStore`]; returned to
/// the free list on drop.
pub struct StoreLease<'a, G: Clone> {
	store: &'a GeometryStore<G>,
	shard: usize,
}

impl<G: Clone> StoreLease<'_, G> {
	/// Append a geometry, returning its handle.
	pub fn add(&self, geometry: G) -> u64 {
		let mut shard = self.store.shards[self.shard].lock();
		let offset = shard.len() as u64;
		shard.push(geometry);
		((self.shard as u64) << HANDLE_OFFSET_BITS) | offset
	}
}

impl<G: Clone> Drop for StoreLease<'_, G> {
	fn drop(&mut self) {
		self.store.available.lock().push(self.shard);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn store_and_fetch_through_leases() {
		let store: GeometryStore<String> = GeometryStore::new(2);
		let a = {
			let lease = store.lease();
			lease.add("hello".to_string())
		};
		let b = {
			let lease = store.lease();
			lease.add("world".to_string())
		};
		assert_eq!(store.get(a), "hello");
		assert_eq!(store.get(b), "world");
		assert_eq!(store.len(), 2);
	}

	#[test]
	fn leases_are_exclusive_and_returned() {
		let store: GeometryStore<u32> = GeometryStore::new(2);
		let l1 = store.lease();
		let l2 = store.lease();
		// Distinct shards while both leases are held.
		assert_ne!(l1.add(1) >> HANDLE_OFFSET_BITS, l2.add(2) >> HANDLE_OFFSET_BITS);
		drop(l1);
		drop(l2);
		// Both shards are leasable again.
		let _l3 = store.lease();
		let _l4 = store.lease();
	}
}
