//! Constant-time node store for inputs sorted by type then id.
//!
//! Nodes are grouped 65,536 ids at a time (256 chunks of 256 ids).
//! Each group is a single arena allocation:
//!
//! ```text
//! [chunk mask: 32 bytes]
//! [chunk offsets: u16 per present chunk, scaled by 16]
//! [chunks..., each 16-byte aligned relative to the offset base]
//! ```
//!
//! A chunk holds a 32-byte node mask, a flags word, and either raw
//! `LatpLon` pairs or a compressed block: first latp and lon verbatim,
//! then zig-zag-delta varbyte streams for the rest. Compression is
//! chosen per chunk, only when it is strictly smaller and both stream
//! lengths fit in 10 bits.
//!
//! Worker threads buffer locally and publish whole groups; partial
//! groups at batch boundaries go to an orphanage that `finalize` merges.

use super::{NodeElement, NodeStore};
use crate::error::{StoreError, StoreResult};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tileforge_core::arena::{ArenaSlice, MmapArena};
use tileforge_core::codec;
use tileforge_core::{LatpLon, NodeId};

const CHUNK_SIZE: u64 = 256;
const GROUP_SIZE: u64 = 256;
const IDS_PER_GROUP: u64 = CHUNK_SIZE * GROUP_SIZE;
const CHUNK_ALIGNMENT: usize = 16;
const FLAG_COMPRESSED: u32 = 1 << 31;

// 256K group slots cover 2^34 ids, about twice the current planet.
const MAX_GROUPS: usize = 256 * 1024;

static NEXT_STORE_ID: AtomicUsize = AtomicUsize::new(1);

struct WorkerState {
	store_id: usize,
	collecting_orphans: bool,
	group_start: Option<u64>,
	nodes: Arc<Mutex<Vec<NodeElement>>>,
}

struct ChunkCache {
	store_id: usize,
	chunk: i64,
	latps: Vec<i32>,
	lons: Vec<i32>,
}

thread_local! {
	static WORKERS: RefCell<Vec<WorkerState>> = const { RefCell::new(Vec::new()) };
	static CACHE: RefCell<Vec<ChunkCache>> = const { RefCell::new(Vec::new()) };
}

pub struct SortedNodeStore {
	store_id: usize,
	compress: bool,
	arena: Arc<MmapArena>,
	groups: Vec<OnceLock<ArenaSlice>>,
	orphanage: Mutex<BTreeMap<u64, Vec<NodeElement>>>,
	worker_buffers: Mutex<Vec<Arc<Mutex<Vec<NodeElement>>>>>,
	total_nodes: AtomicU64,
	total_groups: AtomicU64,
	total_chunks: AtomicU64,
}

impl SortedNodeStore {
	#[must_use]
	pub fn new(compress: bool, arena: Arc<MmapArena>) -> SortedNodeStore {
		let mut groups = Vec::new();
		groups.resize_with(MAX_GROUPS, OnceLock::new);
		SortedNodeStore {
			store_id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
			compress,
			arena,
			groups,
			orphanage: Mutex::new(BTreeMap::new()),
			worker_buffers: Mutex::new(Vec::new()),
			total_nodes: AtomicU64::new(0),
			total_groups: AtomicU64::new(0),
			total_chunks: AtomicU64::new(0),
		}
	}

	fn with_worker<R>(&self, f: impl FnOnce(&mut WorkerState) -> R) -> R {
		WORKERS.with(|workers| {
			let mut workers = workers.borrow_mut();
			if let Some(pos) = workers.iter().position(|w| w.store_id == self.store_id) {
				return f(&mut workers[pos]);
			}
			let nodes = Arc::new(Mutex::new(Vec::new()));
			self.worker_buffers.lock().push(nodes.clone());
			workers.push(WorkerState {
				store_id: self.store_id,
				collecting_orphans: true,
				group_start: None,
				nodes,
			});
			let last = workers.len() - 1;
			f(&mut workers[last])
		})
	}

	fn collect_orphans(&self, orphans: &[NodeElement]) {
		let group = orphans[0].0 / IDS_PER_GROUP;
		self.orphanage.lock().entry(group).or_default().extend_from_slice(orphans);
	}

	/// Encode and publish one complete, sorted group.
	fn publish_group(&self, nodes: &[NodeElement]) {
		assert!(!nodes.is_empty() && nodes.len() as u64 <= IDS_PER_GROUP);
		let group_index = (nodes[0].0 / IDS_PER_GROUP) as usize;
		assert!(group_index < MAX_GROUPS, "node id beyond group table");

		self.total_nodes.fetch_add(nodes.len() as u64, Ordering::Relaxed);
		self.total_groups.fetch_add(1, Ordering::Relaxed);

		// Split into chunks of 256 ids.
		let mut chunks: Vec<(u64, &[NodeElement])> = Vec::new();
		let mut start = 0;
		for i in 0..=nodes.len() {
			let chunk_of = |id: NodeId| (id % IDS_PER_GROUP) / CHUNK_SIZE;
			if i == nodes.len() || (i > 0 && chunk_of(nodes[i].0) != chunk_of(nodes[start].0)) {
				chunks.push((chunk_of(nodes[start].0), &nodes[start..i]));
				start = i;
			}
		}
		self.total_chunks.fetch_add(chunks.len() as u64, Ordering::Relaxed);

		let mut chunk_mask = [0u8; 32];
		for (chunk, _) in &chunks {
			chunk_mask[(chunk / 8) as usize] |= 1 << (chunk % 8);
		}

		let offsets_base = 32 + 2 * chunks.len();
		let mut blob = vec![0u8; offsets_base];
		blob[..32].copy_from_slice(&chunk_mask);

		for (i, (_, chunk_nodes)) in chunks.iter().enumerate() {
			let offset = blob.len() - offsets_base;
			assert!(offset % CHUNK_ALIGNMENT == 0);
			let scaled = offset / CHUNK_ALIGNMENT;
			assert!(scaled <= usize::from(u16::MAX), "group chunk data too large");
			blob[32 + 2 * i..32 + 2 * i + 2].copy_from_slice(&(scaled as u16).to_le_bytes());

			encode_chunk(&mut blob, chunk_nodes, self.compress);
			let pad = blob.len().next_multiple_of(CHUNK_ALIGNMENT) - blob.len();
			blob.extend(std::iter::repeat_n(0u8, pad));
		}
		// Decoders may over-read this much.
		blob.extend(std::iter::repeat_n(0u8, codec::PADDING));

		let slice = self.arena.allocate(blob.len()).expect("node store allocation failed");
		unsafe { slice.bytes_mut() }.copy_from_slice(&blob);
		assert!(
			self.groups[group_index].set(slice).is_ok(),
			"node group {group_index} published twice"
		);
	}

	fn lookup(&self, id: NodeId) -> StoreResult<LatpLon> {
		let group_index = (id / IDS_PER_GROUP) as usize;
		let chunk = ((id % IDS_PER_GROUP) / CHUNK_SIZE) as usize;
		let bit = (id % CHUNK_SIZE) as usize;

		let group = self
			.groups
			.get(group_index)
			.and_then(|g| g.get())
			.ok_or(StoreError::NotFound(id))?;
		let data = unsafe { group.bytes() };

		let chunk_rank = mask_rank(&data[0..32], chunk).ok_or(StoreError::NotFound(id))?;
		let n_chunks = mask_count(&data[0..32]);
		let offsets_base = 32 + 2 * n_chunks;
		let scaled = u16::from_le_bytes(data[32 + 2 * chunk_rank..32 + 2 * chunk_rank + 2].try_into().unwrap());
		let chunk_base = offsets_base + scaled as usize * CHUNK_ALIGNMENT;

		let chunk_data = &data[chunk_base..];
		let node_rank = mask_rank(&chunk_data[0..32], bit).ok_or(StoreError::NotFound(id))?;
		let flags = u32::from_le_bytes(chunk_data[32..36].try_into().unwrap());

		if flags & FLAG_COMPRESSED == 0 {
			let at = 36 + node_rank * 8;
			return Ok(LatpLon::new(
				i32::from_le_bytes(chunk_data[at..at + 4].try_into().unwrap()),
				i32::from_le_bytes(chunk_data[at + 4..at + 8].try_into().unwrap()),
			));
		}

		let n = mask_count(&chunk_data[0..32]);
		let global_chunk = (group_index * GROUP_SIZE as usize + chunk) as i64;
		CACHE.with(|cache| {
			let mut cache = cache.borrow_mut();
			let pos = match cache.iter().position(|c| c.store_id == self.store_id) {
				Some(pos) => pos,
				None => {
					cache.push(ChunkCache {
						store_id: self.store_id,
						chunk: -1,
						latps: Vec::new(),
						lons: Vec::new(),
					});
					cache.len() - 1
				}
			};
			let entry = &mut cache[pos];
			if entry.chunk != global_chunk {
				decode_chunk(chunk_data, flags, n, entry);
				entry.chunk = global_chunk;
			}
			Ok(LatpLon::new(entry.latps[node_rank], entry.lons[node_rank]))
		})
	}
}

fn encode_chunk(blob: &mut Vec<u8>, nodes: &[NodeElement], compress: bool) {
	let mut node_mask = [0u8; 32];
	for (id, _) in nodes {
		let bit = (id % CHUNK_SIZE) as usize;
		node_mask[bit / 8] |= 1 << (bit % 8);
	}
	blob.extend_from_slice(&node_mask);

	let k = nodes.len();
	if compress && k > 1 {
		let latps: Vec<i32> = nodes.iter().map(|n| n.1.latp).collect();
		let lons: Vec<i32> = nodes.iter().map(|n| n.1.lon).collect();
		let mut latp_deltas = vec![0u32; k - 1];
		let mut lon_deltas = vec![0u32; k - 1];
		codec::zigzag_delta_encode(&latps[1..], &mut latp_deltas, latps[0]);
		codec::zigzag_delta_encode(&lons[1..], &mut lon_deltas, lons[0]);

		let mut latp_stream = vec![0u8; codec::max_compressed_bytes(k - 1)];
		let mut lon_stream = vec![0u8; codec::max_compressed_bytes(k - 1)];
		let latp_len = codec::encode(&latp_deltas, &mut latp_stream);
		let lon_len = codec::encode(&lon_deltas, &mut lon_stream);

		let compressed = 8 + latp_len + lon_len;
		if compressed < k * 8 && latp_len < 1024 && lon_len < 1024 {
			let flags = FLAG_COMPRESSED | ((latp_len as u32) << 10) | lon_len as u32;
			blob.extend_from_slice(&flags.to_le_bytes());
			blob.extend_from_slice(&latps[0].to_le_bytes());
			blob.extend_from_slice(&lons[0].to_le_bytes());
			blob.extend_from_slice(&latp_stream[..latp_len]);
			blob.extend_from_slice(&lon_stream[..lon_len]);
			return;
		}
	}

	blob.extend_from_slice(&0u32.to_le_bytes());
	for (_, ll) in nodes {
		blob.extend_from_slice(&ll.latp.to_le_bytes());
		blob.extend_from_slice(&ll.lon.to_le_bytes());
	}
}

fn decode_chunk(chunk_data: &[u8], flags: u32, n: usize, out: &mut ChunkCache) {
	let latp_len = ((flags >> 10) & 0x3FF) as usize;
	let first_latp = i32::from_le_bytes(chunk_data[36..40].try_into().unwrap());
	let first_lon = i32::from_le_bytes(chunk_data[40..44].try_into().unwrap());

	let mut deltas = vec![0u32; n - 1];
	codec::decode(&chunk_data[44..], &mut deltas);
	out.latps.clear();
	out.latps.resize(n, 0);
	out.latps[0] = first_latp;
	codec::zigzag_delta_decode(&deltas, &mut out.latps[1..], first_latp);

	codec::decode(&chunk_data[44 + latp_len..], &mut deltas);
	out.lons.clear();
	out.lons.resize(n, 0);
	out.lons[0] = first_lon;
	codec::zigzag_delta_decode(&deltas, &mut out.lons[1..], first_lon);
}

/// Number of set bits in a 32-byte mask.
fn mask_count(mask: &[u8]) -> usize {
	mask.iter().map(|b| b.count_ones() as usize).sum()
}

/// Dense rank of `bit` among the set bits, or None if it is clear.
fn mask_rank(mask: &[u8], bit: usize) -> Option<usize> {
	if mask[bit / 8] & (1 << (bit % 8)) == 0 {
		return None;
	}
	let mut rank = mask_count(&mask[..bit / 8]);
	rank += (mask[bit / 8] & ((1u8 << (bit % 8)) - 1)).count_ones() as usize;
	Some(rank)
}

impl NodeStore for SortedNodeStore {
	fn insert(&self, elements: &[NodeElement]) {
		if elements.is_empty() {
			return;
		}
		self.with_worker(|worker| {
			let mut local = worker.nodes.lock();
			if worker.group_start.is_none() {
				worker.group_start = Some(elements[0].0 / IDS_PER_GROUP * IDS_PER_GROUP);
			}

			let mut i = 0;
			while worker.collecting_orphans && i < elements.len() {
				let el = elements[i];
				if el.0 >= worker.group_start.unwrap() + IDS_PER_GROUP {
					worker.collecting_orphans = false;
					worker.group_start = Some(el.0 / IDS_PER_GROUP * IDS_PER_GROUP);
					if !local.is_empty() {
						self.collect_orphans(&local);
						local.clear();
					}
				} else {
					local.push(el);
					i += 1;
				}
			}

			while i < elements.len() {
				let el = elements[i];
				if el.0 >= worker.group_start.unwrap() + IDS_PER_GROUP {
					if !local.is_empty() {
						self.publish_group(&local);
						local.clear();
					}
					worker.group_start = Some(el.0 / IDS_PER_GROUP * IDS_PER_GROUP);
				}
				local.push(el);
				i += 1;
			}
		});
	}

	fn batch_start(&self) {
		self.with_worker(|worker| {
			worker.collecting_orphans = true;
			worker.group_start = None;
			let mut local = worker.nodes.lock();
			if !local.is_empty() {
				self.collect_orphans(&local);
				local.clear();
			}
		});
	}

	fn finalize(&self, _threads: usize) {
		for buffer in self.worker_buffers.lock().drain(..) {
			let mut buffer = buffer.lock();
			if !buffer.is_empty() {
				self.collect_orphans(&buffer);
				buffer.clear();
			}
		}

		// Orphans may come from different workers, so sort each group.
		let orphanage = std::mem::take(&mut *self.orphanage.lock());
		for (_, mut nodes) in orphanage {
			nodes.sort_unstable_by_key(|e| e.0);
			self.publish_group(&nodes);
		}

		log::debug!(
			"SortedNodeStore: {} groups, {} chunks, {} nodes",
			self.total_groups.load(Ordering::Relaxed),
			self.total_chunks.load(Ordering::Relaxed),
			self.total_nodes.load(Ordering::Relaxed),
		);
	}

	fn at(&self, id: NodeId) -> StoreResult<LatpLon> {
		self.lookup(id)
	}

	fn size(&self) -> usize {
		self.total_nodes.load(Ordering::Relaxed) as usize
	}

	fn contains(&self, _shard: usize, id: NodeId) -> bool {
		self.lookup(id).is_ok()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn new_store(compress: bool) -> SortedNodeStore {
		SortedNodeStore::new(compress, Arc::new(MmapArena::new_anonymous()))
	}

	#[test]
	fn round_trip_small() {
		let store = new_store(true);
		store.insert(&[(1, LatpLon::new(10, 20)), (5, LatpLon::new(30, 40))]);
		store.batch_start();
		store.finalize(1);
		assert_eq!(store.at(1), Ok(LatpLon::new(10, 20)));
		assert_eq!(store.at(5), Ok(LatpLon::new(30, 40)));
		assert_eq!(store.at(2), Err(StoreError::NotFound(2)));
		assert_eq!(store.size(), 2);
	}

	#[test]
	fn round_trip_many_groups() {
		for compress in [false, true] {
			let store = new_store(compress);
			let nodes: Vec<NodeElement> = (0..200_000u64)
				.map(|i| {
					let id = i * 3;
					(id, LatpLon::new(500_000_000 + (i as i32 % 1000), -(i as i32)))
				})
				.collect();
			for batch in nodes.chunks(10_000) {
				store.insert(batch);
			}
			store.batch_start();
			store.finalize(1);

			assert_eq!(store.size(), 200_000);
			for &(id, ll) in nodes.iter().step_by(997) {
				assert_eq!(store.at(id), Ok(ll), "id {id} (compress={compress})");
			}
			assert_eq!(store.at(1), Err(StoreError::NotFound(1)));
			assert_eq!(store.at(599_999 * 3 + 1), Err(StoreError::NotFound(599_999 * 3 + 1)));
		}
	}

	#[test]
	fn compressed_chunks_round_trip_spatially_coherent_data() {
		let store = new_store(true);
		// Consecutive ids with tiny coordinate deltas compress well.
		let nodes: Vec<NodeElement> = (0..65_536u64)
			.map(|i| (i, LatpLon::new(512_000_000 + i as i32, -1_000_000 + 2 * i as i32)))
			.collect();
		store.insert(&nodes);
		store.batch_start();
		store.finalize(1);
		for &(id, ll) in nodes.iter().step_by(1111) {
			assert_eq!(store.at(id), Ok(ll));
		}
	}

	#[test]
	fn orphans_from_multiple_batches_merge() {
		let store = new_store(true);
		// Two batches landing in the same group, as if from two workers.
		store.insert(&[(10, LatpLon::new(1, 1)), (20, LatpLon::new(2, 2))]);
		store.batch_start();
		store.insert(&[(15, LatpLon::new(3, 3))]);
		store.batch_start();
		store.finalize(1);
		assert_eq!(store.at(10), Ok(LatpLon::new(1, 1)));
		assert_eq!(store.at(15), Ok(LatpLon::new(3, 3)));
		assert_eq!(store.at(20), Ok(LatpLon::new(2, 2)));
	}
}
