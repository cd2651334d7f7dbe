//! Interning of attribute pairs to 32-bit ids, with a hot pool.

use super::{AttributeKeyStore, AttributePair, AttributeValue};
use crate::error::{StoreError, StoreResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

const SHARD_BITS: u32 = 8;
/// Shards of the pair id space; shard 0 is the hot pool.
pub const PAIR_SHARDS: usize = 1 << SHARD_BITS;
/// The hot pool is kept small enough that its ids fit in 16 bits.
pub const HOT_POOL_SIZE: usize = 65_536;
const COLD_SHARD_CAP: usize = 1 << (32 - SHARD_BITS);

/// Predict whether a pair is worth a slot in the hot pool.
///
/// Hot pairs are pairs we think are likely to be re-used, like
/// `tunnel=0` or `highway=yes`. We commit to the prediction before
/// knowing whether it was right; a miss only wastes a slot.
///
/// Note the name test follows the original four-byte check: any key of
/// four or more bytes whose first three are `nam` counts as name-like.
#[must_use]
pub fn is_hot(pair: &AttributePair, key_name: &str) -> bool {
	match &pair.value {
		AttributeValue::Bool(_) => true,
		AttributeValue::Float(v) => v.ceil() == *v && *v >= 0.0 && *v <= 25.0,
		AttributeValue::String(s) => {
			// Only IDish strings: lowercase letters, dash, underscore.
			if !s.bytes().all(|c| c == b'-' || c == b'_' || c.is_ascii_lowercase()) {
				return false;
			}
			!(key_name.len() >= 4 && key_name.as_bytes().starts_with(b"nam"))
		}
	}
}

struct PairShard {
	pairs: Vec<Arc<AttributePair>>,
	lookup: BTreeMap<Arc<AttributePair>, u32>,
}

/// The sharded pair dictionary. Shard 0 is the densely packed hot pool
/// so that 16-bit references to it stay possible; the cold shards
/// spread insert contention.
pub struct AttributePairStore {
	keys: Arc<AttributeKeyStore>,
	shards: Vec<Mutex<PairShard>>,
}

impl AttributePairStore {
	#[must_use]
	pub fn new(keys: Arc<AttributeKeyStore>) -> AttributePairStore {
		let mut shards = Vec::with_capacity(PAIR_SHARDS);
		for _ in 0..PAIR_SHARDS {
			shards.push(Mutex::new(PairShard {
				pairs: Vec::new(),
				lookup: BTreeMap::new(),
			}));
		}
		// Slot 0 of the hot pool is the empty sentinel.
		let sentinel = Arc::new(AttributePair {
			key_index: 0,
			min_zoom: 0,
			value: AttributeValue::Bool(false),
		});
		{
			let mut hot = shards[0].lock();
			hot.lookup.insert(sentinel.clone(), 0);
			hot.pairs.push(sentinel);
		}
		AttributePairStore { keys, shards }
	}

	/// Intern a pair, returning its id. Two equal pairs always get the
	/// same id.
	pub fn add(&self, pair: AttributePair) -> StoreResult<u32> {
		let key_name = self.keys.key(pair.key_index);
		if is_hot(&pair, &key_name) {
			let mut hot = self.shards[0].lock();
			if let Some(id) = hot.lookup.get(&pair) {
				return Ok(*id);
			}
			if hot.pairs.len() < HOT_POOL_SIZE {
				let offset = hot.pairs.len() as u32;
				let pair = Arc::new(pair);
				hot.lookup.insert(pair.clone(), offset);
				hot.pairs.push(pair);
				return Ok(offset);
			}
			// Hot pool full; the prediction was cheap, the pair is not.
		}

		let mut hasher = DefaultHasher::new();
		pair.hash(&mut hasher);
		let shard = (hasher.finish() as usize % (PAIR_SHARDS - 1)) + 1;

		let mut cold = self.shards[shard].lock();
		if let Some(id) = cold.lookup.get(&pair) {
			return Ok(*id);
		}
		let offset = cold.pairs.len();
		if offset >= COLD_SHARD_CAP {
			return Err(StoreError::CapacityExceeded("attribute pair shard is full"));
		}
		let id = ((shard as u32) << (32 - SHARD_BITS)) | offset as u32;
		let pair = Arc::new(pair);
		cold.lookup.insert(pair.clone(), id);
		cold.pairs.push(pair);
		Ok(id)
	}

	/// Fetch a pair by id.
	#[must_use]
	pub fn get(&self, id: u32) -> Arc<AttributePair> {
		let shard = (id >> (32 - SHARD_BITS)) as usize;
		let offset = (id & (u32::MAX >> SHARD_BITS)) as usize;
		self.shards[shard].lock().pairs[offset].clone()
	}

	/// Total number of interned pairs, the empty sentinel included.
	#[must_use]
	pub fn len(&self) -> usize {
		self.shards.iter().map(|s| s.lock().pairs.len()).sum()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() <= 1
	}

	/// Number of pairs in the hot pool.
	#[must_use]
	pub fn hot_len(&self) -> usize {
		self.shards[0].lock().pairs.len()
	}
}
