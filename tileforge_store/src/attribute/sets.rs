//! Attribute sets and the global set table.

use super::{AttributeKeyStore, AttributePair, AttributePairStore, AttributeValue, HOT_POOL_SIZE};
use crate::error::StoreResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// The complete attributes of one output object, as a set of pair ids.
///
/// Small sets use a fixed layout of four 16-bit slots for hot-pool ids
/// and four 32-bit slots for anything else; bigger sets spill into a
/// vector. `canonicalize` sorts the ids so that equality and hashing
/// see one representation per multiset of pairs.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AttributeSet {
	Small { hot: [u16; 4], cold: [u32; 4] },
	Large(Vec<u32>),
}

impl AttributeSet {
	#[must_use]
	pub fn new() -> AttributeSet {
		AttributeSet::Small {
			hot: [0; 4],
			cold: [0; 4],
		}
	}

	/// Add a pair id. Slot zero is the empty sentinel, so id 0 never
	/// appears in a set.
	pub fn add_pair_id(&mut self, id: u32) {
		debug_assert!(id != 0);
		match self {
			AttributeSet::Small { hot, cold } => {
				if id < HOT_POOL_SIZE as u32
					&& let Some(slot) = hot.iter_mut().find(|s| **s == 0)
				{
					*slot = id as u16;
					return;
				}
				if let Some(slot) = cold.iter_mut().find(|s| **s == 0) {
					*slot = id;
					return;
				}
				let mut ids = self.pair_ids();
				ids.push(id);
				*self = AttributeSet::Large(ids);
			}
			AttributeSet::Large(ids) => ids.push(id),
		}
	}

	/// All pair ids in this set, in storage order.
	#[must_use]
	pub fn pair_ids(&self) -> Vec<u32> {
		match self {
			AttributeSet::Small { hot, cold } => hot
				.iter()
				.map(|id| u32::from(*id))
				.chain(cold.iter().copied())
				.filter(|id| *id != 0)
				.collect(),
			AttributeSet::Large(ids) => ids.clone(),
		}
	}

	#[must_use]
	pub fn num_pairs(&self) -> usize {
		match self {
			AttributeSet::Small { hot, cold } => {
				hot.iter().filter(|id| **id != 0).count() + cold.iter().filter(|id| **id != 0).count()
			}
			AttributeSet::Large(ids) => ids.len(),
		}
	}

	/// Rebuild into the canonical representation: ids deduplicated and
	/// ascending, the layout chosen from the multiset alone. Equal
	/// multisets end up bit-identical regardless of insertion order.
	pub fn canonicalize(&mut self) {
		let mut ids = self.pair_ids();
		ids.sort_unstable();
		ids.dedup();

		let n_hot = ids.iter().take_while(|id| **id < HOT_POOL_SIZE as u32).count();
		let in_hot_slots = n_hot.min(4);
		if ids.len() - in_hot_slots > 4 {
			*self = AttributeSet::Large(ids);
			return;
		}

		let mut hot = [0u16; 4];
		let mut cold = [0u32; 4];
		for (slot, id) in hot.iter_mut().zip(&ids[..in_hot_slots]) {
			*slot = *id as u16;
		}
		for (slot, id) in cold.iter_mut().zip(&ids[in_hot_slots..]) {
			*slot = *id;
		}
		*self = AttributeSet::Small { hot, cold };
	}
}

impl Default for AttributeSet {
	fn default() -> Self {
		AttributeSet::new()
	}
}

struct SetTable {
	sets: Vec<AttributeSet>,
	lookup: Option<HashMap<AttributeSet, u32>>,
}

/// The global store of attribute sets, pairs and keys.
pub struct AttributeStore {
	pub keys: Arc<AttributeKeyStore>,
	pub pairs: AttributePairStore,
	table: Mutex<SetTable>,
	lookups: AtomicU64,
}

impl AttributeStore {
	#[must_use]
	pub fn new() -> AttributeStore {
		let keys = Arc::new(AttributeKeyStore::new());
		let pairs = AttributePairStore::new(keys.clone());
		// Position 0 holds the empty set.
		let empty = AttributeSet::new();
		let mut lookup = HashMap::new();
		lookup.insert(empty.clone(), 0);
		AttributeStore {
			keys,
			pairs,
			table: Mutex::new(SetTable {
				sets: vec![empty],
				lookup: Some(lookup),
			}),
			lookups: AtomicU64::new(0),
		}
	}

	/// Intern a pair and add its id to `set`.
	pub fn add_attribute(
		&self,
		set: &mut AttributeSet,
		key: &str,
		value: AttributeValue,
		min_zoom: u8,
	) -> StoreResult<()> {
		let pair = AttributePair {
			key_index: self.keys.key_to_index(key)?,
			min_zoom,
			value,
		};
		set.add_pair_id(self.pairs.add(pair)?);
		Ok(())
	}

	/// Intern a finished set, returning its id. Equal sets (as
	/// multisets of pairs) always return the same id.
	pub fn add_set(&self, mut set: AttributeSet) -> u32 {
		set.canonicalize();
		self.lookups.fetch_add(1, Ordering::Relaxed);

		let mut table = self.table.lock();
		let lookup = table
			.lookup
			.as_ref()
			.expect("attribute store already finalised");
		if let Some(id) = lookup.get(&set) {
			return *id;
		}
		let id = table.sets.len() as u32;
		table.sets.push(set.clone());
		table.lookup.as_mut().unwrap().insert(set, id);
		id
	}

	/// The pairs of a stored set, in canonical order.
	#[must_use]
	pub fn get(&self, id: u32) -> Vec<Arc<AttributePair>> {
		let table = self.table.lock();
		table.sets[id as usize]
			.pair_ids()
			.into_iter()
			.map(|pair_id| self.pairs.get(pair_id))
			.collect()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.table.lock().sets.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() <= 1
	}

	/// Drop the reverse map once reading is finished; only the forward
	/// table is needed to write tiles.
	pub fn done_reading(&self) {
		self.table.lock().lookup = None;
	}

	pub fn report_size(&self) {
		log::debug!(
			"attributes: {} sets, {} pairs, {} keys, {} lookups",
			self.len(),
			self.pairs.len(),
			self.keys.len(),
			self.lookups.load(Ordering::Relaxed)
		);
	}
}

impl Default for AttributeStore {
	fn default() -> Self {
		AttributeStore::new()
	}
}
