//! Interning of attribute keys to 16-bit indices.

use crate::error::{StoreError, StoreResult};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A process-wide `String -> u16` dictionary. Index 0 is reserved so
/// that zero can mean "empty"; at most 65,534 distinct keys fit.
///
/// Readers go through a lock-free copy-on-write snapshot; only writers
/// take the mutex.
pub struct AttributeKeyStore {
	keys: ArcSwap<Vec<String>>,
	writer: Mutex<HashMap<String, u16>>,
}

impl AttributeKeyStore {
	#[must_use]
	pub fn new() -> AttributeKeyStore {
		AttributeKeyStore {
			keys: ArcSwap::from_pointee(vec![String::new()]),
			writer: Mutex::new(HashMap::new()),
		}
	}

	/// Intern `key`, returning its index.
	pub fn key_to_index(&self, key: &str) -> StoreResult<u16> {
		let mut writer = self.writer.lock();
		if let Some(index) = writer.get(key) {
			return Ok(*index);
		}

		let snapshot = self.keys.load();
		let index = snapshot.len();
		// We expect more like 50-100 keys.
		if index >= usize::from(u16::MAX) {
			return Err(StoreError::CapacityExceeded("more than 65,534 unique keys"));
		}

		let mut next = (**snapshot).clone();
		next.push(key.to_string());
		self.keys.store(Arc::new(next));
		writer.insert(key.to_string(), index as u16);
		Ok(index as u16)
	}

	/// The key for an index. Index 0 is the empty sentinel.
	#[must_use]
	pub fn key(&self, index: u16) -> String {
		self.keys.load()[usize::from(index)].clone()
	}

	/// A stable snapshot of all keys, indexed by key index.
	#[must_use]
	pub fn snapshot(&self) -> Arc<Vec<String>> {
		self.keys.load_full()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.keys.load().len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() <= 1
	}
}

impl Default for AttributeKeyStore {
	fn default() -> Self {
		AttributeKeyStore::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn interning_is_stable() -> StoreResult<()> {
		let store = AttributeKeyStore::new();
		let highway = store.key_to_index("highway")?;
		let name = store.key_to_index("name")?;
		assert_eq!(store.key_to_index("highway")?, highway);
		assert_ne!(highway, name);
		assert_ne!(highway, 0);
		assert_eq!(store.key(highway), "highway");
		assert_eq!(store.key(0), "");
		assert_eq!(store.len(), 3);
		Ok(())
	}

	#[test]
	fn snapshot_survives_later_writes() -> StoreResult<()> {
		let store = AttributeKeyStore::new();
		store.key_to_index("a")?;
		let snap = store.snapshot();
		store.key_to_index("b")?;
		assert_eq!(snap.len(), 2);
		assert_eq!(store.len(), 3);
		Ok(())
	}
}
