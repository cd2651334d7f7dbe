//! An append-only vector whose storage lives in an [`MmapArena`].

use super::{ArenaSlice, MmapArena};
use anyhow::Result;
use std::marker::PhantomData;
use std::sync::Arc;

const CHUNK_BYTES: usize = 1 << 20;

/// A chunk-list vector over arena storage. Pushes are amortised O(1),
/// random access is O(1), and existing elements never move.
pub struct ArenaVec<T: Copy> {
	arena: Arc<MmapArena>,
	chunks: Vec<ArenaSlice>,
	len: usize,
	per_chunk: usize,
	_marker: PhantomData<T>,
}

impl<T: Copy> ArenaVec<T> {
	#[must_use]
	pub fn new(arena: Arc<MmapArena>) -> ArenaVec<T> {
		ArenaVec {
			arena,
			chunks: Vec::new(),
			len: 0,
			per_chunk: (CHUNK_BYTES / size_of::<T>()).max(1),
			_marker: PhantomData,
		}
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.len
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	pub fn push(&mut self, value: T) -> Result<()> {
		let index = self.len;
		if index == self.chunks.len() * self.per_chunk {
			let chunk = self.arena.allocate(self.per_chunk * size_of::<T>())?;
			self.chunks.push(chunk);
		}
		let chunk = &self.chunks[index / self.per_chunk];
		let offset = index % self.per_chunk;
		// The chunk was handed out exclusively to this vector and `T` is
		// Copy, so a raw typed write is fine.
		unsafe {
			let base = chunk.bytes_mut().as_mut_ptr().cast::<T>();
			base.add(offset).write_unaligned(value);
		}
		self.len += 1;
		Ok(())
	}

	/// Grow with `value` until `len` elements are present.
	pub fn resize(&mut self, len: usize, value: T) -> Result<()> {
		while self.len < len {
			self.push(value)?;
		}
		Ok(())
	}

	#[must_use]
	pub fn get(&self, index: usize) -> Option<T> {
		if index >= self.len {
			return None;
		}
		let chunk = &self.chunks[index / self.per_chunk];
		let offset = index % self.per_chunk;
		Some(unsafe {
			chunk
				.bytes()
				.as_ptr()
				.cast::<T>()
				.add(offset)
				.read_unaligned()
		})
	}

	pub fn set(&mut self, index: usize, value: T) {
		assert!(index < self.len);
		let chunk = &self.chunks[index / self.per_chunk];
		let offset = index % self.per_chunk;
		unsafe {
			let base = chunk.bytes_mut().as_mut_ptr().cast::<T>();
			base.add(offset).write_unaligned(value);
		}
	}

	pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
		(0..self.len).map(|i| self.get(i).unwrap())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn push_get_across_chunks() -> Result<()> {
		let arena = Arc::new(MmapArena::new_anonymous());
		let mut v: ArenaVec<u64> = ArenaVec::new(arena);
		let n = 200_000;
		for i in 0..n {
			v.push(i * 3)?;
		}
		assert_eq!(v.len(), n as usize);
		assert_eq!(v.get(0), Some(0));
		assert_eq!(v.get(199_999), Some(599_997));
		assert_eq!(v.get(200_000), None);
		assert_eq!(v.iter().step_by(100_000).collect::<Vec<_>>(), vec![0, 300_000]);
		Ok(())
	}

	#[test]
	fn resize_and_set() -> Result<()> {
		let arena = Arc::new(MmapArena::new_anonymous());
		let mut v: ArenaVec<u32> = ArenaVec::new(arena);
		v.resize(10, 7)?;
		assert_eq!(v.get(9), Some(7));
		v.set(9, 42);
		assert_eq!(v.get(9), Some(42));
		Ok(())
	}
}
