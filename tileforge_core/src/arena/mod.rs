//! Process-wide backing storage for the big stores.
//!
//! The node and way stores allocate billions of small records. Serving
//! them from one arena keeps that data on pages the OS can evict and
//! refault, instead of growing the heap. The arena is backed either by
//! anonymous memory or by a directory of large files added as pressure
//! grows; file segments are removed again on drop.
//!
//! Allocations are bump-allocated within a segment and live until the
//! arena is dropped. `deallocate` locates the owning segment and
//! records the bytes as released; segments are only unmapped at
//! teardown.

mod vec;

pub use vec::ArenaVec;

use anyhow::{Context, Result};
use memmap2::MmapMut;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::path::PathBuf;

/// All allocations are aligned to this.
pub const ALIGNMENT: usize = 32;

const ANON_SEGMENT_SIZE: usize = 64_000_000;
const FILE_SEGMENT_SIZE: usize = 1_024_000_000;

/// A pointer-plus-length pair handed out by [`MmapArena::allocate`].
///
/// The memory stays valid and stable for the lifetime of the arena.
#[derive(Clone, Copy)]
pub struct ArenaSlice {
	ptr: *mut u8,
	len: usize,
}

// The arena never moves or unmaps a segment before drop, so slices may
// travel between the worker threads that fill and read them.
unsafe impl Send for ArenaSlice {}
unsafe impl Sync for ArenaSlice {}

impl ArenaSlice {
	#[must_use]
	pub fn len(&self) -> usize {
		self.len
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	/// # Safety
	/// The arena that produced this slice must still be alive, and no
	/// other reference to the same bytes may be active.
	#[must_use]
	pub unsafe fn bytes_mut(&self) -> &mut [u8] {
		unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
	}

	/// # Safety
	/// The arena that produced this slice must still be alive, and all
	/// writes to it must have finished.
	#[must_use]
	pub unsafe fn bytes(&self) -> &[u8] {
		unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
	}
}

struct Segment {
	map: MmapMut,
	used: usize,
	freed: usize,
	path: Option<PathBuf>,
}

enum Backing {
	Anonymous,
	Directory { dir: PathBuf },
}

struct Inner {
	segments: Vec<Segment>,
	backing: Backing,
}

/// Growable storage serving 32-byte-aligned allocations.
pub struct MmapArena {
	inner: Mutex<Inner>,
}

impl MmapArena {
	/// An arena backed by anonymous memory.
	#[must_use]
	pub fn new_anonymous() -> MmapArena {
		MmapArena {
			inner: Mutex::new(Inner {
				segments: Vec::new(),
				backing: Backing::Anonymous,
			}),
		}
	}

	/// An arena backed by files below `dir`, which is created if absent.
	/// The files are deleted when the arena is dropped.
	pub fn open_directory(dir: PathBuf) -> Result<MmapArena> {
		std::fs::create_dir_all(&dir).with_context(|| format!("creating store directory {dir:?}"))?;
		Ok(MmapArena {
			inner: Mutex::new(Inner {
				segments: Vec::new(),
				backing: Backing::Directory { dir },
			}),
		})
	}

	/// Allocate `len` bytes. Only fails if the operating system cannot
	/// provide a new segment.
	pub fn allocate(&self, len: usize) -> Result<ArenaSlice> {
		let mut inner = self.inner.lock();
		let aligned = len.div_ceil(ALIGNMENT) * ALIGNMENT;

		if let Some(segment) = inner.segments.last_mut()
			&& segment.used + aligned <= segment.map.len()
		{
			let ptr = unsafe { segment.map.as_mut_ptr().add(segment.used) };
			segment.used += aligned;
			return Ok(ArenaSlice { ptr, len });
		}

		let segment = match &inner.backing {
			Backing::Anonymous => {
				let size = ANON_SEGMENT_SIZE.max(aligned);
				Segment {
					map: MmapMut::map_anon(size).context("mapping anonymous store segment")?,
					used: 0,
					freed: 0,
					path: None,
				}
			}
			Backing::Directory { dir } => {
				let size = FILE_SEGMENT_SIZE.max(aligned);
				let path = dir.join(format!("store_{}.dat", inner.segments.len()));
				let file = OpenOptions::new()
					.read(true)
					.write(true)
					.create(true)
					.truncate(true)
					.open(&path)
					.with_context(|| format!("creating store segment {path:?}"))?;
				file
					.set_len(size as u64)
					.with_context(|| format!("growing store segment {path:?}"))?;
				Segment {
					map: unsafe { MmapMut::map_mut(&file) }
						.with_context(|| format!("mapping store segment {path:?}"))?,
					used: 0,
					freed: 0,
					path: Some(path),
				}
			}
		};
		inner.segments.push(segment);

		let segment = inner.segments.last_mut().unwrap();
		let ptr = segment.map.as_mut_ptr();
		segment.used = aligned;
		Ok(ArenaSlice { ptr, len })
	}

	/// Record `slice` as released. The bytes are reclaimed when the
	/// arena is dropped.
	pub fn deallocate(&self, slice: ArenaSlice) {
		let mut inner = self.inner.lock();
		let addr = slice.ptr as usize;
		for segment in &mut inner.segments {
			let base = segment.map.as_ptr() as usize;
			if addr >= base && addr < base + segment.map.len() {
				segment.freed += slice.len.div_ceil(ALIGNMENT) * ALIGNMENT;
				return;
			}
		}
	}

	/// Total bytes currently mapped.
	#[must_use]
	pub fn mapped_bytes(&self) -> usize {
		self.inner.lock().segments.iter().map(|s| s.map.len()).sum()
	}
}

impl Drop for MmapArena {
	fn drop(&mut self) {
		let inner = self.inner.get_mut();
		for segment in inner.segments.drain(..) {
			if let Some(path) = segment.path {
				if let Err(e) = std::fs::remove_file(&path) {
					log::warn!("could not remove store segment {path:?}: {e}");
				}
			}
		}
	}
}
