//! The outward-facing tile sink.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;

/// Receives finished (already compressed) tiles. Implementations must
/// be thread-safe and tolerate tiles arriving in any order; writing the
/// same tile twice is idempotent.
pub trait TileWriter: Send + Sync {
	fn write_tile(&self, zoom: u8, x: u32, y: u32, data: &[u8]) -> Result<()>;
}

/// Collects tiles in memory; handy for tests and small extracts.
#[derive(Default)]
pub struct MemoryTileWriter {
	tiles: Mutex<HashMap<(u8, u32, u32), Vec<u8>>>,
}

impl MemoryTileWriter {
	#[must_use]
	pub fn new() -> MemoryTileWriter {
		MemoryTileWriter::default()
	}

	#[must_use]
	pub fn get(&self, zoom: u8, x: u32, y: u32) -> Option<Vec<u8>> {
		self.tiles.lock().get(&(zoom, x, y)).cloned()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.tiles.lock().len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.tiles.lock().is_empty()
	}

	#[must_use]
	pub fn coordinates(&self) -> Vec<(u8, u32, u32)> {
		let mut coords: Vec<(u8, u32, u32)> = self.tiles.lock().keys().copied().collect();
		coords.sort_unstable();
		coords
	}
}

impl TileWriter for MemoryTileWriter {
	fn write_tile(&self, zoom: u8, x: u32, y: u32, data: &[u8]) -> Result<()> {
		self.tiles.lock().insert((zoom, x, y), data.to_vec());
		Ok(())
	}
}

/// Writes a `z/x/y.pbf` directory tree.
pub struct DirectoryTileWriter {
	root: PathBuf,
}

impl DirectoryTileWriter {
	#[must_use]
	pub fn new(root: PathBuf) -> DirectoryTileWriter {
		DirectoryTileWriter { root }
	}
}

impl TileWriter for DirectoryTileWriter {
	fn write_tile(&self, zoom: u8, x: u32, y: u32, data: &[u8]) -> Result<()> {
		let dir = self.root.join(zoom.to_string()).join(x.to_string());
		std::fs::create_dir_all(&dir).with_context(|| format!("creating {dir:?}"))?;
		let path = dir.join(format!("{y}.pbf"));
		std::fs::write(&path, data).with_context(|| format!("writing {path:?}"))
	}
}
