//! Bitmaps of tiles of interest at a given zoom.

use crate::types::TileCoordinate;

/// A set of tile coordinates at one zoom level.
pub trait TileCoordinatesSet {
	fn test(&self, x: TileCoordinate, y: TileCoordinate) -> bool;
	fn set(&mut self, x: TileCoordinate, y: TileCoordinate);
	fn size(&self) -> usize;
	fn zoom(&self) -> u8;
}

/// Read-write bitmap; meant for zooms up to the base zoom. Packed one
/// bit per tile, so even a z14 set is only 32 MB.
pub struct PreciseTileCoordinatesSet {
	zoom: u8,
	tiles: Vec<u64>,
}

impl PreciseTileCoordinatesSet {
	#[must_use]
	pub fn new(zoom: u8) -> PreciseTileCoordinatesSet {
		let side = 1usize << zoom;
		PreciseTileCoordinatesSet {
			zoom,
			tiles: vec![0; (side * side).div_ceil(64)],
		}
	}
}

impl TileCoordinatesSet for PreciseTileCoordinatesSet {
	fn test(&self, x: TileCoordinate, y: TileCoordinate) -> bool {
		let side = 1usize << self.zoom;
		let (x, y) = (x as usize, y as usize);
		if x >= side || y >= side {
			return false;
		}
		let bit = x * side + y;
		self.tiles[bit / 64] & (1 << (bit % 64)) != 0
	}

	fn set(&mut self, x: TileCoordinate, y: TileCoordinate) {
		let side = 1usize << self.zoom;
		let bit = (x as usize) * side + y as usize;
		self.tiles[bit / 64] |= 1 << (bit % 64);
	}

	fn size(&self) -> usize {
		self.tiles.iter().map(|b| b.count_ones() as usize).sum()
	}

	fn zoom(&self) -> u8 {
		self.zoom
	}
}

/// Read-only view of a lower-zoom precise set, extrapolated to a higher
/// zoom: a tile tests positive if its ancestor does.
pub struct LossyTileCoordinatesSet<'a> {
	zoom: u8,
	scale: u8,
	tiles: &'a dyn TileCoordinatesSet,
}

impl<'a> LossyTileCoordinatesSet<'a> {
	/// `zoom` must be strictly greater than the wrapped set's zoom.
	#[must_use]
	pub fn new(zoom: u8, precise: &'a dyn TileCoordinatesSet) -> LossyTileCoordinatesSet<'a> {
		assert!(zoom > precise.zoom());
		LossyTileCoordinatesSet {
			zoom,
			scale: zoom - precise.zoom(),
			tiles: precise,
		}
	}
}

impl TileCoordinatesSet for LossyTileCoordinatesSet<'_> {
	fn test(&self, x: TileCoordinate, y: TileCoordinate) -> bool {
		self.tiles.test(x >> self.scale, y >> self.scale)
	}

	fn set(&mut self, _x: TileCoordinate, _y: TileCoordinate) {
		panic!("lossy tile sets are read-only");
	}

	fn size(&self) -> usize {
		self.tiles.size() * (1usize << self.scale) * (1usize << self.scale)
	}

	fn zoom(&self) -> u8 {
		self.zoom
	}
}
