//! The central in-memory index of output objects.
//!
//! Objects whose footprint is small land in one of 4,096 per-cluster
//! vectors (a cluster is a z6 tile); coordinates are stored as 8-bit
//! offsets from the cluster corner. Objects covering sixteen or more
//! base-zoom tiles go to an r-tree instead. After `finalize`, each
//! cluster vector is sorted along a z-order curve so the objects of any
//! tile between z6 and the base zoom form one contiguous range, and
//! objects visible below z6 are copied to a shadow index so low-zoom
//! tiles don't scan whole clusters.

mod clip_cache;
mod geometry_store;

pub use clip_cache::ClipCache;
pub use geometry_store::{GeometryStore, StoreLease};

use crate::geom::{Geometry, Linestring, MultiLinestring, MultiPolygon, Point, point_to_latplon};
use crate::output_object::{
	GeomType, GeometrySource, OutputObject, OutputObjectXY, OutputObjectXYID, tag_object_id,
};
use parking_lot::{Mutex, RwLock};
use rstar::{AABB, RTree, RTreeObject};
use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tileforge_core::coordinates::{
	PreciseTileCoordinatesSet, TileCoordinatesSet, fill_covered_tiles, insert_intermediate_tiles,
};
use tileforge_core::{CLUSTER_ZOOM, TileXY, Z6Offset, types::TileCoordinate};

pub const CLUSTER_ZOOM_WIDTH: usize = 1 << CLUSTER_ZOOM;
pub const CLUSTER_ZOOM_AREA: usize = CLUSTER_ZOOM_WIDTH * CLUSTER_ZOOM_WIDTH;

// Footprint, in base-zoom tiles, beyond which an object goes to the
// r-tree instead of every covered cluster slot.
const LARGE_OBJECT_TILES: usize = 16;

static NEXT_SOURCE_ID: AtomicUsize = AtomicUsize::new(1);

type Pending = (TileXY, OutputObject, u64);

thread_local! {
	static PENDING: RefCell<Vec<(usize, Arc<Mutex<Vec<Pending>>>)>> = const { RefCell::new(Vec::new()) };
}

/// Counters for the end-of-build summary.
#[derive(Default)]
pub struct SourceStats {
	/// Geometries that needed a validity correction while clipping.
	pub corrected_geometries: std::sync::atomic::AtomicU64,
	/// Geometries dropped because no valid clip could be produced.
	pub dropped_geometries: std::sync::atomic::AtomicU64,
}

/// An output object pulled out of the index, with its source id (zero
/// when ids are not kept).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputObjectID {
	pub oo: OutputObject,
	pub osm_id: u64,
}

struct LargeEntry {
	envelope: AABB<[i32; 2]>,
	oo: OutputObject,
	osm_id: u64,
}

impl RTreeObject for LargeEntry {
	type Envelope = AABB<[i32; 2]>;

	fn envelope(&self) -> Self::Envelope {
		self.envelope
	}
}

/// One data source's worth of indexed output objects, plus its
/// materialised geometry arenas and clip caches.
pub struct TileDataSource {
	source_id: usize,
	include_id: bool,
	index_zoom: u8,
	z6_offset_divisor: u32,

	objects: Vec<Mutex<Vec<OutputObjectXY>>>,
	objects_with_ids: Vec<Mutex<Vec<OutputObjectXYID>>>,
	low_zoom_objects: Mutex<Vec<Vec<OutputObjectXY>>>,
	low_zoom_objects_with_ids: Mutex<Vec<Vec<OutputObjectXYID>>>,
	pending: Mutex<Vec<Arc<Mutex<Vec<Pending>>>>>,

	large: RwLock<RTree<LargeEntry>>,

	pub points: GeometryStore<Point>,
	pub linestrings: GeometryStore<Linestring>,
	pub multilinestrings: GeometryStore<MultiLinestring>,
	pub multipolygons: GeometryStore<MultiPolygon>,

	pub multi_polygon_clip_cache: ClipCache<MultiPolygon>,
	pub multi_linestring_clip_cache: ClipCache<MultiLinestring>,

	pub stats: SourceStats,
}

impl TileDataSource {
	/// `index_zoom` is the base zoom of the tile index; at most 14.
	#[must_use]
	pub fn new(threads: usize, index_zoom: u8, include_id: bool) -> TileDataSource {
		assert!(index_zoom >= CLUSTER_ZOOM && index_zoom <= 14);
		let mut objects = Vec::new();
		objects.resize_with(CLUSTER_ZOOM_AREA, || Mutex::new(Vec::new()));
		let mut objects_with_ids = Vec::new();
		objects_with_ids.resize_with(CLUSTER_ZOOM_AREA, || Mutex::new(Vec::new()));

		TileDataSource {
			source_id: NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed),
			include_id,
			index_zoom,
			z6_offset_divisor: 1 << (index_zoom - CLUSTER_ZOOM),
			objects,
			objects_with_ids,
			low_zoom_objects: Mutex::new(vec![Vec::new(); CLUSTER_ZOOM_AREA]),
			low_zoom_objects_with_ids: Mutex::new(vec![Vec::new(); CLUSTER_ZOOM_AREA]),
			pending: Mutex::new(Vec::new()),
			large: RwLock::new(RTree::new()),
			points: GeometryStore::new(threads),
			linestrings: GeometryStore::new(threads),
			multilinestrings: GeometryStore::new(threads),
			multipolygons: GeometryStore::new(threads),
			multi_polygon_clip_cache: ClipCache::new(threads, index_zoom),
			multi_linestring_clip_cache: ClipCache::new(threads, index_zoom),
			stats: SourceStats::default(),
		}
	}

	#[must_use]
	pub fn index_zoom(&self) -> u8 {
		self.index_zoom
	}

	/// Place `oo` in the small index at the base-zoom tile `index`.
	///
	/// If the target cluster's lock is contended the write is deferred
	/// to a thread-local pending list that `finalize` drains; ingest
	/// never waits on another worker here.
	pub fn add_object(&self, index: TileXY, oo: OutputObject, osm_id: u64) {
		let z6x = u32::from(index.x) / self.z6_offset_divisor;
		let z6y = u32::from(index.y) / self.z6_offset_divisor;
		if z6x >= CLUSTER_ZOOM_WIDTH as u32 || z6y >= CLUSTER_ZOOM_WIDTH as u32 {
			log::warn!(
				"ignoring output object with invalid z{} coordinates {}, {} (id: {osm_id})",
				self.index_zoom,
				index.x,
				index.y
			);
			return;
		}
		let cluster = z6x as usize * CLUSTER_ZOOM_WIDTH + z6y as usize;

		if self.include_id && osm_id != 0 {
			if let Some(mut vec) = self.objects_with_ids[cluster].try_lock() {
				let (x_off, y_off) = self.offsets(index, z6x, z6y);
				vec.push(OutputObjectXYID { oo, x_off, y_off, osm_id });
				return;
			}
		} else if let Some(mut vec) = self.objects[cluster].try_lock() {
			let (x_off, y_off) = self.offsets(index, z6x, z6y);
			vec.push(OutputObjectXY { oo, x_off, y_off });
			return;
		}

		self.defer(index, oo, osm_id);
	}

	fn offsets(&self, index: TileXY, z6x: u32, z6y: u32) -> (Z6Offset, Z6Offset) {
		(
			(u32::from(index.x) - z6x * self.z6_offset_divisor) as Z6Offset,
			(u32::from(index.y) - z6y * self.z6_offset_divisor) as Z6Offset,
		)
	}

	fn defer(&self, index: TileXY, oo: OutputObject, osm_id: u64) {
		PENDING.with(|pending| {
			let mut pending = pending.borrow_mut();
			let list = match pending.iter().find(|(id, _)| *id == self.source_id) {
				Some((_, list)) => list.clone(),
				None => {
					let list = Arc::new(Mutex::new(Vec::new()));
					self.pending.lock().push(list.clone());
					pending.push((self.source_id, list.clone()));
					list
				}
			};
			list.lock().push((index, oo, osm_id));
		});
	}

	fn add_object_locked(&self, index: TileXY, oo: OutputObject, osm_id: u64) {
		let z6x = u32::from(index.x) / self.z6_offset_divisor;
		let z6y = u32::from(index.y) / self.z6_offset_divisor;
		let cluster = z6x as usize * CLUSTER_ZOOM_WIDTH + z6y as usize;
		let (x_off, y_off) = self.offsets(index, z6x, z6y);
		if self.include_id && osm_id != 0 {
			self.objects_with_ids[cluster].lock().push(OutputObjectXYID { oo, x_off, y_off, osm_id });
		} else {
			self.objects[cluster].lock().push(OutputObjectXY { oo, x_off, y_off });
		}
	}

	/// Insert an object spanning `min..=max` (base-zoom tiles) into the
	/// large-object r-tree.
	pub fn add_large_object(&self, min: TileXY, max: TileXY, oo: OutputObject, osm_id: u64) {
		let entry = LargeEntry {
			envelope: AABB::from_corners(
				[i32::from(min.x), i32::from(min.y)],
				[i32::from(max.x), i32::from(max.y)],
			),
			oo,
			osm_id: if self.include_id { osm_id } else { 0 },
		};
		self.large.write().insert(entry);
	}

	/// Index a linestring's outputs: every touched tile for line
	/// outputs; polygon outputs get covered tiles or, when large, one
	/// r-tree entry.
	pub fn add_linestring_to_index(&self, geom: &Linestring, outputs: &[OutputObject], osm_id: u64) {
		let points: Vec<(f64, f64)> = geom.coords().map(|c| (c.x, c.y)).collect();
		let mut tile_set = HashSet::new();
		insert_intermediate_tiles(&points, self.index_zoom, &mut tile_set);
		if tile_set.is_empty() {
			return;
		}

		let mut polygon_exists = false;
		for index in &tile_set {
			for output in outputs {
				if output.geom_type == GeomType::Polygon {
					polygon_exists = true;
					continue;
				}
				self.add_object(*index, *output, osm_id);
			}
		}

		if polygon_exists {
			let (min, max) = bounds(&tile_set);
			let size = (usize::from(max.x) - usize::from(min.x) + 1)
				* (usize::from(max.y) - usize::from(min.y) + 1);
			let mut filled = false;
			for output in outputs {
				if output.geom_type != GeomType::Polygon {
					continue;
				}
				if size >= LARGE_OBJECT_TILES {
					self.add_large_object(min, max, *output, osm_id);
				} else {
					if !filled {
						fill_covered_tiles(&mut tile_set);
						filled = true;
					}
					for index in &tile_set {
						self.add_object(*index, *output, osm_id);
					}
				}
			}
		}
	}

	/// Index a multilinestring's outputs, per constituent linestring.
	pub fn add_multilinestring_to_index(
		&self,
		geom: &MultiLinestring,
		outputs: &[OutputObject],
		osm_id: u64,
	) {
		for ls in &geom.0 {
			let points: Vec<(f64, f64)> = ls.coords().map(|c| (c.x, c.y)).collect();
			let mut tile_set = HashSet::new();
			insert_intermediate_tiles(&points, self.index_zoom, &mut tile_set);
			for index in &tile_set {
				for output in outputs {
					self.add_object(*index, *output, osm_id);
				}
			}
		}
	}

	/// Index a multipolygon's outputs: covered tiles when small, the
	/// r-tree when sixteen or more base-zoom tiles are involved.
	pub fn add_multipolygon_to_index(
		&self,
		geom: &MultiPolygon,
		outputs: &[OutputObject],
		osm_id: u64,
	) {
		let mut tile_set = HashSet::new();
		for polygon in &geom.0 {
			let points: Vec<(f64, f64)> = polygon.exterior().coords().map(|c| (c.x, c.y)).collect();
			let mut tmp = HashSet::new();
			insert_intermediate_tiles(&points, self.index_zoom, &mut tmp);
			fill_covered_tiles(&mut tmp);
			if geom.0.len() == 1 {
				tile_set = tmp;
			} else {
				tile_set.extend(tmp);
			}
		}
		if tile_set.is_empty() {
			return;
		}

		let (min, max) = bounds(&tile_set);
		for output in outputs {
			if tile_set.len() >= LARGE_OBJECT_TILES {
				// The envelope of the whole multipolygon; disjoint
				// outers make this an overestimate.
				self.add_large_object(min, max, *output, osm_id);
			} else {
				for index in &tile_set {
					self.add_object(*index, *output, osm_id);
				}
			}
		}
	}

	/// Take a finished feature from an external loader (shapefiles,
	/// feature collections): materialise its geometry and index it.
	pub fn add_feature(
		&self,
		geometry: &Geometry,
		layer: u8,
		min_zoom: u8,
		z_order: i16,
		attr_set: u32,
		osm_id: u64,
	) {
		let make_oo = |geom_type: GeomType, object_id: u64| OutputObject {
			layer,
			geom_type,
			min_zoom,
			z_order,
			object_id,
			attr_set,
		};
		match geometry {
			Geometry::Point(p) => {
				let lease = self.points.lease();
				let handle = lease.add(*p);
				drop(lease);
				let oo = make_oo(GeomType::Point, tag_object_id(GeometrySource::Stored, handle));
				let index =
					tileforge_core::coordinates::latplon2index(point_to_latplon(p), self.index_zoom);
				self.add_object(index, oo, osm_id);
			}
			Geometry::Linestring(ls) => {
				let lease = self.linestrings.lease();
				let handle = lease.add(ls.clone());
				drop(lease);
				let oo = make_oo(
					GeomType::Linestring,
					tag_object_id(GeometrySource::Stored, handle),
				);
				self.add_linestring_to_index(ls, &[oo], osm_id);
			}
			Geometry::MultiLinestring(mls) => {
				let lease = self.multilinestrings.lease();
				let handle = lease.add(mls.clone());
				drop(lease);
				let oo = make_oo(
					GeomType::MultiLinestring,
					tag_object_id(GeometrySource::Stored, handle),
				);
				self.add_multilinestring_to_index(mls, &[oo], osm_id);
			}
			Geometry::MultiPolygon(mp) => {
				let lease = self.multipolygons.lease();
				let handle = lease.add(mp.clone());
				drop(lease);
				let oo = make_oo(GeomType::Polygon, tag_object_id(GeometrySource::Stored, handle));
				self.add_multipolygon_to_index(mp, &[oo], osm_id);
			}
		}
	}

	/// Drain deferred writes, sort every cluster along the z-order
	/// curve, and extract the low-zoom shadow index.
	pub fn finalize(&self, _threads: usize) {
		let pending = std::mem::take(&mut *self.pending.lock());
		let mut deferred = 0u64;
		for list in pending {
			for (index, oo, osm_id) in list.lock().drain(..) {
				deferred += 1;
				self.add_object_locked(index, oo, osm_id);
			}
		}
		log::debug!("indexed {deferred} contended objects");

		let bits = u32::from(self.index_zoom - CLUSTER_ZOOM);
		let mut low_zoom = self.low_zoom_objects.lock();
		for (cluster, vec) in self.objects.iter().enumerate() {
			let mut vec = vec.lock();
			vec.sort_by_key(|o| sort_key(u32::from(o.x_off), u32::from(o.y_off), bits));
			low_zoom[cluster] = vec
				.iter()
				.filter(|o| o.oo.min_zoom < CLUSTER_ZOOM)
				.copied()
				.collect();
		}
		let mut low_zoom_ids = self.low_zoom_objects_with_ids.lock();
		for (cluster, vec) in self.objects_with_ids.iter().enumerate() {
			let mut vec = vec.lock();
			vec.sort_by_key(|o| sort_key(u32::from(o.x_off), u32::from(o.y_off), bits));
			low_zoom_ids[cluster] = vec
				.iter()
				.filter(|o| o.oo.min_zoom < CLUSTER_ZOOM)
				.copied()
				.collect();
		}
	}

	/// Mark, for every zoom in `zooms`, the tiles that hold at least
	/// one small-index object. `zooms[z]` is the set at zoom `z`.
	pub fn collect_tiles_with_objects(&self, zooms: &mut [PreciseTileCoordinatesSet]) {
		let max_zoom = zooms.len() as u8 - 1;
		let scale = self.index_zoom - max_zoom.min(self.index_zoom);
		for cluster in 0..CLUSTER_ZOOM_AREA {
			let z6x = (cluster / CLUSTER_ZOOM_WIDTH) as u32;
			let z6y = (cluster % CLUSTER_ZOOM_WIDTH) as u32;
			let mark = |zooms: &mut [PreciseTileCoordinatesSet], x_off: u32, y_off: u32| {
				let base_x = z6x * self.z6_offset_divisor + x_off;
				let base_y = z6y * self.z6_offset_divisor + y_off;
				let mut x = base_x >> scale;
				let mut y = base_y >> scale;
				for zoom in (0..=max_zoom).rev() {
					zooms[usize::from(zoom)].set(x as TileCoordinate, y as TileCoordinate);
					x /= 2;
					y /= 2;
				}
			};
			for o in self.objects[cluster].lock().iter() {
				mark(zooms, u32::from(o.x_off), u32::from(o.y_off));
			}
			for o in self.objects_with_ids[cluster].lock().iter() {
				mark(zooms, u32::from(o.x_off), u32::from(o.y_off));
			}
		}
	}

	/// As [`collect_tiles_with_objects`], for the r-tree tier.
	pub fn collect_tiles_with_large_objects(&self, zooms: &mut [PreciseTileCoordinatesSet]) {
		let max_zoom = zooms.len() as u8 - 1;
		let scale = self.index_zoom - max_zoom.min(self.index_zoom);
		for entry in self.large.read().iter() {
			let lower = entry.envelope.lower();
			let upper = entry.envelope.upper();
			for x in (lower[0] >> scale)..=(upper[0] >> scale) {
				for y in (lower[1] >> scale)..=(upper[1] >> scale) {
					let (mut x, mut y) = (x as u32, y as u32);
					for zoom in (0..=max_zoom).rev() {
						zooms[usize::from(zoom)].set(x as TileCoordinate, y as TileCoordinate);
						x /= 2;
						y /= 2;
					}
				}
			}
		}
	}

	/// Copy the small-index objects for one tile into `output`.
	pub fn collect_objects_for_tile(&self, zoom: u8, dst: TileXY, output: &mut Vec<OutputObjectID>) {
		if zoom < CLUSTER_ZOOM {
			self.collect_low_zoom_objects(zoom, dst, output);
			return;
		}

		// Clamp tiles beyond the base zoom to their base-zoom ancestor.
		let (zoom, dst) = if zoom > self.index_zoom {
			(self.index_zoom, dst.scaled_down(zoom - self.index_zoom))
		} else {
			(zoom, dst)
		};

		let z6x = u32::from(dst.x) >> (zoom - CLUSTER_ZOOM);
		let z6y = u32::from(dst.y) >> (zoom - CLUSTER_ZOOM);
		if z6x >= CLUSTER_ZOOM_WIDTH as u32 || z6y >= CLUSTER_ZOOM_WIDTH as u32 {
			log::warn!("collect_objects_for_tile: invalid tile z{zoom}/{}/{}", dst.x, dst.y);
			return;
		}
		let cluster = z6x as usize * CLUSTER_ZOOM_WIDTH + z6y as usize;

		let bits = u32::from(self.index_zoom - CLUSTER_ZOOM);
		let tile_bits = u32::from(zoom - CLUSTER_ZOOM);
		let x_rel = u32::from(dst.x) & ((1 << tile_bits) - 1);
		let y_rel = u32::from(dst.y) & ((1 << tile_bits) - 1);
		let prefix = sort_key(x_rel, y_rel, tile_bits);
		let lo = prefix << (2 * (bits - tile_bits));
		let hi = (prefix + 1) << (2 * (bits - tile_bits));

		{
			let vec = self.objects[cluster].lock();
			let start = vec.partition_point(|o| sort_key(u32::from(o.x_off), u32::from(o.y_off), bits) < lo);
			let end = vec.partition_point(|o| sort_key(u32::from(o.x_off), u32::from(o.y_off), bits) < hi);
			for o in &vec[start..end] {
				if o.oo.min_zoom <= zoom {
					output.push(OutputObjectID { oo: o.oo, osm_id: 0 });
				}
			}
		}
		{
			let vec = self.objects_with_ids[cluster].lock();
			let start = vec.partition_point(|o| sort_key(u32::from(o.x_off), u32::from(o.y_off), bits) < lo);
			let end = vec.partition_point(|o| sort_key(u32::from(o.x_off), u32::from(o.y_off), bits) < hi);
			for o in &vec[start..end] {
				if o.oo.min_zoom <= zoom {
					output.push(OutputObjectID { oo: o.oo, osm_id: o.osm_id });
				}
			}
		}
	}

	fn collect_low_zoom_objects(&self, zoom: u8, dst: TileXY, output: &mut Vec<OutputObjectID>) {
		let span = 1u32 << (CLUSTER_ZOOM - zoom);
		let low_zoom = self.low_zoom_objects.lock();
		let low_zoom_ids = self.low_zoom_objects_with_ids.lock();
		for z6x in u32::from(dst.x) * span..(u32::from(dst.x) + 1) * span {
			for z6y in u32::from(dst.y) * span..(u32::from(dst.y) + 1) * span {
				let cluster = z6x as usize * CLUSTER_ZOOM_WIDTH + z6y as usize;
				for o in &low_zoom[cluster] {
					if o.oo.min_zoom <= zoom {
						output.push(OutputObjectID { oo: o.oo, osm_id: 0 });
					}
				}
				for o in &low_zoom_ids[cluster] {
					if o.oo.min_zoom <= zoom {
						output.push(OutputObjectID { oo: o.oo, osm_id: o.osm_id });
					}
				}
			}
		}
	}

	/// Copy the r-tree objects intersecting one tile into `output`.
	pub fn collect_large_objects_for_tile(&self, zoom: u8, dst: TileXY, output: &mut Vec<OutputObjectID>) {
		let (clamped, dst) = if zoom > self.index_zoom {
			(self.index_zoom, dst.scaled_down(zoom - self.index_zoom))
		} else {
			(zoom, dst)
		};
		let scale = 1i32 << (self.index_zoom - clamped);
		let query = AABB::from_corners(
			[i32::from(dst.x) * scale, i32::from(dst.y) * scale],
			[(i32::from(dst.x) + 1) * scale - 1, (i32::from(dst.y) + 1) * scale - 1],
		);
		for entry in self.large.read().locate_in_envelope_intersecting(&query) {
			if entry.oo.min_zoom <= zoom {
				output.push(OutputObjectID { oo: entry.oo, osm_id: entry.osm_id });
			}
		}
	}

	pub fn report_size(&self) {
		log::debug!(
			"generated points: {}, lines: {}, polygons: {}",
			self.points.len(),
			self.linestrings.len() + self.multilinestrings.len(),
			self.multipolygons.len()
		);
	}
}

fn bounds(tile_set: &HashSet<TileXY>) -> (TileXY, TileXY) {
	let mut min = TileXY::new(TileCoordinate::MAX, TileCoordinate::MAX);
	let mut max = TileXY::new(0, 0);
	for t in tile_set {
		min.x = min.x.min(t.x);
		min.y = min.y.min(t.y);
		max.x = max.x.max(t.x);
		max.y = max.y.max(t.y);
	}
	(min, max)
}

/// Interleave the offset bits, most significant first, so that the
/// objects of any aligned power-of-two square are contiguous once
/// sorted by this key.
fn sort_key(x: u32, y: u32, bits: u32) -> u64 {
	let mut key = 0u64;
	for i in (0..bits).rev() {
		key = (key << 2) | (u64::from((x >> i) & 1) << 1) | u64::from((y >> i) & 1);
	}
	key
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::output_object::{GeomType, tag_object_id};
	use crate::output_object::GeometrySource;

	fn oo(min_zoom: u8, object_id: u64) -> OutputObject {
		OutputObject {
			layer: 0,
			geom_type: GeomType::Point,
			min_zoom,
			z_order: 0,
			object_id: tag_object_id(GeometrySource::Node, object_id),
			attr_set: 0,
		}
	}

	#[test]
	fn small_index_round_trip() {
		let source = TileDataSource::new(1, 14, false);
		source.add_object(TileXY::new(8191, 5447), oo(10, 1), 0);
		source.add_object(TileXY::new(8191, 5448), oo(10, 2), 0);
		source.finalize(1);

		let mut out = Vec::new();
		source.collect_objects_for_tile(14, TileXY::new(8191, 5447), &mut out);
		assert_eq!(out.len(), 1);
		assert_eq!(out[0].oo, oo(10, 1));

		// The z10 ancestor sees both objects.
		out.clear();
		source.collect_objects_for_tile(10, TileXY::new(511, 340), &mut out);
		assert_eq!(out.len(), 2);

		// An unrelated tile sees nothing.
		out.clear();
		source.collect_objects_for_tile(14, TileXY::new(100, 100), &mut out);
		assert!(out.is_empty());
	}

	#[test]
	fn min_zoom_filters_collection() {
		let source = TileDataSource::new(1, 14, false);
		source.add_object(TileXY::new(64, 64), oo(12, 1), 0);
		source.finalize(1);

		let mut out = Vec::new();
		source.collect_objects_for_tile(10, TileXY::new(4, 4), &mut out);
		assert!(out.is_empty());
		source.collect_objects_for_tile(12, TileXY::new(16, 16), &mut out);
		assert_eq!(out.len(), 1);
	}

	#[test]
	fn zoom_ranges_are_contiguous_after_finalize() {
		let source = TileDataSource::new(1, 14, false);
		// Scatter objects over one cluster.
		for i in 0..100u64 {
			let x = 8192 + (i as u32 * 37 % 256);
			let y = 5376 + (i as u32 * 73 % 256);
			source.add_object(TileXY::new(x as TileCoordinate, y as TileCoordinate), oo(6, i), 0);
		}
		source.finalize(1);

		// At every zoom in [6, 14], collecting each covering tile once
		// accounts for every object exactly once.
		for zoom in 6..=14u8 {
			let span = 1u32 << (14 - zoom);
			let mut total = 0;
			for x in (8192 / span)..=(8447 / span) {
				for y in (5376 / span)..=(5631 / span) {
					let mut out = Vec::new();
					source.collect_objects_for_tile(
						zoom,
						TileXY::new(x as TileCoordinate, y as TileCoordinate),
						&mut out,
					);
					total += out.len();
				}
			}
			assert_eq!(total, 100, "zoom {zoom}");
		}
	}

	#[test]
	fn low_zoom_shadow_serves_low_tiles() {
		let source = TileDataSource::new(1, 14, false);
		source.add_object(TileXY::new(0, 0), oo(0, 1), 0);
		source.add_object(TileXY::new(0, 0), oo(10, 2), 0);
		source.finalize(1);

		let mut out = Vec::new();
		source.collect_objects_for_tile(0, TileXY::new(0, 0), &mut out);
		assert_eq!(out.len(), 1);
		assert_eq!(out[0].oo, oo(0, 1));
	}

	#[test]
	fn large_objects_come_from_the_rtree() {
		let source = TileDataSource::new(1, 14, false);
		source.add_large_object(TileXY::new(100, 100), TileXY::new(200, 200), oo(5, 1), 0);
		source.finalize(1);

		let mut out = Vec::new();
		source.collect_large_objects_for_tile(14, TileXY::new(150, 150), &mut out);
		assert_eq!(out.len(), 1);

		out.clear();
		source.collect_large_objects_for_tile(14, TileXY::new(300, 300), &mut out);
		assert!(out.is_empty());

		// Ancestors intersect too.
		out.clear();
		source.collect_large_objects_for_tile(8, TileXY::new(2, 2), &mut out);
		assert_eq!(out.len(), 1);
	}

	#[test]
	fn ids_are_kept_when_configured() {
		let source = TileDataSource::new(1, 14, true);
		source.add_object(TileXY::new(10, 10), oo(0, 1), 4242);
		source.finalize(1);
		let mut out = Vec::new();
		source.collect_objects_for_tile(14, TileXY::new(10, 10), &mut out);
		assert_eq!(out[0].osm_id, 4242);
	}

	#[test]
	fn polygon_footprint_routes_to_rtree_or_clusters() {
		use geo_types::polygon;
		let source = TileDataSource::new(1, 14, false);

		// A polygon spanning far more than 16 base-zoom tiles.
		let big: crate::geom::Polygon = polygon![
			(x: -10.0, y: -10.0),
			(x: 10.0, y: -10.0),
			(x: 10.0, y: 10.0),
			(x: -10.0, y: 10.0),
			(x: -10.0, y: -10.0),
		];
		let mut poly_oo = oo(0, 7);
		poly_oo.geom_type = GeomType::Polygon;
		source.add_multipolygon_to_index(&MultiPolygon(vec![big]), &[poly_oo], 7);
		source.finalize(1);

		assert_eq!(source.large.read().size(), 1);
		let mut out = Vec::new();
		// Equator, mid-box.
		source.collect_large_objects_for_tile(14, TileXY::new(8192, 8192), &mut out);
		assert_eq!(out.len(), 1);
	}

	#[test]
	fn tiles_with_objects_marks_all_zooms() {
		let source = TileDataSource::new(1, 14, false);
		source.add_object(TileXY::new(8191, 5447), oo(0, 1), 0);
		source.finalize(1);

		let mut zooms: Vec<PreciseTileCoordinatesSet> =
			(0..=14u8).map(PreciseTileCoordinatesSet::new).collect();
		source.collect_tiles_with_objects(&mut zooms);
		assert!(zooms[14].test(8191, 5447));
		assert!(zooms[10].test(511, 340));
		assert!(zooms[0].test(0, 0));
		assert_eq!(zooms[14].size(), 1);
	}
}
