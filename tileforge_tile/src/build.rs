//! Building clipped per-tile geometries from output objects.

use crate::bbox::TileBbox;
use crate::clip::{clip_multilinestring, fast_clip_multipolygon};
use anyhow::{Result, bail};
use geo::{BooleanOps, Intersects, Validation};
use geo::orient::{Direction, Orient};
use tileforge_core::LatpLon;
use tileforge_store::geom::{
	Linestring, MultiLinestring, MultiPolygon, Polygon, Ring, latplon_to_point,
	latplons_to_linestring, point_to_latplon,
};
use tileforge_store::node::NodeStore;
use tileforge_store::output_object::{GeomType, GeometrySource, untag_object_id};
use tileforge_store::tile_index::TileDataSource;
use tileforge_store::way::WayStore;

/// A geometry materialised for one tile.
pub enum BuiltGeometry {
	/// Nothing intersects the tile.
	None,
	Point(LatpLon),
	MultiLinestring(MultiLinestring),
	MultiPolygon(MultiPolygon),
}

/// Resolves output objects to clipped geometries, consulting the
/// source's clip caches.
pub struct GeometryBuilder<'a> {
	pub source: &'a TileDataSource,
	pub node_store: &'a dyn NodeStore,
	pub way_store: &'a dyn WayStore,
}

impl GeometryBuilder<'_> {
	/// The location of a point object, or None when it misses the
	/// tile's clipping box.
	pub fn build_node_geometry(&self, object_id: u64, bbox: &TileBbox) -> Result<Option<LatpLon>> {
		let (source, id) = untag_object_id(object_id);
		let ll = match source {
			GeometrySource::Node => self.node_store.at(id)?,
			GeometrySource::Stored => point_to_latplon(&self.source.points.get(id)),
			GeometrySource::Way => bail!("point object {id} resolves through the way store"),
		};
		let p = latplon_to_point(ll);
		if bbox.clipping_box.intersects(&p) {
			Ok(Some(ll))
		} else {
			Ok(None)
		}
	}

	/// Build the clipped geometry of a linestring or polygon object.
	pub fn build_way_geometry(
		&self,
		geom_type: GeomType,
		object_id: u64,
		bbox: &TileBbox,
	) -> Result<BuiltGeometry> {
		match geom_type {
			GeomType::Point => bail!("unexpected point in build_way_geometry"),
			GeomType::Linestring => {
				let ls = self.fetch_linestring(object_id)?;
				Ok(BuiltGeometry::MultiLinestring(self.clip_linestring(&ls, bbox)))
			}
			GeomType::MultiLinestring => {
				let (source, id) = untag_object_id(object_id);
				// Reuse a clip from an ancestor tile when one is cached.
				let cached = self
					.source
					.multi_linestring_clip_cache
					.get(bbox.zoom, bbox.index.x, bbox.index.y, object_id);
				let input = match &cached {
					Some(hit) => (**hit).clone(),
					None => match source {
						GeometrySource::Stored => self.source.multilinestrings.get(id),
						GeometrySource::Way => MultiLinestring(vec![latplons_to_linestring(
							&self.way_store.at(id)?,
						)]),
						GeometrySource::Node => bail!("multilinestring object {id} resolves through the node store"),
					},
				};
				let result = clip_multilinestring(&input, &bbox.extend_box());
				self.source.multi_linestring_clip_cache.add(
					bbox.zoom,
					bbox.index.x,
					bbox.index.y,
					object_id,
					result.clone(),
				);
				Ok(BuiltGeometry::MultiLinestring(result))
			}
			GeomType::Polygon => self.build_polygon(object_id, bbox),
		}
	}

	fn fetch_linestring(&self, object_id: u64) -> Result<Linestring> {
		let (source, id) = untag_object_id(object_id);
		match source {
			GeometrySource::Way => Ok(latplons_to_linestring(&self.way_store.at(id)?)),
			GeometrySource::Stored => Ok(self.source.linestrings.get(id)),
			GeometrySource::Node => bail!("linestring object {id} resolves through the node store"),
		}
	}

	/// Split out the runs of segments that touch the clipping box, then
	/// clip them precisely to the extended box.
	fn clip_linestring(&self, ls: &Linestring, bbox: &TileBbox) -> MultiLinestring {
		let mut pieces: Vec<Linestring> = Vec::new();
		let mut current: Vec<geo_types::Coord<f64>> = Vec::new();
		for window in ls.0.windows(2) {
			let segment = geo_types::Line::new(window[0], window[1]);
			if segment.intersects(&bbox.clipping_box) {
				if current.is_empty() {
					current.push(window[0]);
				}
				current.push(window[1]);
			} else if current.len() > 1 {
				pieces.push(Linestring::new(std::mem::take(&mut current)));
			} else {
				current.clear();
			}
		}
		if current.len() > 1 {
			pieces.push(Linestring::new(current));
		}
		clip_multilinestring(&MultiLinestring(pieces), &bbox.extend_box())
	}

	fn fetch_multipolygon(&self, object_id: u64) -> Result<MultiPolygon> {
		let (source, id) = untag_object_id(object_id);
		match source {
			GeometrySource::Stored => Ok(self.source.multipolygons.get(id)),
			GeometrySource::Way => {
				let mut ring = latplons_to_linestring(&self.way_store.at(id)?);
				ring.close();
				Ok(MultiPolygon(vec![Polygon::new(ring, Vec::new())]))
			}
			GeometrySource::Node => bail!("polygon object {id} resolves through the node store"),
		}
	}

	fn build_polygon(&self, object_id: u64, bbox: &TileBbox) -> Result<BuiltGeometry> {
		let cached = self
			.source
			.multi_polygon_clip_cache
			.get(bbox.zoom, bbox.index.x, bbox.index.y, object_id);
		let input = match &cached {
			Some(hit) => (**hit).clone(),
			None => self.fetch_multipolygon(object_id)?,
		};

		let clipped = fast_clip_multipolygon(&input, &bbox.clipping_box);
		let clipped = clipped.orient(Direction::Default);
		if clipped.is_valid() {
			self.cache_polygon(object_id, bbox, &clipped);
			return Ok(BuiltGeometry::MultiPolygon(clipped));
		}

		use std::sync::atomic::Ordering;
		let despiked = remove_spikes(&clipped);
		if despiked.is_valid() {
			self.source.stats.corrected_geometries.fetch_add(1, Ordering::Relaxed);
			self.cache_polygon(object_id, bbox, &despiked);
			return Ok(BuiltGeometry::MultiPolygon(despiked));
		}

		// The fast clip produced self-intersections; redo it as a full
		// boolean intersection.
		let box_polygon = MultiPolygon(vec![bbox.clipping_box.to_polygon()]);
		let output = input.intersection(&box_polygon).orient(Direction::Default);
		if output.is_valid() {
			self.source.stats.corrected_geometries.fetch_add(1, Ordering::Relaxed);
			self.cache_polygon(object_id, bbox, &output);
			return Ok(BuiltGeometry::MultiPolygon(output));
		}

		self.source.stats.dropped_geometries.fetch_add(1, Ordering::Relaxed);
		log::warn!("could not clip polygon object {object_id} to a valid result; dropping it");
		Ok(BuiltGeometry::MultiPolygon(MultiPolygon(Vec::new())))
	}

	fn cache_polygon(&self, object_id: u64, bbox: &TileBbox, mp: &MultiPolygon) {
		self.source.multi_polygon_clip_cache.add(
			bbox.zoom,
			bbox.index.x,
			bbox.index.y,
			object_id,
			mp.clone(),
		);
	}
}

/// Drop zero-width excursions: repeated points and points whose
/// neighbours coincide.
#[must_use]
pub fn remove_spikes(mp: &MultiPolygon) -> MultiPolygon {
	let despike_ring = |ring: &Ring| -> Ring {
		let mut points: Vec<geo_types::Coord<f64>> = ring.0.clone();
		if points.len() > 1 && points.first() == points.last() {
			points.pop();
		}
		loop {
			let n = points.len();
			if n < 3 {
				break;
			}
			let mut removed = false;
			let mut i = 0;
			while points.len() >= 3 && i < points.len() {
				let prev = points[(i + points.len() - 1) % points.len()];
				let next = points[(i + 1) % points.len()];
				if points[i] == next || prev == next {
					points.remove(i);
					removed = true;
				} else {
					i += 1;
				}
			}
			if !removed {
				break;
			}
		}
		if points.len() < 3 {
			return Ring::new(Vec::new());
		}
		let mut out = Ring::new(points);
		out.close();
		out
	};

	let mut polygons = Vec::new();
	for polygon in &mp.0 {
		let outer = despike_ring(polygon.exterior());
		if outer.0.len() < 4 {
			continue;
		}
		let inners: Vec<Ring> = polygon
			.interiors()
			.iter()
			.map(despike_ring)
			.filter(|r| r.0.len() >= 4)
			.collect();
		polygons.push(Polygon::new(outer, inners));
	}
	MultiPolygon(polygons)
}
