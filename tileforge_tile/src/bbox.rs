//! Per-tile bounding boxes and coordinate scaling.

use geo_types::{Coord, Rect};
use tileforge_core::TileXY;
use tileforge_core::coordinates::{lat2latp, tilex2lon, tiley2lat};
use tileforge_store::geom::{MultiPolygon, Polygon, Ring};

/// Everything the worker needs to know about one tile: corner
/// coordinates in degrees and projected degrees, pixel scale, and the
/// clipping box (the tile expanded by 1/200th of its extent).
#[derive(Clone, Debug)]
pub struct TileBbox {
	pub index: TileXY,
	pub zoom: u8,
	pub hires: bool,
	pub end_zoom: bool,

	pub min_lon: f64,
	pub max_lon: f64,
	pub min_lat: f64,
	pub max_lat: f64,
	pub min_latp: f64,
	pub max_latp: f64,
	pub xscale: f64,
	pub yscale: f64,
	pub clipping_box: Rect<f64>,
}

impl TileBbox {
	#[must_use]
	pub fn new(index: TileXY, zoom: u8, hires: bool, end_zoom: bool) -> TileBbox {
		let min_lon = tilex2lon(u32::from(index.x), zoom);
		let max_lon = tilex2lon(u32::from(index.x) + 1, zoom);
		let min_lat = tiley2lat(u32::from(index.y) + 1, zoom);
		let max_lat = tiley2lat(u32::from(index.y), zoom);
		let min_latp = lat2latp(min_lat);
		let max_latp = lat2latp(max_lat);
		let xmargin = (max_lon - min_lon) / 200.0;
		let ymargin = (max_latp - min_latp) / 200.0;
		let extent = if hires { 8192.0 } else { 4096.0 };

		TileBbox {
			index,
			zoom,
			hires,
			end_zoom,
			min_lon,
			max_lon,
			min_lat,
			max_lat,
			min_latp,
			max_latp,
			xscale: (max_lon - min_lon) / extent,
			yscale: (max_latp - min_latp) / extent,
			clipping_box: Rect::new(
				Coord { x: min_lon - xmargin, y: min_latp - ymargin },
				Coord { x: max_lon + xmargin, y: max_latp + ymargin },
			),
		}
	}

	/// Pixel extent of this tile.
	#[must_use]
	pub fn extent(&self) -> u32 {
		if self.hires { 8192 } else { 4096 }
	}

	/// Scale a `(latp, lon)` pair to integer pixel coordinates; y grows
	/// southwards, as the wire format expects.
	#[must_use]
	pub fn scale_latp_lon(&self, latp: f64, lon: f64) -> (i32, i32) {
		(
			((lon - self.min_lon) / self.xscale).floor() as i32,
			((self.max_latp - latp) / self.yscale).floor() as i32,
		)
	}

	/// A clipping box expanded well past the tile, used for linework so
	/// that segments leaving and re-entering keep their context.
	#[must_use]
	pub fn extend_box(&self) -> Rect<f64> {
		let w = self.max_lon - self.min_lon;
		let h = self.max_latp - self.min_latp;
		Rect::new(
			Coord {
				x: self.min_lon - w * 2.0,
				y: self.min_latp - h * (8191.0 / 8192.0),
			},
			Coord {
				x: self.max_lon + w * (8191.0 / 8192.0),
				y: self.max_latp + h * 2.0,
			},
		)
	}

	/// Scale a multipolygon to pixel space, dropping collapsed points
	/// and degenerate rings.
	#[must_use]
	pub fn scale_geometry(&self, src: &MultiPolygon) -> MultiPolygon {
		let mut dst = Vec::new();
		for polygon in &src.0 {
			let outer = self.scale_ring(polygon.exterior());
			if outer.0.len() < 4 {
				continue;
			}
			let inners: Vec<Ring> = polygon
				.interiors()
				.iter()
				.map(|r| self.scale_ring(r))
				.filter(|r| r.0.len() >= 4)
				.collect();
			dst.push(Polygon::new(outer, inners));
		}
		MultiPolygon(dst)
	}

	fn scale_ring(&self, ring: &Ring) -> Ring {
		let mut points: Vec<Coord<f64>> = Vec::with_capacity(ring.0.len());
		let mut last: Option<(i32, i32)> = None;
		for c in &ring.0 {
			let scaled = self.scale_latp_lon(c.y, c.x);
			if last != Some(scaled) {
				points.push(Coord { x: f64::from(scaled.0), y: f64::from(scaled.1) });
				last = Some(scaled);
			}
		}
		Ring::new(points)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use approx::assert_relative_eq;

	#[test]
	fn covers_its_tile() {
		let bbox = TileBbox::new(TileXY::new(1, 1), 1, false, false);
		assert_relative_eq!(bbox.min_lon, 0.0);
		assert_relative_eq!(bbox.max_lon, 180.0);
		assert_relative_eq!(bbox.max_latp, 0.0, epsilon = 1e-9);
		assert_relative_eq!(bbox.min_latp, -180.0, epsilon = 1e-9);
		assert_eq!(bbox.extent(), 4096);
	}

	#[test]
	fn pixel_scaling_is_anchored_top_left() {
		let bbox = TileBbox::new(TileXY::new(1, 1), 1, false, false);
		assert_eq!(bbox.scale_latp_lon(0.0, 0.0), (0, 0));
		let (x, y) = bbox.scale_latp_lon(-90.0, 90.0);
		assert_eq!((x, y), (2048, 2048));
	}

	#[test]
	fn clipping_box_has_margin() {
		let bbox = TileBbox::new(TileXY::new(0, 0), 1, false, false);
		assert!(bbox.clipping_box.min().x < bbox.min_lon);
		assert!(bbox.clipping_box.max().y > bbox.max_latp);
	}
}
