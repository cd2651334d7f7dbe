//! Geometry aliases used across the store and tile crates.
//!
//! Coordinates are `(x, y) = (lon, latp)` in degrees; latp is the
//! Mercator-projected latitude, so geometry here is uniform in pixel
//! space at any zoom.

pub type Point = geo_types::Coord<f64>;
pub type Linestring = geo_types::LineString<f64>;
pub type MultiLinestring = geo_types::MultiLineString<f64>;
pub type Polygon = geo_types::Polygon<f64>;
pub type MultiPolygon = geo_types::MultiPolygon<f64>;
pub type Ring = geo_types::LineString<f64>;

use tileforge_core::LatpLon;

/// A geometry value as handed over by external feature loaders.
#[derive(Clone, Debug)]
pub enum Geometry {
	Point(Point),
	Linestring(Linestring),
	MultiLinestring(MultiLinestring),
	MultiPolygon(MultiPolygon),
}

/// Convert a fixed-point coordinate to geometry space.
#[must_use]
pub fn latplon_to_point(ll: LatpLon) -> Point {
	Point {
		x: ll.lon_degrees(),
		y: ll.latp_degrees(),
	}
}

/// Convert a geometry-space point back to fixed-point.
#[must_use]
pub fn point_to_latplon(p: &Point) -> LatpLon {
	LatpLon::from_degrees(p.y, p.x)
}

/// Build a linestring from fixed-point coordinates.
#[must_use]
pub fn latplons_to_linestring(lls: &[LatpLon]) -> Linestring {
	Linestring::new(lls.iter().map(|ll| latplon_to_point(*ll)).collect())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn conversions_round_trip() {
		let ll = LatpLon::new(512_500_000, -7_500_000);
		let p = latplon_to_point(ll);
		assert_eq!(p, Point { x: -0.75, y: 51.25 });
		assert_eq!(point_to_latplon(&p), ll);
	}
}
