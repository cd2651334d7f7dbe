//! Clipping geometries to axis-aligned boxes.
//!
//! Linestrings are clipped exactly, segment by segment. Polygons get a
//! fast Sutherland-Hodgman box clip; where that produces an invalid
//! result the caller falls back to a full boolean intersection.

use geo_types::{Coord, Rect};
use tileforge_store::geom::{Linestring, MultiLinestring, MultiPolygon, Polygon, Ring};

/// Clip every linestring to `rect`, splitting where a line leaves the
/// box. Pieces with fewer than two points are dropped.
#[must_use]
pub fn clip_multilinestring(mls: &MultiLinestring, rect: &Rect<f64>) -> MultiLinestring {
	let mut out = Vec::new();
	for ls in &mls.0 {
		clip_linestring_into(ls, rect, &mut out);
	}
	MultiLinestring(out)
}

fn clip_linestring_into(ls: &Linestring, rect: &Rect<f64>, out: &mut Vec<Linestring>) {
	let mut current: Vec<Coord<f64>> = Vec::new();
	for window in ls.0.windows(2) {
		match clip_segment(window[0], window[1], rect) {
			Some((a, b)) => {
				if current.is_empty() {
					current.push(a);
				} else if *current.last().unwrap() != a {
					// The line left the box and re-entered elsewhere.
					if current.len() >= 2 {
						out.push(Linestring::new(std::mem::take(&mut current)));
					} else {
						current.clear();
					}
					current.push(a);
				}
				current.push(b);
			}
			None => {
				if current.len() >= 2 {
					out.push(Linestring::new(std::mem::take(&mut current)));
				} else {
					current.clear();
				}
			}
		}
	}
	if current.len() >= 2 {
		out.push(Linestring::new(current));
	}
}

/// Liang-Barsky clip of one segment; None when it misses the box.
fn clip_segment(a: Coord<f64>, b: Coord<f64>, rect: &Rect<f64>) -> Option<(Coord<f64>, Coord<f64>)> {
	let (dx, dy) = (b.x - a.x, b.y - a.y);
	let mut t0 = 0.0f64;
	let mut t1 = 1.0f64;

	for (p, q) in [
		(-dx, a.x - rect.min().x),
		(dx, rect.max().x - a.x),
		(-dy, a.y - rect.min().y),
		(dy, rect.max().y - a.y),
	] {
		if p == 0.0 {
			if q < 0.0 {
				return None;
			}
			continue;
		}
		let r = q / p;
		if p < 0.0 {
			if r > t1 {
				return None;
			}
			if r > t0 {
				t0 = r;
			}
		} else {
			if r < t0 {
				return None;
			}
			if r < t1 {
				t1 = r;
			}
		}
	}

	Some((
		Coord { x: a.x + t0 * dx, y: a.y + t0 * dy },
		Coord { x: a.x + t1 * dx, y: a.y + t1 * dy },
	))
}

/// Sutherland-Hodgman clip of a multipolygon against a box, ring by
/// ring. Fast, but self-intersecting input (or rings collapsing onto
/// the box edge) can come out invalid; callers validate and fall back.
#[must_use]
pub fn fast_clip_multipolygon(mp: &MultiPolygon, rect: &Rect<f64>) -> MultiPolygon {
	let mut out = Vec::new();
	for polygon in &mp.0 {
		let outer = clip_ring(polygon.exterior(), rect);
		if outer.0.len() < 4 {
			continue;
		}
		let inners: Vec<Ring> = polygon
			.interiors()
			.iter()
			.map(|r| clip_ring(r, rect))
			.filter(|r| r.0.len() >= 4)
			.collect();
		out.push(Polygon::new(outer, inners));
	}
	MultiPolygon(out)
}

fn clip_ring(ring: &Ring, rect: &Rect<f64>) -> Ring {
	// One Sutherland-Hodgman pass per box edge. `keep` tests the inside
	// half-plane; `cross` computes the edge intersection.
	let mut points: Vec<Coord<f64>> = ring.0.clone();
	if points.len() > 1 && points.first() == points.last() {
		points.pop();
	}

	let edges: [(Box<dyn Fn(&Coord<f64>) -> bool>, Box<dyn Fn(Coord<f64>, Coord<f64>) -> Coord<f64>>); 4] = [
		(
			Box::new(|c| c.x >= rect.min().x),
			Box::new(|a, b| intersect_vertical(a, b, rect.min().x)),
		),
		(
			Box::new(|c| c.x <= rect.max().x),
			Box::new(|a, b| intersect_vertical(a, b, rect.max().x)),
		),
		(
			Box::new(|c| c.y >= rect.min().y),
			Box::new(|a, b| intersect_horizontal(a, b, rect.min().y)),
		),
		(
			Box::new(|c| c.y <= rect.max().y),
			Box::new(|a, b| intersect_horizontal(a, b, rect.max().y)),
		),
	];

	for (keep, cross) in &edges {
		if points.is_empty() {
			break;
		}
		let mut clipped = Vec::with_capacity(points.len() + 4);
		for i in 0..points.len() {
			let current = points[i];
			let previous = points[(i + points.len() - 1) % points.len()];
			match (keep(&previous), keep(&current)) {
				(true, true) => clipped.push(current),
				(true, false) => clipped.push(cross(previous, current)),
				(false, true) => {
					clipped.push(cross(previous, current));
					clipped.push(current);
				}
				(false, false) => {}
			}
		}
		points = clipped;
	}

	if points.len() < 3 {
		return Ring::new(Vec::new());
	}
	let mut ring = Ring::new(points);
	ring.close();
	ring
}

fn intersect_vertical(a: Coord<f64>, b: Coord<f64>, x: f64) -> Coord<f64> {
	let t = (x - a.x) / (b.x - a.x);
	Coord { x, y: a.y + t * (b.y - a.y) }
}

fn intersect_horizontal(a: Coord<f64>, b: Coord<f64>, y: f64) -> Coord<f64> {
	let t = (y - a.y) / (b.y - a.y);
	Coord { x: a.x + t * (b.x - a.x), y }
}

#[cfg(test)]
mod tests {
	use super::*;
	use geo_types::line_string;

	fn unit_rect() -> Rect<f64> {
		Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 10.0, y: 10.0 })
	}

	#[test]
	fn segment_fully_inside_is_kept() {
		let ls = line_string![(x: 1.0, y: 1.0), (x: 9.0, y: 9.0)];
		let out = clip_multilinestring(&MultiLinestring(vec![ls.clone()]), &unit_rect());
		assert_eq!(out.0, vec![ls]);
	}

	#[test]
	fn crossing_segment_is_trimmed() {
		let ls = line_string![(x: -10.0, y: 5.0), (x: 20.0, y: 5.0)];
		let out = clip_multilinestring(&MultiLinestring(vec![ls]), &unit_rect());
		assert_eq!(out.0.len(), 1);
		assert_eq!(
			out.0[0],
			line_string![(x: 0.0, y: 5.0), (x: 10.0, y: 5.0)]
		);
	}

	#[test]
	fn line_leaving_and_reentering_splits() {
		let ls = line_string![
			(x: 1.0, y: 1.0),
			(x: 15.0, y: 1.0),
			(x: 15.0, y: 9.0),
			(x: 1.0, y: 9.0),
		];
		let out = clip_multilinestring(&MultiLinestring(vec![ls]), &unit_rect());
		assert_eq!(out.0.len(), 2);
	}

	#[test]
	fn outside_segment_disappears() {
		let ls = line_string![(x: 20.0, y: 20.0), (x: 30.0, y: 30.0)];
		let out = clip_multilinestring(&MultiLinestring(vec![ls]), &unit_rect());
		assert!(out.0.is_empty());
	}

	#[test]
	fn polygon_clips_to_box() {
		use geo::Area;
		use geo_types::polygon;
		let p: Polygon = polygon![
			(x: -5.0, y: -5.0),
			(x: 5.0, y: -5.0),
			(x: 5.0, y: 5.0),
			(x: -5.0, y: 5.0),
			(x: -5.0, y: -5.0),
		];
		let out = fast_clip_multipolygon(&MultiPolygon(vec![p]), &unit_rect());
		assert_eq!(out.0.len(), 1);
		assert_relative_eq(out.0[0].unsigned_area(), 25.0);
	}

	#[test]
	fn disjoint_polygon_is_dropped() {
		use geo_types::polygon;
		let p: Polygon = polygon![
			(x: 20.0, y: 20.0),
			(x: 25.0, y: 20.0),
			(x: 25.0, y: 25.0),
			(x: 20.0, y: 20.0),
		];
		let out = fast_clip_multipolygon(&MultiPolygon(vec![p]), &unit_rect());
		assert!(out.0.is_empty());
	}

	fn assert_relative_eq(a: f64, b: f64) {
		assert!((a - b).abs() < 1e-9, "{a} != {b}");
	}
}
