//! Visvalingam line simplification.
//!
//! Points are removed smallest-effective-area first until every
//! remaining point spans a triangle at least `tolerance²` big. Rings
//! keep at least four points (closing point included), open lines two.

use std::collections::BinaryHeap;
use tileforge_store::geom::{Linestring, MultiLinestring, MultiPolygon, Polygon, Ring};

const MIN_RING_POINTS: usize = 4;
const MIN_LINE_POINTS: usize = 2;

#[derive(PartialEq)]
struct Candidate {
	area: f64,
	index: usize,
	version: u64,
}

impl Eq for Candidate {}

impl Ord for Candidate {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		// Min-heap on area.
		other.area.total_cmp(&self.area)
	}
}

impl PartialOrd for Candidate {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

fn triangle_area(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> f64 {
	((b.0 - a.0) * (c.1 - a.1) - (c.0 - a.0) * (b.1 - a.1)).abs() / 2.0
}

fn simplify_points(points: &[(f64, f64)], tolerance: f64, min_points: usize) -> Vec<(f64, f64)> {
	let n = points.len();
	if n <= min_points {
		return points.to_vec();
	}
	let threshold = tolerance * tolerance;

	// Doubly linked list over the point indices.
	let mut prev: Vec<usize> = (0..n).map(|i| i.wrapping_sub(1)).collect();
	let mut next: Vec<usize> = (1..=n).collect();
	let mut alive = vec![true; n];
	let mut version = vec![0u64; n];
	let mut remaining = n;

	let mut heap = BinaryHeap::new();
	for i in 1..n - 1 {
		heap.push(Candidate {
			area: triangle_area(points[i - 1], points[i], points[i + 1]),
			index: i,
			version: 0,
		});
	}

	while let Some(candidate) = heap.pop() {
		let i = candidate.index;
		if !alive[i] || candidate.version != version[i] {
			continue;
		}
		if candidate.area >= threshold || remaining <= min_points {
			break;
		}

		alive[i] = false;
		remaining -= 1;
		let (p, q) = (prev[i], next[i]);
		next[p] = q;
		prev[q] = p;

		// Recompute the neighbours' effective areas.
		for j in [p, q] {
			if j == 0 || j >= n - 1 || !alive[j] {
				continue;
			}
			version[j] += 1;
			heap.push(Candidate {
				area: triangle_area(points[prev[j]], points[j], points[next[j]]),
				index: j,
				version: version[j],
			});
		}
	}

	(0..n).filter(|i| alive[*i]).map(|i| points[i]).collect()
}

/// Simplify one linestring.
#[must_use]
pub fn simplify_linestring(ls: &Linestring, tolerance: f64, is_ring: bool) -> Linestring {
	let points: Vec<(f64, f64)> = ls.0.iter().map(|c| (c.x, c.y)).collect();
	let min_points = if is_ring { MIN_RING_POINTS } else { MIN_LINE_POINTS };
	Linestring::new(
		simplify_points(&points, tolerance, min_points)
			.into_iter()
			.map(|(x, y)| geo_types::Coord { x, y })
			.collect(),
	)
}

/// Simplify each constituent linestring.
#[must_use]
pub fn simplify_multilinestring(mls: &MultiLinestring, tolerance: f64) -> MultiLinestring {
	MultiLinestring(
		mls
			.0
			.iter()
			.map(|ls| simplify_linestring(ls, tolerance, false))
			.collect(),
	)
}

/// Simplify polygon rings, dropping rings that collapse.
#[must_use]
pub fn simplify_multipolygon(mp: &MultiPolygon, tolerance: f64) -> MultiPolygon {
	let mut out = Vec::new();
	for polygon in &mp.0 {
		let outer = simplify_linestring(polygon.exterior(), tolerance, true);
		if outer.0.len() < MIN_RING_POINTS {
			continue;
		}
		let inners: Vec<Ring> = polygon
			.interiors()
			.iter()
			.map(|r| simplify_linestring(r, tolerance, true))
			.filter(|r| r.0.len() >= MIN_RING_POINTS)
			.collect();
		out.push(Polygon::new(outer, inners));
	}
	MultiPolygon(out)
}

#[cfg(test)]
mod tests {
	use super::*;
	use geo_types::line_string;

	#[test]
	fn collinear_points_are_removed() {
		let ls = line_string![
			(x: 0.0, y: 0.0),
			(x: 1.0, y: 0.0),
			(x: 2.0, y: 0.0),
			(x: 3.0, y: 0.0),
			(x: 10.0, y: 0.0),
		];
		let simplified = simplify_linestring(&ls, 0.01, false);
		assert_eq!(simplified.0.len(), 2);
		assert_eq!(simplified.0[0], geo_types::Coord { x: 0.0, y: 0.0 });
		assert_eq!(simplified.0[1], geo_types::Coord { x: 10.0, y: 0.0 });
	}

	#[test]
	fn significant_detours_survive() {
		let ls = line_string![
			(x: 0.0, y: 0.0),
			(x: 5.0, y: 8.0),
			(x: 10.0, y: 0.0),
		];
		let simplified = simplify_linestring(&ls, 1.0, false);
		assert_eq!(simplified.0.len(), 3);
	}

	#[test]
	fn small_wiggles_vanish() {
		let ls = line_string![
			(x: 0.0, y: 0.0),
			(x: 5.0, y: 0.001),
			(x: 10.0, y: 0.0),
		];
		let simplified = simplify_linestring(&ls, 1.0, false);
		assert_eq!(simplified.0.len(), 2);
	}

	#[test]
	fn rings_keep_four_points() {
		use geo_types::polygon;
		// A tiny triangle-ish ring below tolerance everywhere.
		let mp = MultiPolygon(vec![polygon![
			(x: 0.0, y: 0.0),
			(x: 0.1, y: 0.0),
			(x: 0.1, y: 0.1),
			(x: 0.0, y: 0.1),
			(x: 0.0, y: 0.0),
		]]);
		let out = simplify_multipolygon(&mp, 10.0);
		assert_eq!(out.0.len(), 1);
		assert_eq!(out.0[0].exterior().0.len(), 4);
	}
}
