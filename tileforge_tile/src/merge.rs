//! Merging adjacent same-attribute geometries before writing.

use geo::{BooleanOps, Intersects};
use std::collections::HashMap;
use tileforge_store::geom::{Linestring, MultiLinestring, MultiPolygon};

// Merged linestrings are capped so a pathological tile cannot grow one
// endless feature.
const MAX_MERGED_POINTS: usize = 6_000;

/// Concatenate linestrings that share endpoints: for each piece, keep
/// appending whichever other piece starts at its end (or ends at its
/// start) until nothing joins.
#[must_use]
pub fn reorder_multilinestring(input: MultiLinestring) -> MultiLinestring {
	let key = |c: &geo_types::Coord<f64>| (c.x.to_bits(), c.y.to_bits());

	let mut start_points: HashMap<(u64, u64), usize> = HashMap::new();
	let mut end_points: HashMap<(u64, u64), usize> = HashMap::new();
	for (i, ls) in input.0.iter().enumerate() {
		if ls.0.is_empty() {
			continue;
		}
		start_points.insert(key(ls.0.first().unwrap()), i);
		end_points.insert(key(ls.0.last().unwrap()), i);
	}

	let mut added = vec![false; input.0.len()];
	let mut output = Vec::new();
	for i in 0..input.0.len() {
		if added[i] || input.0[i].0.is_empty() {
			continue;
		}
		let mut ls: Vec<geo_types::Coord<f64>> = input.0[i].0.clone();
		added[i] = true;
		loop {
			if let Some(&idx) = start_points.get(&key(ls.last().unwrap()))
				&& !added[idx]
				&& input.0[idx].0.len() + ls.len() < MAX_MERGED_POINTS
			{
				ls.extend_from_slice(&input.0[idx].0[1..]);
				added[idx] = true;
				continue;
			}
			if let Some(&idx) = end_points.get(&key(ls.first().unwrap()))
				&& !added[idx]
				&& input.0[idx].0.len() + ls.len() < MAX_MERGED_POINTS
			{
				let mut joined = input.0[idx].0.clone();
				joined.extend_from_slice(&ls[1..]);
				ls = joined;
				added[idx] = true;
				continue;
			}
			break;
		}
		output.push(Linestring::new(ls));
	}
	MultiLinestring(output)
}

/// Append one multilinestring onto another; the pieces are matched up
/// by a later [`reorder_multilinestring`].
pub fn merge_multilinestrings(input: &mut MultiLinestring, to_merge: MultiLinestring) {
	input.0.extend(to_merge.0);
}

/// Merge a multipolygon into another, unioning against the first
/// constituent that intersects it.
pub fn merge_multipolygons(input: &mut MultiPolygon, to_merge: MultiPolygon) {
	if input.intersects(&to_merge) {
		for i in 0..input.0.len() {
			if input.0[i].intersects(&to_merge) {
				let part = input.0.remove(i);
				let union = MultiPolygon(vec![part]).union(&to_merge);
				input.0.extend(union.0);
				return;
			}
		}
	}
	input.0.extend(to_merge.0);
}

/// Drop polygon parts and holes whose absolute area is below
/// `filter_area`.
pub fn remove_parts_below_size(mp: &mut MultiPolygon, filter_area: f64) {
	let ring_area = |ring: &Linestring| {
		// Shoelace over the closed ring.
		let mut sum = 0.0;
		for w in ring.0.windows(2) {
			sum += w[0].x * w[1].y - w[1].x * w[0].y;
		}
		(sum / 2.0).abs()
	};

	mp.0.retain(|polygon| ring_area(polygon.exterior()) >= filter_area);
	for polygon in &mut mp.0 {
		let inners: Vec<Linestring> = polygon
			.interiors()
			.iter()
			.filter(|inner| ring_area(inner) >= filter_area)
			.cloned()
			.collect();
		*polygon = geo_types::Polygon::new(polygon.exterior().clone(), inners);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use geo::Area;
	use geo_types::{line_string, polygon};

	#[test]
	fn endpoint_chains_concatenate() {
		let input = MultiLinestring(vec![
			line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)],
			line_string![(x: 1.0, y: 0.0), (x: 2.0, y: 0.0)],
			line_string![(x: 2.0, y: 0.0), (x: 3.0, y: 0.0)],
		]);
		let output = reorder_multilinestring(input);
		assert_eq!(output.0.len(), 1);
		assert_eq!(output.0[0].0.len(), 4);
	}

	#[test]
	fn prepending_works_too() {
		let input = MultiLinestring(vec![
			line_string![(x: 1.0, y: 0.0), (x: 2.0, y: 0.0)],
			line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)],
		]);
		let output = reorder_multilinestring(input);
		assert_eq!(output.0.len(), 1);
		assert_eq!(output.0[0].0.first().unwrap().x, 0.0);
		assert_eq!(output.0[0].0.last().unwrap().x, 2.0);
	}

	#[test]
	fn disjoint_lines_stay_apart() {
		let input = MultiLinestring(vec![
			line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)],
			line_string![(x: 5.0, y: 5.0), (x: 6.0, y: 5.0)],
		]);
		assert_eq!(reorder_multilinestring(input).0.len(), 2);
	}

	#[test]
	fn intersecting_polygons_union() {
		let mut a = MultiPolygon(vec![polygon![
			(x: 0.0, y: 0.0),
			(x: 10.0, y: 0.0),
			(x: 10.0, y: 10.0),
			(x: 0.0, y: 10.0),
			(x: 0.0, y: 0.0),
		]]);
		let b = MultiPolygon(vec![polygon![
			(x: 5.0, y: 0.0),
			(x: 15.0, y: 0.0),
			(x: 15.0, y: 10.0),
			(x: 5.0, y: 10.0),
			(x: 5.0, y: 0.0),
		]]);
		merge_multipolygons(&mut a, b);
		assert_eq!(a.0.len(), 1);
		assert!((a.unsigned_area() - 150.0).abs() < 1e-6);
	}

	#[test]
	fn disjoint_polygons_append() {
		let mut a = MultiPolygon(vec![polygon![
			(x: 0.0, y: 0.0),
			(x: 1.0, y: 0.0),
			(x: 1.0, y: 1.0),
			(x: 0.0, y: 0.0),
		]]);
		let b = MultiPolygon(vec![polygon![
			(x: 5.0, y: 5.0),
			(x: 6.0, y: 5.0),
			(x: 6.0, y: 6.0),
			(x: 5.0, y: 5.0),
		]]);
		merge_multipolygons(&mut a, b);
		assert_eq!(a.0.len(), 2);
	}

	#[test]
	fn small_parts_are_filtered() {
		let mut mp = MultiPolygon(vec![
			polygon![
				(x: 0.0, y: 0.0),
				(x: 10.0, y: 0.0),
				(x: 10.0, y: 10.0),
				(x: 0.0, y: 10.0),
				(x: 0.0, y: 0.0),
			],
			polygon![
				(x: 20.0, y: 20.0),
				(x: 20.1, y: 20.0),
				(x: 20.1, y: 20.1),
				(x: 20.0, y: 20.0),
			],
		]);
		remove_parts_below_size(&mut mp, 1.0);
		assert_eq!(mp.0.len(), 1);
	}
}
