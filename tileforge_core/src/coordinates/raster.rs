//! Rasterising linestrings and polygon outlines into base-zoom tile sets.

use super::{latp2tileyf, lon2tilexf};
use crate::types::{TileCoordinate, TileXY};
use std::collections::HashSet;

/// Insert every tile a polyline passes through at `zoom`, including
/// tiles that are only grazed at a corner.
///
/// Points are `(lon, latp)` pairs in degrees. Uses the supercover
/// variant of Bresenham so diagonal crossings mark both neighbouring
/// tiles.
pub fn insert_intermediate_tiles(points: &[(f64, f64)], zoom: u8, tile_set: &mut HashSet<TileXY>) {
	let mut prev: Option<(i64, i64)> = None;
	for &(lon, latp) in points {
		let x2 = lon2tilexf(lon, zoom).floor() as i64;
		let y2 = latp2tileyf(latp, zoom).floor() as i64;
		insert(tile_set, x2, y2);

		let Some((x1, y1)) = prev else {
			prev = Some((x2, y2));
			continue;
		};
		prev = Some((x2, y2));

		// Supercover line algorithm from
		// http://eugen.dedu.free.fr/projects/bresenham/
		let (mut dx, mut dy) = (x2 - x1, y2 - y1);
		let xstep = if dx < 0 { -1 } else { 1 };
		let ystep = if dy < 0 { -1 } else { 1 };
		dx = dx.abs();
		dy = dy.abs();
		let (ddx, ddy) = (2 * dx, 2 * dy);
		let (mut x, mut y) = (x1, y1);

		if ddx >= ddy {
			let mut error = dx;
			let mut errorprev = dx;
			for _ in 0..dx {
				x += xstep;
				error += ddy;
				if error > ddx {
					y += ystep;
					error -= ddx;
					if error + errorprev < ddx {
						insert(tile_set, x, y - ystep);
					} else if error + errorprev > ddx {
						insert(tile_set, x - xstep, y);
					} else {
						insert(tile_set, x, y - ystep);
						insert(tile_set, x - xstep, y);
					}
				}
				insert(tile_set, x, y);
				errorprev = error;
			}
		} else {
			let mut error = dy;
			let mut errorprev = dy;
			for _ in 0..dy {
				y += ystep;
				error += ddx;
				if error > ddy {
					x += xstep;
					error -= ddy;
					if error + errorprev < ddy {
						insert(tile_set, x - xstep, y);
					} else if error + errorprev > ddy {
						insert(tile_set, x, y - ystep);
					} else {
						insert(tile_set, x - xstep, y);
						insert(tile_set, x, y - ystep);
					}
				}
				insert(tile_set, x, y);
				errorprev = error;
			}
		}
	}
}

fn insert(tile_set: &mut HashSet<TileXY>, x: i64, y: i64) {
	if x < 0 || y < 0 || x > i64::from(TileCoordinate::MAX) || y > i64::from(TileCoordinate::MAX) {
		return;
	}
	tile_set.insert(TileXY::new(x as TileCoordinate, y as TileCoordinate));
}

/// Close a rasterised polygon outline: for each x column, every tile
/// between the smallest and largest marked y is added.
pub fn fill_covered_tiles(tile_set: &mut HashSet<TileXY>) {
	let mut columns: std::collections::HashMap<TileCoordinate, (TileCoordinate, TileCoordinate)> =
		std::collections::HashMap::new();
	for t in tile_set.iter() {
		columns
			.entry(t.x)
			.and_modify(|(min, max)| {
				*min = (*min).min(t.y);
				*max = (*max).max(t.y);
			})
			.or_insert((t.y, t.y));
	}
	for (x, (min_y, max_y)) in columns {
		for y in min_y..=max_y {
			tile_set.insert(TileXY::new(x, y));
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::coordinates::{tilex2lon, tiley2latp};

	// Centre of a tile at zoom 4, in (lon, latp) degrees.
	fn centre(x: u32, y: u32) -> (f64, f64) {
		(
			(tilex2lon(x, 4) + tilex2lon(x + 1, 4)) / 2.0,
			(tiley2latp(y, 4) + tiley2latp(y + 1, 4)) / 2.0,
		)
	}

	#[test]
	fn horizontal_line_covers_row() {
		let mut set = HashSet::new();
		insert_intermediate_tiles(&[centre(2, 5), centre(9, 5)], 4, &mut set);
		assert_eq!(set.len(), 8);
		for x in 2..=9 {
			assert!(set.contains(&TileXY::new(x, 5)));
		}
	}

	#[test]
	fn diagonal_line_marks_both_neighbours() {
		let mut set = HashSet::new();
		// A perfect diagonal crosses tile corners, so both adjacent
		// tiles are part of the cover.
		insert_intermediate_tiles(&[centre(0, 0), centre(3, 3)], 4, &mut set);
		for i in 0..3 {
			assert!(set.contains(&TileXY::new(i, i)));
			assert!(set.contains(&TileXY::new(i + 1, i)));
			assert!(set.contains(&TileXY::new(i, i + 1)));
		}
		assert_eq!(set.len(), 10);
	}

	#[test]
	fn single_point_marks_one_tile() {
		let mut set = HashSet::new();
		insert_intermediate_tiles(&[centre(7, 7)], 4, &mut set);
		assert_eq!(set.len(), 1);
	}

	#[test]
	fn fill_closes_columns() {
		let mut set = HashSet::new();
		set.insert(TileXY::new(3, 1));
		set.insert(TileXY::new(3, 4));
		set.insert(TileXY::new(4, 2));
		fill_covered_tiles(&mut set);
		assert_eq!(set.len(), 5);
		assert!(set.contains(&TileXY::new(3, 2)));
		assert!(set.contains(&TileXY::new(3, 3)));
	}
}
