//! Fixed-point projected coordinates.

use std::fmt::Debug;

/// A coordinate pair in projected (spherical-Mercator) space.
///
/// Both fields are degrees multiplied by 10^7. `latp` is the projected
/// latitude, so equal increments map to equal pixels at any zoom.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LatpLon {
	pub latp: i32,
	pub lon: i32,
}

impl LatpLon {
	#[must_use]
	pub fn new(latp: i32, lon: i32) -> LatpLon {
		LatpLon { latp, lon }
	}

	/// Build from projected degrees.
	#[must_use]
	pub fn from_degrees(latp: f64, lon: f64) -> LatpLon {
		LatpLon {
			latp: (latp * 10_000_000.0).round() as i32,
			lon: (lon * 10_000_000.0).round() as i32,
		}
	}

	/// Projected latitude in degrees.
	#[must_use]
	pub fn latp_degrees(&self) -> f64 {
		f64::from(self.latp) / 10_000_000.0
	}

	/// Longitude in degrees.
	#[must_use]
	pub fn lon_degrees(&self) -> f64 {
		f64::from(self.lon) / 10_000_000.0
	}
}

impl Debug for LatpLon {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_fmt(format_args!("LatpLon({}, {})", self.latp, self.lon))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn degree_round_trip() {
		let ll = LatpLon::from_degrees(51.25, -0.75);
		assert_eq!(ll, LatpLon::new(512_500_000, -7_500_000));
		assert_eq!(ll.latp_degrees(), 51.25);
		assert_eq!(ll.lon_degrees(), -0.75);
	}
}
