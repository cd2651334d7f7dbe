//! Spherical-Mercator conversions and tile rasterisation.
//!
//! Everything here works in "latp" space: latitude is projected through
//! the Mercator transform and expressed in degrees, so that a constant
//! latp step covers a constant number of pixels at any zoom.

mod raster;
mod tile_set;

pub use raster::{fill_covered_tiles, insert_intermediate_tiles};
pub use tile_set::{LossyTileCoordinatesSet, PreciseTileCoordinatesSet, TileCoordinatesSet};

use crate::types::{LatpLon, TileCoordinate, TileXY};

/// Maximum latitude of the square Mercator world.
pub const MAX_LAT: f64 = 85.0511;
/// Minimum latitude of the square Mercator world.
pub const MIN_LAT: f64 = -MAX_LAT;

/// Earth's mean radius in metres.
pub const RADIUS_METER: f64 = 6_371_000.0;

#[must_use]
pub fn deg2rad(deg: f64) -> f64 {
	deg.to_radians()
}

#[must_use]
pub fn rad2deg(rad: f64) -> f64 {
	rad.to_degrees()
}

/// Project a latitude into latp space.
#[must_use]
pub fn lat2latp(lat: f64) -> f64 {
	rad2deg(f64::ln(f64::tan(deg2rad(lat + 90.0) / 2.0)))
}

/// Unproject a latp value back to latitude.
#[must_use]
pub fn latp2lat(latp: f64) -> f64 {
	rad2deg(f64::atan(f64::exp(deg2rad(latp)))) * 2.0 - 90.0
}

/// Fractional tile x for a longitude at zoom `z`.
#[must_use]
pub fn lon2tilexf(lon: f64, z: u8) -> f64 {
	((lon + 180.0) / 360.0) * f64::from(1u32 << z)
}

/// Fractional tile y for a latp at zoom `z`.
#[must_use]
pub fn latp2tileyf(latp: f64, z: u8) -> f64 {
	((180.0 - latp) / 360.0) * f64::from(1u32 << z)
}

/// Fractional tile y for an unprojected latitude at zoom `z`.
#[must_use]
pub fn lat2tileyf(lat: f64, z: u8) -> f64 {
	latp2tileyf(lat2latp(lat), z)
}

#[must_use]
pub fn lon2tilex(lon: f64, z: u8) -> TileCoordinate {
	clamp_to_zoom(lon2tilexf(lon, z), z)
}

#[must_use]
pub fn latp2tiley(latp: f64, z: u8) -> TileCoordinate {
	clamp_to_zoom(latp2tileyf(latp, z), z)
}

#[must_use]
pub fn lat2tiley(lat: f64, z: u8) -> TileCoordinate {
	clamp_to_zoom(lat2tileyf(lat, z), z)
}

/// Longitude of the western edge of tile column `x` at zoom `z`.
#[must_use]
pub fn tilex2lon(x: u32, z: u8) -> f64 {
	f64::from(x) / f64::from(1u32 << z) * 360.0 - 180.0
}

/// Latp of the northern edge of tile row `y` at zoom `z`.
#[must_use]
pub fn tiley2latp(y: u32, z: u8) -> f64 {
	180.0 - f64::from(y) / f64::from(1u32 << z) * 360.0
}

/// Latitude of the northern edge of tile row `y` at zoom `z`.
#[must_use]
pub fn tiley2lat(y: u32, z: u8) -> f64 {
	latp2lat(tiley2latp(y, z))
}

/// The base-zoom tile containing a fixed-point coordinate.
#[must_use]
pub fn latplon2index(ll: LatpLon, base_zoom: u8) -> TileXY {
	TileXY {
		x: lon2tilex(ll.lon_degrees(), base_zoom),
		y: latp2tiley(ll.latp_degrees(), base_zoom),
	}
}

/// Convert a latp-degree distance into metres at the given latp.
#[must_use]
pub fn degp2meter(degp: f64, latp: f64) -> f64 {
	RADIUS_METER * deg2rad(degp) * f64::cos(deg2rad(latp2lat(latp)))
}

/// Convert metres into latp degrees at the given latp.
#[must_use]
pub fn meter2degp(meter: f64, latp: f64) -> f64 {
	rad2deg(meter / (RADIUS_METER * f64::cos(deg2rad(latp2lat(latp)))))
}

fn clamp_to_zoom(value: f64, z: u8) -> TileCoordinate {
	let max = (1u32 << z) - 1;
	(value.floor().max(0.0) as u32).min(max) as TileCoordinate
}
