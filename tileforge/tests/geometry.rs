//! Geometry construction edge cases.

use anyhow::Result;
use geo_types::{Coord, LineString};
use tileforge::geom::{MultiPolygon, Polygon};
use tileforge::{
	BinarySearchNodeStore, BinarySearchWayStore, GeomType, GeometrySource, TileBbox,
	TileDataSource, tag_object_id,
};
use tileforge_core::TileXY;
use tileforge_tile::build::{BuiltGeometry, GeometryBuilder};

fn builder_fixture() -> (TileDataSource, BinarySearchNodeStore, BinarySearchWayStore) {
	(
		TileDataSource::new(1, 14, false),
		BinarySearchNodeStore::new(),
		BinarySearchWayStore::new(),
	)
}

#[test]
fn self_intersecting_polygon_clips_to_a_valid_result() -> Result<()> {
	let (tile_data, node_store, way_store) = builder_fixture();

	// A bowtie: two triangles joined at a crossing point.
	let bowtie = MultiPolygon(vec![Polygon::new(
		LineString::new(vec![
			Coord { x: 0.0, y: 0.0 },
			Coord { x: 1.0, y: 1.0 },
			Coord { x: 1.0, y: 0.0 },
			Coord { x: 0.0, y: 1.0 },
			Coord { x: 0.0, y: 0.0 },
		]),
		Vec::new(),
	)]);
	let handle = {
		let lease = tile_data.multipolygons.lease();
		lease.add(bowtie)
	};
	let object_id = tag_object_id(GeometrySource::Stored, handle);

	let builder = GeometryBuilder {
		source: &tile_data,
		node_store: &node_store,
		way_store: &way_store,
	};

	// A z14 tile inside the bowtie's left wing.
	let x = tileforge_core::coordinates::lon2tilex(0.2, 14);
	let y = tileforge_core::coordinates::latp2tiley(0.5, 14);
	let bbox = TileBbox::new(TileXY::new(x, y), 14, false, true);
	let built = builder.build_way_geometry(GeomType::Polygon, object_id, &bbox)?;

	let BuiltGeometry::MultiPolygon(mp) = built else {
		panic!("expected a multipolygon");
	};
	// Whatever the fallback chain produced, it must be valid.
	use geo::Validation;
	assert!(mp.is_valid());
	Ok(())
}
