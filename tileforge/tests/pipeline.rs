//! End-to-end: PBF in, vector tiles out.

mod common;

use anyhow::Result;
use common::{FixtureNode, FixtureRelation, FixtureWay, write_pbf};
use std::sync::Arc;
use tileforge::{
	AttributeStore, AttributeValue, Compression, Config, EmittedFeature, FeatureSink, GeomType,
	LayerDef, MemoryTileWriter, MmapArena, NodeStore, PbfProcessor, ProcessorConfig,
	RelationMembers, RelationScanResult, SignificantTags, Source, SortedNodeStore, SortedWayStore,
	TagFilter, TagMap, TagTransform, TileDataSource, WayStore, write_tiles,
};
use tileforge_core::LatpLon;
use tileforge_core::coordinates::{lat2latp, lat2tiley, lon2tilex};
use tileforge_pbf::reader::{WIRE_LEN, WireReader};

/// A transform that draws tagged highways and any multipolygon
/// relation tagged `natural=water`.
struct TestProfile;

impl TagTransform for TestProfile {
	fn significant_way_keys(&self) -> Option<Vec<TagFilter>> {
		Some(vec![TagFilter::parse("highway"), TagFilter::parse("natural")])
	}

	fn scan_relation(&self, _id: u64, tags: &TagMap) -> Result<RelationScanResult> {
		Ok(RelationScanResult {
			accepted: tags.get("natural") == Some("water"),
			added_tags: Vec::new(),
		})
	}

	fn node_function(&self, _id: u64, _ll: LatpLon, _tags: &TagMap, _sink: &mut FeatureSink) -> Result<()> {
		Ok(())
	}

	fn way_function(&self, _id: u64, _nodes: &[LatpLon], tags: &TagMap, sink: &mut FeatureSink) -> Result<()> {
		if let Some(class) = tags.get("highway") {
			sink.emit(EmittedFeature {
				layer: 0,
				geom_type: GeomType::Linestring,
				min_zoom: 10,
				z_order: 0,
				attributes: vec![(
					"highway".to_string(),
					AttributeValue::String(class.to_string()),
					0,
				)],
			});
		}
		Ok(())
	}

	fn relation_function(
		&self,
		_id: u64,
		_members: &RelationMembers,
		tags: &TagMap,
		sink: &mut FeatureSink,
	) -> Result<()> {
		if tags.get("natural") == Some("water") {
			sink.emit(EmittedFeature {
				layer: 1,
				geom_type: GeomType::Polygon,
				min_zoom: 0,
				z_order: 0,
				attributes: vec![("water".to_string(), AttributeValue::Bool(true), 0)],
			});
		}
		Ok(())
	}
}

fn config() -> Config {
	let mut config = Config {
		base_zoom: 14,
		start_zoom: 10,
		end_zoom: 14,
		compress: Compression::None,
		..Config::default()
	};
	config
		.layers
		.add_layer(LayerDef { name: "transportation".into(), ..LayerDef::default() }, None)
		.unwrap();
	config
		.layers
		.add_layer(LayerDef { name: "water".into(), ..LayerDef::default() }, None)
		.unwrap();
	config
}

/// Parse a serialised tile into (layer name, feature count, geometry
/// command count of the first feature, tag strings).
fn inspect_tile(data: &[u8]) -> Vec<(String, usize, Vec<u32>, Vec<String>)> {
	let mut layers = Vec::new();
	let mut reader = WireReader::new(data);
	while reader.has_remaining() {
		let (field, wire) = reader.read_key().unwrap();
		assert_eq!((field, wire), (3, WIRE_LEN));
		let mut name = String::new();
		let mut features = 0usize;
		let mut first_geometry = Vec::new();
		let mut strings = Vec::new();
		let mut layer_reader = WireReader::new(reader.read_bytes().unwrap());
		while layer_reader.has_remaining() {
			match layer_reader.read_key().unwrap() {
				(1, WIRE_LEN) => name = layer_reader.read_string().unwrap().to_string(),
				(2, WIRE_LEN) => {
					features += 1;
					let mut feature = WireReader::new(layer_reader.read_bytes().unwrap());
					while feature.has_remaining() {
						match feature.read_key().unwrap() {
							(4, WIRE_LEN) => {
								let geometry = feature.read_packed_varint().unwrap();
								if first_geometry.is_empty() {
									first_geometry = geometry.iter().map(|g| *g as u32).collect();
								}
							}
							(_, w) => feature.skip(w).unwrap(),
						}
					}
				}
				(3, WIRE_LEN) => strings.push(layer_reader.read_string().unwrap().to_string()),
				(4, WIRE_LEN) => {
					let mut value = WireReader::new(layer_reader.read_bytes().unwrap());
					while value.has_remaining() {
						match value.read_key().unwrap() {
							(1, WIRE_LEN) => strings.push(value.read_string().unwrap().to_string()),
							(_, w) => value.skip(w).unwrap(),
						}
					}
				}
				(_, w) => layer_reader.skip(w).unwrap(),
			}
		}
		layers.push((name, features, first_geometry, strings));
	}
	layers
}

#[test]
fn single_way_produces_one_linestring_feature() -> Result<()> {
	let dir = tempfile::tempdir()?;
	let pbf = dir.path().join("input.pbf");
	write_pbf(
		&pbf,
		&[
			FixtureNode { id: 1, lat: 10.0, lon: 20.0, tags: vec![] },
			FixtureNode { id: 2, lat: 11.0, lon: 21.0, tags: vec![] },
		],
		&[FixtureWay {
			id: 100,
			refs: vec![1, 2],
			tags: vec![("highway".into(), "residential".into())],
		}],
		&[],
	);

	let _ = env_logger::builder().is_test(true).try_init();
	let arena = Arc::new(MmapArena::new_anonymous());
	// The processor resolves ways through the same node store it fills.
	let node_store_arc: Arc<dyn NodeStore> = Arc::new(SortedNodeStore::new(true, arena.clone()));
	let way_store = SortedWayStore::new(true, node_store_arc.clone(), arena);
	let attributes = AttributeStore::new();
	let tile_data = TileDataSource::new(2, 14, false);

	let transform = TestProfile;
	let processor = PbfProcessor::new(
		ProcessorConfig { threads: 2, ..ProcessorConfig::default() },
		&transform,
		node_store_arc.as_ref(),
		&way_store,
		&attributes,
		&tile_data,
	)?;
	let header = processor.process(&pbf)?;
	assert!(header.sort_type_then_id);

	tile_data.finalize(2);
	attributes.done_reading();

	let writer = MemoryTileWriter::new();
	let config = config();
	let sources = [Source {
		data: &tile_data,
		node_store: node_store_arc.as_ref(),
		way_store: &way_store,
	}];
	write_tiles(&config, &attributes, &sources, &writer)?;

	// The z10 tile containing node 1 has exactly one feature with two
	// points on the transportation layer.
	let x = u32::from(lon2tilex(20.0, 10));
	let y = u32::from(lat2tiley(10.0, 10));
	let tile = writer.get(10, x, y).expect("tile with the way");
	let layers = inspect_tile(&tile);
	assert_eq!(layers.len(), 1);
	let (name, features, geometry, strings) = &layers[0];
	assert_eq!(name, "transportation");
	assert_eq!(*features, 1);
	// MoveTo(1) + two coordinate pairs + LineTo(1).
	assert_eq!(geometry.len(), 6);
	assert_eq!(geometry[0], 9);
	assert!(strings.contains(&"highway".to_string()));
	assert!(strings.contains(&"residential".to_string()));

	// Away from the way there is nothing.
	assert!(writer.get(10, x + 5, y + 5).is_none());

	// The way is visible at every zoom from 10 to 14.
	for zoom in 10..=14u8 {
		let x = u32::from(lon2tilex(20.0, zoom));
		let y = u32::from(lat2tiley(10.0, zoom));
		assert!(writer.get(zoom, x, y).is_some(), "no tile at z{zoom}");
	}
	Ok(())
}

#[test]
fn relation_becomes_a_polygon_feature() -> Result<()> {
	let dir = tempfile::tempdir()?;
	let pbf = dir.path().join("water.pbf");

	// A square lake from two half-perimeter ways.
	write_pbf(
		&pbf,
		&[
			FixtureNode { id: 1, lat: 10.0, lon: 20.0, tags: vec![] },
			FixtureNode { id: 2, lat: 10.0, lon: 20.1, tags: vec![] },
			FixtureNode { id: 3, lat: 10.1, lon: 20.1, tags: vec![] },
			FixtureNode { id: 4, lat: 10.1, lon: 20.0, tags: vec![] },
		],
		&[
			FixtureWay { id: 100, refs: vec![1, 2, 3], tags: vec![] },
			FixtureWay { id: 101, refs: vec![3, 4, 1], tags: vec![] },
		],
		&[FixtureRelation {
			id: 200,
			way_members: vec![(100, "outer"), (101, "outer")],
			tags: vec![
				("type".into(), "multipolygon".into()),
				("natural".into(), "water".into()),
			],
		}],
	);

	let arena = Arc::new(MmapArena::new_anonymous());
	let node_store: Arc<dyn NodeStore> = Arc::new(SortedNodeStore::new(true, arena.clone()));
	let way_store = SortedWayStore::new(true, node_store.clone(), arena);
	let attributes = AttributeStore::new();
	let tile_data = TileDataSource::new(2, 14, false);

	let transform = TestProfile;
	let processor = PbfProcessor::new(
		ProcessorConfig { threads: 2, ..ProcessorConfig::default() },
		&transform,
		node_store.as_ref(),
		&way_store,
		&attributes,
		&tile_data,
	)?;
	processor.process(&pbf)?;
	tile_data.finalize(2);
	attributes.done_reading();

	let writer = MemoryTileWriter::new();
	let config = config();
	let sources = [Source {
		data: &tile_data,
		node_store: node_store.as_ref(),
		way_store: &way_store,
	}];
	write_tiles(&config, &attributes, &sources, &writer)?;

	let x = u32::from(lon2tilex(20.05, 12));
	let latp = lat2latp(10.05);
	let y = u32::from(tileforge_core::coordinates::latp2tiley(latp, 12));
	let tile = writer.get(12, x, y).expect("tile with the lake");
	let layers = inspect_tile(&tile);
	let water = layers.iter().find(|l| l.0 == "water").expect("water layer");
	assert_eq!(water.1, 1);
	// The ring ends with a ClosePath command.
	assert_eq!(*water.2.last().unwrap(), 15);
	Ok(())
}

#[test]
fn significant_tags_are_respected() -> Result<()> {
	let sig = SignificantTags::new(&["highway".into()])?;
	let mut tags = TagMap::new();
	tags.add("building", "yes");
	assert!(!sig.filter(&tags));
	Ok(())
}
