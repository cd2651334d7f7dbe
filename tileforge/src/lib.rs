//! tileforge turns planet-scale OpenStreetMap data into a pyramid of
//! vector tiles.
//!
//! This crate re-exports the pieces an embedding application needs:
//! the stores ([`tileforge_store`]), the PBF pipeline
//! ([`tileforge_pbf`]), and the tile workers ([`tileforge_tile`]).
//! A typical build wires them together like this:
//!
//! 1. create a node store, way store, [`AttributeStore`] and
//!    [`TileDataSource`];
//! 2. run a [`PbfProcessor`] with your [`TagTransform`] rules;
//! 3. finalise the tile index and attribute store;
//! 4. call [`write_tiles`] with a [`TileWriter`].

pub use tileforge_core::{
	Blob, LatpLon, NodeId, RelationId, TileXY, WayId,
	arena::MmapArena,
	coordinates,
	progress,
};
pub use tileforge_pbf::{
	EmittedFeature, FeatureSink, PbfProcessor, ProcessorConfig, RelationMembers,
	RelationScanResult, SignificantTags, TagFilter, TagMap, TagTransform, scan_pbf,
};
pub use tileforge_store::{
	StoreError,
	attribute::{AttributeStore, AttributeValue},
	geom,
	node::{BinarySearchNodeStore, CompactNodeStore, NodeStore, ShardedNodeStore, SortedNodeStore},
	output_object::{GeomType, GeometrySource, OutputObject, tag_object_id, untag_object_id},
	tile_index::TileDataSource,
	way::{BinarySearchWayStore, ShardedWayStore, SortedWayStore, WayStore},
};
pub use tileforge_tile::{
	Compression, Config, DirectoryTileWriter, LayerDef, LayerDefinition, MemoryTileWriter, Source,
	TileBbox, TileWriter, generate_tile, write_tiles,
};
