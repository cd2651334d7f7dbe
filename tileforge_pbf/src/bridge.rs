//! The seam between the core and the user's tag-processing rules.
//!
//! Whatever drives the rules (a script engine, a hardcoded profile)
//! implements [`TagTransform`]; the processor calls it with each
//! object's tags and collects the features it chooses to emit.

use crate::tags::{TagFilter, TagMap};
use anyhow::Result;
use tileforge_core::{LatpLon, NodeId, RelationId, WayId};
use tileforge_store::attribute::AttributeValue;
use tileforge_store::output_object::GeomType;

/// One feature a callback wants written to the tiles.
#[derive(Debug, Clone)]
pub struct EmittedFeature {
	pub layer: u8,
	pub geom_type: GeomType,
	pub min_zoom: u8,
	pub z_order: i16,
	/// Key, value, and minimum zoom for each attribute.
	pub attributes: Vec<(String, AttributeValue, u8)>,
}

/// Collects the features emitted while processing one object.
#[derive(Debug, Default)]
pub struct FeatureSink {
	features: Vec<EmittedFeature>,
}

impl FeatureSink {
	#[must_use]
	pub fn new() -> FeatureSink {
		FeatureSink::default()
	}

	pub fn emit(&mut self, feature: EmittedFeature) {
		self.features.push(feature);
	}

	#[must_use]
	pub fn into_features(self) -> Vec<EmittedFeature> {
		self.features
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.features.is_empty()
	}
}

/// What a relation scan decided.
#[derive(Debug, Default, Clone)]
pub struct RelationScanResult {
	pub accepted: bool,
	/// Tags to merge into the member ways when they are processed.
	pub added_tags: Vec<(String, String)>,
}

/// The member ways of a relation, split by role.
#[derive(Debug, Default, Clone)]
pub struct RelationMembers {
	pub outer_ways: Vec<WayId>,
	pub inner_ways: Vec<WayId>,
}

/// The five callbacks of the tag-processing rules. All are called from
/// multiple worker threads and must be pure with respect to the core's
/// stores; an error from any of them aborts the build.
pub trait TagTransform: Send + Sync {
	/// Keys that make an otherwise unused node worth processing.
	fn significant_node_keys(&self) -> Vec<String> {
		Vec::new()
	}

	/// Filters that make a way worth processing. Returning `None`
	/// means every way is significant.
	fn significant_way_keys(&self) -> Option<Vec<TagFilter>> {
		None
	}

	/// Decide early whether a relation is of interest.
	fn scan_relation(&self, id: RelationId, tags: &TagMap) -> Result<RelationScanResult>;

	fn node_function(
		&self,
		id: NodeId,
		ll: LatpLon,
		tags: &TagMap,
		sink: &mut FeatureSink,
	) -> Result<()>;

	fn way_function(
		&self,
		id: WayId,
		nodes: &[LatpLon],
		tags: &TagMap,
		sink: &mut FeatureSink,
	) -> Result<()>;

	fn relation_function(
		&self,
		id: RelationId,
		members: &RelationMembers,
		tags: &TagMap,
		sink: &mut FeatureSink,
	) -> Result<()>;
}
