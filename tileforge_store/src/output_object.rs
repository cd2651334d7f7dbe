//! The compact record describing one feature destined for the tiles.

use std::cmp::Ordering;
use tileforge_core::{NodeId, Z6Offset};

/// Geometry class of an output object; fits in three bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GeomType {
	Point = 0,
	Linestring = 1,
	MultiLinestring = 2,
	Polygon = 3,
}

/// Where an output object's geometry lives, encoded in the top two bits
/// of its object id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeometrySource {
	/// Resolve through the node store.
	Node = 0,
	/// Resolve through the way store.
	Way = 1,
	/// A handle into a materialised-geometry arena.
	Stored = 2,
}

const SOURCE_SHIFT: u32 = 62;
const ID_MASK: u64 = (1 << SOURCE_SHIFT) - 1;

/// Tag an id with its geometry source.
#[must_use]
pub fn tag_object_id(source: GeometrySource, id: u64) -> u64 {
	debug_assert!(id <= ID_MASK);
	((source as u64) << SOURCE_SHIFT) | id
}

/// Split a tagged object id back into source and raw id.
#[must_use]
pub fn untag_object_id(tagged: u64) -> (GeometrySource, u64) {
	let source = match tagged >> SOURCE_SHIFT {
		0 => GeometrySource::Node,
		1 => GeometrySource::Way,
		_ => GeometrySource::Stored,
	};
	(source, tagged & ID_MASK)
}

/// One object to be written into tiles: where it goes, what it is, and
/// which interned attributes annotate it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OutputObject {
	pub layer: u8,
	pub geom_type: GeomType,
	pub min_zoom: u8,
	pub z_order: i16,
	/// Tagged id; see [`tag_object_id`].
	pub object_id: NodeId,
	/// Id of the interned attribute set.
	pub attr_set: u32,
}

impl OutputObject {
	/// Lexicographic comparison for the tile worker's sort: layer,
	/// z-order (direction per layer), geometry type, attribute set,
	/// object id. Attributes come before the id so that identically
	/// attributed objects are adjacent and can be merged.
	#[must_use]
	pub fn compare(&self, other: &OutputObject, z_order_descending: bool) -> Ordering {
		let z_order = if z_order_descending {
			other.z_order.cmp(&self.z_order)
		} else {
			self.z_order.cmp(&other.z_order)
		};
		self
			.layer
			.cmp(&other.layer)
			.then(z_order)
			.then(self.geom_type.cmp(&other.geom_type))
			.then(self.attr_set.cmp(&other.attr_set))
			.then(self.object_id.cmp(&other.object_id))
	}
}

/// An output object placed in the tile index: coordinates are stored as
/// offsets from the corner of the containing z6 cluster tile.
#[derive(Clone, Copy, Debug)]
pub struct OutputObjectXY {
	pub oo: OutputObject,
	pub x_off: Z6Offset,
	pub y_off: Z6Offset,
}

/// As [`OutputObjectXY`], plus the original source id for builds that
/// preserve feature ids.
#[derive(Clone, Copy, Debug)]
pub struct OutputObjectXYID {
	pub oo: OutputObject,
	pub x_off: Z6Offset,
	pub y_off: Z6Offset,
	pub osm_id: u64,
}

#[cfg(test)]
mod tests {
	use super::*;

	fn oo(layer: u8, z_order: i16, attr_set: u32, object_id: u64) -> OutputObject {
		OutputObject {
			layer,
			geom_type: GeomType::Linestring,
			min_zoom: 0,
			z_order,
			object_id,
			attr_set,
		}
	}

	#[test]
	fn id_tagging_round_trips() {
		for source in [GeometrySource::Node, GeometrySource::Way, GeometrySource::Stored] {
			let tagged = tag_object_id(source, 123_456_789);
			assert_eq!(untag_object_id(tagged), (source, 123_456_789));
		}
	}

	#[test]
	fn sort_is_layer_then_z_order_then_attrs() {
		let a = oo(0, 5, 9, 1);
		let b = oo(1, 0, 0, 0);
		assert_eq!(a.compare(&b, false), Ordering::Less);

		let c = oo(0, 7, 9, 1);
		assert_eq!(a.compare(&c, false), Ordering::Less);
		assert_eq!(a.compare(&c, true), Ordering::Greater);

		let d = oo(0, 5, 10, 0);
		assert_eq!(a.compare(&d, false), Ordering::Less);

		let e = oo(0, 5, 9, 2);
		assert_eq!(a.compare(&e, false), Ordering::Less);
		assert_eq!(a.compare(&a, false), Ordering::Equal);
	}
}
