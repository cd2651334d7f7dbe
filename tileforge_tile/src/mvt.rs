//! Serialising tiles to the vector-tile wire format.
//!
//! Features carry dictionary-encoded tags and a command stream of
//! zig-zag-encoded pixel coordinates. Zero-length moves and degenerate
//! rings are suppressed before they reach the wire.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use tileforge_core::Blob;

const MOVE_TO: u32 = 1;
const LINE_TO: u32 = 2;
const CLOSE_PATH: u32 = 7;

pub const GEOM_POINT: u64 = 1;
pub const GEOM_LINESTRING: u64 = 2;
pub const GEOM_POLYGON: u64 = 3;

/// A value in a layer's value dictionary.
#[derive(Clone, Debug)]
pub enum MvtValue {
	String(String),
	Float(f32),
	Bool(bool),
}

impl PartialEq for MvtValue {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(MvtValue::String(a), MvtValue::String(b)) => a == b,
			(MvtValue::Float(a), MvtValue::Float(b)) => a.to_bits() == b.to_bits(),
			(MvtValue::Bool(a), MvtValue::Bool(b)) => a == b,
			_ => false,
		}
	}
}

impl Eq for MvtValue {}

impl Hash for MvtValue {
	fn hash<H: Hasher>(&self, state: &mut H) {
		match self {
			MvtValue::String(s) => {
				0u8.hash(state);
				s.hash(state);
			}
			MvtValue::Float(f) => {
				1u8.hash(state);
				f.to_bits().hash(state);
			}
			MvtValue::Bool(b) => {
				2u8.hash(state);
				b.hash(state);
			}
		}
	}
}

struct MessageWriter {
	out: Vec<u8>,
}

impl MessageWriter {
	fn new() -> MessageWriter {
		MessageWriter { out: Vec::new() }
	}

	fn write_varint(&mut self, mut value: u64) {
		while value >= 0x80 {
			self.out.push((value as u8 & 0x7F) | 0x80);
			value >>= 7;
		}
		self.out.push(value as u8);
	}

	fn write_key(&mut self, field: u32, wire: u8) {
		self.write_varint((u64::from(field) << 3) | u64::from(wire));
	}

	fn write_uint(&mut self, field: u32, value: u64) {
		self.write_key(field, 0);
		self.write_varint(value);
	}

	fn write_bytes(&mut self, field: u32, bytes: &[u8]) {
		self.write_key(field, 2);
		self.write_varint(bytes.len() as u64);
		self.out.extend_from_slice(bytes);
	}

	fn write_string(&mut self, field: u32, value: &str) {
		self.write_bytes(field, value.as_bytes());
	}

	fn write_packed_u32(&mut self, field: u32, values: &[u32]) {
		let mut payload = MessageWriter::new();
		for v in values {
			payload.write_varint(u64::from(*v));
		}
		self.write_bytes(field, &payload.out);
	}

	fn write_float(&mut self, field: u32, value: f32) {
		self.write_key(field, 5);
		self.out.extend_from_slice(&value.to_le_bytes());
	}
}

fn zigzag(value: i32) -> u32 {
	((value << 1) ^ (value >> 31)) as u32
}

/// Accumulates one output layer: features plus the key and value
/// dictionaries they reference.
pub struct MvtLayerBuilder {
	name: String,
	extent: u32,
	version: u32,
	keys: Vec<String>,
	key_lookup: HashMap<String, u32>,
	values: Vec<MvtValue>,
	value_lookup: HashMap<MvtValue, u32>,
	features: Vec<Vec<u8>>,
}

impl MvtLayerBuilder {
	#[must_use]
	pub fn new(name: &str, extent: u32, version: u32) -> MvtLayerBuilder {
		MvtLayerBuilder {
			name: name.to_string(),
			extent,
			version,
			keys: Vec::new(),
			key_lookup: HashMap::new(),
			values: Vec::new(),
			value_lookup: HashMap::new(),
			features: Vec::new(),
		}
	}

	/// Dictionary index for a key.
	pub fn key_id(&mut self, key: &str) -> u32 {
		if let Some(id) = self.key_lookup.get(key) {
			return *id;
		}
		let id = self.keys.len() as u32;
		self.keys.push(key.to_string());
		self.key_lookup.insert(key.to_string(), id);
		id
	}

	/// Dictionary index for a value.
	pub fn value_id(&mut self, value: MvtValue) -> u32 {
		if let Some(id) = self.value_lookup.get(&value) {
			return *id;
		}
		let id = self.values.len() as u32;
		self.values.push(value.clone());
		self.value_lookup.insert(value, id);
		id
	}

	/// Append one feature. `tags` are alternating key/value dictionary
	/// indices; `geometry` is the raw command stream.
	pub fn add_feature(&mut self, id: Option<u64>, tags: &[u32], geom_type: u64, geometry: &[u32]) {
		let mut feature = MessageWriter::new();
		if let Some(id) = id {
			feature.write_uint(1, id);
		}
		if !tags.is_empty() {
			feature.write_packed_u32(2, tags);
		}
		feature.write_uint(3, geom_type);
		feature.write_packed_u32(4, geometry);
		self.features.push(feature.out);
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.features.is_empty()
	}

	fn into_bytes(self) -> Vec<u8> {
		let mut layer = MessageWriter::new();
		layer.write_string(1, &self.name);
		for feature in &self.features {
			layer.write_bytes(2, feature);
		}
		for key in &self.keys {
			layer.write_string(3, key);
		}
		for value in &self.values {
			let mut v = MessageWriter::new();
			match value {
				MvtValue::String(s) => v.write_string(1, s),
				MvtValue::Float(f) => v.write_float(2, *f),
				MvtValue::Bool(b) => v.write_uint(7, u64::from(*b)),
			}
			layer.write_bytes(4, &v.out);
		}
		layer.write_uint(5, u64::from(self.extent));
		layer.write_uint(15, u64::from(self.version));
		layer.out
	}
}

/// Serialise the finished layers into one tile.
#[must_use]
pub fn build_tile(layers: Vec<MvtLayerBuilder>) -> Blob {
	let mut tile = MessageWriter::new();
	for layer in layers {
		if layer.is_empty() {
			continue;
		}
		tile.write_bytes(3, &layer.into_bytes());
	}
	Blob::from(tile.out)
}

/// Encode a single point.
#[must_use]
pub fn encode_point(x: i32, y: i32) -> Vec<u32> {
	vec![command(MOVE_TO, 1), zigzag(x), zigzag(y)]
}

/// Encode polylines, dropping zero-length moves and sub-lines left
/// with fewer than two points. Returns None when nothing survives.
#[must_use]
pub fn encode_multilinestring(lines: &[Vec<(i32, i32)>]) -> Option<Vec<u32>> {
	let mut out = Vec::new();
	let mut cursor = (0, 0);
	let mut wrote = false;
	for line in lines {
		let deduped = dedup(line);
		if deduped.len() < 2 {
			continue;
		}
		wrote = true;
		out.push(command(MOVE_TO, 1));
		push_point(&mut out, &mut cursor, deduped[0]);
		out.push(command(LINE_TO, deduped.len() as u32 - 1));
		for p in &deduped[1..] {
			push_point(&mut out, &mut cursor, *p);
		}
	}
	wrote.then_some(out)
}

/// Encode polygon rings (outer rings first per polygon, already in
/// winding order). Rings collapsing below four points (closing point
/// included) are dropped; an inner ring is only written when its outer
/// survived. Returns None when nothing survives.
#[must_use]
pub fn encode_multipolygon(polygons: &[Vec<Vec<(i32, i32)>>]) -> Option<Vec<u32>> {
	let mut out = Vec::new();
	let mut cursor = (0, 0);
	let mut wrote = false;
	for rings in polygons {
		for (i, ring) in rings.iter().enumerate() {
			let mut deduped = dedup(ring);
			if deduped.len() > 1 && deduped.first() == deduped.last() {
				deduped.pop();
			}
			if deduped.len() < 3 {
				if i == 0 {
					// No outer ring, no polygon.
					break;
				}
				continue;
			}
			wrote = true;
			out.push(command(MOVE_TO, 1));
			push_point(&mut out, &mut cursor, deduped[0]);
			out.push(command(LINE_TO, deduped.len() as u32 - 1));
			for p in &deduped[1..] {
				push_point(&mut out, &mut cursor, *p);
			}
			out.push(command(CLOSE_PATH, 1));
		}
	}
	wrote.then_some(out)
}

fn command(id: u32, count: u32) -> u32 {
	(count << 3) | id
}

fn push_point(out: &mut Vec<u32>, cursor: &mut (i32, i32), p: (i32, i32)) {
	out.push(zigzag(p.0 - cursor.0));
	out.push(zigzag(p.1 - cursor.1));
	*cursor = p;
}

fn dedup(points: &[(i32, i32)]) -> Vec<(i32, i32)> {
	let mut out: Vec<(i32, i32)> = Vec::with_capacity(points.len());
	for p in points {
		if out.last() != Some(p) {
			out.push(*p);
		}
	}
	out
}
