//! Builders for small PBF fixtures.

use byteorder::{BigEndian, WriteBytesExt};
use std::io::Write;
use std::path::Path;
use tileforge_pbf::reader::WireWriter;

pub struct FixtureNode {
	pub id: u64,
	pub lat: f64,
	pub lon: f64,
	pub tags: Vec<(String, String)>,
}

pub struct FixtureWay {
	pub id: u64,
	pub refs: Vec<u64>,
	pub tags: Vec<(String, String)>,
}

pub struct FixtureRelation {
	pub id: u64,
	pub way_members: Vec<(u64, &'static str)>,
	pub tags: Vec<(String, String)>,
}

/// Write a minimal sorted PBF: a header blob, one dense-node block,
/// one way block and (when present) one relation block.
pub fn write_pbf(
	path: &Path,
	nodes: &[FixtureNode],
	ways: &[FixtureWay],
	relations: &[FixtureRelation],
) {
	let mut out = Vec::new();
	append_blob(&mut out, "OSMHeader", &header_block());
	if !nodes.is_empty() {
		append_blob(&mut out, "OSMData", &node_block(nodes));
	}
	if !ways.is_empty() {
		append_blob(&mut out, "OSMData", &way_block(ways));
	}
	if !relations.is_empty() {
		append_blob(&mut out, "OSMData", &relation_block(relations));
	}
	std::fs::write(path, out).unwrap();
}

fn header_block() -> Vec<u8> {
	let mut header = WireWriter::new();
	header.write_string(4, "OsmSchema-V0.6");
	header.write_string(4, "DenseNodes");
	header.write_string(5, "Sort.Type_then_ID");
	header.into_vec()
}

struct StringTable {
	strings: Vec<String>,
}

impl StringTable {
	fn new() -> StringTable {
		StringTable { strings: vec![String::new()] }
	}

	fn intern(&mut self, s: &str) -> u64 {
		if let Some(i) = self.strings.iter().position(|x| x == s) {
			return i as u64;
		}
		self.strings.push(s.to_string());
		(self.strings.len() - 1) as u64
	}

	fn into_bytes(self) -> Vec<u8> {
		let mut st = WireWriter::new();
		for s in &self.strings {
			st.write_string(1, s);
		}
		st.into_vec()
	}
}

fn node_block(nodes: &[FixtureNode]) -> Vec<u8> {
	let mut strings = StringTable::new();
	let mut keys_vals = Vec::new();
	for node in nodes {
		for (k, v) in &node.tags {
			keys_vals.push(strings.intern(k));
			keys_vals.push(strings.intern(v));
		}
		keys_vals.push(0);
	}

	let mut dense = WireWriter::new();
	dense.write_packed_delta(1, &nodes.iter().map(|n| n.id as i64).collect::<Vec<_>>());
	dense.write_packed_delta(
		8,
		&nodes.iter().map(|n| (n.lat * 1e7).round() as i64).collect::<Vec<_>>(),
	);
	dense.write_packed_delta(
		9,
		&nodes.iter().map(|n| (n.lon * 1e7).round() as i64).collect::<Vec<_>>(),
	);
	dense.write_packed_varint(10, &keys_vals);

	let mut group = WireWriter::new();
	group.write_bytes(2, &dense.into_vec());

	let mut block = WireWriter::new();
	block.write_bytes(1, &strings.into_bytes());
	block.write_bytes(2, &group.into_vec());
	block.into_vec()
}

fn way_block(ways: &[FixtureWay]) -> Vec<u8> {
	let mut strings = StringTable::new();
	let mut group = WireWriter::new();
	for way in ways {
		let mut w = WireWriter::new();
		w.write_uint(1, way.id);
		let keys: Vec<u64> = way.tags.iter().map(|(k, _)| strings.intern(k)).collect();
		let vals: Vec<u64> = way.tags.iter().map(|(_, v)| strings.intern(v)).collect();
		w.write_packed_varint(2, &keys);
		w.write_packed_varint(3, &vals);
		w.write_packed_delta(8, &way.refs.iter().map(|r| *r as i64).collect::<Vec<_>>());
		group.write_bytes(3, &w.into_vec());
	}

	let mut block = WireWriter::new();
	block.write_bytes(1, &strings.into_bytes());
	block.write_bytes(2, &group.into_vec());
	block.into_vec()
}

fn relation_block(relations: &[FixtureRelation]) -> Vec<u8> {
	let mut strings = StringTable::new();
	let mut group = WireWriter::new();
	for relation in relations {
		let mut r = WireWriter::new();
		r.write_uint(1, relation.id);
		let keys: Vec<u64> = relation.tags.iter().map(|(k, _)| strings.intern(k)).collect();
		let vals: Vec<u64> = relation.tags.iter().map(|(_, v)| strings.intern(v)).collect();
		r.write_packed_varint(2, &keys);
		r.write_packed_varint(3, &vals);
		let roles: Vec<u64> = relation
			.way_members
			.iter()
			.map(|(_, role)| strings.intern(role))
			.collect();
		r.write_packed_varint(8, &roles);
		r.write_packed_delta(9, &relation.way_members.iter().map(|(id, _)| *id as i64).collect::<Vec<_>>());
		r.write_packed_varint(10, &vec![1u64; relation.way_members.len()]);
		group.write_bytes(4, &r.into_vec());
	}

	let mut block = WireWriter::new();
	block.write_bytes(1, &strings.into_bytes());
	block.write_bytes(2, &group.into_vec());
	block.into_vec()
}

fn append_blob(out: &mut Vec<u8>, blob_type: &str, payload: &[u8]) {
	let mut blob = WireWriter::new();
	blob.write_bytes(1, payload);
	let blob = blob.into_vec();

	let mut header = WireWriter::new();
	header.write_string(1, blob_type);
	header.write_uint(3, blob.len() as u64);
	let header = header.into_vec();

	out.write_u32::<BigEndian>(header.len() as u32).unwrap();
	out.write_all(&header).unwrap();
	out.write_all(&blob).unwrap();
}
