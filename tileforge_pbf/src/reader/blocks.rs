//! The OSM block format: length-prefixed blob headers, compressed
//! blobs, and the primitive blocks inside them.

use super::wire::{WIRE_LEN, WireReader};
use anyhow::{Context, Result, bail, ensure};
use byteorder::{BigEndian, ReadBytesExt};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use tileforge_core::coordinates::lat2latp;
use tileforge_core::{Blob, LatpLon, compression};

/// Optional feature advertised by inputs sorted by type then id.
pub const OPTION_SORT_TYPE_THEN_ID: &str = "Sort.Type_then_ID";
/// Optional feature advertised when ways carry their own coordinates.
pub const OPTION_LOCATIONS_ON_WAYS: &str = "LocationsOnWays";

/// What the file header declared.
#[derive(Debug, Default, Clone)]
pub struct HeaderInfo {
	/// `(min_lon, min_lat, max_lon, max_lat)` in degrees, when present.
	pub bbox: Option<(f64, f64, f64, f64)>,
	pub sort_type_then_id: bool,
	pub locations_on_ways: bool,
}

/// Position and contents summary of one data block. Blocks are the
/// unit of parallelism; a block light on relations but heavy on
/// members is subdivided into `chunks` work items.
#[derive(Debug, Clone, Copy)]
pub struct BlockMetadata {
	pub offset: u64,
	pub has_nodes: bool,
	pub has_ways: bool,
	pub has_relations: bool,
	pub chunk: usize,
	pub chunks: usize,
}

/// Read the blob at `offset`, returning its type, its decoded payload
/// and the offset of the next blob.
pub fn read_blob(file: &mut File, offset: u64) -> Result<(String, Vec<u8>, u64)> {
	file.seek(SeekFrom::Start(offset))?;
	let header_len = file.read_u32::<BigEndian>().context("reading blob header length")?;
	let mut header = vec![0u8; header_len as usize];
	file.read_exact(&mut header).context("reading blob header")?;

	let mut blob_type = String::new();
	let mut datasize = 0u64;
	let mut reader = WireReader::new(&header);
	while reader.has_remaining() {
		match reader.read_key()? {
			(1, WIRE_LEN) => blob_type = reader.read_string()?.to_string(),
			(3, _) => datasize = reader.read_varint()?,
			(_, wire) => reader.skip(wire)?,
		}
	}
	ensure!(datasize > 0, "blob at offset {offset} has no datasize");

	let mut blob = vec![0u8; datasize as usize];
	file.read_exact(&mut blob).context("reading blob body")?;
	let payload = decode_blob(&blob)?;
	let next = offset + 4 + u64::from(header_len) + datasize;
	Ok((blob_type, payload, next))
}

/// Unwrap a Blob message: raw bytes or a zlib stream.
fn decode_blob(data: &[u8]) -> Result<Vec<u8>> {
	let mut reader = WireReader::new(data);
	let mut raw: Option<&[u8]> = None;
	let mut zlib: Option<&[u8]> = None;
	while reader.has_remaining() {
		match reader.read_key()? {
			(1, WIRE_LEN) => raw = Some(reader.read_bytes()?),
			(3, WIRE_LEN) => zlib = Some(reader.read_bytes()?),
			(_, wire) => reader.skip(wire)?,
		}
	}
	if let Some(raw) = raw {
		return Ok(raw.to_vec());
	}
	if let Some(zlib) = zlib {
		return Ok(compression::decompress_zlib(&Blob::from(zlib))?.into_vec());
	}
	bail!("blob is neither raw nor zlib-compressed");
}

fn parse_header_block(data: &[u8]) -> Result<HeaderInfo> {
	let mut info = HeaderInfo::default();
	let mut reader = WireReader::new(data);
	while reader.has_remaining() {
		match reader.read_key()? {
			(1, WIRE_LEN) => {
				let mut bbox_reader = WireReader::new(reader.read_bytes()?);
				let (mut left, mut right, mut top, mut bottom) = (0i64, 0i64, 0i64, 0i64);
				while bbox_reader.has_remaining() {
					match bbox_reader.read_key()? {
						(1, _) => left = bbox_reader.read_svarint()?,
						(2, _) => right = bbox_reader.read_svarint()?,
						(3, _) => top = bbox_reader.read_svarint()?,
						(4, _) => bottom = bbox_reader.read_svarint()?,
						(_, wire) => bbox_reader.skip(wire)?,
					}
				}
				info.bbox = Some((
					left as f64 * 1e-9,
					bottom as f64 * 1e-9,
					right as f64 * 1e-9,
					top as f64 * 1e-9,
				));
			}
			(4, WIRE_LEN) => {
				let feature = reader.read_string()?;
				// Required features we don't support would make the
				// file unreadable.
				if feature != "OsmSchema-V0.6" && feature != "DenseNodes" {
					bail!("unsupported required feature: {feature}");
				}
			}
			(5, WIRE_LEN) => {
				let feature = reader.read_string()?;
				if feature == OPTION_SORT_TYPE_THEN_ID {
					info.sort_type_then_id = true;
				} else if feature == OPTION_LOCATIONS_ON_WAYS {
					info.locations_on_ways = true;
				}
			}
			(_, wire) => reader.skip(wire)?,
		}
	}
	Ok(info)
}

/// Which primitive types a block contains, without a full parse.
fn classify_block(data: &[u8]) -> Result<(bool, bool, bool)> {
	let (mut nodes, mut ways, mut relations) = (false, false, false);
	let mut reader = WireReader::new(data);
	while reader.has_remaining() {
		match reader.read_key()? {
			(2, WIRE_LEN) => {
				let mut group = WireReader::new(reader.read_bytes()?);
				while group.has_remaining() {
					let (field, wire) = group.read_key()?;
					match field {
						1 | 2 => nodes = true,
						3 => ways = true,
						4 => relations = true,
						_ => {}
					}
					group.skip(wire)?;
				}
			}
			(_, wire) => reader.skip(wire)?,
		}
	}
	Ok((nodes, ways, relations))
}

/// Walk the whole file once: parse the header block and classify every
/// data block for the phase scheduler.
pub fn scan_pbf(path: &Path) -> Result<(HeaderInfo, Vec<BlockMetadata>)> {
	let mut file = File::open(path).with_context(|| format!("opening {path:?}"))?;
	let file_len = file.metadata()?.len();

	let mut header: Option<HeaderInfo> = None;
	let mut blocks = Vec::new();
	let mut offset = 0u64;
	while offset < file_len {
		let (blob_type, payload, next) = read_blob(&mut file, offset)?;
		match blob_type.as_str() {
			"OSMHeader" => header = Some(parse_header_block(&payload)?),
			"OSMData" => {
				let (has_nodes, has_ways, has_relations) = classify_block(&payload)
					.with_context(|| format!("classifying block at offset {offset}"))?;
				blocks.push(BlockMetadata {
					offset,
					has_nodes,
					has_ways,
					has_relations,
					chunk: 0,
					chunks: 1,
				});
			}
			other => log::warn!("ignoring unknown blob type {other:?} at offset {offset}"),
		}
		offset = next;
	}

	let header = header.context("input has no OSMHeader block")?;
	Ok((header, blocks))
}

/// Densely packed nodes: ids and coordinates delta-decoded, the
/// key/value stream left as string-table indices separated by zeros.
#[derive(Debug, Default)]
pub struct DenseNodes {
	pub ids: Vec<i64>,
	pub lats: Vec<i64>,
	pub lons: Vec<i64>,
	pub keys_vals: Vec<u64>,
}

#[derive(Debug, Default)]
pub struct RawWay {
	pub id: u64,
	pub keys: Vec<u64>,
	pub vals: Vec<u64>,
	pub refs: Vec<i64>,
	/// Present only with the LocationsOnWays feature.
	pub lats: Vec<i64>,
	pub lons: Vec<i64>,
}

/// Relation member type codes from the wire format.
pub const MEMBER_NODE: u64 = 0;
pub const MEMBER_WAY: u64 = 1;
pub const MEMBER_RELATION: u64 = 2;

#[derive(Debug, Default)]
pub struct RawRelation {
	pub id: u64,
	pub keys: Vec<u64>,
	pub vals: Vec<u64>,
	pub roles_sid: Vec<u64>,
	pub memids: Vec<i64>,
	pub types: Vec<u64>,
}

pub enum PrimitiveGroup {
	Dense(DenseNodes),
	Ways(Vec<RawWay>),
	Relations(Vec<RawRelation>),
}

/// One decoded primitive block. String views borrow the decompressed
/// payload and are only valid while it is.
pub struct PrimitiveBlock<'a> {
	pub string_table: Vec<&'a [u8]>,
	pub groups: Vec<PrimitiveGroup>,
	granularity: i64,
	lat_offset: i64,
	lon_offset: i64,
}

impl<'a> PrimitiveBlock<'a> {
	pub fn parse(data: &'a [u8]) -> Result<PrimitiveBlock<'a>> {
		let mut block = PrimitiveBlock {
			string_table: Vec::new(),
			groups: Vec::new(),
			granularity: 100,
			lat_offset: 0,
			lon_offset: 0,
		};
		let mut reader = WireReader::new(data);
		while reader.has_remaining() {
			match reader.read_key()? {
				(1, WIRE_LEN) => {
					let mut st = WireReader::new(reader.read_bytes()?);
					while st.has_remaining() {
						match st.read_key()? {
							(1, WIRE_LEN) => block.string_table.push(st.read_bytes()?),
							(_, wire) => st.skip(wire)?,
						}
					}
				}
				(2, WIRE_LEN) => {
					if let Some(group) = parse_group(reader.read_bytes()?)? {
						block.groups.push(group);
					}
				}
				(17, _) => block.granularity = reader.read_varint()? as i64,
				(19, _) => block.lat_offset = reader.read_varint()? as i64,
				(20, _) => block.lon_offset = reader.read_varint()? as i64,
				(_, wire) => reader.skip(wire)?,
			}
		}
		Ok(block)
	}

	/// A string-table entry as UTF-8.
	pub fn string(&self, index: u64) -> Result<&'a str> {
		let bytes = self
			.string_table
			.get(index as usize)
			.with_context(|| format!("string table index {index} out of range"))?;
		Ok(std::str::from_utf8(bytes)?)
	}

	/// Convert raw coordinates to fixed-point projected form.
	#[must_use]
	pub fn latplon(&self, raw_lat: i64, raw_lon: i64) -> LatpLon {
		let lat = 1e-9 * (self.lat_offset + self.granularity * raw_lat) as f64;
		let lon = 1e-9 * (self.lon_offset + self.granularity * raw_lon) as f64;
		LatpLon::from_degrees(lat2latp(lat), lon)
	}
}

fn parse_group(data: &[u8]) -> Result<Option<PrimitiveGroup>> {
	let mut dense: Option<DenseNodes> = None;
	let mut ways: Vec<RawWay> = Vec::new();
	let mut relations: Vec<RawRelation> = Vec::new();

	let mut reader = WireReader::new(data);
	while reader.has_remaining() {
		match reader.read_key()? {
			(2, WIRE_LEN) => {
				let mut d = DenseNodes::default();
				let mut dr = WireReader::new(reader.read_bytes()?);
				while dr.has_remaining() {
					match dr.read_key()? {
						(1, WIRE_LEN) => d.ids = dr.read_packed_delta()?,
						(8, WIRE_LEN) => d.lats = dr.read_packed_delta()?,
						(9, WIRE_LEN) => d.lons = dr.read_packed_delta()?,
						(10, WIRE_LEN) => d.keys_vals = dr.read_packed_varint()?,
						(_, wire) => dr.skip(wire)?,
					}
				}
				dense = Some(d);
			}
			(3, WIRE_LEN) => {
				let mut way = RawWay::default();
				let mut wr = WireReader::new(reader.read_bytes()?);
				while wr.has_remaining() {
					match wr.read_key()? {
						(1, _) => way.id = wr.read_varint()?,
						(2, WIRE_LEN) => way.keys = wr.read_packed_varint()?,
						(3, WIRE_LEN) => way.vals = wr.read_packed_varint()?,
						(8, WIRE_LEN) => way.refs = wr.read_packed_delta()?,
						(13, WIRE_LEN) => way.lats = wr.read_packed_delta()?,
						(14, WIRE_LEN) => way.lons = wr.read_packed_delta()?,
						(_, wire) => wr.skip(wire)?,
					}
				}
				ways.push(way);
			}
			(4, WIRE_LEN) => {
				let mut relation = RawRelation::default();
				let mut rr = WireReader::new(reader.read_bytes()?);
				while rr.has_remaining() {
					match rr.read_key()? {
						(1, _) => relation.id = rr.read_varint()?,
						(2, WIRE_LEN) => relation.keys = rr.read_packed_varint()?,
						(3, WIRE_LEN) => relation.vals = rr.read_packed_varint()?,
						(8, WIRE_LEN) => relation.roles_sid = rr.read_packed_varint()?,
						(9, WIRE_LEN) => relation.memids = rr.read_packed_delta()?,
						(10, WIRE_LEN) => relation.types = rr.read_packed_varint()?,
						(_, wire) => rr.skip(wire)?,
					}
				}
				relations.push(relation);
			}
			(_, wire) => reader.skip(wire)?,
		}
	}

	if let Some(dense) = dense {
		return Ok(Some(PrimitiveGroup::Dense(dense)));
	}
	if !ways.is_empty() {
		return Ok(Some(PrimitiveGroup::Ways(ways)));
	}
	if !relations.is_empty() {
		return Ok(Some(PrimitiveGroup::Relations(relations)));
	}
	Ok(None)
}
