//! Zero-copy-ish reading of the OSM block format.
//!
//! [`scan_pbf`] walks the file once, parsing the header and classifying
//! each data block; [`read_blob`] plus [`PrimitiveBlock::parse`] then
//! decode individual blocks on worker threads. Decoded string views
//! borrow the thread's decompression buffer, so callers copy what they
//! need to keep.

mod blocks;
mod wire;

pub use blocks::{
	BlockMetadata, DenseNodes, HeaderInfo, MEMBER_NODE, MEMBER_RELATION, MEMBER_WAY,
	OPTION_LOCATIONS_ON_WAYS, OPTION_SORT_TYPE_THEN_ID, PrimitiveBlock, PrimitiveGroup, RawRelation,
	RawWay, read_blob, scan_pbf,
};
pub use wire::{WIRE_FIXED32, WIRE_FIXED64, WIRE_LEN, WIRE_VARINT, WireReader, WireWriter};
