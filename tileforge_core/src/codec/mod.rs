//! Integer codecs used by the compressed stores.
//!
//! Values are packed four at a time: a control byte carries a 2-bit
//! length tag per value, the payload bytes follow immediately. The
//! standard variant spends 1/2/3/4 bytes per value; the `0124` variant
//! spends 0/1/2/4 bytes so that runs of zeros cost nothing beyond their
//! tag. A zig-zag delta layer turns sorted or spatially coherent i32
//! sequences into small unsigned values first.

mod svb;
mod zigzag;

pub use svb::{
	PADDING, compressed_bytes, compressed_bytes_0124, decode, decode_0124, encode, encode_0124,
	max_compressed_bytes,
};
pub use zigzag::{zigzag_delta_decode, zigzag_delta_encode};
