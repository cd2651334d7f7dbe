//! Compression helpers for tile payloads and PBF blobs.

use crate::types::Blob;
use anyhow::{Context, Result};
use std::io::{Read, Write};

/// Compress with Gzip, as expected by most tile consumers.
pub fn compress_gzip(blob: &Blob) -> Result<Blob> {
	let mut encoder = flate2::bufread::GzEncoder::new(blob.as_slice(), flate2::Compression::best());
	let mut compressed = Vec::new();
	encoder
		.read_to_end(&mut compressed)
		.context("compressing with gzip")?;
	Ok(Blob::from(compressed))
}

/// Decompress Gzip data.
pub fn decompress_gzip(blob: &Blob) -> Result<Blob> {
	let mut decoder = flate2::bufread::GzDecoder::new(blob.as_slice());
	let mut decompressed = Vec::new();
	decoder
		.read_to_end(&mut decompressed)
		.context("decompressing gzip")?;
	Ok(Blob::from(decompressed))
}

/// Compress as a raw deflate stream (no gzip or zlib framing).
pub fn compress_deflate(blob: &Blob) -> Result<Blob> {
	let mut encoder =
		flate2::bufread::DeflateEncoder::new(blob.as_slice(), flate2::Compression::best());
	let mut compressed = Vec::new();
	encoder
		.read_to_end(&mut compressed)
		.context("compressing with deflate")?;
	Ok(Blob::from(compressed))
}

/// Decompress a zlib stream, as used inside PBF blobs.
pub fn decompress_zlib(blob: &Blob) -> Result<Blob> {
	let mut decoder = flate2::bufread::ZlibDecoder::new(blob.as_slice());
	let mut decompressed = Vec::new();
	decoder
		.read_to_end(&mut decompressed)
		.context("decompressing zlib")?;
	Ok(Blob::from(decompressed))
}

/// Compress a zlib stream.
pub fn compress_zlib(blob: &Blob) -> Result<Blob> {
	let mut encoder = flate2::bufread::ZlibEncoder::new(blob.as_slice(), flate2::Compression::best());
	let mut compressed = Vec::new();
	encoder
		.read_to_end(&mut compressed)
		.context("compressing with zlib")?;
	Ok(Blob::from(compressed))
}

/// Compress with Brotli.
pub fn compress_brotli(blob: &Blob) -> Result<Blob> {
	let mut compressed = Vec::new();
	{
		let mut writer = brotli::CompressorWriter::new(&mut compressed, 4096, 9, 22);
		writer
			.write_all(blob.as_slice())
			.context("compressing with brotli")?;
	}
	Ok(Blob::from(compressed))
}

/// Decompress Brotli data.
pub fn decompress_brotli(blob: &Blob) -> Result<Blob> {
	let mut decompressed = Vec::new();
	let mut reader = brotli::Decompressor::new(blob.as_slice(), 4096);
	reader
		.read_to_end(&mut decompressed)
		.context("decompressing brotli")?;
	Ok(Blob::from(decompressed))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn test_data() -> Blob {
		let mut data = Vec::new();
		for i in 0..10_000u32 {
			data.extend_from_slice(&(i / 7).to_le_bytes());
		}
		Blob::from(data)
	}

	#[test]
	fn gzip_round_trip() -> Result<()> {
		let data = test_data();
		let compressed = compress_gzip(&data)?;
		assert!(compressed.len() < data.len());
		assert_eq!(decompress_gzip(&compressed)?, data);
		Ok(())
	}

	#[test]
	fn zlib_round_trip() -> Result<()> {
		let data = test_data();
		assert_eq!(decompress_zlib(&compress_zlib(&data)?)?, data);
		Ok(())
	}

	#[test]
	fn brotli_round_trip() -> Result<()> {
		let data = test_data();
		assert_eq!(decompress_brotli(&compress_brotli(&data)?)?, data);
		Ok(())
	}

	#[test]
	fn deflate_is_frameless() -> Result<()> {
		let data = test_data();
		let deflate = compress_deflate(&data)?;
		let zlib = compress_zlib(&data)?;
		// The zlib framing adds a 2-byte header and a 4-byte checksum.
		assert!(deflate.len() < zlib.len());
		Ok(())
	}
}
