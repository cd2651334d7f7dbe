//! Minimal protobuf wire reading over byte slices.
//!
//! Just enough of the wire format for OSM PBF: varints, zig-zag
//! varints, length-delimited fields, packed repeated scalars, and
//! fixed-width fields (skipped only). Views returned by
//! [`WireReader::read_bytes`] borrow the underlying slice.

use anyhow::{Result, bail};

pub const WIRE_VARINT: u8 = 0;
pub const WIRE_FIXED64: u8 = 1;
pub const WIRE_LEN: u8 = 2;
pub const WIRE_FIXED32: u8 = 5;

pub struct WireReader<'a> {
	data: &'a [u8],
	pos: usize,
}

impl<'a> WireReader<'a> {
	#[must_use]
	pub fn new(data: &'a [u8]) -> WireReader<'a> {
		WireReader { data, pos: 0 }
	}

	#[must_use]
	pub fn has_remaining(&self) -> bool {
		self.pos < self.data.len()
	}

	pub fn read_varint(&mut self) -> Result<u64> {
		let mut value = 0u64;
		let mut shift = 0;
		loop {
			let Some(byte) = self.data.get(self.pos) else {
				bail!("unexpected end of input in varint");
			};
			self.pos += 1;
			value |= u64::from(byte & 0x7F) << shift;
			if byte & 0x80 == 0 {
				break;
			}
			shift += 7;
			if shift >= 70 {
				bail!("varint too long");
			}
		}
		Ok(value)
	}

	pub fn read_svarint(&mut self) -> Result<i64> {
		let raw = self.read_varint()?;
		Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
	}

	/// Read a field key, returning `(field number, wire type)`.
	pub fn read_key(&mut self) -> Result<(u32, u8)> {
		let key = self.read_varint()?;
		Ok(((key >> 3) as u32, (key & 0x7) as u8))
	}

	/// Read a length-delimited field as a borrowed slice.
	pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
		let len = self.read_varint()? as usize;
		let Some(bytes) = self.data.get(self.pos..self.pos + len) else {
			bail!("length-delimited field of {len} bytes overruns input");
		};
		self.pos += len;
		Ok(bytes)
	}

	pub fn read_string(&mut self) -> Result<&'a str> {
		Ok(std::str::from_utf8(self.read_bytes()?)?)
	}

	/// Skip one field of the given wire type.
	pub fn skip(&mut self, wire: u8) -> Result<()> {
		match wire {
			WIRE_VARINT => {
				self.read_varint()?;
			}
			WIRE_FIXED64 => self.advance(8)?,
			WIRE_LEN => {
				self.read_bytes()?;
			}
			WIRE_FIXED32 => self.advance(4)?,
			_ => bail!("unsupported wire type {wire}"),
		}
		Ok(())
	}

	fn advance(&mut self, n: usize) -> Result<()> {
		if self.pos + n > self.data.len() {
			bail!("field overruns input");
		}
		self.pos += n;
		Ok(())
	}

	/// Read a packed repeated varint field.
	pub fn read_packed_varint(&mut self) -> Result<Vec<u64>> {
		let mut sub = WireReader::new(self.read_bytes()?);
		let mut values = Vec::new();
		while sub.has_remaining() {
			values.push(sub.read_varint()?);
		}
		Ok(values)
	}

	/// Read a packed repeated sint field, decoding the zig-zag.
	pub fn read_packed_svarint(&mut self) -> Result<Vec<i64>> {
		let mut sub = WireReader::new(self.read_bytes()?);
		let mut values = Vec::new();
		while sub.has_remaining() {
			values.push(sub.read_svarint()?);
		}
		Ok(values)
	}

	/// Read a packed sint field, undoing delta coding from zero.
	pub fn read_packed_delta(&mut self) -> Result<Vec<i64>> {
		let mut values = self.read_packed_svarint()?;
		let mut acc = 0i64;
		for v in &mut values {
			acc = acc.wrapping_add(*v);
			*v = acc;
		}
		Ok(values)
	}
}

/// Write-side helpers, enough to assemble test fixtures and the
/// length-prefixed framing of the block format.
pub struct WireWriter {
	out: Vec<u8>,
}

impl WireWriter {
	#[must_use]
	pub fn new() -> WireWriter {
		WireWriter { out: Vec::new() }
	}

	pub fn write_varint(&mut self, mut value: u64) {
		while value >= 0x80 {
			self.out.push((value as u8 & 0x7F) | 0x80);
			value >>= 7;
		}
		self.out.push(value as u8);
	}

	pub fn write_svarint(&mut self, value: i64) {
		self.write_varint(((value << 1) ^ (value >> 63)) as u64);
	}

	pub fn write_key(&mut self, field: u32, wire: u8) {
		self.write_varint((u64::from(field) << 3) | u64::from(wire));
	}

	pub fn write_bytes(&mut self, field: u32, bytes: &[u8]) {
		self.write_key(field, WIRE_LEN);
		self.write_varint(bytes.len() as u64);
		self.out.extend_from_slice(bytes);
	}

	pub fn write_string(&mut self, field: u32, s: &str) {
		self.write_bytes(field, s.as_bytes());
	}

	pub fn write_uint(&mut self, field: u32, value: u64) {
		self.write_key(field, WIRE_VARINT);
		self.write_varint(value);
	}

	pub fn write_packed_delta(&mut self, field: u32, values: &[i64]) {
		let mut payload = WireWriter::new();
		let mut prev = 0i64;
		for v in values {
			payload.write_svarint(v.wrapping_sub(prev));
			prev = *v;
		}
		self.write_bytes(field, &payload.out);
	}

	pub fn write_packed_varint(&mut self, field: u32, values: &[u64]) {
		let mut payload = WireWriter::new();
		for v in values {
			payload.write_varint(*v);
		}
		self.write_bytes(field, &payload.out);
	}

	#[must_use]
	pub fn into_vec(self) -> Vec<u8> {
		self.out
	}
}

impl Default for WireWriter {
	fn default() -> Self {
		WireWriter::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn varint_round_trip() -> Result<()> {
		let mut w = WireWriter::new();
		for v in [0u64, 1, 127, 128, 300, u64::MAX] {
			w.write_varint(v);
		}
		let bytes = w.into_vec();
		let mut r = WireReader::new(&bytes);
		for v in [0u64, 1, 127, 128, 300, u64::MAX] {
			assert_eq!(r.read_varint()?, v);
		}
		assert!(!r.has_remaining());
		Ok(())
	}

	#[test]
	fn packed_delta_round_trip() -> Result<()> {
		let values = [5i64, 3, -10, 1_000_000, 0];
		let mut w = WireWriter::new();
		w.write_packed_delta(8, &values);
		let bytes = w.into_vec();

		let mut r = WireReader::new(&bytes);
		let (field, wire) = r.read_key()?;
		assert_eq!((field, wire), (8, WIRE_LEN));
		assert_eq!(r.read_packed_delta()?, values);
		Ok(())
	}

	#[test]
	fn truncated_input_is_an_error() {
		let mut r = WireReader::new(&[0x80]);
		assert!(r.read_varint().is_err());

		let mut r = WireReader::new(&[0x0A, 0x05, b'h', b'i']);
		let _ = r.read_key();
		assert!(r.read_bytes().is_err());
	}

	#[test]
	fn skip_all_wire_types() -> Result<()> {
		let mut w = WireWriter::new();
		w.write_uint(1, 42);
		w.write_string(2, "skipped");
		w.write_uint(3, 7);
		let bytes = w.into_vec();

		let mut r = WireReader::new(&bytes);
		loop {
			let (field, wire) = r.read_key()?;
			if field == 3 {
				assert_eq!(r.read_varint()?, 7);
				break;
			}
			r.skip(wire)?;
		}
		Ok(())
	}
}
