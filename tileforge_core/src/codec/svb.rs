//! Stream-variable-byte packing of `u32` sequences.

/// Decoders may read (but never use) up to this many bytes beyond the
/// encoded data. Callers must reserve the padding and must not interpret
/// it.
pub const PADDING: usize = 16;

fn tag_for(value: u32) -> u8 {
	if value < (1 << 8) {
		0
	} else if value < (1 << 16) {
		1
	} else if value < (1 << 24) {
		2
	} else {
		3
	}
}

fn tag_for_0124(value: u32) -> u8 {
	if value == 0 {
		0
	} else if value < (1 << 8) {
		1
	} else if value < (1 << 16) {
		2
	} else {
		3
	}
}

// Payload width per tag; index 4..8 is the 0124 table.
const WIDTHS: [usize; 8] = [1, 2, 3, 4, 0, 1, 2, 4];

/// Upper bound for the encoded size of `n` values, padding included.
#[must_use]
pub fn max_compressed_bytes(n: usize) -> usize {
	n.div_ceil(4) + n * 4 + PADDING
}

/// Exact encoded size of `values`, padding not included.
#[must_use]
pub fn compressed_bytes(values: &[u32]) -> usize {
	values.len().div_ceil(4) + values.iter().map(|v| WIDTHS[tag_for(*v) as usize]).sum::<usize>()
}

/// Exact encoded size of `values` in the `0124` variant, padding not included.
#[must_use]
pub fn compressed_bytes_0124(values: &[u32]) -> usize {
	values.len().div_ceil(4)
		+ values
			.iter()
			.map(|v| WIDTHS[4 + tag_for_0124(*v) as usize])
			.sum::<usize>()
}

fn encode_with(values: &[u32], out: &mut [u8], tag: fn(u32) -> u8, width_base: usize) -> usize {
	let mut pos = 0;
	for group in values.chunks(4) {
		let control_pos = pos;
		out[control_pos] = 0;
		pos += 1;
		for (i, &value) in group.iter().enumerate() {
			let t = tag(value);
			out[control_pos] |= t << (2 * i);
			let width = WIDTHS[width_base + t as usize];
			out[pos..pos + width].copy_from_slice(&value.to_le_bytes()[..width]);
			pos += width;
		}
	}
	pos
}

fn decode_with(data: &[u8], out: &mut [u32], width_base: usize) -> usize {
	let mut pos = 0;
	for group in out.chunks_mut(4) {
		let control = data[pos];
		pos += 1;
		for (i, value) in group.iter_mut().enumerate() {
			let t = (control >> (2 * i)) & 0x3;
			let width = WIDTHS[width_base + t as usize];
			// Unconditional 4-byte load, masked to the tag width. This is
			// what requires the caller to reserve PADDING bytes.
			let raw = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap());
			*value = if width == 4 {
				raw
			} else {
				raw & ((1u32 << (8 * width)) - 1)
			};
			pos += width;
		}
	}
	pos
}

/// Encode `values` into `out`, returning the number of bytes written.
///
/// `out` must hold at least [`max_compressed_bytes`]`(values.len())`.
pub fn encode(values: &[u32], out: &mut [u8]) -> usize {
	encode_with(values, out, tag_for, 0)
}

/// Encode in the `0124` variant; zeros take no payload bytes.
pub fn encode_0124(values: &[u32], out: &mut [u8]) -> usize {
	encode_with(values, out, tag_for_0124, 4)
}

/// Decode `out.len()` values from `data`, returning the number of bytes
/// consumed. `data` must extend [`PADDING`] bytes beyond the encoded
/// stream.
pub fn decode(data: &[u8], out: &mut [u32]) -> usize {
	decode_with(data, out, 0)
}

/// Decode a stream produced by [`encode_0124`].
pub fn decode_0124(data: &[u8], out: &mut [u32]) -> usize {
	decode_with(data, out, 4)
}
