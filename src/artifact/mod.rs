//! The incremental-artifact container.
//!
//! An incremental artifact opens with a compact JSON array listing the magic
//! number followed by the changed page indices, then carries the raw page
//! payloads in the same order. A stream that does not open with such an array
//! (or whose first element is not the magic) is a full-file copy and the
//! caller restarts reading from offset 0. A `[magic]`-only prefix marks an
//! unchanged file.

use std::io::{self, Read, Write};

use crate::Result;

/// Upper bound on prefix scanning. A 1 GiB relation segment at full churn
/// encodes its index in well under 2 MiB.
const MAX_PREFIX_BYTES: usize = 16 * 1024 * 1024;

/// Emit the structured prefix `[magic, p0, p1, ...]`.
pub fn write_prefix<W: Write>(sink: &mut W, magic: u32, pages: &[u64]) -> Result<()> {
    sink.write_all(&encode_prefix(magic, pages)?)?;
    Ok(())
}

/// Emit the `[magic]` prefix that marks an unchanged file.
pub fn write_full_prefix<W: Write>(sink: &mut W, magic: u32) -> Result<()> {
    write_prefix(sink, magic, &[])
}

/// Deterministic byte length of the encoded prefix.
pub fn prefix_len(magic: u32, pages: &[u64]) -> Result<usize> {
    Ok(encode_prefix(magic, pages)?.len())
}

fn encode_prefix(magic: u32, pages: &[u64]) -> Result<Vec<u8>> {
    let mut values: Vec<u64> = Vec::with_capacity(pages.len() + 1);
    values.push(magic as u64);
    values.extend_from_slice(pages);
    Ok(serde_json::to_vec(&values)?)
}

/// Try to read the structured prefix off the front of `source`.
///
/// Consumes bytes one at a time so that on success the cursor sits exactly at
/// the first page payload byte. Returns `None` as soon as the stream stops
/// looking like a flat array of unsigned integers, or when the first element
/// is not `magic`; the caller then treats the stream as a raw full-file copy
/// and reopens it from offset 0.
pub fn read_prefix<R: Read>(source: &mut R, magic: u32) -> Result<Option<Vec<u64>>> {
    let mut byte = [0u8; 1];
    if source.read(&mut byte)? == 0 || byte[0] != b'[' {
        return Ok(None);
    }

    let mut buf = Vec::with_capacity(64);
    buf.push(byte[0]);
    loop {
        if source.read(&mut byte)? == 0 {
            return Ok(None);
        }
        match byte[0] {
            b'0'..=b'9' | b',' => buf.push(byte[0]),
            b']' => {
                buf.push(byte[0]);
                break;
            }
            _ => return Ok(None),
        }
        if buf.len() >= MAX_PREFIX_BYTES {
            return Ok(None);
        }
    }

    let values: Vec<u64> = match serde_json::from_slice(&buf) {
        Ok(values) => values,
        Err(_) => return Ok(None),
    };
    match values.split_first() {
        Some((&first, pages)) if first == magic as u64 => Ok(Some(pages.to_vec())),
        _ => Ok(None),
    }
}

/// Fill `buf` from `reader`, tolerating partial reads. Returns the number of
/// bytes actually read; less than `buf.len()` only at end of stream.
pub fn read_block<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
