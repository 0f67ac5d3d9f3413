//! Pure, transport-agnostic pieces of MAPI block framing (§4.2): header
//! encoding/decoding, compression, and the chunking rule `putBlock` follows.
//!
//! Nothing here touches a socket. The sync and async connection modules each
//! drive these helpers from their own I/O loop, since reading a block requires
//! interleaving reads (header, then exactly that many payload bytes, repeat)
//! that a blocking and an async stream can't share a single function body for.

use crate::constant::{Compression, Protocol, MAX_PACKAGE_LENGTH};
use crate::error::{Error, Result};

/// Header width in bytes for the given protocol version.
pub fn header_len(protocol: Protocol) -> usize {
    match protocol {
        Protocol::V9 => 2,
        Protocol::V10 => 8,
    }
}

/// Encode one block header: `(payload_length << 1) | last_flag`.
pub fn encode_header(protocol: Protocol, payload_length: usize, last: bool) -> Vec<u8> {
    let value = ((payload_length as u64) << 1) | u64::from(last);
    match protocol {
        Protocol::V9 => (value as u16).to_le_bytes().to_vec(),
        Protocol::V10 => (value as i64).to_le_bytes().to_vec(),
    }
}

/// Decode one block header into `(payload_length, last_flag)`.
///
/// `bytes` must be exactly [`header_len`] bytes for `protocol`.
pub fn decode_header(protocol: Protocol, bytes: &[u8]) -> (usize, bool) {
    match protocol {
        Protocol::V9 => {
            let value = u16::from_le_bytes([bytes[0], bytes[1]]);
            ((value >> 1) as usize, value & 1 != 0)
        }
        Protocol::V10 => {
            let value = i64::from_le_bytes(bytes[..8].try_into().unwrap_or([0; 8]));
            ((value >> 1) as usize, value & 1 != 0)
        }
    }
}

/// Compress one chunk for the wire, per the negotiated `compression`.
pub fn compress_chunk(data: &[u8], compression: Compression) -> Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Snappy => compress_snappy(data),
        Compression::Lz4 => Err(Error::Unsupported(
            "LZ4 compression is never negotiated by this client".to_string(),
        )),
    }
}

/// Decompress one chunk read off the wire, per the negotiated `compression`.
pub fn decompress_chunk(data: &[u8], compression: Compression) -> Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Snappy => decompress_snappy(data),
        Compression::Lz4 => Err(Error::Unsupported(
            "LZ4 compression is never negotiated by this client".to_string(),
        )),
    }
}

#[cfg(feature = "snappy")]
fn compress_snappy(data: &[u8]) -> Result<Vec<u8>> {
    snap::raw::Encoder::new()
        .compress_vec(data)
        .map_err(|e| Error::Operational(format!("snappy compression failed: {e}")))
}

#[cfg(not(feature = "snappy"))]
fn compress_snappy(_data: &[u8]) -> Result<Vec<u8>> {
    Err(Error::Unsupported(
        "snappy compression requested but the \"snappy\" feature is not enabled".to_string(),
    ))
}

#[cfg(feature = "snappy")]
fn decompress_snappy(data: &[u8]) -> Result<Vec<u8>> {
    snap::raw::Decoder::new()
        .decompress_vec(data)
        .map_err(|e| Error::Operational(format!("snappy decompression failed: {e}")))
}

#[cfg(not(feature = "snappy"))]
fn decompress_snappy(_data: &[u8]) -> Result<Vec<u8>> {
    Err(Error::Unsupported(
        "snappy compression requested but the \"snappy\" feature is not enabled".to_string(),
    ))
}

/// Build the full on-wire byte sequence for `putBlock(payload)`: one or more
/// `header || chunk` pairs, chunked at [`MAX_PACKAGE_LENGTH`], with the last
/// chunk's header carrying `last_flag = 1`.
///
/// The last-flag check is intentionally based on the *wire* (post-compression)
/// chunk length, matching the reference client exactly — see §9 of the spec
/// for the known edge case this implies.
///
/// This single function reproduces all of §4.2's edge cases without special
/// casing: an empty payload naturally yields one `length=0, last=1` header,
/// and a payload whose length is an exact multiple of `MAX_PACKAGE_LENGTH`
/// naturally yields a trailing empty `last=1` chunk, because the loop keeps
/// slicing (and therefore keeps compressing an empty tail) until a chunk
/// comes back under the size limit.
pub fn encode_block(payload: &[u8], protocol: Protocol, compression: Compression) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(payload.len() + header_len(protocol));
    let mut pos = 0;
    loop {
        let end = (pos + MAX_PACKAGE_LENGTH).min(payload.len());
        let chunk = compress_chunk(&payload[pos..end], compression)?;
        let last = chunk.len() < MAX_PACKAGE_LENGTH;
        out.extend_from_slice(&encode_header(protocol, chunk.len(), last));
        out.extend_from_slice(&chunk);
        pos = end;
        if last {
            break;
        }
    }
    Ok(out)
}
