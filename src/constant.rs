//! Wire-level constants for the MAPI protocol: block sizing, sentinel bytes and
//! the small set of tagged variants the handshake negotiates.

/// Maximum size of a single block chunk, in bytes, as it appears on the wire
/// (i.e. after optional compression). Fixed by the protocol, not configurable.
pub const MAX_PACKAGE_LENGTH: usize = 8190;

/// Default blocksize advertised to the server during V10 negotiation.
pub const DEFAULT_BLOCKSIZE: usize = 1_000_000;

/// Conventional MonetDB mapi port.
pub const DEFAULT_PORT: u16 = 50000;

/// The "more input requested" sentinel: `\x01\x02\n`.
pub const MSG_MORE: &[u8] = b"\x01\x02\n";
pub const MSG_INFO: u8 = b'#';
pub const MSG_ERROR: u8 = b'!';
pub const MSG_Q: u8 = b'&';
pub const MSG_QUPDATE: &[u8] = b"&2";
pub const MSG_HEADER: u8 = b'%';
pub const MSG_NEW_RESULT_HEADER: u8 = b'*';
pub const MSG_INITIAL_RESULT_CHUNK: u8 = b'+';
pub const MSG_RESULT_CHUNK: u8 = b'-';
pub const MSG_TUPLE: u8 = b'[';
pub const MSG_TUPLE_NOSLICE: u8 = b'=';
pub const MSG_REDIRECT: u8 = b'^';
pub const MSG_OK: &[u8] = b"=OK";

/// Negotiated MAPI protocol version. Header width and field layout follow from
/// the tag rather than threading booleans through the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// 2-byte little-endian header.
    V9,
    /// 8-byte little-endian header; required for compression.
    V10,
}

/// Negotiated per-block compression. `None` is the only option under V9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Snappy,
    Lz4,
}

impl Compression {
    pub fn tag(self) -> &'static str {
        match self {
            Compression::None => "COMPRESSION_NONE",
            Compression::Snappy => "COMPRESSION_SNAPPY",
            Compression::Lz4 => "COMPRESSION_LZ4",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    /// The byte order of the host this process is running on.
    pub fn host() -> Self {
        if cfg!(target_endian = "little") {
            Endianness::Little
        } else {
            Endianness::Big
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Endianness::Little => "LIT",
            Endianness::Big => "BIG",
        }
    }
}

/// Connection lifecycle. Handshake parsing only happens in `Init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    Ready,
}

/// Bound on consecutive merovingian redirects before giving up (§4.3, §8 S4).
pub const MAX_REDIRECTS: u32 = 10;
