//! Blocking transport: a TCP or Unix domain socket, wrapped in a `BufReader`
//! so the connection state machine can read sentinel-delimited lines and
//! fixed-size block headers off the same buffer.

use std::io::{self, BufReader, Read, Write};
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::net::UnixStream;

use crate::error::{Error, Result};

pub enum ByteStream {
    Tcp(BufReader<TcpStream>),
    #[cfg(unix)]
    Unix(BufReader<UnixStream>),
}

impl ByteStream {
    /// Connect over TCP and tune socket options the way the reference client
    /// does: disable `SO_KEEPALIVE` (MAPI does its own liveness checking at
    /// the protocol level) and enable `TCP_NODELAY` (block framing is already
    /// chunked, batching further only adds latency).
    pub fn connect_tcp(hostname: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((hostname, port))?;
        stream.set_nodelay(true)?;
        Ok(ByteStream::Tcp(BufReader::new(stream)))
    }

    #[cfg(unix)]
    pub fn connect_unix(path: &str) -> Result<Self> {
        let stream = UnixStream::connect(path)?;
        Ok(ByteStream::Unix(BufReader::new(stream)))
    }

    pub fn is_tcp(&self) -> bool {
        matches!(self, ByteStream::Tcp(_))
    }

    /// Read exactly `buf.len()` bytes. The peer closing the connection before
    /// delivering them all is reported as `Error::Operational`, not a bare IO
    /// error, since it is a protocol-level condition callers branch on (§4.1).
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let result = match self {
            ByteStream::Tcp(s) => s.read_exact(buf),
            #[cfg(unix)]
            ByteStream::Unix(s) => s.read_exact(buf),
        };
        result.map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::transport_closed()
            } else {
                Error::from(e)
            }
        })
    }

    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        match self {
            ByteStream::Tcp(s) => s.get_mut().write_all(buf)?,
            #[cfg(unix)]
            ByteStream::Unix(s) => s.get_mut().write_all(buf)?,
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        match self {
            ByteStream::Tcp(s) => s.get_mut().flush()?,
            #[cfg(unix)]
            ByteStream::Unix(s) => s.get_mut().flush()?,
        }
        Ok(())
    }

    pub fn close(&mut self) -> io::Result<()> {
        match self {
            ByteStream::Tcp(s) => s.get_ref().shutdown(std::net::Shutdown::Both),
            #[cfg(unix)]
            ByteStream::Unix(s) => s.get_ref().shutdown(std::net::Shutdown::Both),
        }
    }
}
