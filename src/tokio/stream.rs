//! Async mirror of [`crate::sync::stream::ByteStream`]; same socket tuning,
//! same enum shape, `tokio::io::AsyncRead`/`AsyncWrite` in place of the
//! blocking equivalents.

// Referenced as `tokio_rt` (aliased in lib.rs) rather than bare `tokio`,
// since this module's own name shadows the crate name at crate root.
use tokio_rt::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio_rt::net::TcpStream;
#[cfg(unix)]
use tokio_rt::net::UnixStream;

use crate::error::{Error, Result};

pub enum ByteStream {
    Tcp(BufReader<TcpStream>),
    #[cfg(unix)]
    Unix(BufReader<UnixStream>),
}

impl ByteStream {
    pub async fn connect_tcp(hostname: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((hostname, port)).await?;
        stream.set_nodelay(true)?;
        Ok(ByteStream::Tcp(BufReader::new(stream)))
    }

    #[cfg(unix)]
    pub async fn connect_unix(path: &str) -> Result<Self> {
        let stream = UnixStream::connect(path).await?;
        Ok(ByteStream::Unix(BufReader::new(stream)))
    }

    pub fn is_tcp(&self) -> bool {
        matches!(self, ByteStream::Tcp(_))
    }

    /// Read exactly `buf.len()` bytes. The peer closing the connection before
    /// delivering them all is reported as `Error::Operational`, not a bare IO
    /// error, since it is a protocol-level condition callers branch on (§4.1).
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let result = match self {
            ByteStream::Tcp(s) => s.read_exact(buf).await,
            #[cfg(unix)]
            ByteStream::Unix(s) => s.read_exact(buf).await,
        };
        result.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::transport_closed()
            } else {
                Error::from(e)
            }
        })?;
        Ok(())
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        match self {
            ByteStream::Tcp(s) => s.write_all(buf).await?,
            #[cfg(unix)]
            ByteStream::Unix(s) => s.write_all(buf).await?,
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        match self {
            ByteStream::Tcp(s) => s.flush().await?,
            #[cfg(unix)]
            ByteStream::Unix(s) => s.flush().await?,
        }
        Ok(())
    }

    pub async fn close(&mut self) -> Result<()> {
        match self {
            ByteStream::Tcp(s) => s.get_mut().shutdown().await?,
            #[cfg(unix)]
            ByteStream::Unix(s) => s.get_mut().shutdown().await?,
        }
        Ok(())
    }
}
