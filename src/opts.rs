//! Connection configuration surface. Purely in-memory: nothing here reads a
//! config file or environment variable, that's left to the embedding
//! application, same as the reference client leaves URL parsing to its own
//! `connect()` wrapper rather than baking it into the handshake core.

use crate::constant::DEFAULT_PORT;

/// Everything the handshake and transport layers need to open a connection.
#[derive(Debug, Clone)]
pub struct ConnectOpts {
    pub username: String,
    pub password: String,
    pub database: String,
    /// MAPI `language` field: `"sql"` for ordinary use, `"control"` to talk to
    /// merovingian directly and bypass block framing over a Unix socket.
    pub language: String,
    pub hostname: String,
    pub port: u16,
    /// When set, connect over this Unix domain socket instead of TCP; `hostname`
    /// is still sent to the server as the handshake's notion of "localhost".
    pub unix_socket: Option<String>,
    /// Blocksize advertised to the server during a PROT10 upgrade.
    pub blocksize: usize,
}

impl Default for ConnectOpts {
    fn default() -> Self {
        ConnectOpts {
            username: String::new(),
            password: String::new(),
            database: String::new(),
            language: "sql".to_string(),
            hostname: "localhost".to_string(),
            port: DEFAULT_PORT,
            unix_socket: None,
            blocksize: crate::constant::DEFAULT_BLOCKSIZE,
        }
    }
}

impl ConnectOpts {
    /// True when this client considers itself talking to the local host — the
    /// handshake disables Snappy compression in that case (§4.3).
    pub fn is_localhost(&self) -> bool {
        self.unix_socket.is_some() || self.hostname == "localhost"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_blocksize_and_port_match_protocol_conventions() {
        let opts = ConnectOpts::default();
        assert_eq!(opts.blocksize, 1_000_000);
        assert_eq!(opts.port, 50000);
        assert_eq!(opts.language, "sql");
    }

    #[test]
    fn unix_socket_counts_as_localhost_regardless_of_hostname_field() {
        let mut opts = ConnectOpts::default();
        opts.hostname = "db.example.com".to_string();
        opts.unix_socket = Some("/tmp/.s.monetdb.50000".to_string());
        assert!(opts.is_localhost());
    }
}
