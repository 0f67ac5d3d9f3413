use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Error taxonomy for the MAPI core.
///
/// `Transport`, `Database`, `Programming`, `Unsupported` and `Integrity` mirror the
/// MonetDB client's own exception hierarchy so callers can match on the kind of
/// failure the same way the reference client does.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying socket failed or closed mid-read/write, a connect() call
    /// could not reach the server, or the redirect bound was exceeded.
    #[error("Operational error: {0}")]
    Operational(String),

    /// The server rejected the login (a `!` prompt during the handshake).
    #[error("Database error: {0}")]
    Database(String),

    /// The caller violated the protocol contract, or the server sent something
    /// the state machine does not recognize.
    #[error("Programming error: {0}")]
    Programming(String),

    /// No supported password hash was offered, the pre-hash algorithm is
    /// unknown, or the server speaks a protocol version other than 9.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A server error whose SQLSTATE-like prefix maps to a specific kind in
    /// `ErrorMap` (constraint violations and the like).
    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

const TRANSPORT_CLOSED_MSG: &str = "Server closed connection";

impl Error {
    pub(crate) fn transport_closed() -> Self {
        Error::Operational(TRANSPORT_CLOSED_MSG.to_string())
    }

    /// True for the specific "peer closed before `read_exact` got all the
    /// bytes it asked for" condition, as opposed to other `Operational`
    /// failures. Callers that read until EOF on purpose (the control-language
    /// bypass, §4.2) use this to tell expected closure apart from a real error.
    pub(crate) fn is_transport_closed(&self) -> bool {
        matches!(self, Error::Operational(m) if m == TRANSPORT_CLOSED_MSG)
    }
}
