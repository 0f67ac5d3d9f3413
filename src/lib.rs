//! Client-side core of MonetDB's MAPI wire protocol: block framing,
//! the login handshake (including redirects), and command dispatch.
//!
//! Result-set parsing, type conversion and connection pooling live above this
//! layer; this crate only gets a connection to `Ready` and lets callers send
//! text and read text back.

#[cfg(feature = "tokio")]
extern crate tokio as tokio_rt;

pub mod codec;
pub mod constant;
pub mod error;
pub mod error_map;
pub mod handshake;
pub mod opts;

#[cfg(feature = "sync")]
pub mod sync;

#[cfg(feature = "tokio")]
pub mod tokio;

pub use error::{Error, Result};
pub use opts::ConnectOpts;
