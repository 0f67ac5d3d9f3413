//! Blocking connection implementation, built on `std::net`/`std::os::unix::net`.
//! This is the reference implementation; the `tokio` module mirrors its API.

mod conn;
mod stream;

pub use conn::Connection;
