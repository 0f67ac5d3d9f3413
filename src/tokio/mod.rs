//! Async connection implementation, enabled by the `tokio` feature (on by
//! default). Mirrors [`crate::sync`] field for field; see that module's docs
//! for the algorithms themselves.

mod conn;
mod stream;

pub use conn::Connection;
