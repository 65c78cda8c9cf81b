//! Network subsystem: control connection, discovery and stream fetch

pub mod connection;
pub mod discovery;
pub mod http;

pub use connection::{Client, ConnectionConfig};
pub use discovery::discover;
pub use http::{open_stream, StreamBody, StreamRequest};
