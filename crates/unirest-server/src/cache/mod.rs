//! In-process caches.
//!
//! Sessions live only as long as the process; nothing is persisted.

pub mod connection;

pub use connection::{
    ConnectionCache, ConnectionEntry, ConnectionError, ConnectionSettings, ConnectionStats,
};
