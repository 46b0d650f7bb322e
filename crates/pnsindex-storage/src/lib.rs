//! pnsindex-storage: storage backends for the PNS indexer.
//!
//! Backends:
//! - [`memory`]: in-memory key-value store and mirror (dev/testing)
//! - `redis`: cursor and progress keys in Redis (`redis` feature)
//! - `postgres`: event log and domain mirror in PostgreSQL (`postgres` feature)

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "redis")]
pub mod redis;

pub use memory::{InMemoryKv, InMemoryMirror};
