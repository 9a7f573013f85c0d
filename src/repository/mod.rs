//! Repository implementations
//!
//! In-memory implementations of the key, metadata, and token repositories
//! for testing and development, plus Postgres implementations behind the
//! `postgres` feature. Production deployments point all three traits at the
//! application's relational store.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{InMemoryKeyRepository, InMemoryMetadataRepository, InMemoryTokenRepository};

#[cfg(feature = "postgres")]
pub use postgres::{PgKeyRepository, PgMetadataRepository, PgTokenRepository};
