//! SQLite-backed durable store for cache generations and the mutation queue.
//!
//! This module provides persistent storage using SQLite with async access
//! via tokio-rusqlite. It supports:
//!
//! - Named cache generations with a single active generation
//! - Request-keyed cache entries stored byte-for-byte
//! - Pre-seeded fallback entries kept outside any generation
//! - A FIFO mutation queue plus a ledger of applied mutation ids
//! - Automatic schema migrations and WAL mode for concurrent access

pub mod connection;
pub mod generations;
pub mod hash;
pub mod migrations;
pub mod mutations;
pub mod traits;

pub use connection::StoreDb;
pub use generations::{CacheEntry, GenerationInfo};
pub use mutations::SqliteQueue;
pub use traits::{CacheStore, DurableQueue};
