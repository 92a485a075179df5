//! Core types and shared functionality for offsync.
//!
//! This crate provides:
//! - Request/response and mutation types shared by every layer
//! - Durable SQLite store for cache generations and the mutation queue
//! - Unified error types
//! - Configuration structures

pub mod config;
pub mod error;
pub mod http;
pub mod mutation;
pub mod store;

pub use config::AppConfig;
pub use error::Error;
pub use http::{Destination, ResourceRequest, Response};
pub use mutation::{MutationStatus, PendingMutation};
pub use store::{CacheEntry, CacheStore, DurableQueue, GenerationInfo, SqliteQueue, StoreDb};
