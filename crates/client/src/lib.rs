//! Network side of offsync.
//!
//! This crate provides the HTTP fetch pipeline used for read-through and
//! the remote store client that mutations are applied against.

pub mod fetch;
pub mod remote;

pub use fetch::{FetchClient, FetchConfig, UrlError, canonicalize};
pub use remote::{ApplyOutcome, HttpRemoteStore, RemoteStoreClient, classify_apply_status};
