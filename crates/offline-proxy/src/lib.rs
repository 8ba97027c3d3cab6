//! Offline Cache Origin Client
//!
//! This crate provides the network side of the cache: the `Fetcher`
//! abstraction and the HTTP client that talks to the origin server.

pub mod client;
pub mod error;

pub use client::{FetchRequest, Fetcher, OriginClient, OriginClientConfig, strip_hop_by_hop};
pub use error::ProxyError;
