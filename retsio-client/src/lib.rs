//! # retsio-client
//!
//! Client library for RETS servers.
//!
//! This crate provides:
//! - Session negotiation (Login, Logout) over a pluggable transport
//! - Capability dispatch for typed requests
//! - Streaming search results as typed events
//! - Cached metadata retrieval with at most one fetch in flight per server

pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::{Client, Request};
pub use config::ClientConfig;
pub use error::{ClientError, TransportError};
pub use event::{Event, EventStream, Metadata, MetadataSource};
pub use session::{Session, SessionState};
pub use transport::{ByteStream, Transport, TransportResponse};
