//! # hap-server
//!
//! Connection handling for a HAP accessory.
//!
//! This crate provides:
//! - Per-connection pairing state and the connection registry
//! - The dual-mode session transport (plaintext, then encrypted records)
//! - HTTP framing and routing for `/pair-setup`, `/pair-verify` and `/pairings`
//! - The TCP server and its shutdown path

pub mod connection;
pub mod context;
pub mod http;
pub mod registry;
pub mod router;
pub mod server;
pub mod transport;

pub use connection::{ConnectionId, ConnectionState, HandshakeStage};
pub use context::HapContext;
pub use http::{HttpRequest, HttpResponse};
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use router::{Endpoint, Router, Routed};
pub use server::HapServer;
pub use transport::{SessionTransport, TransportMode};
