//! Encrypted tunnel relay.
//!
//! # Data Flow
//! ```text
//! device ── keyExchange ──►┐                ┌◄── keyExchange ── container
//!                          relay (pairing)
//! device ◄─ sessionEstablished(container key) / (device key) ─► container
//! device ── encryptedData ─► relay ─ same bytes ─► container (and back)
//! ```
//!
//! # Design Decisions
//! - The relay brokers public keys only; session keys exist at the endpoints
//! - At-most-once delivery; nothing is queued or retried

pub mod protocol;
pub mod registry;
pub mod socket;

pub use protocol::{EndpointRole, TunnelMessage};
pub use registry::{EndpointState, RelayError, RelayStats, SessionInfo, TunnelRelay};
pub use socket::serve_tunnel;
