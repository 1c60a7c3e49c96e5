//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request id, tracing, body limit)
//!     → security middleware (bearer token → AuthUser)
//!     → websocket.rs (bridge / tunnel upgrades)
//!     → proxy.rs (HTTP → bridge request frame → HTTP)
//!     → tunnels.rs, compute.rs (control-plane JSON routes)
//! ```

pub mod compute;
pub mod proxy;
pub mod server;
pub mod tunnels;
pub mod websocket;

pub use server::{AppState, HttpServer};
