//! Inference relay gateway library.
//!
//! Lets a user's local model runtime be reached from hosted compute units,
//! either through a bridge websocket, an end-to-end encrypted tunnel, or a
//! registered public tunnel URL.

pub mod admin;
pub mod bridge;
pub mod compute;
pub mod config;
pub mod crypto;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod relay;
pub mod security;
pub mod tunnels;

pub use config::GatewayConfig;
pub use error::ApiError;
pub use http::HttpServer;
pub use lifecycle::{Services, Shutdown};
