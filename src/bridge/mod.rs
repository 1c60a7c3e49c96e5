//! Bridge subsystem.
//!
//! A bridge is the user-side agent that holds a websocket to the gateway and
//! forwards proxied HTTP calls to the user's local model runtime.
//!
//! # Data Flow
//! ```text
//! HTTP caller → route_request → request frame → bridge
//! bridge → response frame → complete → HTTP caller
//! ```

pub mod protocol;
pub mod registry;
pub mod socket;

pub use protocol::{BridgeMessage, BridgeMessageType, ProxyRequest, ProxyResponse};
pub use registry::{BridgeConnection, BridgeError, BridgeRegistry, ConnectionInfo};
pub use socket::serve_bridge;
