//! Tunnel registry subsystem.
//!
//! Tunnels are created externally by the user's agent; this subsystem only
//! records, discovers and health-checks them.

pub mod health;
pub mod registry;
pub mod types;

pub use health::{run_stale_sweep, TunnelProber};
pub use registry::TunnelRegistry;
pub use types::{
    Discovery, TunnelError, TunnelHealth, TunnelInfo, TunnelMetadata, TunnelRegistration,
    TunnelView,
};
