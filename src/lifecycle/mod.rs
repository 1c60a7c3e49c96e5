//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Build services → Start background loops → Serve
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Stop loops → Terminate compute units → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Background loops are owned by `BackgroundTasks`, never detached

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{BackgroundTasks, Shutdown};
pub use startup::{Services, StartupError};
