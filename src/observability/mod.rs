//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields, never payloads: relay frames are logged by size only
//! - Request ID flows from the HTTP layer into proxied bridge calls
//! - Metrics are cheap (atomic increments) and safe to call when no recorder is installed

pub mod logging;
pub mod metrics;
