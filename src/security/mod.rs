//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → access_control.rs (extract bearer / ?token= / X-Service-Key)
//!     → auth.rs (verify signature, issuer, audience, expiry)
//!     → AuthUser attached → handler
//! ```
//!
//! # Design Decisions
//! - Fail closed: any verification failure is a 401 before core logic runs
//! - Static keys are compared in constant time

pub mod access_control;
pub mod auth;

pub use access_control::{
    bearer_matches, bearer_token, require_user, verify_service_key, AuthUser, SERVICE_KEY_HEADER,
};
pub use auth::{AuthContext, AuthError, Claims};
