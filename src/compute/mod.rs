//! Compute unit subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP provision/terminate/status → ComputeManager → ContainerRuntime → docker CLI
//! reaper tick → ComputeManager::reap_idle → terminate
//! ```

pub mod docker;
pub mod ids;
pub mod manager;
pub mod runtime;

pub use docker::DockerCli;
pub use ids::UnitIds;
pub use manager::{
    BulkTermination, ComputeError, ComputeManager, ComputeUnit, StatusReport, TerminateOutcome,
    UnitStatus, LABEL_CREATED_AT, LABEL_KIND, LABEL_USER_ID,
};
pub use runtime::{ContainerRuntime, ContainerSummary, RuntimeError, RuntimeResult, UnitSpec};
