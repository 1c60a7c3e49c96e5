//! Client for the inference relay control plane.

pub mod client;

pub use client::{
    ComputeStatus, ComputeUnit, ControlPlaneClient, Discovery, SdkError, TerminateOutcome,
    TunnelHealth, TunnelInfo, TunnelRecord,
};
