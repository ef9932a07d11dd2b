//! Pipeline plumbing.
//!
//! This module provides:
//! - The execution context passed to every stage
//! - Idempotent ensure-exists helpers
//! - Bounded readiness polling
//! - The sequential stage runner

mod context;
mod ensure;
#[cfg(test)]
mod integration_tests;
mod poll;
mod runner;

pub use context::DeployContext;
pub use ensure::{
    ensure, ensure_bucket, ensure_present, ensure_role, EnsureOutcome, Ensured, RoleSpec,
};
pub use poll::{wait, PollConfig, PollOutcome, ResourceState, DEFAULT_POLL_INTERVAL};
pub use runner::{PipelineRun, StagePipeline};
