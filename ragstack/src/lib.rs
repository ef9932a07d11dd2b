//! # Ragstack
//!
//! Staged, resumable provisioning and teardown for a retrieval-augmented
//! generation stack on a managed cloud.
//!
//! Ragstack drives:
//!
//! - **Infrastructure**: a deployment bucket, uploaded templates and a nested
//!   infrastructure stack
//! - **Data**: source documents, corpus ingestion and knowledge-base
//!   ingestion jobs
//! - **Models**: a fine-tuning job, its custom model and optional
//!   provisioned throughput
//! - **Application**: a container image and a hosted service wired to the
//!   knowledge base and model
//! - **Teardown**: dependency-ordered deletion with a verification pass
//!
//! No local state is kept; every run re-derives what exists from the
//! control plane and deterministic resource names.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ragstack::prelude::*;
//!
//! let config = DeployConfig::from_env(account_id)?;
//! let ctx = DeployContext::new(
//!     config.clone(),
//!     ControlPlane::uniform(Arc::new(AwsCli::locate(&config.region, config.profile.clone())?)),
//!     Collaborators::from_config(&config.collaborators)?,
//!     DeployContext::default_confirmer(&config),
//! );
//!
//! let run = StagePipeline::for_target(StageTarget::All).run(&ctx).await?;
//! println!("{}", run.status_report().unwrap_or_default().render_table());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod collaborators;
pub mod config;
pub mod confirm;
pub mod control;
pub mod core;
pub mod discovery;
pub mod errors;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod teardown;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::collaborators::{
        CloudContext, Collaborators, CorpusIngestor, ImageBuilder, SourcePackager,
        TuningDataGenerator,
    };
    pub use crate::config::{ConfigSource, DeployConfig};
    pub use crate::confirm::{AutoConfirm, Confirmer, StdinConfirmer};
    pub use crate::control::{AwsCli, CloudClient, ControlPlane};
    pub use crate::core::{
        DataSourcePair, NamingConvention, ResourceKind, ResourceRecord, StageName,
        StageTarget, TeardownTarget,
    };
    pub use crate::discovery::{Inventory, ResourceGraphWalker};
    pub use crate::errors::{ControlPlaneError, DeployError, StageFailure};
    pub use crate::observability::{init_logging, LogFormat};
    pub use crate::pipeline::{DeployContext, PipelineRun, PollConfig, StagePipeline};
    pub use crate::stages::{Component, Stage, StageOutput, StageResult, StatusReport};
    pub use crate::teardown::{StepOutcome, TeardownReport, TeardownSequencer};
}
