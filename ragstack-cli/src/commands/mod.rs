//! Subcommand implementations.

pub mod deploy;
pub mod teardown;

use anyhow::Context;
use ragstack::collaborators::Collaborators;
use ragstack::config::{ConfigSource, DeployConfig};
use ragstack::control::{AwsCli, ControlPlane, IdentityService};
use ragstack::pipeline::DeployContext;
use std::sync::Arc;
use tracing::info;

/// Resolves configuration and wires the control plane, collaborators and
/// confirmer from the process environment.
pub async fn build_context(yes: bool) -> anyhow::Result<DeployContext> {
    let source = ConfigSource::from_env();
    let cli = AwsCli::locate(source.region(), source.profile())?;

    let account_id = match source.account_id() {
        Some(account) => account,
        None => cli
            .account_id()
            .await
            .context("could not resolve the account id; set ACCOUNT_ID or check credentials")?,
    };

    let config = DeployConfig::resolve(&source, account_id)?;
    let approve = yes || config.auto_approve;
    let config = config.with_auto_approve(approve);
    info!(
        region = %config.region,
        profile = config.profile_label(),
        stack = %config.stack_name,
        "resolved deployment configuration"
    );

    let collaborators = Collaborators::from_config(&config.collaborators)?;
    let confirmer = DeployContext::default_confirmer(&config);
    Ok(DeployContext::new(
        config,
        ControlPlane::uniform(Arc::new(cli)),
        collaborators,
        confirmer,
    ))
}
