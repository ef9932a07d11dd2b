//! Check-then-create for leaf resources.
//!
//! Existence is decided by a lookup *before* any creation call. A creation
//! error is always a creation error, never reinterpreted as "already
//! exists".

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;

use super::poll::{wait, PollConfig, ResourceState};
use crate::control::{IdentityService, ObjectStorage, RoleSummary};
use crate::core::location_constraint;
use crate::errors::{ControlPlaneResult, DeployError, Result};

/// Whether an ensure call created anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnsureOutcome {
    /// The resource was already there.
    Existing,
    /// The resource was created by this call.
    Created,
}

/// A resource value together with how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ensured<T> {
    /// The resource.
    pub value: T,
    /// Existing or created.
    pub outcome: EnsureOutcome,
}

impl<T> Ensured<T> {
    /// Returns true if this call created the resource.
    #[must_use]
    pub fn created(&self) -> bool {
        self.outcome == EnsureOutcome::Created
    }
}

/// Runs `create` only if `exists` reports false.
pub async fn ensure<E, C, Fc>(resource: &str, exists: E, create: C) -> Result<EnsureOutcome>
where
    E: Future<Output = ControlPlaneResult<bool>>,
    C: FnOnce() -> Fc,
    Fc: Future<Output = ControlPlaneResult<()>>,
{
    if exists.await? {
        tracing::info!(resource, "already exists");
        return Ok(EnsureOutcome::Existing);
    }

    tracing::info!(resource, "creating");
    create()
        .await
        .map_err(|e| DeployError::creation(resource, e))?;
    Ok(EnsureOutcome::Created)
}

/// Looks a resource up and creates it only when the lookup finds nothing.
pub async fn ensure_present<T, L, C, Fc>(resource: &str, lookup: L, create: C) -> Result<Ensured<T>>
where
    L: Future<Output = ControlPlaneResult<Option<T>>>,
    C: FnOnce() -> Fc,
    Fc: Future<Output = ControlPlaneResult<T>>,
{
    if let Some(value) = lookup.await? {
        tracing::info!(resource, "already exists");
        return Ok(Ensured {
            value,
            outcome: EnsureOutcome::Existing,
        });
    }

    tracing::info!(resource, "creating");
    let value = create()
        .await
        .map_err(|e| DeployError::creation(resource, e))?;
    Ok(Ensured {
        value,
        outcome: EnsureOutcome::Created,
    })
}

/// Ensures a bucket exists, passing a location constraint outside the
/// default region.
pub async fn ensure_bucket(
    storage: &dyn ObjectStorage,
    bucket: &str,
    region: &str,
) -> Result<EnsureOutcome> {
    let label = format!("bucket {bucket}");
    ensure(&label, storage.bucket_exists(bucket), || {
        storage.create_bucket(bucket, location_constraint(region))
    })
    .await
}

/// Desired identity role.
#[derive(Debug, Clone)]
pub struct RoleSpec<'a> {
    /// Role name.
    pub name: &'a str,
    /// Trust policy document.
    pub trust_policy: Value,
    /// Role description.
    pub description: &'a str,
    /// Inline policies written on every run.
    pub inline_policies: Vec<(String, Value)>,
    /// Managed policies attached on every run.
    pub managed_policies: Vec<String>,
}

/// Ensures a role exists, then (re)applies its policies.
///
/// A freshly created role is polled until it is visible, since identity
/// changes propagate asynchronously.
pub async fn ensure_role(
    identity: &dyn IdentityService,
    spec: &RoleSpec<'_>,
    visibility: &PollConfig,
) -> Result<Ensured<RoleSummary>> {
    let label = format!("role {}", spec.name);
    let ensured = ensure_present(&label, identity.get_role(spec.name), || {
        identity.create_role(spec.name, &spec.trust_policy, spec.description)
    })
    .await?;

    if ensured.created() {
        wait(
            &label,
            visibility,
            move || async move {
                identity
                    .get_role(spec.name)
                    .await
                    .map(|found| ResourceState::from_lookup(found, |r| r.arn.clone()))
            },
            |state: &ResourceState| state.status().is_some(),
            |_| false,
        )
        .await
        .into_result(&label, visibility)?;
    }

    for (policy_name, document) in &spec.inline_policies {
        identity
            .put_role_policy(spec.name, policy_name, document)
            .await?;
    }
    for policy_arn in &spec.managed_policies {
        identity.attach_role_policy(spec.name, policy_arn).await?;
    }

    Ok(ensured)
}
