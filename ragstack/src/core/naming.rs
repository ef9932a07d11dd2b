//! Deterministic resource naming.
//!
//! Every dependent resource name is derived from the account id, region,
//! stack name and a `YYYYMMDD` date stamp, so that a later invocation can
//! find what an earlier one created without any local state.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of an object-storage bucket name.
const MAX_BUCKET_NAME: usize = 63;

/// Region in which buckets are created without a location constraint.
pub const DEFAULT_STORAGE_REGION: &str = "us-east-1";

/// Inputs from which resource names are derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingConvention {
    /// Account identifier.
    pub account_id: String,
    /// Region.
    pub region: String,
    /// Stack name.
    pub stack_name: String,
    /// `YYYYMMDD` stamp used for dated names.
    pub date_stamp: String,
}

impl NamingConvention {
    /// Creates a naming convention with an explicit date stamp.
    #[must_use]
    pub fn new(
        account_id: impl Into<String>,
        region: impl Into<String>,
        stack_name: impl Into<String>,
        date_stamp: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            region: region.into(),
            stack_name: stack_name.into(),
            date_stamp: date_stamp.into(),
        }
    }

    /// Creates a naming convention stamped with today's UTC date.
    #[must_use]
    pub fn today(
        account_id: impl Into<String>,
        region: impl Into<String>,
        stack_name: impl Into<String>,
    ) -> Self {
        Self::new(account_id, region, stack_name, date_stamp(Utc::now().date_naive()))
    }

    /// Bucket for a given purpose, e.g. `deploy` or `corpus`.
    #[must_use]
    pub fn bucket(&self, purpose: &str) -> String {
        let name = format!(
            "{}-{}-{}-{}",
            self.stack_name, purpose, self.account_id, self.region
        )
        .to_ascii_lowercase();
        truncate_bucket_name(&name)
    }

    /// Name of a stack-scoped resource, e.g. a role.
    #[must_use]
    pub fn scoped(&self, suffix: &str) -> String {
        format!("{}-{}", self.stack_name, suffix)
    }

    /// Knowledge base created for the stack.
    #[must_use]
    pub fn knowledge_base_name(&self) -> String {
        self.scoped("kb")
    }

    /// Vector-search collection backing the knowledge base.
    #[must_use]
    pub fn collection_name(&self) -> String {
        self.scoped("vectors")
    }

    /// Dated fine-tuning job name.
    #[must_use]
    pub fn job_name(&self, prefix: &str) -> String {
        format!("{prefix}-job-{}", self.date_stamp)
    }

    /// Dated custom model name.
    #[must_use]
    pub fn custom_model_name(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.date_stamp)
    }

    /// Name prefix shared by provisioned throughputs.
    #[must_use]
    pub fn provisioned_throughput_prefix(prefix: &str) -> String {
        format!("{prefix}-pt")
    }

    /// Dated provisioned-throughput name.
    #[must_use]
    pub fn provisioned_throughput_name(&self, prefix: &str) -> String {
        format!("{}-{}", Self::provisioned_throughput_prefix(prefix), self.date_stamp)
    }

    /// On-demand foundation-model identifier for the configured region.
    #[must_use]
    pub fn foundation_model_arn(&self, model_id: &str) -> String {
        format!("arn:aws:bedrock:{}::foundation-model/{model_id}", self.region)
    }

    /// Location constraint for bucket creation in this region.
    ///
    /// The default storage region takes no constraint; every other region
    /// must pass one.
    #[must_use]
    pub fn location_constraint(&self) -> Option<&str> {
        location_constraint(&self.region)
    }
}

/// Location constraint for bucket creation in `region`.
#[must_use]
pub fn location_constraint(region: &str) -> Option<&str> {
    if region == DEFAULT_STORAGE_REGION {
        None
    } else {
        Some(region)
    }
}

/// Formats a date as `YYYYMMDD`.
#[must_use]
pub fn date_stamp(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

fn truncate_bucket_name(name: &str) -> String {
    if name.len() <= MAX_BUCKET_NAME {
        return name.to_string();
    }
    name[..MAX_BUCKET_NAME].trim_end_matches('-').to_string()
}

/// Selects the most recent item whose name starts with `prefix`.
///
/// Names embed a date stamp, so "most recent" is the lexicographic maximum.
/// This is a textual comparison, not a date comparison.
pub fn select_latest<T, I, F>(items: I, prefix: &str, name_of: F) -> Option<T>
where
    I: IntoIterator<Item = T>,
    F: Fn(&T) -> &str,
{
    items
        .into_iter()
        .filter(|item| name_of(item).starts_with(prefix))
        .max_by(|a, b| name_of(a).cmp(name_of(b)))
}
