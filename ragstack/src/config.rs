//! Deployment configuration.
//!
//! All environment-derived parameters are collected once into an immutable
//! [`DeployConfig`] that is passed explicitly to every component. Nothing
//! else in the crate reads the process environment.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::{date_stamp, NamingConvention};
use crate::errors::{DeployError, Result};

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_stack_name() -> String {
    "ofac-rag".to_string()
}

fn default_model_prefix() -> String {
    "ofac-nova-custom".to_string()
}

fn default_base_model_id() -> String {
    "amazon.nova-micro-v1:0:128k".to_string()
}

fn default_foundation_model_id() -> String {
    "amazon.nova-micro-v1:0".to_string()
}

fn default_tuning_data_key() -> String {
    "tuning/tuning_dataset_contents.jsonl".to_string()
}

fn default_ingest_command() -> String {
    "python -m model.pdf_ingest".to_string()
}

fn default_tuning_data_command() -> String {
    "python -m model.generate_tuning_data".to_string()
}

const fn default_model_units() -> u32 {
    1
}

const fn default_epochs() -> u32 {
    3
}

const fn default_poll_interval_secs() -> u64 {
    5
}

/// A snapshot of configuration variables.
///
/// Built from the process environment by the binary, or from explicit pairs
/// in tests. Blank values count as unset.
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    vars: HashMap<String, String>,
}

impl ConfigSource {
    /// Captures the current process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Builds a source from explicit key/value pairs.
    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Sets one variable.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Returns a non-blank value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn string_or(&self, key: &str, default: impl FnOnce() -> String) -> String {
        self.get(key).map_or_else(default, str::to_string)
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: std::str::FromStr,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|_| DeployError::Config(format!("{key} must be a number, got '{raw}'"))),
        }
    }

    fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| {
            matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "y")
        })
    }

    /// Region, from `AWS_REGION` then `AWS_DEFAULT_REGION`.
    #[must_use]
    pub fn region(&self) -> String {
        self.get("AWS_REGION")
            .or_else(|| self.get("AWS_DEFAULT_REGION"))
            .map_or_else(default_region, str::to_string)
    }

    /// Named credential profile, if any.
    #[must_use]
    pub fn profile(&self) -> Option<String> {
        self.get("AWS_PROFILE").map(str::to_string)
    }

    /// Explicit account id, if any.
    #[must_use]
    pub fn account_id(&self) -> Option<String> {
        self.get("ACCOUNT_ID").map(str::to_string)
    }
}

/// Object-storage buckets used by the stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Templates, artifacts and app source.
    pub deployment: String,
    /// Raw source documents.
    pub source: String,
    /// Pre-chunked corpus read by the knowledge base.
    pub corpus: String,
    /// Fine-tuning data and outputs.
    pub tuning: String,
}

impl BucketConfig {
    /// Every bucket with a short purpose label.
    #[must_use]
    pub fn all(&self) -> [(&'static str, &str); 4] {
        [
            ("deployment", self.deployment.as_str()),
            ("source", self.source.as_str()),
            ("corpus", self.corpus.as_str()),
            ("tuning", self.tuning.as_str()),
        ]
    }
}

/// Fine-tuning and inference parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Prefix shared by jobs, custom models and provisioned throughputs.
    #[serde(default = "default_model_prefix")]
    pub prefix: String,
    /// Base model the tuning job customizes.
    #[serde(default = "default_base_model_id")]
    pub base_model_id: String,
    /// On-demand model used when no provisioned throughput exists.
    #[serde(default = "default_foundation_model_id")]
    pub foundation_model_id: String,
    /// Provisioned-throughput model units.
    #[serde(default = "default_model_units")]
    pub model_units: u32,
    /// Object key of the training dataset in the tuning bucket.
    #[serde(default = "default_tuning_data_key")]
    pub tuning_data_key: String,
    /// Training epochs.
    #[serde(default = "default_epochs")]
    pub epochs: u32,
    /// Identity role assumed by the customization service.
    pub tuning_role: String,
}

impl ModelConfig {
    /// Key prefix under which the dataset lives, e.g. `tuning/`.
    #[must_use]
    pub fn tuning_data_prefix(&self) -> String {
        match self.tuning_data_key.rsplit_once('/') {
            Some((dir, _)) => format!("{dir}/"),
            None => String::new(),
        }
    }
}

/// Local directories and files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathConfig {
    /// Raw documents.
    pub data_dir: PathBuf,
    /// Declarative templates.
    pub templates_dir: PathBuf,
    /// Build artifacts referenced by templates.
    pub artifacts_dir: PathBuf,
    /// Application build context.
    pub app_dir: PathBuf,
    /// Root template file name inside `templates_dir`.
    pub root_template: String,
}

/// Commands for the external data collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaboratorConfig {
    /// Corpus ingestion command line.
    #[serde(default = "default_ingest_command")]
    pub ingest_command: String,
    /// Tuning-data generator command line.
    #[serde(default = "default_tuning_data_command")]
    pub tuning_data_command: String,
}

/// Hosted-application parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Hosted service name.
    pub service_name: String,
    /// Container repository name.
    pub repository_name: String,
    /// Managed build project name.
    pub build_project: String,
    /// Role assumed by the running service.
    pub instance_role: String,
    /// Role used to pull from the registry.
    pub access_role: String,
    /// Role assumed by the managed build.
    pub build_role: String,
    /// Comma-separated `user:password` credentials.
    pub allowed_users: String,
    /// Image tag pushed and deployed.
    pub image_tag: String,
}

/// Immutable configuration for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Region.
    pub region: String,
    /// Credential profile; `None` uses ambient credentials.
    pub profile: Option<String>,
    /// Stack name.
    pub stack_name: String,
    /// Account id.
    pub account_id: String,
    /// Name derivation inputs.
    pub naming: NamingConvention,
    /// Buckets.
    pub buckets: BucketConfig,
    /// Model parameters.
    pub model: ModelConfig,
    /// Local paths.
    pub paths: PathConfig,
    /// Collaborator commands.
    pub collaborators: CollaboratorConfig,
    /// Application parameters.
    pub app: AppConfig,
    /// Interval between readiness polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Skip interactive confirmation gates.
    #[serde(default)]
    pub auto_approve: bool,
}

impl DeployConfig {
    /// Resolves configuration from the process environment.
    pub fn from_env(account_id: impl Into<String>) -> Result<Self> {
        Self::resolve(&ConfigSource::from_env(), account_id)
    }

    /// Resolves configuration stamped with today's date.
    pub fn resolve(source: &ConfigSource, account_id: impl Into<String>) -> Result<Self> {
        let today = date_stamp(chrono::Utc::now().date_naive());
        Self::resolve_dated(source, account_id, today)
    }

    /// Resolves configuration with an explicit `YYYYMMDD` stamp.
    pub fn resolve_dated(
        source: &ConfigSource,
        account_id: impl Into<String>,
        date_stamp: impl Into<String>,
    ) -> Result<Self> {
        let account_id = account_id.into();
        if account_id.trim().is_empty() {
            return Err(DeployError::Config("account id is empty".to_string()));
        }
        let region = source.region();
        let stack_name = source.string_or("STACK_NAME", default_stack_name);
        let naming = NamingConvention::new(&account_id, &region, &stack_name, date_stamp);

        let buckets = BucketConfig {
            deployment: source.string_or("DEPLOYMENT_BUCKET", || naming.bucket("deploy")),
            source: source.string_or("SOURCE_BUCKET", || naming.bucket("source")),
            corpus: source.string_or("CORPUS_BUCKET", || naming.bucket("corpus")),
            tuning: source.string_or("TUNING_BUCKET", || naming.bucket("tuning")),
        };

        let model = ModelConfig {
            prefix: source.string_or("MODEL_PREFIX", default_model_prefix),
            base_model_id: source.string_or("BASE_MODEL_ID", default_base_model_id),
            foundation_model_id: source
                .string_or("FOUNDATION_MODEL_ID", default_foundation_model_id),
            model_units: source.parse_or("PT_MODEL_UNITS", default_model_units())?,
            tuning_data_key: source.string_or("TUNING_DATA_KEY", default_tuning_data_key),
            epochs: source.parse_or("TUNING_EPOCHS", default_epochs())?,
            tuning_role: source.string_or("TUNING_ROLE_NAME", || {
                naming.scoped("bedrock-tuning-role")
            }),
        };
        if model.model_units == 0 {
            return Err(DeployError::Config(
                "PT_MODEL_UNITS must be at least 1".to_string(),
            ));
        }

        let paths = PathConfig {
            data_dir: source.string_or("DATA_DIR", || "data".to_string()).into(),
            templates_dir: source.string_or("TEMPLATES_DIR", || "infra".to_string()).into(),
            artifacts_dir: source.string_or("ARTIFACTS_DIR", || "build".to_string()).into(),
            app_dir: source.string_or("APP_DIR", || "app".to_string()).into(),
            root_template: source.string_or("ROOT_TEMPLATE", || "main.yaml".to_string()),
        };

        let collaborators = CollaboratorConfig {
            ingest_command: source.string_or("INGEST_COMMAND", default_ingest_command),
            tuning_data_command: source
                .string_or("TUNING_DATA_COMMAND", default_tuning_data_command),
        };

        let app = AppConfig {
            service_name: source.string_or("APP_SERVICE_NAME", || naming.scoped("app")),
            repository_name: source.string_or("ECR_REPOSITORY", || naming.scoped("app")),
            build_project: source.string_or("BUILD_PROJECT", || naming.scoped("app-build")),
            instance_role: naming.scoped("app-instance-role"),
            access_role: naming.scoped("app-ecr-access-role"),
            build_role: naming.scoped("app-build-role"),
            allowed_users: source.get("ALLOWED_USERS").unwrap_or_default().to_string(),
            image_tag: source.string_or("IMAGE_TAG", || "latest".to_string()),
        };

        let poll_interval_secs =
            source.parse_or("POLL_INTERVAL_SECS", default_poll_interval_secs())?;

        Ok(Self {
            region,
            profile: source.profile(),
            stack_name,
            account_id,
            naming,
            buckets,
            model,
            paths,
            collaborators,
            app,
            poll_interval_secs,
            auto_approve: source.flag("AUTO_APPROVE"),
        })
    }

    /// Profile label for messages, `default` when none is set.
    #[must_use]
    pub fn profile_label(&self) -> &str {
        self.profile.as_deref().unwrap_or("default")
    }

    /// Interval between readiness polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Returns a copy with a different poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_secs = interval.as_secs();
        self
    }

    /// Returns a copy with confirmation gates pre-answered.
    #[must_use]
    pub const fn with_auto_approve(mut self, auto_approve: bool) -> Self {
        self.auto_approve = auto_approve;
        self
    }

    /// HTTPS URL of an object in the deployment bucket.
    #[must_use]
    pub fn deployment_object_url(&self, key: &str) -> String {
        let host = if self.region == crate::core::DEFAULT_STORAGE_REGION {
            format!("{}.s3.amazonaws.com", self.buckets.deployment)
        } else {
            format!("{}.s3.{}.amazonaws.com", self.buckets.deployment, self.region)
        };
        format!("https://{host}/{key}")
    }

    /// Key of the root template in the deployment bucket.
    #[must_use]
    pub fn root_template_key(&self) -> String {
        format!("templates/{}", self.paths.root_template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn resolve(source: &ConfigSource) -> Result<DeployConfig> {
        DeployConfig::resolve_dated(source, "111122223333", "20240315")
    }

    #[test]
    fn test_defaults() {
        let config = resolve(&ConfigSource::default()).unwrap();

        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.stack_name, "ofac-rag");
        assert_eq!(config.profile_label(), "default");
        assert_eq!(config.buckets.corpus, "ofac-rag-corpus-111122223333-us-east-1");
        assert_eq!(config.model.prefix, "ofac-nova-custom");
        assert_eq!(config.model.model_units, 1);
        assert_eq!(config.model.epochs, 3);
        assert_eq!(config.model.tuning_role, "ofac-rag-bedrock-tuning-role");
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert!(!config.auto_approve);
        assert_eq!(config.app.image_tag, "latest");
    }

    #[test]
    fn test_overrides() {
        let source = ConfigSource::from_pairs([
            ("AWS_DEFAULT_REGION", "eu-west-1"),
            ("AWS_PROFILE", "ops"),
            ("STACK_NAME", "demo"),
            ("CORPUS_BUCKET", "my-corpus"),
            ("PT_MODEL_UNITS", "2"),
            ("AUTO_APPROVE", "yes"),
            ("ALLOWED_USERS", "a@example.com:pw"),
        ]);
        let config = resolve(&source).unwrap();

        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.profile_label(), "ops");
        assert_eq!(config.buckets.corpus, "my-corpus");
        assert_eq!(config.buckets.source, "demo-source-111122223333-eu-west-1");
        assert_eq!(config.model.model_units, 2);
        assert!(config.auto_approve);
        assert_eq!(config.app.allowed_users, "a@example.com:pw");
    }

    #[test]
    fn test_region_precedence() {
        let source = ConfigSource::from_pairs([
            ("AWS_REGION", "us-west-2"),
            ("AWS_DEFAULT_REGION", "eu-west-1"),
        ]);
        assert_eq!(source.region(), "us-west-2");
    }

    #[test]
    fn test_blank_values_are_unset() {
        let source = ConfigSource::from_pairs([("STACK_NAME", "  "), ("AWS_PROFILE", "")]);
        let config = resolve(&source).unwrap();
        assert_eq!(config.stack_name, "ofac-rag");
        assert_eq!(config.profile, None);
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let source = ConfigSource::default().with("TUNING_EPOCHS", "three");
        let err = resolve(&source).unwrap_err();
        assert_eq!(err.kind(), "config");
        assert!(err.to_string().contains("TUNING_EPOCHS"));

        let source = ConfigSource::default().with("PT_MODEL_UNITS", "0");
        assert!(resolve(&source).is_err());
    }

    #[test]
    fn test_empty_account_rejected() {
        assert!(DeployConfig::resolve_dated(&ConfigSource::default(), " ", "20240101").is_err());
    }

    #[test]
    fn test_template_url() {
        let config = resolve(&ConfigSource::default()).unwrap();
        assert_eq!(
            config.deployment_object_url(&config.root_template_key()),
            "https://ofac-rag-deploy-111122223333-us-east-1.s3.amazonaws.com/templates/main.yaml"
        );

        let eu = resolve(&ConfigSource::default().with("AWS_REGION", "eu-west-1")).unwrap();
        assert!(eu
            .deployment_object_url("templates/main.yaml")
            .contains(".s3.eu-west-1.amazonaws.com/"));
    }

    #[test]
    fn test_tuning_prefix() {
        let config = resolve(&ConfigSource::default()).unwrap();
        assert_eq!(config.model.tuning_data_prefix(), "tuning/");
    }
}
