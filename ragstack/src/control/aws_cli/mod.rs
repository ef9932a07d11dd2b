//! Control-plane client backed by the `aws` command-line tool.
//!
//! Every call runs `aws <service> <operation> ... --output json --region R
//! [--profile P]` and parses stdout as JSON. A non-zero exit is classified
//! from stderr into [`ControlPlaneError::NotFound`] or
//! [`ControlPlaneError::Command`].

mod services;

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::errors::{ControlPlaneError, ControlPlaneResult, DeployError};

/// Stderr fragments that mean "the addressed resource does not exist".
const NOT_FOUND_MARKERS: &[&str] = &[
    "NoSuchBucket",
    "NoSuchKey",
    "NotFound",
    "ResourceNotFoundException",
    "NoSuchEntity",
    "RepositoryNotFoundException",
    "(404)",
    "does not exist",
];

/// Client that shells out to the `aws` CLI.
#[derive(Debug, Clone)]
pub struct AwsCli {
    program: PathBuf,
    region: String,
    profile: Option<String>,
}

impl AwsCli {
    /// Creates a client using `aws` from `PATH`.
    #[must_use]
    pub fn new(region: impl Into<String>, profile: Option<String>) -> Self {
        Self {
            program: PathBuf::from("aws"),
            region: region.into(),
            profile,
        }
    }

    /// Locates the `aws` binary, failing with a missing-prerequisite error.
    pub fn locate(region: impl Into<String>, profile: Option<String>) -> Result<Self, DeployError> {
        let program = which::which("aws").map_err(|_| {
            DeployError::missing("aws CLI", "install AWS CLI v2 and make sure it is on PATH")
        })?;
        Ok(Self::new(region, profile).with_program(program))
    }

    /// Uses a specific executable.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// The executable in use.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Region passed to every call.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    fn command(&self, service: &str, operation: &str, args: &[&str]) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg(service)
            .arg(operation)
            .args(args)
            .args(["--output", "json", "--region", &self.region])
            .env("AWS_PAGER", "")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(profile) = &self.profile {
            command.args(["--profile", profile]);
        }
        command
    }

    /// Runs a call and returns raw stdout.
    async fn run(&self, service: &str, operation: &str, args: &[&str]) -> ControlPlaneResult<String> {
        tracing::debug!(service, operation, "control-plane call");
        let output = self
            .command(service, operation, args)
            .output()
            .await
            .map_err(|e| ControlPlaneError::Spawn(format!("{}: {e}", self.program.display())))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(classify(service, operation, stderr.trim()))
    }

    /// Runs a call and parses stdout as JSON; empty output is `null`.
    async fn call(&self, service: &str, operation: &str, args: &[&str]) -> ControlPlaneResult<Value> {
        let stdout = self.run(service, operation, args).await?;
        parse_output(service, operation, &stdout)
    }

    /// Like [`Self::call`], mapping not-found to `None`.
    async fn call_optional(
        &self,
        service: &str,
        operation: &str,
        args: &[&str],
    ) -> ControlPlaneResult<Option<Value>> {
        match self.call(service, operation, args).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Runs a mutation whose response body is irrelevant.
    async fn call_unit(&self, service: &str, operation: &str, args: &[&str]) -> ControlPlaneResult<()> {
        self.run(service, operation, args).await.map(|_| ())
    }
}

fn classify(service: &str, operation: &str, stderr: &str) -> ControlPlaneError {
    if NOT_FOUND_MARKERS.iter().any(|marker| stderr.contains(marker)) {
        ControlPlaneError::not_found(service, operation)
    } else {
        let message = if stderr.is_empty() {
            "exited with non-zero status".to_string()
        } else {
            stderr.to_string()
        };
        ControlPlaneError::command(service, operation, message)
    }
}

fn parse_output(service: &str, operation: &str, stdout: &str) -> ControlPlaneResult<Value> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(trimmed)
        .map_err(|e| ControlPlaneError::malformed(service, operation, e.to_string()))
}

/// A string field, empty when missing or not a string.
fn text(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// An optional, non-empty string field.
fn opt_text(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// The elements of an array field; empty when absent.
fn items<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// A required string field.
fn required(value: &Value, key: &str, service: &str, operation: &str) -> ControlPlaneResult<String> {
    opt_text(value, key)
        .ok_or_else(|| ControlPlaneError::malformed(service, operation, format!("missing {key}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_not_found() {
        let err = classify(
            "cloudformation",
            "describe-stacks",
            "An error occurred (ValidationError) when calling the DescribeStacks operation: Stack with id ofac-rag does not exist",
        );
        assert!(err.is_not_found());

        let err = classify(
            "s3api",
            "head-bucket",
            "An error occurred (404) when calling the HeadBucket operation: Not Found",
        );
        assert!(err.is_not_found());

        let err = classify("iam", "get-role", "An error occurred (NoSuchEntity) ...");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_classify_command_error() {
        let err = classify("iam", "create-role", "An error occurred (AccessDenied)");
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("AccessDenied"));

        let err = classify("iam", "create-role", "");
        assert!(err.to_string().contains("non-zero"));
    }

    #[test]
    fn test_parse_output() {
        assert_eq!(parse_output("s", "o", "  \n").unwrap(), Value::Null);
        assert_eq!(parse_output("s", "o", r#"{"a":1}"#).unwrap(), json!({"a": 1}));
        assert!(matches!(
            parse_output("s", "o", "not json"),
            Err(ControlPlaneError::Malformed { .. })
        ));
    }

    #[test]
    fn test_field_helpers() {
        let value = json!({"Name": "x", "Empty": "", "List": [1, 2]});
        assert_eq!(text(&value, "Name"), "x");
        assert_eq!(text(&value, "Missing"), "");
        assert_eq!(opt_text(&value, "Empty"), None);
        assert_eq!(items(&value, "List").len(), 2);
        assert!(items(&value, "Missing").is_empty());
        assert!(required(&value, "Missing", "s", "o").is_err());
    }

    #[test]
    fn test_command_arguments() {
        let cli = AwsCli::new("eu-west-1", Some("ops".to_string())).with_program("/usr/bin/aws");
        let command = cli.command("s3api", "head-bucket", &["--bucket", "b"]);
        let std_command = command.as_std();
        let args: Vec<_> = std_command
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(std_command.get_program(), "/usr/bin/aws");
        assert_eq!(
            args,
            vec![
                "s3api", "head-bucket", "--bucket", "b", "--output", "json", "--region",
                "eu-west-1", "--profile", "ops"
            ]
        );
    }
}
