//! Collaborators that run an operator-configured command line.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

use super::{CloudContext, CorpusIngestor, IngestRequest, TuningDataGenerator, TuningDataRequest};
use crate::errors::{DeployError, Result};

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    fn parse(name: &str, line: &str) -> Result<Self> {
        let mut words = shell_words::split(line)
            .map_err(|e| DeployError::Config(format!("{name} command: {e}")))?;
        if words.is_empty() {
            return Err(DeployError::Config(format!("{name} command is empty")));
        }
        let program = words.remove(0);
        Ok(Self {
            program,
            args: words,
        })
    }

    fn command(&self, context: &CloudContext) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env("AWS_REGION", &context.region)
            .env("AWS_DEFAULT_REGION", &context.region)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if let Some(profile) = &context.profile {
            command.env("AWS_PROFILE", profile);
        }
        command
    }

    async fn run(&self, name: &str, mut command: Command) -> Result<()> {
        tracing::info!(collaborator = name, program = %self.program, "running");
        let status = command
            .status()
            .await
            .map_err(|e| DeployError::collaborator(name, format!("{}: {e}", self.program)))?;
        if status.success() {
            Ok(())
        } else {
            Err(DeployError::collaborator(name, format!("exited with {status}")))
        }
    }
}

/// Runs the corpus ingestion command with bucket names in its environment.
#[derive(Debug, Clone)]
pub struct CommandIngestor {
    line: CommandLine,
}

impl CommandIngestor {
    /// Parses a command line such as `python -m model.pdf_ingest`.
    pub fn parse(line: &str) -> Result<Self> {
        Ok(Self {
            line: CommandLine::parse("ingest", line)?,
        })
    }
}

#[async_trait]
impl CorpusIngestor for CommandIngestor {
    async fn ingest(&self, request: &IngestRequest) -> Result<()> {
        let mut command = self.line.command(&request.context);
        command
            .env("SOURCE_BUCKET", &request.source_bucket)
            .env("CORPUS_BUCKET", &request.corpus_bucket);
        self.line.run("corpus ingestion", command).await
    }
}

/// Runs the tuning-data generator command.
#[derive(Debug, Clone)]
pub struct CommandTuningGenerator {
    line: CommandLine,
}

impl CommandTuningGenerator {
    /// Parses a command line such as `python -m model.generate_tuning_data`.
    pub fn parse(line: &str) -> Result<Self> {
        Ok(Self {
            line: CommandLine::parse("tuning data", line)?,
        })
    }
}

#[async_trait]
impl TuningDataGenerator for CommandTuningGenerator {
    async fn generate(&self, request: &TuningDataRequest) -> Result<()> {
        let mut command = self.line.command(&request.context);
        command
            .env("CORPUS_BUCKET", &request.corpus_bucket)
            .env("TUNING_BUCKET", &request.tuning_bucket)
            .env("TUNING_DATA_KEY", &request.key);
        self.line.run("tuning data generation", command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> CloudContext {
        CloudContext {
            region: "eu-west-1".to_string(),
            profile: Some("ops".to_string()),
        }
    }

    #[test]
    fn test_parse_command_line() {
        let line = CommandLine::parse("ingest", "python -m 'model.pdf_ingest' --recursive").unwrap();
        assert_eq!(line.program, "python");
        assert_eq!(line.args, vec!["-m", "model.pdf_ingest", "--recursive"]);
    }

    #[test]
    fn test_parse_rejects_empty_and_unbalanced() {
        assert_eq!(CommandIngestor::parse("   ").unwrap_err().kind(), "config");
        assert_eq!(
            CommandTuningGenerator::parse("python 'unterminated").unwrap_err().kind(),
            "config"
        );
    }

    #[test]
    fn test_environment_carries_context() {
        let line = CommandLine::parse("ingest", "true").unwrap();
        let command = line.command(&context());
        let envs: Vec<_> = command
            .as_std()
            .get_envs()
            .filter_map(|(k, v)| Some((k.to_str()?.to_string(), v?.to_str()?.to_string())))
            .collect();

        assert!(envs.contains(&("AWS_REGION".to_string(), "eu-west-1".to_string())));
        assert!(envs.contains(&("AWS_PROFILE".to_string(), "ops".to_string())));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_collaborator_error() {
        let ingestor = CommandIngestor::parse("false").unwrap();
        let request = IngestRequest {
            source_bucket: "s".to_string(),
            corpus_bucket: "c".to_string(),
            context: context(),
        };

        let err = ingestor.ingest(&request).await.unwrap_err();
        assert_eq!(err.kind(), "collaborator");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_command() {
        let generator = CommandTuningGenerator::parse("true").unwrap();
        let request = TuningDataRequest {
            corpus_bucket: "c".to_string(),
            tuning_bucket: "t".to_string(),
            key: "tuning/data.jsonl".to_string(),
            context: context(),
        };

        generator.generate(&request).await.unwrap();
    }
}
