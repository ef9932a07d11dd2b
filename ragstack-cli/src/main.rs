//! Ragstack CLI - provision and tear down the retrieval stack.

mod commands;

use clap::{Parser, Subcommand};
use ragstack::core::{StageTarget, TeardownTarget};
use ragstack::errors::{DeployError, StageFailure};
use ragstack::observability::{init_logging, LogFormat};

#[derive(Parser)]
#[command(name = "ragstack")]
#[command(about = "Provision and tear down the retrieval-augmented generation stack")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the deployment stages for a target
    Deploy {
        /// all, data, embedding, model, endpoint, app or status
        #[arg(default_value = "all")]
        target: StageTarget,

        /// Print the run as JSON instead of the status table
        #[arg(long)]
        json: bool,

        /// Approve every confirmation gate
        #[arg(short, long)]
        yes: bool,
    },

    /// Delete the resources of a target and verify they are gone
    Teardown {
        /// all, data, embedding, model, endpoint or app
        #[arg(default_value = "all")]
        target: TeardownTarget,

        /// Approve every confirmation gate
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    init_logging(LogFormat::from_env());

    let cli = Cli::parse();

    let result: anyhow::Result<()> = match cli.command {
        Commands::Deploy { target, json, yes } => {
            commands::deploy::run(commands::deploy::DeployArgs { target, json, yes }).await
        }
        Commands::Teardown { target, yes } => commands::teardown::run(target, yes).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(exit_code(&e));
    }
}

/// Missing prerequisites exit with 2, every other failure with 1.
fn exit_code(error: &anyhow::Error) -> i32 {
    let source = error
        .downcast_ref::<DeployError>()
        .or_else(|| error.downcast_ref::<StageFailure>().map(|f| &f.source));
    match source {
        Some(DeployError::MissingPrerequisite { .. }) => 2,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_deploy_defaults_to_all() {
        let cli = Cli::try_parse_from(["ragstack", "deploy"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Deploy {
                target: StageTarget::All,
                json: false,
                yes: false
            }
        ));
    }

    #[test]
    fn test_teardown_parses_target_and_yes() {
        let cli = Cli::try_parse_from(["ragstack", "teardown", "endpoint", "--yes"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Teardown {
                target: TeardownTarget::Endpoint,
                yes: true
            }
        ));
    }

    #[test]
    fn test_unknown_target_rejected() {
        assert!(Cli::try_parse_from(["ragstack", "teardown", "status"]).is_err());
        assert!(Cli::try_parse_from(["ragstack", "deploy", "everything"]).is_err());
    }

    #[test]
    fn test_missing_prerequisite_exits_two() {
        let missing = anyhow::Error::new(DeployError::missing("aws CLI", "install it"));
        assert_eq!(exit_code(&missing), 2);
        assert_eq!(exit_code(&anyhow::anyhow!("stage failed")), 1);
    }

    #[test]
    fn test_annotated_missing_prerequisite_exits_two() {
        let failure = StageFailure {
            stage: "preflight".to_string(),
            region: "us-east-1".to_string(),
            profile: "default".to_string(),
            stack: "ofac-rag".to_string(),
            source: DeployError::missing("zip", "install zip"),
        };
        assert_eq!(exit_code(&anyhow::Error::new(failure)), 2);

        let failure = StageFailure {
            stage: "model".to_string(),
            region: "us-east-1".to_string(),
            profile: "default".to_string(),
            stack: "ofac-rag".to_string(),
            source: DeployError::Config("bad".to_string()),
        };
        assert_eq!(exit_code(&anyhow::Error::new(failure)), 1);
    }
}
