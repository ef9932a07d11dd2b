//! Implementation of the `ragstack deploy` command.

use ragstack::core::StageTarget;
use ragstack::pipeline::{PipelineRun, StagePipeline};
use std::fmt::Write;

use super::build_context;

/// Arguments for the deploy command.
pub struct DeployArgs {
    /// Stages to run.
    pub target: StageTarget,

    /// Print the run as JSON.
    pub json: bool,

    /// Approve every confirmation gate.
    pub yes: bool,
}

pub async fn run(args: DeployArgs) -> anyhow::Result<()> {
    let ctx = build_context(args.yes).await?;
    let run = StagePipeline::for_target(args.target).run(&ctx).await?;
    println!("{}", render(&run, args.json)?);
    Ok(())
}

fn render(run: &PipelineRun, json: bool) -> anyhow::Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(run)?);
    }
    let mut out = String::new();
    for result in &run.results {
        write!(out, "[{}] {}", result.name, result.output.status)?;
        if let Some(reason) = &result.output.skip_reason {
            write!(out, ": {reason}")?;
        }
        out.push('\n');
    }
    if let Some(report) = run.status_report() {
        out.push('\n');
        out.push_str(&report.render_table());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ragstack::core::StageName;
    use pretty_assertions::assert_eq;
    use ragstack::stages::{StageOutput, StageResult};

    fn sample_run() -> PipelineRun {
        PipelineRun {
            target: "endpoint".to_string(),
            results: vec![StageResult::record(
                StageName::Endpoint,
                Utc::now(),
                StageOutput::skipped("declined"),
            )],
            duration_ms: 1.0,
        }
    }

    #[test]
    fn test_render_lists_stage_outcomes() {
        let text = render(&sample_run(), false).unwrap();
        assert_eq!(text, "[endpoint] skipped: declined\n");
    }

    #[test]
    fn test_render_json_is_parseable() {
        let text = render(&sample_run(), true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["target"], "endpoint");
        assert_eq!(value["results"][0]["status"], "skipped");
    }
}
