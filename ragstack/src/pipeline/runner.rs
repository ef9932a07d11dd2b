//! Sequential stage execution.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::Instrument;

use super::DeployContext;
use crate::core::{StageName, StageTarget};
use crate::errors::StageFailure;
use crate::observability::{SpanTimer, StageSpanAttributes};
use crate::stages::{stage_for, Stage, StageResult, StatusReport};

/// An ordered list of stages.
///
/// Stages run strictly one after another; the first fatal error stops the
/// run and is returned annotated with the stage tag.
pub struct StagePipeline {
    label: String,
    stages: Vec<Box<dyn Stage>>,
}

impl StagePipeline {
    /// The built-in stages of a target.
    #[must_use]
    pub fn for_target(target: StageTarget) -> Self {
        Self {
            label: target.to_string(),
            stages: target.stages().into_iter().map(stage_for).collect(),
        }
    }

    /// An explicit stage list.
    #[must_use]
    pub fn with_stages(label: impl Into<String>, stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            label: label.into(),
            stages,
        }
    }

    /// Returns the label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Stage tags in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<StageName> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Runs every stage in order.
    pub async fn run(&self, ctx: &DeployContext) -> Result<PipelineRun, StageFailure> {
        let timer = SpanTimer::start(&self.label);
        let mut results = Vec::with_capacity(self.stages.len());

        tracing::info!(
            target_name = %self.label,
            stages = self.stages.len(),
            region = %ctx.config.region,
            profile = %ctx.config.profile_label(),
            stack = %ctx.config.stack_name,
            "pipeline starting"
        );

        if self.stage_names().contains(&StageName::App) {
            if let Err(error) = ctx.collaborators.check_image_prerequisites().await {
                tracing::error!(kind = error.kind(), error = %error, "prerequisite check failed");
                return Err(ctx.annotate("preflight", error));
            }
        }

        for stage in &self.stages {
            let name = stage.name();
            let span = tracing::info_span!("stage", stage = %name);
            let stage_timer = SpanTimer::start(name.as_str());
            let started_at = Utc::now();

            tracing::info!(parent: &span, "stage starting");
            match stage.execute(ctx).instrument(span.clone()).await {
                Ok(output) => {
                    let attributes = StageSpanAttributes::new(name.as_str())
                        .with_status(output.status.to_string())
                        .with_duration_ms(stage_timer.finish());
                    match &output.skip_reason {
                        Some(reason) => tracing::warn!(
                            parent: &span,
                            reason = %reason,
                            attributes = ?attributes.to_attributes(),
                            "stage skipped"
                        ),
                        None => tracing::info!(
                            parent: &span,
                            attributes = ?attributes.to_attributes(),
                            "stage completed"
                        ),
                    }
                    results.push(StageResult::record(name, started_at, output));
                }
                Err(error) => {
                    let attributes = StageSpanAttributes::new(name.as_str())
                        .with_target(
                            &ctx.config.region,
                            ctx.config.profile_label(),
                            &ctx.config.stack_name,
                        )
                        .with_status("failed")
                        .with_duration_ms(stage_timer.finish())
                        .with_error(error.to_string());
                    tracing::error!(
                        parent: &span,
                        kind = error.kind(),
                        attributes = ?attributes.to_attributes(),
                        "stage failed"
                    );
                    return Err(ctx.annotate(name.as_str(), error));
                }
            }
        }

        let duration_ms = timer.finish();
        tracing::info!(target_name = %self.label, duration_ms, "pipeline finished");
        Ok(PipelineRun {
            target: self.label.clone(),
            results,
            duration_ms,
        })
    }
}

impl fmt::Debug for StagePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagePipeline")
            .field("label", &self.label)
            .field("stages", &self.stage_names())
            .finish()
    }
}

/// Results of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Target label.
    pub target: String,
    /// One result per stage, in execution order.
    pub results: Vec<StageResult>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: f64,
}

impl PipelineRun {
    /// Result of one stage, if it ran.
    #[must_use]
    pub fn result(&self, name: StageName) -> Option<&StageResult> {
        self.results.iter().find(|r| r.name == name)
    }

    /// The status report, if the status stage ran.
    #[must_use]
    pub fn status_report(&self) -> Option<StatusReport> {
        let report = self.result(StageName::Status)?.output.data.get("report")?;
        serde_json::from_value(report.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{DeployError, Result};
    use crate::stages::StageOutput;
    use crate::testing::TestBed;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct CountingStage {
        name: StageName,
        counter: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Stage for CountingStage {
        fn name(&self) -> StageName {
            self.name
        }

        async fn execute(&self, _ctx: &DeployContext) -> Result<StageOutput> {
            self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(StageOutput::completed())
        }
    }

    #[derive(Debug)]
    struct FailingStage;

    #[async_trait]
    impl Stage for FailingStage {
        fn name(&self) -> StageName {
            StageName::Model
        }

        async fn execute(&self, _ctx: &DeployContext) -> Result<StageOutput> {
            Err(DeployError::terminal("job ofac-nova-custom-job-20240315", "Failed"))
        }
    }

    fn counting(name: StageName, counter: &Arc<AtomicUsize>) -> Box<dyn Stage> {
        Box::new(CountingStage {
            name,
            counter: counter.clone(),
        })
    }

    #[test]
    fn test_for_target_uses_target_stages() {
        let pipeline = StagePipeline::for_target(StageTarget::Embedding);
        assert_eq!(pipeline.label(), "embedding");
        assert_eq!(pipeline.stage_names(), StageTarget::Embedding.stages());
    }

    #[tokio::test]
    async fn test_runs_in_order() {
        let bed = TestBed::new().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let pipeline = StagePipeline::with_stages(
            "custom",
            vec![
                counting(StageName::Data, &counter),
                counting(StageName::Embedding, &counter),
            ],
        );

        let run = pipeline.run(&bed.context()).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        let names: Vec<_> = run.results.iter().map(|r| r.name).collect();
        assert_eq!(names, vec![StageName::Data, StageName::Embedding]);
        assert!(run.results.iter().all(StageResult::is_completed));
    }

    #[tokio::test]
    async fn test_first_failure_stops_and_annotates() {
        let bed = TestBed::new().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let pipeline = StagePipeline::with_stages(
            "custom",
            vec![
                counting(StageName::Data, &counter),
                Box::new(FailingStage),
                counting(StageName::Endpoint, &counter),
            ],
        );

        let failure = pipeline.run(&bed.context()).await.unwrap_err();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(failure.stage, "model");
        assert_eq!(failure.source.kind(), "terminal_state");
        assert!(failure.to_string().contains("model"));
    }

    #[tokio::test]
    async fn test_missing_archive_tool_fails_before_any_stage() {
        let bed = TestBed::new().unwrap().without_image_daemon().without_zip();

        let failure = StagePipeline::for_target(StageTarget::All)
            .run(&bed.context())
            .await
            .unwrap_err();

        assert_eq!(failure.stage, "preflight");
        assert_eq!(failure.source.kind(), "missing_prerequisite");
        assert!(bed.cloud().journal().is_empty());
    }

    #[tokio::test]
    async fn test_archive_tool_not_needed_with_local_daemon_or_without_app() {
        let bed = TestBed::new().unwrap().without_zip();
        bed.seed_knowledge_base();
        StagePipeline::for_target(StageTarget::App)
            .run(&bed.context())
            .await
            .unwrap();

        let bed = TestBed::new().unwrap().without_image_daemon().without_zip();
        StagePipeline::for_target(StageTarget::Data)
            .run(&bed.context())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_status_report_from_run() {
        let bed = TestBed::new().unwrap();

        let run = StagePipeline::for_target(StageTarget::Status)
            .run(&bed.context())
            .await
            .unwrap();

        let report = run.status_report().unwrap();
        assert!(!report.all_present());
        assert!(run.result(StageName::Data).is_none());
    }
}
