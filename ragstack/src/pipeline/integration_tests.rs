//! End-to-end scenarios over the in-memory cloud.

#[cfg(test)]
mod tests {
    use crate::confirm::MockConfirmer;
    use crate::control::StackResourceSummary;
    use crate::core::{DataSourcePair, StageName, StageTarget, TeardownTarget};
    use crate::pipeline::StagePipeline;
    use crate::stages::{Component, EmbeddingStage, Stage, StatusReport};
    use crate::teardown::{StepOutcome, TeardownReport, TeardownSequencer};
    use crate::testing::{Scripted, TestBed};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn resource(logical_id: &str, physical_id: &str, resource_type: &str) -> StackResourceSummary {
        StackResourceSummary {
            logical_id: logical_id.to_string(),
            physical_id: physical_id.to_string(),
            resource_type: resource_type.to_string(),
            status: "CREATE_COMPLETE".to_string(),
        }
    }

    /// A stack owning knowledge bases A and B, with data sources `A|1`,
    /// `C|2` and `B|3`.
    fn seed_lettered_stack(bed: &TestBed) {
        let cloud = bed.cloud();
        let stack = bed.stack_name();
        cloud.put_stack(stack, "CREATE_COMPLETE");
        cloud.put_stack_resources(
            stack,
            vec![
                resource("KbA", "A", "AWS::Bedrock::KnowledgeBase"),
                resource("KbB", "B", "AWS::Bedrock::KnowledgeBase"),
                resource("Ds1", "A|1", "AWS::Bedrock::DataSource"),
                resource("Ds2", "C|2", "AWS::Bedrock::DataSource"),
                resource("Ds3", "B|3", "AWS::Bedrock::DataSource"),
            ],
        );
        for kb in ["A", "B"] {
            cloud.put_knowledge_base(kb, &format!("{stack}-{kb}"));
        }
        cloud.put_data_source(&DataSourcePair::new("A", "1"), "one");
        cloud.put_data_source(&DataSourcePair::new("B", "3"), "three");
    }

    #[tokio::test]
    async fn test_full_deploy_then_status_all_present() {
        let bed = TestBed::new().unwrap();
        let ctx = bed.context();

        let run = StagePipeline::for_target(StageTarget::All)
            .run(&ctx)
            .await
            .unwrap();

        let names: Vec<_> = run.results.iter().map(|r| r.name).collect();
        assert_eq!(names, StageTarget::All.stages());
        let report = run.status_report().unwrap();
        assert!(report.all_present(), "{}", report.render_table());

        let app = run.result(StageName::App).unwrap();
        let endpoint = run.result(StageName::Endpoint).unwrap();
        assert_eq!(
            app.output.data["model_arn"],
            endpoint.output.data["provisioned_throughput_arn"]
        );
    }

    #[tokio::test]
    async fn test_full_deploy_rerun_creates_nothing_new() {
        let bed = TestBed::new().unwrap();
        let ctx = bed.context();
        let pipeline = StagePipeline::for_target(StageTarget::All);

        pipeline.run(&ctx).await.unwrap();
        let mut confirmer = MockConfirmer::new();
        confirmer.expect_confirm().never();
        pipeline
            .run(&bed.context_with(Arc::new(confirmer)))
            .await
            .unwrap();

        let cloud = bed.cloud();
        for operation in [
            "create_stack",
            "create_customization_job",
            "create_provisioned_throughput",
            "create_repository",
            "create_service",
        ] {
            assert_eq!(cloud.calls_to(operation), 1, "{operation}");
        }
        assert_eq!(cloud.calls_to("create_bucket"), 4);
        assert_eq!(cloud.calls_to("update_service"), 1);
    }

    #[tokio::test]
    async fn test_full_teardown_after_deploy_leaves_nothing() {
        let bed = TestBed::new().unwrap();
        let ctx = bed.context();
        StagePipeline::for_target(StageTarget::All)
            .run(&ctx)
            .await
            .unwrap();

        let report = TeardownSequencer::new(TeardownTarget::All)
            .run(&ctx)
            .await
            .unwrap();

        assert!(report.is_clean(), "{}", report.render());
        assert_eq!(report.verification.components.len(), Component::ALL.len());
        assert_eq!(
            report.outcome_of("data source KBGONE/DSOLD"),
            Some(&StepOutcome::Skipped("owning knowledge base not found".to_string()))
        );

        let after = StatusReport::collect(&ctx).await;
        assert!(after.present().is_empty(), "{}", after.render_table());
    }

    #[tokio::test]
    async fn test_teardown_order_respects_dependencies() {
        let bed = TestBed::new().unwrap();
        let ctx = bed.context();
        StagePipeline::for_target(StageTarget::All)
            .run(&ctx)
            .await
            .unwrap();

        TeardownSequencer::new(TeardownTarget::All)
            .run(&ctx)
            .await
            .unwrap();

        let cloud = bed.cloud();
        let config = &ctx.config;
        let at = |operation: &str, target: &str| {
            cloud
                .index_of(operation, target)
                .unwrap_or_else(|| panic!("{operation} {target} never called"))
        };
        let kb = format!("kb-{}", config.stack_name);
        let service = cloud
            .journal()
            .into_iter()
            .find(|c| c.operation == "delete_service")
            .unwrap()
            .target;

        assert!(at("delete_service", &service) < at("delete_stack", &config.stack_name));
        assert!(at("delete_stack", &config.stack_name) < at("delete_knowledge_base", &kb));
        assert!(
            at("delete_data_source", &format!("{kb}/ds-{}", config.stack_name))
                < at("delete_knowledge_base", &kb)
        );
        assert!(at("delete_knowledge_base", &kb) < at("delete_bucket", &config.buckets.deployment));
        assert!(
            at("delete_provisioned_throughput", &run_pt_arn(&bed))
                < at("delete_custom_model", &custom_model_arn(&bed))
        );
        for (_, bucket) in config.buckets.all() {
            assert!(at("empty_bucket", bucket) < at("delete_bucket", bucket), "{bucket}");
        }
    }

    fn run_pt_arn(bed: &TestBed) -> String {
        bed.cloud()
            .journal()
            .into_iter()
            .find(|c| c.operation == "delete_provisioned_throughput")
            .unwrap()
            .target
    }

    fn custom_model_arn(bed: &TestBed) -> String {
        bed.cloud()
            .journal()
            .into_iter()
            .find(|c| c.operation == "delete_custom_model")
            .unwrap()
            .target
    }

    #[tokio::test]
    async fn test_pairs_matched_against_discovered_knowledge_bases() {
        let bed = TestBed::new().unwrap();
        seed_lettered_stack(&bed);
        let ctx = bed.context();

        let output = EmbeddingStage.execute(&ctx).await.unwrap();

        assert_eq!(output.data["started"], json!(2));
        assert_eq!(output.data["skipped"], json!(["C/2"]));
        assert!(bed.cloud().index_of("start_ingestion_job", "A/1").is_some());
        assert!(bed.cloud().index_of("start_ingestion_job", "B/3").is_some());
        assert!(bed.cloud().index_of("start_ingestion_job", "C/2").is_none());

        let report = TeardownSequencer::new(TeardownTarget::Embedding)
            .run(&ctx)
            .await
            .unwrap();
        assert!(matches!(
            report.outcome_of("data source C/2"),
            Some(StepOutcome::Skipped(_))
        ));
        assert_eq!(report.outcome_of("data source A/1"), Some(&StepOutcome::Deleted));
        assert_eq!(report.outcome_of("knowledge base B"), Some(&StepOutcome::Deleted));
        assert_eq!(bed.cloud().calls_to("delete_data_source"), 2);
    }

    #[tokio::test]
    async fn test_teardown_leaves_neighbouring_stack_knowledge_base() {
        let bed = TestBed::new().unwrap();
        let ctx = bed.context();
        StagePipeline::for_target(StageTarget::Embedding)
            .run(&ctx)
            .await
            .unwrap();
        bed.cloud().put_knowledge_base("OTHERKB", "ofac-rag-staging-kb");
        bed.cloud()
            .put_data_source(&DataSourcePair::new("OTHERKB", "OTHERDS"), "staging-corpus");

        let report = TeardownSequencer::new(TeardownTarget::Embedding)
            .run(&ctx)
            .await
            .unwrap();

        assert_eq!(report.outcome_of("knowledge base OTHERKB"), None);
        assert_eq!(report.outcome_of("data source OTHERKB/OTHERDS"), None);
        assert!(bed.cloud().index_of("delete_knowledge_base", "OTHERKB").is_none());
        assert!(bed.cloud().index_of("delete_data_source", "OTHERKB/OTHERDS").is_none());
        assert_eq!(
            report.outcome_of(&format!("knowledge base kb-{}", ctx.config.stack_name)),
            Some(&StepOutcome::Deleted)
        );
    }

    #[tokio::test]
    async fn test_stage_failure_names_stage_and_coordinates() {
        let bed = TestBed::new().unwrap();
        bed.cloud().fail_on("create_customization_job");

        let failure = StagePipeline::for_target(StageTarget::Model)
            .run(&bed.context())
            .await
            .unwrap_err();

        assert_eq!(failure.stage, "model");
        assert_eq!(failure.source.kind(), "creation");
        assert_eq!(failure.region, "us-east-1");
        let message = failure.to_string();
        assert!(message.contains("stage 'model' failed"), "{message}");
        assert!(message.contains("stack=ofac-rag"), "{message}");
    }

    #[tokio::test]
    async fn test_empty_failure_falls_back_to_object_deletes() {
        let bed = TestBed::new().unwrap();
        let ctx = bed.context();
        StagePipeline::for_target(StageTarget::Data)
            .run(&ctx)
            .await
            .unwrap();
        bed.cloud().fail_on("empty_bucket");

        let report = TeardownSequencer::new(TeardownTarget::Data)
            .run(&ctx)
            .await
            .unwrap();

        assert!(report.is_clean(), "{}", report.render());
        assert!(bed.cloud().calls_to("delete_object") >= 2);
        assert!(!bed.cloud().has_bucket(&ctx.config.buckets.source));
    }

    #[tokio::test]
    async fn test_verification_lookup_error_is_reported_unverified() {
        let bed = TestBed::new().unwrap();
        let ctx = bed.context();
        StagePipeline::for_target(StageTarget::Data)
            .run(&ctx)
            .await
            .unwrap();
        bed.cloud().fail_on("bucket_exists");

        let mut report = TeardownReport::new(TeardownTarget::Data);
        report.verification = StatusReport::collect_only(&ctx, &[Component::SourceBucket]).await;

        assert!(bed.cloud().has_bucket(&ctx.config.buckets.source));
        assert!(report.residue().is_empty());
        assert_eq!(report.unverified().len(), 1);
        assert!(!report.is_clean(), "{}", report.render());
    }

    #[tokio::test]
    async fn test_failed_stack_deletion_aborts_teardown() {
        let bed = TestBed::new().unwrap();
        let ctx = bed.context();
        StagePipeline::for_target(StageTarget::Embedding)
            .run(&ctx)
            .await
            .unwrap();
        bed.cloud()
            .script(Scripted::StackDeletion, &["DELETE_IN_PROGRESS", "DELETE_FAILED"]);

        let failure = TeardownSequencer::new(TeardownTarget::Embedding)
            .run(&ctx)
            .await
            .unwrap_err();

        assert_eq!(failure.stage, "teardown");
        assert_eq!(failure.source.kind(), "terminal_state");
        assert_eq!(bed.cloud().calls_to("delete_knowledge_base"), 0);
        assert!(bed.cloud().has_bucket(&ctx.config.buckets.deployment));
    }
}
