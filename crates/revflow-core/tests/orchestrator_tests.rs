mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{pr, FakeProvider, FakeStore, StubAgent};
use revflow_core::agent::{Agent, AgentContext, AgentOutput, AgentRegistry, AgentResult};
use revflow_core::error::CoreError;
use revflow_core::events::EventBus;
use revflow_core::orchestrator::Orchestrator;
use revflow_core::types::{
    AnalysisArtifact, ChangeClassification, CheckConclusion, CommentCategory, CommentStatus,
    DocArtifact, ImpactRadius, PullRequestDiff, RepositorySettings, ReviewArtifact, ReviewComment,
    RiskLevel, Severity, SynthesisArtifact, TestArtifact, Workflow, WorkflowStatus,
};
use serde_json::Value;

fn workflow() -> Workflow {
    Workflow {
        id: 42,
        repository_id: "acme/widgets".into(),
        pr_number: 42,
        owner: "acme".into(),
        repo: "widgets".into(),
        head_sha: "sha42".into(),
        branch: "feature-42".into(),
        author: "octocat".into(),
        title: "add widget".into(),
        status: WorkflowStatus::Pending,
        check_run_id: None,
        last_error: None,
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
    }
}

fn analysis() -> AnalysisArtifact {
    AnalysisArtifact {
        workflow_id: 42,
        classification: ChangeClassification::Feature,
        risk: RiskLevel::Medium,
        files_changed: 1,
        additions: 10,
        deletions: 2,
        semantic_changes: vec![],
        impact_radius: ImpactRadius::default(),
        risk_factors: vec![],
        suggested_reviewers: vec![],
    }
}

fn review_comment(id: i64, severity: Severity) -> ReviewComment {
    ReviewComment {
        id,
        workflow_id: 42,
        file: "src/widget.ts".into(),
        line: 10,
        severity,
        category: CommentCategory::Bug,
        message: "issue".into(),
        suggestion: None,
        status: CommentStatus::Pending,
        confidence: 0.9,
    }
}

fn stub(name: &'static str, output: AgentOutput) -> Arc<StubAgent> {
    Arc::new(StubAgent {
        agent_name: name,
        result: AgentResult::ok(output, 0),
        delay: None,
    })
}

/// Registry with every agent succeeding; the reviewer returns one high and
/// one low comment.
fn happy_registry() -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    registry.register(stub("analyzer", AgentOutput::Analysis(analysis())));
    registry.register(stub(
        "reviewer",
        AgentOutput::Review(ReviewArtifact {
            workflow_id: 42,
            comments: vec![review_comment(1, Severity::High), review_comment(2, Severity::Low)],
        }),
    ));
    registry.register(stub(
        "test_generator",
        AgentOutput::Tests(TestArtifact {
            workflow_id: 42,
            files: vec![],
            summary: "added widget tests".into(),
        }),
    ));
    registry.register(stub(
        "doc_updater",
        AgentOutput::Docs(DocArtifact {
            workflow_id: 42,
            updates: vec![],
        }),
    ));
    registry.register(stub(
        "synthesizer",
        AgentOutput::Synthesis(SynthesisArtifact {
            workflow_id: 42,
            summary: "looks reasonable".into(),
            recommendation: "merge after addressing the high finding".into(),
        }),
    ));
    registry
}

fn provider_for_pr42() -> Arc<FakeProvider> {
    Arc::new(
        FakeProvider::new()
            .with_pull_request(42, pr(42, "sha42", true, false))
            .with_diff(42, PullRequestDiff::default()),
    )
}

fn orchestrator(
    store: Arc<FakeStore>,
    provider: Arc<FakeProvider>,
    registry: AgentRegistry,
    timeout: Duration,
) -> Orchestrator {
    Orchestrator::new(store, provider, Arc::new(registry), EventBus::new(), timeout, 4)
}

/// All agents succeed: the workflow walks the full stage
/// machine, every artifact is persisted, the summary and both review
/// comments are posted, and the check run concludes action-required
/// because the worst finding is high.
#[tokio::test]
async fn happy_path_completes_with_all_artifacts() {
    let store = Arc::new(FakeStore::new(workflow(), RepositorySettings::default()));
    let provider = provider_for_pr42();
    let orch = orchestrator(store.clone(), provider.clone(), happy_registry(), Duration::from_secs(5));

    orch.run_workflow(42).await.unwrap();

    assert_eq!(
        *store.status_history.lock().unwrap(),
        vec![
            WorkflowStatus::Pending,
            WorkflowStatus::Analyzing,
            WorkflowStatus::Reviewing,
            WorkflowStatus::Synthesizing,
            WorkflowStatus::Completed,
        ]
    );
    assert!(store.analysis.lock().unwrap().is_some());
    assert!(store.review.lock().unwrap().is_some());
    assert!(store.tests.lock().unwrap().is_some());
    assert!(store.docs.lock().unwrap().is_some());
    assert!(store.synthesis.lock().unwrap().is_some());

    assert_eq!(provider.summary_comments.lock().unwrap().len(), 1);
    assert_eq!(provider.review_comment_posts.lock().unwrap().len(), 2);
    let completed = provider.completed_check_runs.lock().unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].1, CheckConclusion::ActionRequired);
}

/// With the publication threshold raised to high, the low-severity comment
/// stays unposted but still counts toward the check conclusion.
#[tokio::test]
async fn severity_threshold_filters_posted_comments() {
    let settings = RepositorySettings {
        publish_severity_threshold: Severity::High,
        ..RepositorySettings::default()
    };
    let store = Arc::new(FakeStore::new(workflow(), settings));
    let provider = provider_for_pr42();
    let orch = orchestrator(store, provider.clone(), happy_registry(), Duration::from_secs(5));

    orch.run_workflow(42).await.unwrap();

    assert_eq!(provider.review_comment_posts.lock().unwrap().len(), 1);
    assert_eq!(
        provider.completed_check_runs.lock().unwrap()[0].1,
        CheckConclusion::ActionRequired
    );
}

/// The test generator stalls past the orchestrator timeout. The
/// workflow still completes; the test artifact is simply absent while the
/// reviewer's and doc updater's outputs survive.
#[tokio::test]
async fn stalled_agent_times_out_without_failing_the_workflow() {
    let mut registry = happy_registry();
    registry.register(Arc::new(StubAgent {
        agent_name: "test_generator",
        result: AgentResult::ok(
            AgentOutput::Tests(TestArtifact {
                workflow_id: 42,
                files: vec![],
                summary: "never delivered".into(),
            }),
            0,
        ),
        delay: Some(Duration::from_secs(60)),
    }));

    let store = Arc::new(FakeStore::new(workflow(), RepositorySettings::default()));
    let provider = provider_for_pr42();
    let orch = orchestrator(store.clone(), provider, registry, Duration::from_millis(200));

    orch.run_workflow(42).await.unwrap();

    assert_eq!(store.workflow.lock().unwrap().status, WorkflowStatus::Completed);
    assert!(store.tests.lock().unwrap().is_none(), "timed-out agent leaves no artifact");
    assert!(store.review.lock().unwrap().is_some());
    assert!(store.docs.lock().unwrap().is_some());
    assert!(store.synthesis.lock().unwrap().is_some());
}

struct PanickingAgent;

#[async_trait]
impl Agent for PanickingAgent {
    fn name(&self) -> &'static str {
        "reviewer"
    }

    async fn run(&self, _ctx: &AgentContext, _extra: &Value) -> AgentResult {
        panic!("reviewer exploded");
    }
}

/// A panic inside one parallel agent is contained to its task; the other
/// agents' artifacts persist and the workflow completes.
#[tokio::test]
async fn panicking_agent_does_not_take_down_the_workflow() {
    let mut registry = happy_registry();
    registry.register(Arc::new(PanickingAgent));

    let store = Arc::new(FakeStore::new(workflow(), RepositorySettings::default()));
    let provider = provider_for_pr42();
    let orch = orchestrator(store.clone(), provider, registry, Duration::from_secs(5));

    orch.run_workflow(42).await.unwrap();

    assert_eq!(store.workflow.lock().unwrap().status, WorkflowStatus::Completed);
    assert!(store.review.lock().unwrap().is_none());
    assert!(store.tests.lock().unwrap().is_some());
    assert!(store.docs.lock().unwrap().is_some());
}

/// An analyzer failure is fatal: the workflow is marked failed and the
/// check run finalizes as cancelled.
#[tokio::test]
async fn analysis_failure_fails_the_workflow() {
    let mut registry = happy_registry();
    registry.register(Arc::new(StubAgent {
        agent_name: "analyzer",
        result: AgentResult::failed("model returned garbage", 0),
        delay: None,
    }));

    let store = Arc::new(FakeStore::new(workflow(), RepositorySettings::default()));
    let provider = provider_for_pr42();
    let orch = orchestrator(store.clone(), provider.clone(), registry, Duration::from_secs(5));

    let err = orch.run_workflow(42).await.unwrap_err();
    assert!(matches!(err, CoreError::Agent(_)));
    assert_eq!(store.workflow.lock().unwrap().status, WorkflowStatus::Failed);
    assert_eq!(
        store.workflow.lock().unwrap().last_error.as_deref(),
        Some("model returned garbage")
    );
    assert_eq!(
        provider.completed_check_runs.lock().unwrap()[0].1,
        CheckConclusion::Cancelled
    );
}

/// Disabled stages are skipped entirely; the synthesizer still runs with
/// those inputs absent.
#[tokio::test]
async fn disabled_stages_are_skipped() {
    let settings = RepositorySettings {
        review_enabled: false,
        test_generation_enabled: false,
        doc_updates_enabled: true,
        ..RepositorySettings::default()
    };
    let store = Arc::new(FakeStore::new(workflow(), settings));
    let provider = provider_for_pr42();
    let orch = orchestrator(store.clone(), provider.clone(), happy_registry(), Duration::from_secs(5));

    orch.run_workflow(42).await.unwrap();

    assert_eq!(store.workflow.lock().unwrap().status, WorkflowStatus::Completed);
    assert!(store.review.lock().unwrap().is_none());
    assert!(store.tests.lock().unwrap().is_none());
    assert!(store.docs.lock().unwrap().is_some());
    assert!(store.synthesis.lock().unwrap().is_some());
    assert!(provider.review_comment_posts.lock().unwrap().is_empty());
    // No review comments at all ⇒ a clean success conclusion.
    assert_eq!(
        provider.completed_check_runs.lock().unwrap()[0].1,
        CheckConclusion::Success
    );
}

/// Re-entry on a workflow mid-run is a state conflict; re-entry after the
/// run has settled is permitted and overwrites artifacts by upsert.
#[tokio::test]
async fn reentry_rejected_while_running_but_allowed_after_settling() {
    let mut registry = happy_registry();
    registry.register(Arc::new(StubAgent {
        agent_name: "analyzer",
        result: AgentResult::ok(AgentOutput::Analysis(analysis()), 0),
        delay: Some(Duration::from_millis(300)),
    }));

    let store = Arc::new(FakeStore::new(workflow(), RepositorySettings::default()));
    let provider = provider_for_pr42();
    let orch = Arc::new(orchestrator(store.clone(), provider, registry, Duration::from_secs(5)));

    let first = {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move { orch.run_workflow(42).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = orch.run_workflow(42).await.unwrap_err();
    assert!(matches!(err, CoreError::StateConflict(_)));

    first.await.unwrap().unwrap();
    assert_eq!(store.workflow.lock().unwrap().status, WorkflowStatus::Completed);

    // Settled now: a second full run is fine and leaves one artifact set.
    orch.run_workflow(42).await.unwrap();
    assert_eq!(store.workflow.lock().unwrap().status, WorkflowStatus::Completed);
    assert!(store.synthesis.lock().unwrap().is_some());
}
