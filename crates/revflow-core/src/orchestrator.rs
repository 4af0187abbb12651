use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::agent::{run_timed, Agent, AgentContext, AgentOutput, AgentRegistry, AgentResult};
use crate::concurrency::{InFlightTracker, WorkLimiter};
use crate::error::{CoreError, CoreResult};
use crate::events::EventBus;
use crate::persistence::WorkflowStore;
use crate::provider::ProviderFacade;
use crate::types::{
    CheckConclusion, DocArtifact, ObservabilityEvent, ReviewArtifact, Severity, SynthesisArtifact,
    TestArtifact, WorkflowArtifacts, WorkflowStatus,
};

const CHECK_RUN_NAME: &str = "revflow";

pub struct Orchestrator {
    store: Arc<dyn WorkflowStore>,
    provider: Arc<dyn ProviderFacade>,
    agents: Arc<AgentRegistry>,
    events: Arc<EventBus>,
    agent_timeout: Duration,
    in_flight: InFlightTracker<i64>,
    limiter: WorkLimiter,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        provider: Arc<dyn ProviderFacade>,
        agents: Arc<AgentRegistry>,
        events: Arc<EventBus>,
        agent_timeout: Duration,
        max_concurrent_workflows: usize,
    ) -> Self {
        Self {
            store,
            provider,
            agents,
            events,
            agent_timeout,
            in_flight: InFlightTracker::new(usize::MAX),
            limiter: WorkLimiter::new(max_concurrent_workflows),
        }
    }

    /// Drives one workflow through the full stage machine. Rejects
    /// re-entry on a workflow that is already being processed; re-entry on
    /// a workflow that has already settled (completed or failed) is
    /// permitted, used by auto-remediation to re-trigger analysis. Waits
    /// for a worker slot when the concurrent-workflow cap is reached.
    pub async fn run_workflow(&self, workflow_id: i64) -> CoreResult<()> {
        if !self.in_flight.try_acquire(workflow_id).await {
            return Err(CoreError::state_conflict(format!(
                "workflow {workflow_id} is already being processed"
            )));
        }
        let result = match self.limiter.acquire().await {
            Ok(_permit) => self.run_workflow_inner(workflow_id).await,
            Err(e) => Err(e),
        };
        self.in_flight.release(&workflow_id).await;
        result
    }

    async fn run_workflow_inner(&self, workflow_id: i64) -> CoreResult<()> {
        let (workflow, settings) = self.store.get_workflow_with_settings(workflow_id).await?;

        info!(workflow_id, pr = workflow.pr_number, "starting workflow");

        let check_run_id = match self
            .provider
            .create_check_run(
                &workflow.owner,
                &workflow.repo,
                &workflow.head_sha,
                CHECK_RUN_NAME,
                "Analyzing pull request...",
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(workflow_id, error = %e, "failed to create check run, continuing without one");
                String::new()
            }
        };
        self.store
            .mark_workflow_started(workflow_id, &check_run_id)
            .await?;
        self.notify(ObservabilityEvent::WorkflowStatusChanged {
            workflow_id,
            status: WorkflowStatus::Analyzing,
        })
        .await;

        let pr = self
            .provider
            .get_pull_request(&workflow.owner, &workflow.repo, workflow.pr_number)
            .await?;
        let diff = self
            .provider
            .get_pull_request_diff(&workflow.owner, &workflow.repo, workflow.pr_number)
            .await?;

        let mut ctx = AgentContext {
            workflow_id,
            pr: pr.clone(),
            diff: diff.clone(),
            analysis: None,
            review: None,
            tests: None,
            docs: None,
        };

        // --- Analysis (fatal on failure) ---
        let analysis = match self.agents.get("analyzer") {
            Some(agent) => self.run_with_timeout(Some(agent), &ctx, &Value::Null).await,
            None => AgentResult::failed("no analyzer agent registered", 0),
        };
        let analysis = match analysis.data {
            Some(AgentOutput::Analysis(a)) if analysis.success => a,
            _ => {
                let reason = analysis.error.unwrap_or_else(|| "analysis failed".into());
                self.fail_workflow(&workflow, &check_run_id, &reason).await;
                return Err(CoreError::agent(reason));
            }
        };
        self.store.save_analysis(&analysis).await?;
        ctx.analysis = Some(analysis.clone());

        self.store
            .update_workflow_status(workflow_id, WorkflowStatus::Reviewing)
            .await?;
        self.notify(ObservabilityEvent::WorkflowStatusChanged {
            workflow_id,
            status: WorkflowStatus::Reviewing,
        })
        .await;

        // --- Parallel agent fan-out (non-fatal) ---
        let reviewer = settings.review_enabled.then(|| self.agents.get("reviewer")).flatten();
        let test_gen = settings
            .test_generation_enabled
            .then(|| self.agents.get("test_generator"))
            .flatten();
        let doc_updater = settings.doc_updates_enabled.then(|| self.agents.get("doc_updater")).flatten();

        let (review_result, tests_result, docs_result) = tokio::join!(
            self.run_with_timeout(reviewer, &ctx, &Value::Null),
            self.run_with_timeout(test_gen, &ctx, &Value::Null),
            self.run_with_timeout(doc_updater, &ctx, &Value::Null),
        );

        let review = self.extract_review(review_result, workflow_id).await;
        let tests = self.extract_tests(tests_result).await;
        let docs = self.extract_docs(docs_result).await;

        ctx.review = review.clone();
        ctx.tests = tests.clone();
        ctx.docs = docs.clone();

        // --- Synthesis (non-fatal) ---
        self.store
            .update_workflow_status(workflow_id, WorkflowStatus::Synthesizing)
            .await?;
        self.notify(ObservabilityEvent::WorkflowStatusChanged {
            workflow_id,
            status: WorkflowStatus::Synthesizing,
        })
        .await;

        let synthesis = self.run_synthesis(&ctx).await;

        let artifacts = WorkflowArtifacts {
            analysis: Some(analysis),
            review,
            tests,
            docs,
            synthesis,
        };

        // --- Publish (best-effort) ---
        self.publish(&workflow, &check_run_id, &artifacts, settings.publish_severity_threshold)
            .await;

        self.store.mark_workflow_complete(workflow_id).await?;
        self.notify(ObservabilityEvent::WorkflowStatusChanged {
            workflow_id,
            status: WorkflowStatus::Completed,
        })
        .await;
        info!(workflow_id, "workflow completed");
        Ok(())
    }

    /// Runs one agent as its own task with the orchestrator-level timeout.
    /// Spawning isolates the invocation: a panic inside the agent surfaces
    /// as a failed result here instead of unwinding the whole workflow, and
    /// a timed-out task is aborted rather than left running.
    async fn run_with_timeout(
        &self,
        agent: Option<Arc<dyn Agent>>,
        ctx: &AgentContext,
        extra: &Value,
    ) -> AgentResult {
        let Some(agent) = agent else {
            return AgentResult::failed("disabled", 0);
        };
        let name = agent.name();
        let task_ctx = ctx.clone();
        let task_extra = extra.clone();
        let handle = tokio::spawn(async move { run_timed(agent.as_ref(), &task_ctx, &task_extra).await });
        let abort = handle.abort_handle();
        match tokio::time::timeout(self.agent_timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                warn!(agent = name, error = %join_err, "agent task aborted");
                AgentResult::failed(format!("agent panicked: {join_err}"), 0)
            }
            Err(_) => {
                abort.abort();
                warn!(agent = name, "agent invocation timed out");
                AgentResult::failed("timeout", self.agent_timeout.as_millis() as u64)
            }
        }
    }

    async fn extract_review(&self, result: AgentResult, workflow_id: i64) -> Option<ReviewArtifact> {
        match result.data {
            Some(AgentOutput::Review(mut r)) if result.success => {
                r.workflow_id = workflow_id;
                if let Err(e) = self.store.save_review(&r).await {
                    warn!(error = %e, "failed to persist review artifact");
                }
                Some(r)
            }
            _ => {
                if let Some(err) = result.error {
                    warn!(error = %err, "reviewer agent produced no artifact");
                }
                None
            }
        }
    }

    async fn extract_tests(&self, result: AgentResult) -> Option<TestArtifact> {
        match result.data {
            Some(AgentOutput::Tests(t)) if result.success => {
                if let Err(e) = self.store.save_tests(&t).await {
                    warn!(error = %e, "failed to persist test artifact");
                }
                Some(t)
            }
            _ => None,
        }
    }

    async fn extract_docs(&self, result: AgentResult) -> Option<DocArtifact> {
        match result.data {
            Some(AgentOutput::Docs(d)) if result.success => {
                if let Err(e) = self.store.save_docs(&d).await {
                    warn!(error = %e, "failed to persist doc artifact");
                }
                Some(d)
            }
            _ => None,
        }
    }

    async fn run_synthesis(&self, ctx: &AgentContext) -> Option<SynthesisArtifact> {
        let agent = self.agents.get("synthesizer")?;
        let result = self.run_with_timeout(Some(agent), ctx, &Value::Null).await;
        match result.data {
            Some(AgentOutput::Synthesis(s)) if result.success => {
                if let Err(e) = self.store.save_synthesis(&s).await {
                    warn!(error = %e, "failed to persist synthesis artifact");
                }
                Some(s)
            }
            _ => None,
        }
    }

    async fn publish(
        &self,
        workflow: &crate::types::Workflow,
        check_run_id: &str,
        artifacts: &WorkflowArtifacts,
        threshold: Severity,
    ) {
        let summary = artifacts
            .synthesis
            .as_ref()
            .map(|s| s.summary.clone())
            .unwrap_or_else(|| "No synthesis available.".to_string());

        if let Err(e) = self
            .provider
            .post_summary_comment(&workflow.owner, &workflow.repo, workflow.pr_number, &summary)
            .await
        {
            warn!(error = %e, "failed to post summary comment");
        }

        let mut worst: Option<Severity> = None;
        if let Some(review) = &artifacts.review {
            for comment in &review.comments {
                if comment.severity >= threshold {
                    if let Err(e) = self
                        .provider
                        .post_review_comment(
                            &workflow.owner,
                            &workflow.repo,
                            workflow.pr_number,
                            &comment.file,
                            comment.line,
                            &comment.message,
                        )
                        .await
                    {
                        warn!(error = %e, "failed to post review comment");
                    }
                }
                worst = Some(worst.map_or(comment.severity, |w| w.max(comment.severity)));
            }
        }

        let conclusion = match worst {
            Some(Severity::Critical) => CheckConclusion::Failure,
            Some(Severity::High) => CheckConclusion::ActionRequired,
            _ => CheckConclusion::Success,
        };

        if let Err(e) = self
            .provider
            .complete_check_run(
                &workflow.owner,
                &workflow.repo,
                check_run_id,
                conclusion,
                CHECK_RUN_NAME,
                &summary,
            )
            .await
        {
            warn!(error = %e, "failed to finalize check run");
        }
    }

    async fn fail_workflow(&self, workflow: &crate::types::Workflow, check_run_id: &str, reason: &str) {
        if let Err(e) = self.store.mark_workflow_failed(workflow.id, reason).await {
            warn!(error = %e, "failed to mark workflow failed");
        }
        let _ = self
            .provider
            .complete_check_run(
                &workflow.owner,
                &workflow.repo,
                check_run_id,
                CheckConclusion::Cancelled,
                CHECK_RUN_NAME,
                reason,
            )
            .await;
        self.notify(ObservabilityEvent::WorkflowStatusChanged {
            workflow_id: workflow.id,
            status: WorkflowStatus::Failed,
        })
        .await;
    }

    async fn notify(&self, event: ObservabilityEvent) {
        self.events.notify(event).await;
    }
}
