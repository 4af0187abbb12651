// Shared across several integration-test binaries; not every binary uses
// every helper.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use revflow_core::agent::{Agent, AgentContext, AgentResult};
use revflow_core::error::{CoreError, CoreResult};
use revflow_core::persistence::WorkflowStore;
use revflow_core::provider::ProviderFacade;
use revflow_core::types::{
    AnalysisArtifact, CheckConclusion, CheckRun, CheckState, CombinedStatus, CommentStatus,
    CompareResult, DocArtifact, MergeMethod, ProviderReview, PullRequest, PullRequestDiff,
    RepositorySettings, ReviewArtifact, SynthesisArtifact, TestArtifact, Workflow, WorkflowStatus,
};
use serde_json::Value;

/// In-memory stand-in for the provider facade. Every response is seeded up
/// front; calls are recorded so a test can assert on what was actually
/// invoked (e.g. that `update_branch` was or wasn't called).
#[derive(Default)]
pub struct FakeProvider {
    pub pull_requests: Mutex<HashMap<i64, PullRequest>>,
    pub diffs: Mutex<HashMap<i64, PullRequestDiff>>,
    pub combined_status: Mutex<HashMap<String, CombinedStatus>>,
    pub check_runs: Mutex<HashMap<String, Vec<CheckRun>>>,
    pub reviews: Mutex<HashMap<i64, Vec<ProviderReview>>>,
    pub compare: Mutex<HashMap<String, CompareResult>>,
    pub file_contents: Mutex<HashMap<String, String>>,
    pub update_branch_calls: Mutex<Vec<i64>>,
    pub merge_calls: Mutex<Vec<i64>>,
    pub commit_calls: Mutex<Vec<(String, String)>>,
    pub merge_result: Mutex<Option<String>>,
    pub fail_merge: Mutex<bool>,
    pub summary_comments: Mutex<Vec<String>>,
    pub review_comment_posts: Mutex<Vec<(String, i64, String)>>,
    pub completed_check_runs: Mutex<Vec<(String, CheckConclusion)>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pull_request(self, number: i64, pr: PullRequest) -> Self {
        self.pull_requests.lock().unwrap().insert(number, pr);
        self
    }

    pub fn with_diff(self, number: i64, diff: PullRequestDiff) -> Self {
        self.diffs.lock().unwrap().insert(number, diff);
        self
    }

    /// Keyed by the PR's `head_sha`, matching how the merge queue calls
    /// `get_combined_status`/`get_check_runs`.
    pub fn with_combined_status(self, head_sha: &str, state: CheckState) -> Self {
        self.combined_status.lock().unwrap().insert(head_sha.to_string(), CombinedStatus { state });
        self
    }

    pub fn with_check_runs(self, head_sha: &str, runs: Vec<CheckRun>) -> Self {
        self.check_runs.lock().unwrap().insert(head_sha.to_string(), runs);
        self
    }

    pub fn with_reviews(self, number: i64, reviews: Vec<ProviderReview>) -> Self {
        self.reviews.lock().unwrap().insert(number, reviews);
        self
    }

    /// Keyed by the PR's `head_ref`, matching how the merge queue calls
    /// `compare_branches(base_branch, head_ref)`.
    pub fn with_compare(self, head_ref: &str, result: CompareResult) -> Self {
        self.compare.lock().unwrap().insert(head_ref.to_string(), result);
        self
    }
}

#[async_trait]
impl ProviderFacade for FakeProvider {
    async fn get_pull_request(&self, _owner: &str, _repo: &str, number: i64) -> CoreResult<PullRequest> {
        self.pull_requests
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("pr #{number}")))
    }

    async fn get_pull_request_diff(&self, _owner: &str, _repo: &str, number: i64) -> CoreResult<PullRequestDiff> {
        Ok(self.diffs.lock().unwrap().get(&number).cloned().unwrap_or_default())
    }

    async fn get_changed_files(&self, _owner: &str, _repo: &str, number: i64) -> CoreResult<Vec<String>> {
        Ok(self
            .diffs
            .lock()
            .unwrap()
            .get(&number)
            .map(|d| d.files.iter().map(|f| f.filename.clone()).collect())
            .unwrap_or_default())
    }

    async fn get_combined_status(&self, _owner: &str, _repo: &str, sha: &str) -> CoreResult<CombinedStatus> {
        Ok(self
            .combined_status
            .lock()
            .unwrap()
            .get(sha)
            .cloned()
            .unwrap_or(CombinedStatus { state: CheckState::Success }))
    }

    async fn get_check_runs(&self, _owner: &str, _repo: &str, sha: &str) -> CoreResult<Vec<CheckRun>> {
        Ok(self.check_runs.lock().unwrap().get(sha).cloned().unwrap_or_default())
    }

    async fn get_reviews(&self, _owner: &str, _repo: &str, number: i64) -> CoreResult<Vec<ProviderReview>> {
        Ok(self.reviews.lock().unwrap().get(&number).cloned().unwrap_or_default())
    }

    async fn compare_branches(&self, _owner: &str, _repo: &str, _base: &str, head: &str) -> CoreResult<CompareResult> {
        Ok(self
            .compare
            .lock()
            .unwrap()
            .get(head)
            .cloned()
            .unwrap_or(CompareResult { behind_by: 0, ahead_by: 0 }))
    }

    async fn update_branch(&self, _owner: &str, _repo: &str, number: i64) -> CoreResult<()> {
        self.update_branch_calls.lock().unwrap().push(number);
        Ok(())
    }

    async fn merge_pull_request(&self, _owner: &str, _repo: &str, number: i64, _method: MergeMethod) -> CoreResult<String> {
        self.merge_calls.lock().unwrap().push(number);
        if *self.fail_merge.lock().unwrap() {
            return Err(CoreError::provider("merge failed: base branch protection"));
        }
        Ok(self.merge_result.lock().unwrap().clone().unwrap_or_else(|| "deadbeef".to_string()))
    }

    async fn create_check_run(&self, _owner: &str, _repo: &str, _sha: &str, _name: &str, _body: &str) -> CoreResult<String> {
        Ok("check-1".to_string())
    }

    async fn complete_check_run(&self, _owner: &str, _repo: &str, check_run_id: &str, conclusion: CheckConclusion, _title: &str, _summary: &str) -> CoreResult<()> {
        self.completed_check_runs
            .lock()
            .unwrap()
            .push((check_run_id.to_string(), conclusion));
        Ok(())
    }

    async fn post_summary_comment(&self, _owner: &str, _repo: &str, _number: i64, body: &str) -> CoreResult<()> {
        self.summary_comments.lock().unwrap().push(body.to_string());
        Ok(())
    }

    async fn post_review_comment(&self, _owner: &str, _repo: &str, _number: i64, file: &str, line: i64, body: &str) -> CoreResult<()> {
        self.review_comment_posts
            .lock()
            .unwrap()
            .push((file.to_string(), line, body.to_string()));
        Ok(())
    }

    async fn get_file_content(&self, _owner: &str, _repo: &str, _branch: &str, path: &str) -> CoreResult<String> {
        self.file_contents
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("no fake content for {path}")))
    }

    async fn commit_file_change(&self, _owner: &str, _repo: &str, _branch: &str, file: &str, content: &str, _message: &str) -> CoreResult<String> {
        self.commit_calls.lock().unwrap().push((file.to_string(), content.to_string()));
        Ok(format!("sha-{}", self.commit_calls.lock().unwrap().len()))
    }
}

/// In-memory workflow store. Holds exactly the state the orchestrator and
/// remediation engine touch; not a full replica of the Postgres schema.
pub struct FakeStore {
    pub workflow: Mutex<Workflow>,
    pub settings: RepositorySettings,
    pub review: Mutex<Option<ReviewArtifact>>,
    pub analysis: Mutex<Option<AnalysisArtifact>>,
    pub tests: Mutex<Option<TestArtifact>>,
    pub docs: Mutex<Option<DocArtifact>>,
    pub synthesis: Mutex<Option<SynthesisArtifact>>,
    pub status_history: Mutex<Vec<WorkflowStatus>>,
    pub comment_statuses: Mutex<HashMap<i64, CommentStatus>>,
}

impl FakeStore {
    pub fn new(workflow: Workflow, settings: RepositorySettings) -> Self {
        let initial = workflow.status;
        Self {
            workflow: Mutex::new(workflow),
            settings,
            review: Mutex::new(None),
            analysis: Mutex::new(None),
            tests: Mutex::new(None),
            docs: Mutex::new(None),
            synthesis: Mutex::new(None),
            status_history: Mutex::new(vec![initial]),
            comment_statuses: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_review(self, review: ReviewArtifact) -> Self {
        *self.review.lock().unwrap() = Some(review);
        self
    }
}

#[async_trait]
impl WorkflowStore for FakeStore {
    async fn get_workflow_with_settings(&self, _workflow_id: i64) -> CoreResult<(Workflow, RepositorySettings)> {
        Ok((self.workflow.lock().unwrap().clone(), self.settings.clone()))
    }

    async fn update_workflow_status(&self, _workflow_id: i64, status: WorkflowStatus) -> CoreResult<()> {
        self.workflow.lock().unwrap().status = status;
        self.status_history.lock().unwrap().push(status);
        Ok(())
    }

    async fn mark_workflow_started(&self, _workflow_id: i64, check_run_id: &str) -> CoreResult<()> {
        let mut w = self.workflow.lock().unwrap();
        w.check_run_id = Some(check_run_id.to_string());
        w.status = WorkflowStatus::Analyzing;
        drop(w);
        self.status_history.lock().unwrap().push(WorkflowStatus::Analyzing);
        Ok(())
    }

    async fn mark_workflow_complete(&self, _workflow_id: i64) -> CoreResult<()> {
        self.update_workflow_status(0, WorkflowStatus::Completed).await
    }

    async fn mark_workflow_failed(&self, _workflow_id: i64, reason: &str) -> CoreResult<()> {
        let mut w = self.workflow.lock().unwrap();
        w.status = WorkflowStatus::Failed;
        w.last_error = Some(reason.to_string());
        self.status_history.lock().unwrap().push(WorkflowStatus::Failed);
        Ok(())
    }

    async fn save_analysis(&self, artifact: &AnalysisArtifact) -> CoreResult<()> {
        *self.analysis.lock().unwrap() = Some(artifact.clone());
        Ok(())
    }

    async fn save_review(&self, artifact: &ReviewArtifact) -> CoreResult<()> {
        *self.review.lock().unwrap() = Some(artifact.clone());
        Ok(())
    }

    async fn save_tests(&self, artifact: &TestArtifact) -> CoreResult<()> {
        *self.tests.lock().unwrap() = Some(artifact.clone());
        Ok(())
    }

    async fn save_docs(&self, artifact: &DocArtifact) -> CoreResult<()> {
        *self.docs.lock().unwrap() = Some(artifact.clone());
        Ok(())
    }

    async fn save_synthesis(&self, artifact: &SynthesisArtifact) -> CoreResult<()> {
        *self.synthesis.lock().unwrap() = Some(artifact.clone());
        Ok(())
    }

    async fn get_review(&self, _workflow_id: i64) -> CoreResult<Option<ReviewArtifact>> {
        Ok(self.review.lock().unwrap().clone())
    }

    async fn update_comment_status(&self, comment_id: i64, status: CommentStatus) -> CoreResult<()> {
        self.comment_statuses.lock().unwrap().insert(comment_id, status);
        Ok(())
    }
}

/// Agent stub that returns a fixed result regardless of input, optionally
/// delaying to exercise the orchestrator's per-agent timeout.
pub struct StubAgent {
    pub agent_name: &'static str,
    pub result: AgentResult,
    pub delay: Option<std::time::Duration>,
}

#[async_trait]
impl Agent for StubAgent {
    fn name(&self) -> &'static str {
        self.agent_name
    }

    async fn run(&self, _ctx: &AgentContext, _extra: &Value) -> AgentResult {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.clone()
    }
}

pub fn pr(number: i64, head_sha: &str, open: bool, draft: bool) -> PullRequest {
    PullRequest {
        number,
        title: format!("pr {number}"),
        body: String::new(),
        author: "octocat".into(),
        head_sha: head_sha.into(),
        head_ref: format!("feature-{number}"),
        base_ref: "main".into(),
        draft,
        open,
    }
}

pub fn review_at(reviewer: &str, state: revflow_core::types::ReviewState, secs_offset: i64) -> ProviderReview {
    ProviderReview {
        reviewer: reviewer.into(),
        state,
        submitted_at: base_time() + chrono::Duration::seconds(secs_offset),
    }
}

pub fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
}
