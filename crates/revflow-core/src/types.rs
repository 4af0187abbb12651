use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a workflow as it advances through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Analyzing,
    Reviewing,
    GeneratingTests,
    UpdatingDocs,
    Synthesizing,
    Completed,
    Failed,
}

impl Default for WorkflowStatus {
    fn default() -> Self {
        WorkflowStatus::Pending
    }
}

/// A pull request being carried through the pipeline, identified by
/// (repository_id, pr_number).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: i64,
    pub repository_id: String,
    pub pr_number: i64,
    pub owner: String,
    pub repo: String,
    pub head_sha: String,
    pub branch: String,
    pub author: String,
    pub title: String,
    pub status: WorkflowStatus,
    pub check_run_id: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Per-repository toggles consulted at the start of a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySettings {
    pub review_enabled: bool,
    pub test_generation_enabled: bool,
    pub doc_updates_enabled: bool,
    pub publish_severity_threshold: Severity,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            review_enabled: true,
            test_generation_enabled: true,
            doc_updates_enabled: true,
            publish_severity_threshold: Severity::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Nitpick,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeClassification {
    Feature,
    Bugfix,
    Refactor,
    Docs,
    Chore,
    Test,
    Deps,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticChange {
    pub kind: String,
    pub symbol: String,
    pub file: String,
    pub impact: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImpactRadius {
    pub direct_files: Vec<String>,
    pub transitive_files: Vec<String>,
}

/// Output of the Analyzer agent, persisted once per workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisArtifact {
    pub workflow_id: i64,
    pub classification: ChangeClassification,
    pub risk: RiskLevel,
    pub files_changed: i64,
    pub additions: i64,
    pub deletions: i64,
    pub semantic_changes: Vec<SemanticChange>,
    pub impact_radius: ImpactRadius,
    pub risk_factors: Vec<String>,
    pub suggested_reviewers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentCategory {
    Security,
    Bug,
    Performance,
    ErrorHandling,
    Style,
    Maintainability,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentStatus {
    Pending,
    Posted,
    FixApplied,
    Dismissed,
    Resolved,
    FalsePositive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSuggestion {
    pub original_code: String,
    pub suggested_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewComment {
    pub id: i64,
    pub workflow_id: i64,
    pub file: String,
    pub line: i64,
    pub severity: Severity,
    pub category: CommentCategory,
    pub message: String,
    pub suggestion: Option<CodeSuggestion>,
    pub status: CommentStatus,
    /// Confidence in [0, 1] that the suggestion is correct, used by
    /// auto-remediation to gate auto-apply.
    pub confidence: f64,
}

/// Output of the Reviewer agent, persisted once per workflow as a set of
/// comments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewArtifact {
    pub workflow_id: i64,
    pub comments: Vec<ReviewComment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedTestFile {
    pub file: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestArtifact {
    pub workflow_id: i64,
    pub files: Vec<GeneratedTestFile>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocUpdate {
    pub file: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocArtifact {
    pub workflow_id: i64,
    pub updates: Vec<DocUpdate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SynthesisArtifact {
    pub workflow_id: i64,
    pub summary: String,
    pub recommendation: String,
}

/// Full set of artifacts accumulated for one workflow; optional fields are
/// absent when the corresponding agent was disabled, failed, or timed out.
#[derive(Debug, Clone, Default)]
pub struct WorkflowArtifacts {
    pub analysis: Option<AnalysisArtifact>,
    pub review: Option<ReviewArtifact>,
    pub tests: Option<TestArtifact>,
    pub docs: Option<DocArtifact>,
    pub synthesis: Option<SynthesisArtifact>,
}

// ---------------------------------------------------------------------
// Merge queue
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Queued,
    Checking,
    Ready,
    Merging,
    Merged,
    Failed,
    Blocked,
    Conflicted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMethod {
    Merge,
    Squash,
    Rebase,
}

impl Default for MergeMethod {
    fn default() -> Self {
        MergeMethod::Squash
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeQueueItem {
    pub repository_id: String,
    pub owner: String,
    pub repo: String,
    pub pr_number: i64,
    pub base_branch: String,
    pub status: QueueItemStatus,
    pub position: u32,
    pub priority: i64,
    pub added_at_ms: i64,
    pub checks_passed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub conflicts_with: Vec<i64>,
}

impl MergeQueueItem {
    /// Ordering key: higher priority sorts first, ties broken by insertion
    /// order (earlier first). Smaller score means earlier in the queue.
    pub fn order_score(&self) -> i64 {
        self.added_at_ms - self.priority * 1_000_000
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeQueueConfig {
    pub enabled: bool,
    pub auto_merge_enabled: bool,
    pub require_approvals: u32,
    pub require_checks: bool,
    pub require_up_to_date: bool,
    pub check_conflicts: bool,
    pub auto_resolve_conflicts: bool,
    pub merge_method: MergeMethod,
    pub batch_size: u32,
    pub max_wait_time_minutes: u32,
    pub conflict_buffer_lines: u32,
}

impl Default for MergeQueueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_merge_enabled: false,
            require_approvals: 1,
            require_checks: true,
            require_up_to_date: true,
            check_conflicts: true,
            auto_resolve_conflicts: false,
            merge_method: MergeMethod::Squash,
            batch_size: 1,
            max_wait_time_minutes: 60,
            conflict_buffer_lines: 3,
        }
    }
}

// ---------------------------------------------------------------------
// Auto-remediation
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStrategy {
    Single,
    PerPhase,
    PerFile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationConfig {
    pub auto_apply_threshold: f64,
    pub include_severities: Vec<Severity>,
    pub include_categories: Vec<CommentCategory>,
    pub skip_breaking_changes: bool,
    pub commit_strategy: CommitStrategy,
    pub trigger_reanalysis: bool,
    pub dry_run: bool,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            auto_apply_threshold: 0.8,
            include_severities: vec![
                Severity::Critical,
                Severity::High,
                Severity::Medium,
                Severity::Low,
                Severity::Nitpick,
            ],
            include_categories: vec![
                CommentCategory::Security,
                CommentCategory::Bug,
                CommentCategory::Performance,
                CommentCategory::ErrorHandling,
                CommentCategory::Style,
                CommentCategory::Maintainability,
            ],
            skip_breaking_changes: true,
            commit_strategy: CommitStrategy::Single,
            trigger_reanalysis: true,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixApplicability {
    pub comment_id: i64,
    pub file: String,
    pub line: i64,
    pub severity: Severity,
    pub category: CommentCategory,
    pub can_auto_apply: bool,
    pub is_breaking: bool,
    pub confidence: f64,
    pub reason: Option<String>,
    /// Comment ids of fixes that must land before this one can apply.
    pub dependencies: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationPhase {
    pub name: String,
    pub fixes: Vec<FixApplicability>,
    pub can_auto_apply: bool,
    pub requires_review: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationPlan {
    pub workflow_id: i64,
    pub total_fixes: usize,
    pub auto_applicable: usize,
    pub manual_required: usize,
    pub breaking_changes: usize,
    pub phases: Vec<RemediationPhase>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemediationResult {
    pub success: bool,
    pub phases_completed: usize,
    pub applied: Vec<i64>,
    pub skipped: Vec<i64>,
    pub failed: Vec<(i64, String)>,
    pub commit_shas: Vec<String>,
    pub reanalysis_triggered: bool,
}

// ---------------------------------------------------------------------
// Conversation sessions
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub session_id: String,
    pub workflow_id: i64,
    pub user: String,
    pub history: Vec<ChatMessage>,
    pub context: serde_json::Value,
    pub last_activity: DateTime<Utc>,
}

// ---------------------------------------------------------------------
// Provider-facing types (ambient service boundary)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub owner: String,
    pub repo: String,
    pub number: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: i64,
    pub title: String,
    pub body: String,
    pub author: String,
    pub head_sha: String,
    pub head_ref: String,
    pub base_ref: String,
    pub draft: bool,
    pub open: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDiff {
    pub filename: String,
    pub status: String,
    pub additions: i64,
    pub deletions: i64,
    pub patch: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullRequestDiff {
    pub files: Vec<FileDiff>,
    pub total_additions: i64,
    pub total_deletions: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    Success,
    Failure,
    Pending,
    Neutral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinedStatus {
    pub state: CheckState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRun {
    pub name: String,
    pub conclusion: CheckState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderReview {
    pub reviewer: String,
    pub state: ReviewState,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareResult {
    pub behind_by: u32,
    pub ahead_by: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    Success,
    ActionRequired,
    Failure,
    Cancelled,
    Neutral,
}

/// Event raised to the observability facade for live tailing; delivery is
/// best-effort and never blocks the state change that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObservabilityEvent {
    WorkflowStatusChanged {
        workflow_id: i64,
        status: WorkflowStatus,
    },
    QueueItemStatusChanged {
        repository_id: String,
        pr_number: i64,
        status: QueueItemStatus,
        reason: Option<String>,
    },
    RemediationCompleted {
        workflow_id: i64,
        applied: usize,
        failed: usize,
    },
}
