use async_trait::async_trait;

use crate::error::CoreResult;
use crate::types::{
    CheckConclusion, CheckRun, CombinedStatus, CompareResult, MergeMethod, ProviderReview,
    PullRequest, PullRequestDiff,
};

/// Everything the core needs from the external source-hosting provider,
/// named exactly as operations rather than as a raw REST/GraphQL client —
/// the concrete adapter (auth, pagination, retries) lives outside this
/// crate, so nothing else in it knows which source-hosting API is behind
/// the trait.
#[async_trait]
pub trait ProviderFacade: Send + Sync {
    async fn get_pull_request(&self, owner: &str, repo: &str, number: i64) -> CoreResult<PullRequest>;

    async fn get_pull_request_diff(&self, owner: &str, repo: &str, number: i64) -> CoreResult<PullRequestDiff>;

    /// Filenames touched by the PR, without patch bodies. Cheaper than
    /// `get_pull_request_diff` when only the file set matters.
    async fn get_changed_files(&self, owner: &str, repo: &str, number: i64) -> CoreResult<Vec<String>>;

    async fn get_combined_status(&self, owner: &str, repo: &str, sha: &str) -> CoreResult<CombinedStatus>;

    async fn get_check_runs(&self, owner: &str, repo: &str, sha: &str) -> CoreResult<Vec<CheckRun>>;

    async fn get_reviews(&self, owner: &str, repo: &str, number: i64) -> CoreResult<Vec<ProviderReview>>;

    async fn compare_branches(&self, owner: &str, repo: &str, base: &str, head: &str) -> CoreResult<CompareResult>;

    /// Attempts to fast-forward/rebuild the PR branch onto its base. Errors
    /// whose message indicates a real conflict should be surfaced so the
    /// merge queue can route the item to `blocked` rather than retrying.
    async fn update_branch(&self, owner: &str, repo: &str, number: i64) -> CoreResult<()>;

    async fn merge_pull_request(&self, owner: &str, repo: &str, number: i64, method: MergeMethod) -> CoreResult<String>;

    async fn create_check_run(&self, owner: &str, repo: &str, sha: &str, name: &str, body: &str) -> CoreResult<String>;

    async fn complete_check_run(&self, owner: &str, repo: &str, check_run_id: &str, conclusion: CheckConclusion, title: &str, summary: &str) -> CoreResult<()>;

    async fn post_summary_comment(&self, owner: &str, repo: &str, number: i64, body: &str) -> CoreResult<()>;

    async fn post_review_comment(&self, owner: &str, repo: &str, number: i64, file: &str, line: i64, body: &str) -> CoreResult<()>;

    async fn get_file_content(&self, owner: &str, repo: &str, branch: &str, path: &str) -> CoreResult<String>;

    /// Commits a single file's full new content directly to `branch`,
    /// returning the resulting commit sha. Used by auto-remediation to
    /// apply accepted suggestions without a local worktree.
    async fn commit_file_change(&self, owner: &str, repo: &str, branch: &str, file: &str, content: &str, message: &str) -> CoreResult<String>;
}
