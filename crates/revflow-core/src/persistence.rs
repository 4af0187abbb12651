use async_trait::async_trait;

use crate::error::CoreResult;
use crate::types::{
    AnalysisArtifact, CommentStatus, DocArtifact, RepositorySettings, ReviewArtifact,
    SynthesisArtifact, TestArtifact, Workflow, WorkflowStatus,
};

/// Idempotent persistence operations the core needs. Every save method is
/// an upsert: calling it twice with the same `workflow_id` leaves exactly
/// one row behind, backed by Postgres `ON CONFLICT` upserts.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn get_workflow_with_settings(&self, workflow_id: i64) -> CoreResult<(Workflow, RepositorySettings)>;

    async fn update_workflow_status(&self, workflow_id: i64, status: WorkflowStatus) -> CoreResult<()>;

    async fn mark_workflow_started(&self, workflow_id: i64, check_run_id: &str) -> CoreResult<()>;

    async fn mark_workflow_complete(&self, workflow_id: i64) -> CoreResult<()>;

    async fn mark_workflow_failed(&self, workflow_id: i64, reason: &str) -> CoreResult<()>;

    async fn save_analysis(&self, artifact: &AnalysisArtifact) -> CoreResult<()>;

    async fn save_review(&self, artifact: &ReviewArtifact) -> CoreResult<()>;

    async fn save_tests(&self, artifact: &TestArtifact) -> CoreResult<()>;

    async fn save_docs(&self, artifact: &DocArtifact) -> CoreResult<()>;

    async fn save_synthesis(&self, artifact: &SynthesisArtifact) -> CoreResult<()>;

    async fn get_review(&self, workflow_id: i64) -> CoreResult<Option<ReviewArtifact>>;

    async fn update_comment_status(&self, comment_id: i64, status: CommentStatus) -> CoreResult<()>;
}
