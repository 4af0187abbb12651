use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::{NoTls, Row};
use tracing::info;

use crate::error::{CoreError, CoreResult};
use crate::persistence::WorkflowStore;
use crate::types::{
    AnalysisArtifact, ChangeClassification, CodeSuggestion, CommentCategory, CommentStatus,
    DocArtifact, ImpactRadius, RepositorySettings, ReviewArtifact, ReviewComment, RiskLevel,
    Severity, SynthesisArtifact, TestArtifact, Workflow, WorkflowStatus,
};

const SCHEMA_SQL: &str = include_str!("../../../schema.sql");

/// Postgres-backed `WorkflowStore`: opens a pool, runs an embedded
/// migration script on connect, and exposes typed row mappers over
/// `tokio-postgres` / `deadpool-postgres`.
pub struct PostgresWorkflowStore {
    pool: Pool,
}

impl PostgresWorkflowStore {
    pub async fn connect(database_url: &str) -> CoreResult<Self> {
        let pg_config: tokio_postgres::Config = database_url.parse()?;
        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let manager = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(manager)
            .max_size(16)
            .build()
            .map_err(|e| CoreError::Provider(format!("failed to build postgres pool: {e}")))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> CoreResult<()> {
        let client = self.pool.get().await?;
        client.batch_execute(SCHEMA_SQL).await?;
        info!("applied schema migration");
        Ok(())
    }

    /// Cheap liveness check for `/healthz`: confirms a pool connection can
    /// still be acquired without touching any table.
    pub async fn ping(&self) -> CoreResult<()> {
        let client = self.pool.get().await?;
        client.execute("SELECT 1", &[]).await?;
        Ok(())
    }

    pub async fn insert_workflow(&self, w: &Workflow) -> CoreResult<i64> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "INSERT INTO workflows
                    (repository_id, pr_number, owner, repo, head_sha, branch, author, title, status)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 ON CONFLICT (repository_id, pr_number) DO UPDATE SET
                    head_sha = EXCLUDED.head_sha,
                    branch = EXCLUDED.branch,
                    title = EXCLUDED.title
                 RETURNING id",
                &[
                    &w.repository_id,
                    &w.pr_number,
                    &w.owner,
                    &w.repo,
                    &w.head_sha,
                    &w.branch,
                    &w.author,
                    &w.title,
                    &status_str(w.status),
                ],
            )
            .await?;
        Ok(row.get(0))
    }
}

fn status_str(s: WorkflowStatus) -> &'static str {
    match s {
        WorkflowStatus::Pending => "pending",
        WorkflowStatus::Analyzing => "analyzing",
        WorkflowStatus::Reviewing => "reviewing",
        WorkflowStatus::GeneratingTests => "generating_tests",
        WorkflowStatus::UpdatingDocs => "updating_docs",
        WorkflowStatus::Synthesizing => "synthesizing",
        WorkflowStatus::Completed => "completed",
        WorkflowStatus::Failed => "failed",
    }
}

fn parse_status(s: &str) -> WorkflowStatus {
    match s {
        "analyzing" => WorkflowStatus::Analyzing,
        "reviewing" => WorkflowStatus::Reviewing,
        "generating_tests" => WorkflowStatus::GeneratingTests,
        "updating_docs" => WorkflowStatus::UpdatingDocs,
        "synthesizing" => WorkflowStatus::Synthesizing,
        "completed" => WorkflowStatus::Completed,
        "failed" => WorkflowStatus::Failed,
        _ => WorkflowStatus::Pending,
    }
}

fn severity_str(s: Severity) -> &'static str {
    match s {
        Severity::Nitpick => "nitpick",
        Severity::Low => "low",
        Severity::Medium => "medium",
        Severity::High => "high",
        Severity::Critical => "critical",
    }
}

fn parse_severity(s: &str) -> Severity {
    match s {
        "low" => Severity::Low,
        "medium" => Severity::Medium,
        "high" => Severity::High,
        "critical" => Severity::Critical,
        _ => Severity::Nitpick,
    }
}

fn category_str(c: CommentCategory) -> &'static str {
    match c {
        CommentCategory::Security => "security",
        CommentCategory::Bug => "bug",
        CommentCategory::Performance => "performance",
        CommentCategory::ErrorHandling => "error_handling",
        CommentCategory::Style => "style",
        CommentCategory::Maintainability => "maintainability",
    }
}

fn parse_category(c: &str) -> CommentCategory {
    match c {
        "bug" => CommentCategory::Bug,
        "performance" => CommentCategory::Performance,
        "error_handling" => CommentCategory::ErrorHandling,
        "style" => CommentCategory::Style,
        "maintainability" => CommentCategory::Maintainability,
        _ => CommentCategory::Security,
    }
}

fn comment_status_str(s: CommentStatus) -> &'static str {
    match s {
        CommentStatus::Pending => "pending",
        CommentStatus::Posted => "posted",
        CommentStatus::FixApplied => "fix_applied",
        CommentStatus::Dismissed => "dismissed",
        CommentStatus::Resolved => "resolved",
        CommentStatus::FalsePositive => "false_positive",
    }
}

fn parse_comment_status(s: &str) -> CommentStatus {
    match s {
        "posted" => CommentStatus::Posted,
        "fix_applied" => CommentStatus::FixApplied,
        "dismissed" => CommentStatus::Dismissed,
        "resolved" => CommentStatus::Resolved,
        "false_positive" => CommentStatus::FalsePositive,
        _ => CommentStatus::Pending,
    }
}

fn row_to_workflow(row: &Row) -> Workflow {
    Workflow {
        id: row.get("id"),
        repository_id: row.get("repository_id"),
        pr_number: row.get("pr_number"),
        owner: row.get("owner"),
        repo: row.get("repo"),
        head_sha: row.get("head_sha"),
        branch: row.get("branch"),
        author: row.get("author"),
        title: row.get("title"),
        status: parse_status(row.get::<_, String>("status").as_str()),
        check_run_id: row.get("check_run_id"),
        last_error: row.get("last_error"),
        created_at: row.get::<_, DateTime<Utc>>("created_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
    }
}

fn row_to_settings(row: &Row) -> RepositorySettings {
    RepositorySettings {
        review_enabled: row.get("review_enabled"),
        test_generation_enabled: row.get("test_generation_enabled"),
        doc_updates_enabled: row.get("doc_updates_enabled"),
        publish_severity_threshold: parse_severity(
            row.get::<_, String>("publish_severity_threshold").as_str(),
        ),
    }
}

#[async_trait]
impl WorkflowStore for PostgresWorkflowStore {
    async fn get_workflow_with_settings(
        &self,
        workflow_id: i64,
    ) -> CoreResult<(Workflow, RepositorySettings)> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT * FROM workflows WHERE id = $1", &[&workflow_id])
            .await?
            .ok_or_else(|| CoreError::not_found(format!("workflow {workflow_id}")))?;
        Ok((row_to_workflow(&row), row_to_settings(&row)))
    }

    async fn update_workflow_status(&self, workflow_id: i64, status: WorkflowStatus) -> CoreResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE workflows SET status = $1 WHERE id = $2",
                &[&status_str(status), &workflow_id],
            )
            .await?;
        Ok(())
    }

    async fn mark_workflow_started(&self, workflow_id: i64, check_run_id: &str) -> CoreResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE workflows SET status = 'analyzing', check_run_id = $1, started_at = now() WHERE id = $2",
                &[&check_run_id, &workflow_id],
            )
            .await?;
        Ok(())
    }

    async fn mark_workflow_complete(&self, workflow_id: i64) -> CoreResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE workflows SET status = 'completed', completed_at = now() WHERE id = $1",
                &[&workflow_id],
            )
            .await?;
        Ok(())
    }

    async fn mark_workflow_failed(&self, workflow_id: i64, reason: &str) -> CoreResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE workflows SET status = 'failed', last_error = $1, completed_at = now() WHERE id = $2",
                &[&reason, &workflow_id],
            )
            .await?;
        Ok(())
    }

    async fn save_analysis(&self, a: &AnalysisArtifact) -> CoreResult<()> {
        let client = self.pool.get().await?;
        let classification = match a.classification {
            ChangeClassification::Feature => "feature",
            ChangeClassification::Bugfix => "bugfix",
            ChangeClassification::Refactor => "refactor",
            ChangeClassification::Docs => "docs",
            ChangeClassification::Chore => "chore",
            ChangeClassification::Test => "test",
            ChangeClassification::Deps => "deps",
        };
        let risk = match a.risk {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        client
            .execute(
                "INSERT INTO analysis_artifacts
                    (workflow_id, classification, risk, files_changed, additions, deletions,
                     semantic_changes, impact_radius, risk_factors, suggested_reviewers)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 ON CONFLICT (workflow_id) DO UPDATE SET
                    classification = EXCLUDED.classification,
                    risk = EXCLUDED.risk,
                    files_changed = EXCLUDED.files_changed,
                    additions = EXCLUDED.additions,
                    deletions = EXCLUDED.deletions,
                    semantic_changes = EXCLUDED.semantic_changes,
                    impact_radius = EXCLUDED.impact_radius,
                    risk_factors = EXCLUDED.risk_factors,
                    suggested_reviewers = EXCLUDED.suggested_reviewers",
                &[
                    &a.workflow_id,
                    &classification,
                    &risk,
                    &a.files_changed,
                    &a.additions,
                    &a.deletions,
                    &serde_json::to_value(&a.semantic_changes).unwrap_or_default(),
                    &serde_json::to_value(&a.impact_radius).unwrap_or_else(|_| serde_json::json!(ImpactRadius::default())),
                    &serde_json::to_value(&a.risk_factors).unwrap_or_default(),
                    &serde_json::to_value(&a.suggested_reviewers).unwrap_or_default(),
                ],
            )
            .await?;
        Ok(())
    }

    async fn save_review(&self, r: &ReviewArtifact) -> CoreResult<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        tx.execute(
            "DELETE FROM review_comments WHERE workflow_id = $1",
            &[&r.workflow_id],
        )
        .await?;
        for c in &r.comments {
            let suggestion = c
                .suggestion
                .as_ref()
                .map(|s| serde_json::to_value(s).unwrap_or_default());
            tx.execute(
                "INSERT INTO review_comments
                    (workflow_id, file, line, severity, category, message, suggestion, status, confidence)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                &[
                    &r.workflow_id,
                    &c.file,
                    &c.line,
                    &severity_str(c.severity),
                    &category_str(c.category),
                    &c.message,
                    &suggestion,
                    &comment_status_str(c.status),
                    &c.confidence,
                ],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn save_tests(&self, t: &TestArtifact) -> CoreResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO test_artifacts (workflow_id, files, summary)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (workflow_id) DO UPDATE SET files = EXCLUDED.files, summary = EXCLUDED.summary",
                &[
                    &t.workflow_id,
                    &serde_json::to_value(&t.files).unwrap_or_default(),
                    &t.summary,
                ],
            )
            .await?;
        Ok(())
    }

    async fn save_docs(&self, d: &DocArtifact) -> CoreResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO doc_artifacts (workflow_id, updates)
                 VALUES ($1, $2)
                 ON CONFLICT (workflow_id) DO UPDATE SET updates = EXCLUDED.updates",
                &[&d.workflow_id, &serde_json::to_value(&d.updates).unwrap_or_default()],
            )
            .await?;
        Ok(())
    }

    async fn save_synthesis(&self, s: &SynthesisArtifact) -> CoreResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO synthesis_artifacts (workflow_id, summary, recommendation)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (workflow_id) DO UPDATE SET summary = EXCLUDED.summary, recommendation = EXCLUDED.recommendation",
                &[&s.workflow_id, &s.summary, &s.recommendation],
            )
            .await?;
        Ok(())
    }

    async fn get_review(&self, workflow_id: i64) -> CoreResult<Option<ReviewArtifact>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT * FROM review_comments WHERE workflow_id = $1 ORDER BY id",
                &[&workflow_id],
            )
            .await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let comments = rows
            .iter()
            .map(|row| ReviewComment {
                id: row.get("id"),
                workflow_id: row.get("workflow_id"),
                file: row.get("file"),
                line: row.get("line"),
                severity: parse_severity(row.get::<_, String>("severity").as_str()),
                category: parse_category(row.get::<_, String>("category").as_str()),
                message: row.get("message"),
                suggestion: row
                    .get::<_, Option<serde_json::Value>>("suggestion")
                    .and_then(|v| serde_json::from_value::<CodeSuggestion>(v).ok()),
                status: parse_comment_status(row.get::<_, String>("status").as_str()),
                confidence: row.get("confidence"),
            })
            .collect();
        Ok(Some(ReviewArtifact {
            workflow_id,
            comments,
        }))
    }

    async fn update_comment_status(&self, comment_id: i64, status: CommentStatus) -> CoreResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE review_comments SET status = $1 WHERE id = $2",
                &[&comment_status_str(status), &comment_id],
            )
            .await?;
        Ok(())
    }
}
