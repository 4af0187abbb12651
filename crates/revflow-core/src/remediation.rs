use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{info, warn};

use crate::concurrency::InFlightTracker;
use crate::error::{CoreError, CoreResult};
use crate::events::EventBus;
use crate::orchestrator::Orchestrator;
use crate::persistence::WorkflowStore;
use crate::provider::ProviderFacade;
use crate::types::{
    CodeSuggestion, CommentCategory, CommentStatus, CommitStrategy, FixApplicability,
    ObservabilityEvent, RemediationConfig, RemediationPhase, RemediationPlan, RemediationResult,
    ReviewComment, Severity,
};

/// Turns accepted review comments into committed fixes, grouped into
/// phases by category and executed under the configured commit strategy,
/// the same "acquire next item, execute, record outcome" shape as the
/// transactional worker this module is grounded on, adapted to an
/// in-process per-workflow run rather than a SQL-backed job queue.
pub struct RemediationEngine {
    store: Arc<dyn WorkflowStore>,
    provider: Arc<dyn ProviderFacade>,
    orchestrator: Arc<Orchestrator>,
    events: Arc<EventBus>,
    config: RemediationConfig,
    running: InFlightTracker<i64>,
}

impl RemediationEngine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        provider: Arc<dyn ProviderFacade>,
        orchestrator: Arc<Orchestrator>,
        events: Arc<EventBus>,
        config: RemediationConfig,
    ) -> Self {
        Self {
            store,
            provider,
            orchestrator,
            events,
            config,
            running: InFlightTracker::new(usize::MAX),
        }
    }

    /// Builds a remediation plan from the workflow's persisted review
    /// without touching the provider or applying anything.
    pub async fn plan(&self, workflow_id: i64) -> CoreResult<RemediationPlan> {
        let review = self
            .store
            .get_review(workflow_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("no review for workflow {workflow_id}")))?;

        let mut fixes: Vec<FixApplicability> = review
            .comments
            .iter()
            .filter(|c| c.status == CommentStatus::Pending)
            .map(|c| self.classify(c))
            .collect();

        fixes.sort_by(|a, b| {
            severity_rank(a.severity)
                .cmp(&severity_rank(b.severity))
                .then_with(|| category_rank(a.category).cmp(&category_rank(b.category)))
                .then_with(|| b.confidence.total_cmp(&a.confidence))
        });
        link_same_file_dependencies(&mut fixes);

        // Phases only hold fixes that survive the configured severity,
        // category and breaking-change filters; the counts below still
        // describe the full candidate set.
        let candidates: Vec<&FixApplicability> = fixes
            .iter()
            .filter(|f| self.config.include_severities.contains(&f.severity))
            .filter(|f| self.config.include_categories.contains(&f.category))
            .filter(|f| !(self.config.skip_breaking_changes && f.is_breaking))
            .collect();

        let urgent_security = |f: &&&FixApplicability| {
            f.category == CommentCategory::Security
                && matches!(f.severity, Severity::Critical | Severity::High)
        };

        let mut phases = Vec::new();
        push_phase(
            &mut phases,
            "security",
            candidates.iter().filter(urgent_security).map(|f| (*f).clone()).collect(),
            false,
        );
        push_phase(
            &mut phases,
            "bug",
            candidates
                .iter()
                .filter(|f| {
                    f.category == CommentCategory::Bug
                        || (f.category == CommentCategory::Security && !urgent_security(f))
                })
                .map(|f| (*f).clone())
                .collect(),
            false,
        );
        push_phase(
            &mut phases,
            "performance",
            candidates
                .iter()
                .filter(|f| f.category == CommentCategory::Performance)
                .map(|f| (*f).clone())
                .collect(),
            false,
        );
        push_phase(
            &mut phases,
            "error_handling",
            candidates
                .iter()
                .filter(|f| f.category == CommentCategory::ErrorHandling)
                .map(|f| (*f).clone())
                .collect(),
            false,
        );
        push_phase(
            &mut phases,
            "style_maintainability",
            candidates
                .iter()
                .filter(|f| matches!(f.category, CommentCategory::Style | CommentCategory::Maintainability))
                .map(|f| (*f).clone())
                .collect(),
            true,
        );

        let auto_applicable = fixes.iter().filter(|f| f.can_auto_apply).count();
        let breaking_changes = fixes.iter().filter(|f| f.is_breaking).count();

        Ok(RemediationPlan {
            workflow_id,
            total_fixes: fixes.len(),
            auto_applicable,
            manual_required: fixes.len() - auto_applicable,
            breaking_changes,
            phases,
        })
    }

    fn classify(&self, comment: &ReviewComment) -> FixApplicability {
        let is_breaking = comment
            .suggestion
            .as_ref()
            .map(|s| is_breaking_change(comment.category, s))
            .unwrap_or(false);

        let has_usable_suggestion = comment
            .suggestion
            .as_ref()
            .is_some_and(|s| !s.original_code.is_empty() && !s.suggested_code.is_empty());

        // A breaking fix is never auto-applied, whatever the config says;
        // `skip_breaking_changes` only controls whether it appears in the
        // plan at all.
        let reason = if !has_usable_suggestion {
            Some("no suggested replacement available".to_string())
        } else if is_breaking {
            Some("signature rename, export removed, or visibility narrowed".to_string())
        } else if comment.confidence < self.config.auto_apply_threshold {
            Some(format!(
                "confidence {:.2} below threshold {:.2}",
                comment.confidence, self.config.auto_apply_threshold
            ))
        } else if !self.config.include_severities.contains(&comment.severity) {
            Some("severity excluded from auto-apply".to_string())
        } else if !self.config.include_categories.contains(&comment.category) {
            Some("category excluded from auto-apply".to_string())
        } else {
            None
        };

        FixApplicability {
            comment_id: comment.id,
            file: comment.file.clone(),
            line: comment.line,
            severity: comment.severity,
            category: comment.category,
            can_auto_apply: reason.is_none(),
            is_breaking,
            confidence: comment.confidence,
            reason,
            dependencies: Vec::new(),
        }
    }

    /// Applies every phase's auto-applicable fixes, honoring the
    /// configured commit strategy, then optionally re-triggers analysis.
    /// At most one plan executes per workflow at a time; a second call
    /// while one is running is a state conflict.
    pub async fn execute(&self, workflow_id: i64, plan: &RemediationPlan) -> CoreResult<RemediationResult> {
        if !self.running.try_acquire(workflow_id).await {
            return Err(CoreError::state_conflict(format!(
                "remediation already running for workflow {workflow_id}"
            )));
        }
        let result = self.execute_inner(workflow_id, plan).await;
        self.running.release(&workflow_id).await;
        result
    }

    async fn execute_inner(&self, workflow_id: i64, plan: &RemediationPlan) -> CoreResult<RemediationResult> {
        let (workflow, _) = self.store.get_workflow_with_settings(workflow_id).await?;
        let review = self
            .store
            .get_review(workflow_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("no review for workflow {workflow_id}")))?;
        let comments_by_id: HashMap<i64, &ReviewComment> =
            review.comments.iter().map(|c| (c.id, c)).collect();

        let mut result = RemediationResult::default();

        if self.config.dry_run {
            for phase in &plan.phases {
                for fix in &phase.fixes {
                    if fix.can_auto_apply {
                        result.applied.push(fix.comment_id);
                    } else {
                        result.skipped.push(fix.comment_id);
                    }
                }
            }
            result.success = true;
            info!(workflow_id, "remediation dry run, no commits made");
            return Ok(result);
        }

        let mut file_cache: HashMap<String, String> = HashMap::new();
        let mut touched_all_phases: HashSet<String> = HashSet::new();

        for phase in &plan.phases {
            if !phase.can_auto_apply {
                for fix in &phase.fixes {
                    result.skipped.push(fix.comment_id);
                }
                continue;
            }

            let mut touched_this_phase: HashSet<String> = HashSet::new();

            for fix in &phase.fixes {
                let Some(comment) = comments_by_id.get(&fix.comment_id) else {
                    result.failed.push((fix.comment_id, "comment no longer present".into()));
                    continue;
                };
                let Some(suggestion) = &comment.suggestion else {
                    result.failed.push((fix.comment_id, "no suggestion to apply".into()));
                    continue;
                };

                let content = match self.load_file(&mut file_cache, &workflow.owner, &workflow.repo, &workflow.branch, &fix.file).await {
                    Ok(c) => c,
                    Err(e) => {
                        result.failed.push((fix.comment_id, e.to_string()));
                        continue;
                    }
                };

                let Some(updated) = apply_suggestion(&content, suggestion) else {
                    result.failed.push((
                        fix.comment_id,
                        "suggested original text not found in current file".into(),
                    ));
                    continue;
                };
                file_cache.insert(fix.file.clone(), updated);
                touched_this_phase.insert(fix.file.clone());
                touched_all_phases.insert(fix.file.clone());
                result.applied.push(fix.comment_id);

                if let Err(e) = self.store.update_comment_status(fix.comment_id, CommentStatus::FixApplied).await {
                    warn!(error = %e, comment_id = fix.comment_id, "failed to record fix-applied status");
                }

                if self.config.commit_strategy == CommitStrategy::PerFile {
                    let message = format!("fix({}): apply review suggestion to {}", phase.name, fix.file);
                    if let Err(e) = self
                        .commit(&workflow, &fix.file, &message, &file_cache, &mut result)
                        .await
                    {
                        warn!(error = %e, file = fix.file, "commit failed");
                    }
                }
            }

            if self.config.commit_strategy == CommitStrategy::PerPhase {
                let message = format!("fix({}): apply review suggestions", phase.name);
                for file in &touched_this_phase {
                    if let Err(e) = self.commit(&workflow, file, &message, &file_cache, &mut result).await {
                        warn!(error = %e, file, "commit failed");
                    }
                }
            }

            result.phases_completed += 1;
        }

        if self.config.commit_strategy == CommitStrategy::Single {
            for file in &touched_all_phases {
                if let Err(e) = self
                    .commit(&workflow, file, "fix: apply review suggestions", &file_cache, &mut result)
                    .await
                {
                    warn!(error = %e, file, "commit failed");
                }
            }
        }

        result.success = result.failed.is_empty();

        if self.config.trigger_reanalysis && !result.applied.is_empty() {
            result.reanalysis_triggered = self.orchestrator.run_workflow(workflow_id).await.is_ok();
        }

        self.events
            .notify(ObservabilityEvent::RemediationCompleted {
                workflow_id,
                applied: result.applied.len(),
                failed: result.failed.len(),
            })
            .await;

        Ok(result)
    }

    async fn load_file(
        &self,
        cache: &mut HashMap<String, String>,
        owner: &str,
        repo: &str,
        branch: &str,
        file: &str,
    ) -> CoreResult<String> {
        if let Some(content) = cache.get(file) {
            return Ok(content.clone());
        }
        let content = self.provider.get_file_content(owner, repo, branch, file).await?;
        cache.insert(file.to_string(), content.clone());
        Ok(content)
    }

    async fn commit(
        &self,
        workflow: &crate::types::Workflow,
        file: &str,
        message: &str,
        cache: &HashMap<String, String>,
        result: &mut RemediationResult,
    ) -> CoreResult<()> {
        let Some(content) = cache.get(file) else {
            return Ok(());
        };
        let sha = self
            .provider
            .commit_file_change(&workflow.owner, &workflow.repo, &workflow.branch, file, content, message)
            .await?;
        result.commit_shas.push(sha);
        Ok(())
    }
}

fn push_phase(phases: &mut Vec<RemediationPhase>, name: &str, fixes: Vec<FixApplicability>, force_manual: bool) {
    if fixes.is_empty() {
        return;
    }
    let can_auto_apply = !force_manual && fixes.iter().all(|f| f.can_auto_apply);
    phases.push(RemediationPhase {
        name: name.to_string(),
        fixes,
        can_auto_apply,
        requires_review: force_manual || !can_auto_apply,
    });
}

/// Fixes touching the same file apply through one shared buffer in plan
/// order, so each records the same-file fixes ordered ahead of it as
/// dependencies.
fn link_same_file_dependencies(fixes: &mut [FixApplicability]) {
    let mut prior_per_file: HashMap<String, Vec<i64>> = HashMap::new();
    for fix in fixes.iter_mut() {
        if let Some(prior) = prior_per_file.get(&fix.file) {
            fix.dependencies = prior.clone();
        }
        prior_per_file.entry(fix.file.clone()).or_default().push(fix.comment_id);
    }
}

fn severity_rank(severity: Severity) -> u8 {
    match severity {
        Severity::Critical => 0,
        Severity::High => 1,
        Severity::Medium => 2,
        Severity::Low => 3,
        Severity::Nitpick => 4,
    }
}

fn category_rank(category: CommentCategory) -> u8 {
    match category {
        CommentCategory::Security => 0,
        CommentCategory::Bug => 1,
        CommentCategory::Performance => 2,
        CommentCategory::ErrorHandling => 3,
        CommentCategory::Style => 4,
        CommentCategory::Maintainability => 5,
    }
}

/// Conservative breaking-change heuristic: a maintainability fix that
/// renames a declared function/const/let/var, an `export` dropped between
/// original and suggested, or `public` narrowed to `private`.
fn is_breaking_change(category: CommentCategory, suggestion: &CodeSuggestion) -> bool {
    let orig = suggestion.original_code.lines().next().unwrap_or("").trim();
    let new = suggestion.suggested_code.lines().next().unwrap_or("").trim();

    if category == CommentCategory::Maintainability {
        if let (Some(orig_name), Some(new_name)) = (function_name(orig), function_name(new)) {
            if orig_name != new_name {
                return true;
            }
        }
    }

    if orig.contains("export") && !new.contains("export") {
        return true;
    }

    if orig.contains("public") && new.contains("private") {
        return true;
    }

    false
}

/// Extracts `<name>` from a `function|const|let|var <name>(...)` declaration.
fn function_name(line: &str) -> Option<String> {
    const KEYWORDS: [&str; 4] = ["function", "const", "let", "var"];
    let trimmed = line.trim_start();
    for kw in KEYWORDS {
        let Some(rest) = trimmed.strip_prefix(kw) else { continue };
        if !rest.starts_with(|c: char| c.is_whitespace()) {
            continue;
        }
        let rest = rest.trim_start();
        let name_end = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
            .unwrap_or(rest.len());
        if name_end == 0 {
            continue;
        }
        let name = &rest[..name_end];
        if rest[name_end..].trim_start().starts_with('(') {
            return Some(name.to_string());
        }
    }
    None
}

fn apply_suggestion(content: &str, suggestion: &CodeSuggestion) -> Option<String> {
    if !content.contains(&suggestion.original_code) {
        return None;
    }
    Some(content.replacen(&suggestion.original_code, &suggestion.suggested_code, 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maintainability_rename_is_breaking() {
        let s = CodeSuggestion {
            original_code: "function computeTotal(items) {".into(),
            suggested_code: "function sumItems(items) {".into(),
        };
        assert!(is_breaking_change(CommentCategory::Maintainability, &s));
    }

    #[test]
    fn maintainability_rename_of_const_is_breaking() {
        let s = CodeSuggestion {
            original_code: "const getUser(id) {".into(),
            suggested_code: "const fetchUser(id) {".into(),
        };
        assert!(is_breaking_change(CommentCategory::Maintainability, &s));
    }

    #[test]
    fn maintainability_fix_keeping_name_is_not_breaking() {
        let s = CodeSuggestion {
            original_code: "let count = items.length;".into(),
            suggested_code: "let count = items.size;".into(),
        };
        assert!(!is_breaking_change(CommentCategory::Maintainability, &s));
    }

    #[test]
    fn non_maintainability_rename_is_not_breaking_by_itself() {
        let s = CodeSuggestion {
            original_code: "function computeTotal(items) {".into(),
            suggested_code: "function sumItems(items) {".into(),
        };
        assert!(!is_breaking_change(CommentCategory::Style, &s));
    }

    #[test]
    fn dropped_export_is_breaking() {
        let s = CodeSuggestion {
            original_code: "export function computeTotal(items) {".into(),
            suggested_code: "function computeTotal(items) {".into(),
        };
        assert!(is_breaking_change(CommentCategory::Bug, &s));
    }

    #[test]
    fn public_to_private_is_breaking() {
        let s = CodeSuggestion {
            original_code: "public getBalance() {".into(),
            suggested_code: "private getBalance() {".into(),
        };
        assert!(is_breaking_change(CommentCategory::Bug, &s));
    }

    #[test]
    fn unrelated_change_is_not_breaking() {
        let s = CodeSuggestion {
            original_code: "if (x == null) {".into(),
            suggested_code: "if (x === null) {".into(),
        };
        assert!(!is_breaking_change(CommentCategory::Bug, &s));
    }

    #[test]
    fn apply_suggestion_replaces_matching_text() {
        let content = "line one\nold code\nline three\n";
        let s = CodeSuggestion {
            original_code: "old code".into(),
            suggested_code: "new code".into(),
        };
        let updated = apply_suggestion(content, &s).unwrap();
        assert_eq!(updated, "line one\nnew code\nline three\n");
    }

    #[test]
    fn apply_suggestion_returns_none_when_text_missing() {
        let content = "line one\nline two\n";
        let s = CodeSuggestion {
            original_code: "not present".into(),
            suggested_code: "new code".into(),
        };
        assert!(apply_suggestion(content, &s).is_none());
    }

    fn fix(severity: Severity, category: CommentCategory, confidence: f64) -> FixApplicability {
        FixApplicability {
            comment_id: 1,
            file: "a.rs".into(),
            line: 1,
            severity,
            category,
            can_auto_apply: true,
            is_breaking: false,
            confidence,
            reason: None,
            dependencies: vec![],
        }
    }

    #[test]
    fn prioritization_orders_by_severity_then_category_then_confidence_desc() {
        let mut fixes = vec![
            fix(Severity::Medium, CommentCategory::Bug, 0.5),
            fix(Severity::Critical, CommentCategory::Performance, 0.5),
            fix(Severity::Critical, CommentCategory::Security, 0.9),
            fix(Severity::Critical, CommentCategory::Security, 0.95),
        ];
        fixes.sort_by(|a, b| {
            severity_rank(a.severity)
                .cmp(&severity_rank(b.severity))
                .then_with(|| category_rank(a.category).cmp(&category_rank(b.category)))
                .then_with(|| b.confidence.total_cmp(&a.confidence))
        });
        assert_eq!(fixes[0].category, CommentCategory::Security);
        assert_eq!(fixes[0].confidence, 0.95);
        assert_eq!(fixes[1].category, CommentCategory::Security);
        assert_eq!(fixes[1].confidence, 0.9);
        assert_eq!(fixes[2].category, CommentCategory::Performance);
        assert_eq!(fixes[3].severity, Severity::Medium);
    }

    #[test]
    fn style_maintainability_phase_never_auto_applies() {
        let mut phases = Vec::new();
        push_phase(
            &mut phases,
            "style_maintainability",
            vec![fix(Severity::Low, CommentCategory::Maintainability, 0.99)],
            true,
        );
        assert_eq!(phases.len(), 1);
        assert!(!phases[0].can_auto_apply);
        assert!(phases[0].requires_review);
    }

    #[test]
    fn empty_phase_is_omitted() {
        let mut phases = Vec::new();
        push_phase(&mut phases, "bug", Vec::new(), false);
        assert!(phases.is_empty());
    }

    #[test]
    fn same_file_fixes_depend_on_the_ones_ordered_ahead() {
        let mut fixes = vec![
            FixApplicability { comment_id: 1, ..fix(Severity::Critical, CommentCategory::Security, 0.9) },
            FixApplicability { comment_id: 2, file: "b.rs".into(), ..fix(Severity::High, CommentCategory::Bug, 0.9) },
            FixApplicability { comment_id: 3, ..fix(Severity::Low, CommentCategory::Style, 0.9) },
        ];
        link_same_file_dependencies(&mut fixes);
        assert!(fixes[0].dependencies.is_empty());
        assert!(fixes[1].dependencies.is_empty(), "only fix for its file");
        assert_eq!(fixes[2].dependencies, vec![1], "same file as the critical fix");
    }

    #[test]
    fn phase_containing_a_breaking_fix_never_auto_applies() {
        let mut breaking = fix(Severity::High, CommentCategory::Bug, 0.99);
        breaking.can_auto_apply = false;
        breaking.is_breaking = true;
        let mut phases = Vec::new();
        push_phase(
            &mut phases,
            "bug",
            vec![fix(Severity::High, CommentCategory::Bug, 0.9), breaking],
            false,
        );
        assert!(!phases[0].can_auto_apply);
        assert!(phases[0].requires_review);
    }
}
