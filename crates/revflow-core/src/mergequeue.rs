use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::concurrency::InFlightTracker;
use crate::error::{CoreError, CoreResult};
use crate::events::EventBus;
use crate::provider::ProviderFacade;
use crate::types::{
    CheckState, MergeQueueConfig, MergeQueueItem, ObservabilityEvent, PullRequestDiff,
    QueueItemStatus, ReviewState,
};

enum GateOutcome {
    Ready,
    /// Checks still running; the item stays in `checking`.
    Pending,
    /// A branch update was issued; the item goes back to `queued` and gets
    /// re-gated once the provider has rebuilt the head.
    Requeued(String),
    Blocked(String),
    Conflicted(String, Vec<i64>),
    Closed,
}

/// Per-repository ordered set of pull requests waiting to merge, gated on
/// checks/approvals/freshness/conflicts before being handed to the
/// provider. Each repository advances independently, keyed by
/// repository id rather than a single global cursor.
pub struct MergeQueue {
    queues: tokio::sync::Mutex<HashMap<String, Vec<MergeQueueItem>>>,
    provider: Arc<dyn ProviderFacade>,
    events: Arc<EventBus>,
    in_flight: InFlightTracker<String>,
    config: MergeQueueConfig,
    wake_tx: mpsc::UnboundedSender<String>,
    wake_rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl MergeQueue {
    pub fn new(provider: Arc<dyn ProviderFacade>, events: Arc<EventBus>, config: MergeQueueConfig) -> Self {
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        Self {
            queues: tokio::sync::Mutex::new(HashMap::new()),
            provider,
            events,
            in_flight: InFlightTracker::new(usize::MAX),
            config,
            wake_tx,
            wake_rx: tokio::sync::Mutex::new(Some(wake_rx)),
        }
    }

    /// Starts the background task that drains insertion/priority wake-ups
    /// and runs a processing pass for the nudged repository. Call once at
    /// startup; a second call is a no-op.
    pub fn spawn_worker(self: Arc<Self>) {
        let Some(mut rx) = self.wake_rx.try_lock().ok().and_then(|mut guard| guard.take()) else {
            return;
        };
        let queue = self;
        tokio::spawn(async move {
            while let Some(repository_id) = rx.recv().await {
                if let Err(e) = queue.process_repository(&repository_id).await {
                    warn!(repository_id, error = %e, "merge queue processing failed");
                }
            }
        });
    }

    pub async fn add(&self, item: MergeQueueItem) -> CoreResult<()> {
        let repository_id = item.repository_id.clone();
        let pr_number = item.pr_number;
        {
            let mut queues = self.queues.lock().await;
            let items = queues.entry(repository_id.clone()).or_default();
            if items.iter().any(|i| i.pr_number == pr_number) {
                return Err(CoreError::validation(format!(
                    "pr #{pr_number} is already queued for {repository_id}"
                )));
            }
            items.push(item);
            recompute_positions(items);
        }
        self.notify(repository_id.clone(), pr_number, QueueItemStatus::Queued, None).await;
        let _ = self.wake_tx.send(repository_id);
        Ok(())
    }

    pub async fn remove(&self, repository_id: &str, pr_number: i64) -> CoreResult<()> {
        let mut queues = self.queues.lock().await;
        let Some(items) = queues.get_mut(repository_id) else {
            return Ok(());
        };
        items.retain(|i| i.pr_number != pr_number);
        recompute_positions(items);
        Ok(())
    }

    /// Changes an item's priority after enqueue; the repository's dense
    /// positions are recomputed the same way insertion and removal do.
    pub async fn set_priority(&self, repository_id: &str, pr_number: i64, priority: i64) -> CoreResult<()> {
        {
            let mut queues = self.queues.lock().await;
            let items = queues
                .get_mut(repository_id)
                .ok_or_else(|| CoreError::not_found(format!("no queue for {repository_id}")))?;
            let item = items
                .iter_mut()
                .find(|i| i.pr_number == pr_number)
                .ok_or_else(|| CoreError::not_found(format!("pr #{pr_number} not queued")))?;
            item.priority = priority;
            recompute_positions(items);
        }
        let _ = self.wake_tx.send(repository_id.to_string());
        Ok(())
    }

    pub async fn snapshot(&self, repository_id: &str) -> Vec<MergeQueueItem> {
        self.queues
            .lock()
            .await
            .get(repository_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drives one pass of gating/merging over a repository's queue. A
    /// no-op if another call is already processing the same repository;
    /// other repositories are unaffected.
    pub async fn process_repository(&self, repository_id: &str) -> CoreResult<()> {
        if !self.config.enabled {
            return Ok(());
        }
        if !self.in_flight.try_acquire(repository_id.to_string()).await {
            return Ok(());
        }
        let result = self.process_repository_inner(repository_id).await;
        self.in_flight.release(&repository_id.to_string()).await;
        result
    }

    async fn process_repository_inner(&self, repository_id: &str) -> CoreResult<()> {
        loop {
            let items = self.snapshot(repository_id).await;
            if items.is_empty() {
                return Ok(());
            }

            let batch_size = self.config.batch_size.max(1) as usize;
            let max_wait_ms = i64::from(self.config.max_wait_time_minutes) * 60_000;
            let now_ms = chrono::Utc::now().timestamp_millis();
            let mut advanced = false;
            for (idx, item) in items.iter().enumerate().take(batch_size) {
                let prev_status = item.status;

                if prev_status != QueueItemStatus::Ready && now_ms - item.added_at_ms > max_wait_ms {
                    self.set_status(
                        repository_id,
                        item.pr_number,
                        QueueItemStatus::Blocked,
                        Some(format!(
                            "waited longer than {} minutes",
                            self.config.max_wait_time_minutes
                        )),
                    )
                    .await;
                    if idx == 0 {
                        break;
                    }
                    continue;
                }

                self.set_status(repository_id, item.pr_number, QueueItemStatus::Checking, None)
                    .await;
                let ahead = &items[..idx];
                let outcome = match self.gate_item(item, ahead).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        // Conservative: an unanswerable gate is a gate not
                        // passing. The item keeps its position and the next
                        // run retries.
                        warn!(repository_id, pr = item.pr_number, error = %e, "gate check failed, will retry");
                        self.set_status(
                            repository_id,
                            item.pr_number,
                            QueueItemStatus::Queued,
                            Some(e.to_string()),
                        )
                        .await;
                        break;
                    }
                };

                match outcome {
                    GateOutcome::Ready => {
                        self.mark_ready(repository_id, item.pr_number).await;
                        if idx == 0 && self.config.auto_merge_enabled {
                            self.set_status(repository_id, item.pr_number, QueueItemStatus::Merging, None)
                                .await;
                            match self
                                .provider
                                .merge_pull_request(&item.owner, &item.repo, item.pr_number, self.config.merge_method)
                                .await
                            {
                                Ok(sha) => {
                                    info!(repository_id, pr = item.pr_number, sha, "merged queue head");
                                    self.mark_merged(repository_id, item.pr_number).await;
                                    advanced = true;
                                }
                                Err(e) => {
                                    // Not retried automatically; the item
                                    // stays for operator intervention.
                                    self.set_status(
                                        repository_id,
                                        item.pr_number,
                                        QueueItemStatus::Failed,
                                        Some(e.to_string()),
                                    )
                                    .await;
                                }
                            }
                            break;
                        }
                    }
                    GateOutcome::Pending => {
                        if idx == 0 {
                            break;
                        }
                    }
                    GateOutcome::Requeued(reason) => {
                        self.set_status(repository_id, item.pr_number, QueueItemStatus::Queued, Some(reason))
                            .await;
                        if idx == 0 {
                            break;
                        }
                    }
                    GateOutcome::Blocked(reason) => {
                        // A ready item never moves straight to blocked; it
                        // drops back to queued and the next pass re-gates it.
                        let next = if prev_status == QueueItemStatus::Ready {
                            QueueItemStatus::Queued
                        } else {
                            QueueItemStatus::Blocked
                        };
                        self.set_status(repository_id, item.pr_number, next, Some(reason)).await;
                        if idx == 0 {
                            break;
                        }
                    }
                    GateOutcome::Conflicted(reason, with) => {
                        if prev_status == QueueItemStatus::Ready {
                            self.set_status(repository_id, item.pr_number, QueueItemStatus::Queued, Some(reason))
                                .await;
                        } else {
                            self.set_conflict(repository_id, item.pr_number, reason, with).await;
                        }
                    }
                    GateOutcome::Closed => {
                        self.remove(repository_id, item.pr_number).await?;
                        advanced = true;
                        break;
                    }
                }
            }

            if !advanced {
                return Ok(());
            }
        }
    }

    async fn gate_item(&self, item: &MergeQueueItem, ahead: &[MergeQueueItem]) -> CoreResult<GateOutcome> {
        let pr = self
            .provider
            .get_pull_request(&item.owner, &item.repo, item.pr_number)
            .await?;
        if !pr.open {
            return Ok(GateOutcome::Closed);
        }
        if pr.draft {
            return Ok(GateOutcome::Blocked("pull request is a draft".into()));
        }

        if self.config.require_checks {
            let status = self
                .provider
                .get_combined_status(&item.owner, &item.repo, &pr.head_sha)
                .await?;
            let check_runs = self
                .provider
                .get_check_runs(&item.owner, &item.repo, &pr.head_sha)
                .await?;
            let states = std::iter::once(status.state).chain(check_runs.iter().map(|r| r.conclusion));
            let mut pending = false;
            for state in states {
                match state {
                    CheckState::Failure => return Ok(GateOutcome::Blocked("checks are failing".into())),
                    CheckState::Pending => pending = true,
                    CheckState::Success | CheckState::Neutral => {}
                }
            }
            if pending {
                return Ok(GateOutcome::Pending);
            }
        }

        if self.config.require_approvals > 0 {
            let reviews = self
                .provider
                .get_reviews(&item.owner, &item.repo, item.pr_number)
                .await?;
            // Only each reviewer's latest review counts; a stale
            // changes-requested superseded by an approval does not block.
            let mut latest: HashMap<&str, &crate::types::ProviderReview> = HashMap::new();
            for review in &reviews {
                latest
                    .entry(review.reviewer.as_str())
                    .and_modify(|current| {
                        if review.submitted_at > current.submitted_at {
                            *current = review;
                        }
                    })
                    .or_insert(review);
            }
            if latest.values().any(|r| r.state == ReviewState::ChangesRequested) {
                return Ok(GateOutcome::Blocked("changes requested".into()));
            }
            let approvers = latest.values().filter(|r| r.state == ReviewState::Approved).count();
            if (approvers as u32) < self.config.require_approvals {
                return Ok(GateOutcome::Blocked(format!(
                    "needs {} approval(s), has {}",
                    self.config.require_approvals,
                    approvers
                )));
            }
        }

        if self.config.require_up_to_date {
            let cmp = self
                .provider
                .compare_branches(&item.owner, &item.repo, &item.base_branch, &pr.head_ref)
                .await?;
            if cmp.behind_by > 0 {
                if !self.config.auto_resolve_conflicts {
                    return Ok(GateOutcome::Blocked("branch is behind base".into()));
                }
                return Ok(self.try_update_branch(item, "updated onto base").await);
            }
        }

        if self.config.check_conflicts {
            if let Some((reason, with)) = self.detect_conflict(item, ahead).await? {
                if self.config.auto_resolve_conflicts {
                    return Ok(self.try_update_branch(item, "updated to resolve queue conflict").await);
                }
                return Ok(GateOutcome::Conflicted(reason, with));
            }
        }

        Ok(GateOutcome::Ready)
    }

    /// Issues a provider branch update. Success requeues the item for a
    /// fresh gating pass; a failure (typically a real merge conflict the
    /// provider cannot auto-resolve) blocks it.
    async fn try_update_branch(&self, item: &MergeQueueItem, reason: &str) -> GateOutcome {
        match self
            .provider
            .update_branch(&item.owner, &item.repo, item.pr_number)
            .await
        {
            Ok(()) => GateOutcome::Requeued(reason.to_string()),
            Err(e) => GateOutcome::Blocked(format!("branch update failed: {e}")),
        }
    }

    async fn detect_conflict(
        &self,
        item: &MergeQueueItem,
        ahead: &[MergeQueueItem],
    ) -> CoreResult<Option<(String, Vec<i64>)>> {
        let item_diff = self
            .provider
            .get_pull_request_diff(&item.owner, &item.repo, item.pr_number)
            .await?;
        let item_files: HashSet<&str> = item_diff.files.iter().map(|f| f.filename.as_str()).collect();

        let mut conflicts = Vec::new();
        for other in ahead {
            if other.base_branch != item.base_branch {
                continue;
            }
            // Cheap filename intersection first; only overlapping peers pay
            // for a full diff fetch and range comparison.
            let changed = self
                .provider
                .get_changed_files(&other.owner, &other.repo, other.pr_number)
                .await?;
            if !changed.iter().any(|f| item_files.contains(f.as_str())) {
                continue;
            }
            let other_diff = self
                .provider
                .get_pull_request_diff(&other.owner, &other.repo, other.pr_number)
                .await?;
            if diffs_overlap(&item_diff, &other_diff, self.config.conflict_buffer_lines) {
                conflicts.push(other.pr_number);
            }
        }

        if conflicts.is_empty() {
            return Ok(None);
        }
        let reason = format!(
            "overlaps changes from #{}",
            conflicts.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(", #")
        );
        Ok(Some((reason, conflicts)))
    }

    async fn set_status(&self, repository_id: &str, pr_number: i64, status: QueueItemStatus, reason: Option<String>) {
        let mut queues = self.queues.lock().await;
        if let Some(items) = queues.get_mut(repository_id) {
            if let Some(item) = items.iter_mut().find(|i| i.pr_number == pr_number) {
                item.status = status;
                item.failure_reason = reason.clone();
            }
        }
        drop(queues);
        self.notify(repository_id.to_string(), pr_number, status, reason).await;
    }

    async fn mark_ready(&self, repository_id: &str, pr_number: i64) {
        let mut queues = self.queues.lock().await;
        if let Some(items) = queues.get_mut(repository_id) {
            if let Some(item) = items.iter_mut().find(|i| i.pr_number == pr_number) {
                item.status = QueueItemStatus::Ready;
                item.failure_reason = None;
                item.conflicts_with.clear();
                item.checks_passed_at = Some(chrono::Utc::now());
            }
        }
        drop(queues);
        self.notify(repository_id.to_string(), pr_number, QueueItemStatus::Ready, None).await;
    }

    async fn set_conflict(&self, repository_id: &str, pr_number: i64, reason: String, with: Vec<i64>) {
        let mut queues = self.queues.lock().await;
        if let Some(items) = queues.get_mut(repository_id) {
            if let Some(item) = items.iter_mut().find(|i| i.pr_number == pr_number) {
                item.status = QueueItemStatus::Conflicted;
                item.failure_reason = Some(reason.clone());
                item.conflicts_with = with;
            }
        }
        drop(queues);
        self.notify(repository_id.to_string(), pr_number, QueueItemStatus::Conflicted, Some(reason))
            .await;
    }

    async fn mark_merged(&self, repository_id: &str, pr_number: i64) {
        {
            let mut queues = self.queues.lock().await;
            if let Some(items) = queues.get_mut(repository_id) {
                if let Some(item) = items.iter_mut().find(|i| i.pr_number == pr_number) {
                    item.status = QueueItemStatus::Merged;
                    item.merged_at = Some(chrono::Utc::now());
                }
                items.retain(|i| i.pr_number != pr_number);
                recompute_positions(items);
            }
        }
        self.notify(repository_id.to_string(), pr_number, QueueItemStatus::Merged, None)
            .await;
    }

    async fn notify(&self, repository_id: String, pr_number: i64, status: QueueItemStatus, reason: Option<String>) {
        self.events
            .notify(ObservabilityEvent::QueueItemStatusChanged {
                repository_id,
                pr_number,
                status,
                reason,
            })
            .await;
    }
}

fn recompute_positions(items: &mut [MergeQueueItem]) {
    items.sort_by_key(|i| i.order_score());
    for (idx, item) in items.iter_mut().enumerate() {
        item.position = (idx + 1) as u32;
    }
}

fn diffs_overlap(a: &PullRequestDiff, b: &PullRequestDiff, buffer_lines: u32) -> bool {
    let buffer = i64::from(buffer_lines);
    for fa in &a.files {
        for fb in &b.files {
            if fa.filename != fb.filename {
                continue;
            }
            let (Some(pa), Some(pb)) = (&fa.patch, &fb.patch) else {
                continue;
            };
            for &(a_start, a_end) in &parse_hunk_ranges(pa) {
                for &(b_start, b_end) in &parse_hunk_ranges(pb) {
                    if a_start <= b_end + buffer && b_start <= a_end + buffer {
                        return true;
                    }
                }
            }
        }
    }
    false
}

/// Extracts `[start, start+len-1]` new-file line ranges from unified-diff
/// hunk headers (`@@ -a,b +c,d @@`); a missing `,len` means a one-line hunk.
fn parse_hunk_ranges(patch: &str) -> Vec<(i64, i64)> {
    let mut ranges = Vec::new();
    for line in patch.lines() {
        if !line.starts_with("@@ -") {
            continue;
        }
        let Some(plus) = line.find('+') else { continue };
        let rest = &line[plus + 1..];
        let Some(end) = rest.find(' ') else { continue };
        let spec = &rest[..end];
        let mut parts = spec.splitn(2, ',');
        let Some(start) = parts.next().and_then(|s| s.parse::<i64>().ok()) else {
            continue;
        };
        let len = parts.next().and_then(|s| s.parse::<i64>().ok()).unwrap_or(1);
        if len == 0 {
            continue;
        }
        ranges.push((start, start + len - 1));
    }
    ranges
}
