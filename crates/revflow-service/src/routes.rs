use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::{http::StatusCode, Json};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};

use revflow_core::error::CoreError;
use revflow_core::provider::ProviderFacade as _;
use revflow_core::types::{MergeQueueItem, QueueItemStatus, Workflow, WorkflowStatus};

use crate::AppState;

/// Shape GitHub actually sends for `pull_request` webhook deliveries,
/// trimmed to the fields the orchestrator needs to open a workflow.
#[derive(Debug, Deserialize)]
pub struct PullRequestWebhook {
    action: String,
    number: i64,
    pull_request: WebhookPullRequest,
    repository: WebhookRepository,
}

#[derive(Debug, Deserialize)]
struct WebhookPullRequest {
    title: String,
    user: WebhookUser,
    head: WebhookRef,
}

#[derive(Debug, Deserialize)]
struct WebhookUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct WebhookRef {
    sha: String,
    #[serde(rename = "ref")]
    git_ref: String,
}

#[derive(Debug, Deserialize)]
struct WebhookRepository {
    name: String,
    owner: WebhookUser,
}

const RELEVANT_ACTIONS: &[&str] = &["opened", "reopened", "synchronize", "ready_for_review"];

pub async fn webhook_pr(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PullRequestWebhook>,
) -> impl IntoResponse {
    if !RELEVANT_ACTIONS.contains(&payload.action.as_str()) {
        return (StatusCode::OK, Json(json!({ "ignored": payload.action }))).into_response();
    }

    let owner = payload.repository.owner.login;
    let repo = payload.repository.name;
    let repository_id = format!("{owner}/{repo}");

    let workflow = Workflow {
        id: 0,
        repository_id,
        pr_number: payload.number,
        owner,
        repo,
        head_sha: payload.pull_request.head.sha,
        branch: payload.pull_request.head.git_ref,
        author: payload.pull_request.user.login,
        title: payload.pull_request.title,
        status: WorkflowStatus::Pending,
        check_run_id: None,
        last_error: None,
        created_at: chrono::Utc::now(),
        started_at: None,
        completed_at: None,
    };

    let workflow_id = match state.store.insert_workflow(&workflow).await {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(error = %e, "failed to record workflow from webhook");
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response();
        }
    };

    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::spawn(async move {
        if let Err(e) = orchestrator.run_workflow(workflow_id).await {
            tracing::warn!(workflow_id, error = %e, "workflow run failed");
        }
    });

    (StatusCode::ACCEPTED, Json(json!({ "workflow_id": workflow_id }))).into_response()
}

/// Body for `POST /queue`: which PR to submit for gated merging.
#[derive(Debug, Deserialize)]
pub struct QueueSubmission {
    owner: String,
    repo: String,
    pr_number: i64,
    #[serde(default)]
    priority: i64,
}

fn error_status(e: &CoreError) -> StatusCode {
    match e {
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CoreError::StateConflict(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn queue_submit(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<QueueSubmission>,
) -> impl IntoResponse {
    // The base branch comes from the provider, not the caller; a stale
    // client cannot enqueue against the wrong base.
    let pr = match state
        .provider
        .get_pull_request(&payload.owner, &payload.repo, payload.pr_number)
        .await
    {
        Ok(pr) => pr,
        Err(e) => return (error_status(&e), Json(json!({ "error": e.to_string() }))).into_response(),
    };

    let item = MergeQueueItem {
        repository_id: format!("{}/{}", payload.owner, payload.repo),
        owner: payload.owner,
        repo: payload.repo,
        pr_number: payload.pr_number,
        base_branch: pr.base_ref,
        status: QueueItemStatus::Queued,
        position: 0,
        priority: payload.priority,
        added_at_ms: chrono::Utc::now().timestamp_millis(),
        checks_passed_at: None,
        merged_at: None,
        failure_reason: None,
        conflicts_with: vec![],
    };

    match state.merge_queue.add(item).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({ "queued": payload.pr_number }))).into_response(),
        Err(e) => (error_status(&e), Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

pub async fn remediate(
    State(state): State<Arc<AppState>>,
    axum::extract::Path(workflow_id): axum::extract::Path<i64>,
) -> impl IntoResponse {
    let plan = match state.remediation.plan(workflow_id).await {
        Ok(plan) => plan,
        Err(e) => return (error_status(&e), Json(json!({ "error": e.to_string() }))).into_response(),
    };
    match state.remediation.execute(workflow_id, &plan).await {
        Ok(result) => (StatusCode::OK, Json(json!({ "plan": plan, "result": result }))).into_response(),
        Err(e) => (error_status(&e), Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

pub async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store_reachable = state.store.ping().await.is_ok();
    let uptime_s = state.start_time.elapsed().as_secs();
    let status = if store_reachable { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(json!({
            "status": if store_reachable { "ok" } else { "degraded" },
            "uptime_s": uptime_s,
            "store_reachable": store_reachable,
        })),
    )
}

/// SSE tail for operators: workflow/queue/remediation status events
/// (`event: status`) interleaved with the mirrored log tail (`event: log`).
pub async fn events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let (history, mut live_rx) = state.events.subscribe().await;
    let (log_backlog, mut log_rx) = state.log_tail.subscribe();
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Event>();

    let status_tx = tx.clone();
    tokio::spawn(async move {
        for event in history {
            if let Ok(json) = serde_json::to_string(&event) {
                let _ = status_tx.send(Event::default().event("status").data(json));
            }
        }
        while let Ok(event) = live_rx.recv().await {
            if let Ok(json) = serde_json::to_string(&event) {
                if status_tx.send(Event::default().event("status").data(json)).is_err() {
                    break;
                }
            }
        }
    });
    tokio::spawn(async move {
        for line in log_backlog {
            if let Ok(json) = serde_json::to_string(&line) {
                let _ = tx.send(Event::default().event("log").data(json));
            }
        }
        while let Ok(line) = log_rx.recv().await {
            if let Ok(json) = serde_json::to_string(&line) {
                if tx.send(Event::default().event("log").data(json)).is_err() {
                    break;
                }
            }
        }
    });

    let stream = UnboundedReceiverStream::new(rx).map(Ok::<_, std::convert::Infallible>);
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("ping"))
}
