use async_trait::async_trait;
use base64::Engine;
use revflow_core::error::CoreError;
use revflow_core::provider::ProviderFacade;
use revflow_core::types::{
    CheckConclusion, CheckRun, CheckState, CombinedStatus, CompareResult, FileDiff, MergeMethod,
    ProviderReview, PullRequest, PullRequestDiff, ReviewState,
};
use revflow_core::CoreResult;
use serde_json::{json, Value};

/// Talks to the real GitHub REST v3 API. Every method wraps exactly one
/// endpoint and maps its JSON body onto the core's typed shapes; nothing
/// here does pagination, caching or retries beyond what `reqwest` gives
/// for free, the same way `CourtListenerClient` only ever wraps one call
/// per method.
pub struct GithubProvider {
    http: reqwest::Client,
    token: String,
}

const BASE: &str = "https://api.github.com";

impl GithubProvider {
    pub fn new(token: String) -> Self {
        Self {
            http: reqwest::Client::builder()
                .user_agent("revflow-service/0.1")
                .build()
                .unwrap_or_default(),
            token,
        }
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn get_json(&self, url: &str) -> CoreResult<Value> {
        let resp = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(|e| CoreError::provider(format!("GET {url}: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CoreError::provider(format!("GET {url} returned {status}: {body}")));
        }
        resp.json()
            .await
            .map_err(|e| CoreError::provider(format!("GET {url} malformed body: {e}")))
    }

    async fn send_json(&self, method: reqwest::Method, url: &str, body: &Value) -> CoreResult<Value> {
        let resp = self
            .request(method.clone(), url)
            .json(body)
            .send()
            .await
            .map_err(|e| CoreError::provider(format!("{method} {url}: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(CoreError::provider(format!("{method} {url} returned {status}: {text}")));
        }
        resp.json()
            .await
            .map_err(|e| CoreError::provider(format!("{method} {url} malformed body: {e}")))
    }
}

fn check_state(raw: &str) -> CheckState {
    match raw {
        "success" => CheckState::Success,
        "failure" | "error" => CheckState::Failure,
        "pending" | "in_progress" | "queued" => CheckState::Pending,
        _ => CheckState::Neutral,
    }
}

fn review_state(raw: &str) -> ReviewState {
    match raw {
        "APPROVED" => ReviewState::Approved,
        "CHANGES_REQUESTED" => ReviewState::ChangesRequested,
        "COMMENTED" => ReviewState::Commented,
        _ => ReviewState::Pending,
    }
}

#[async_trait]
impl ProviderFacade for GithubProvider {
    async fn get_pull_request(&self, owner: &str, repo: &str, number: i64) -> CoreResult<PullRequest> {
        let v = self.get_json(&format!("{BASE}/repos/{owner}/{repo}/pulls/{number}")).await?;
        Ok(PullRequest {
            number,
            title: v["title"].as_str().unwrap_or_default().to_string(),
            body: v["body"].as_str().unwrap_or_default().to_string(),
            author: v["user"]["login"].as_str().unwrap_or_default().to_string(),
            head_sha: v["head"]["sha"].as_str().unwrap_or_default().to_string(),
            head_ref: v["head"]["ref"].as_str().unwrap_or_default().to_string(),
            base_ref: v["base"]["ref"].as_str().unwrap_or_default().to_string(),
            draft: v["draft"].as_bool().unwrap_or(false),
            open: v["state"].as_str() == Some("open"),
        })
    }

    async fn get_pull_request_diff(&self, owner: &str, repo: &str, number: i64) -> CoreResult<PullRequestDiff> {
        let v = self.get_json(&format!("{BASE}/repos/{owner}/{repo}/pulls/{number}/files?per_page=100")).await?;
        let items = v.as_array().cloned().unwrap_or_default();
        let mut total_additions = 0;
        let mut total_deletions = 0;
        let files = items
            .into_iter()
            .map(|f| {
                let additions = f["additions"].as_i64().unwrap_or(0);
                let deletions = f["deletions"].as_i64().unwrap_or(0);
                total_additions += additions;
                total_deletions += deletions;
                FileDiff {
                    filename: f["filename"].as_str().unwrap_or_default().to_string(),
                    status: f["status"].as_str().unwrap_or_default().to_string(),
                    additions,
                    deletions,
                    patch: f["patch"].as_str().map(str::to_string),
                }
            })
            .collect();
        Ok(PullRequestDiff { files, total_additions, total_deletions })
    }

    async fn get_changed_files(&self, owner: &str, repo: &str, number: i64) -> CoreResult<Vec<String>> {
        let v = self.get_json(&format!("{BASE}/repos/{owner}/{repo}/pulls/{number}/files?per_page=100")).await?;
        let items = v.as_array().cloned().unwrap_or_default();
        Ok(items
            .into_iter()
            .filter_map(|f| f["filename"].as_str().map(str::to_string))
            .collect())
    }

    async fn get_combined_status(&self, owner: &str, repo: &str, sha: &str) -> CoreResult<CombinedStatus> {
        let v = self.get_json(&format!("{BASE}/repos/{owner}/{repo}/commits/{sha}/status")).await?;
        Ok(CombinedStatus { state: check_state(v["state"].as_str().unwrap_or("pending")) })
    }

    async fn get_check_runs(&self, owner: &str, repo: &str, sha: &str) -> CoreResult<Vec<CheckRun>> {
        let v = self.get_json(&format!("{BASE}/repos/{owner}/{repo}/commits/{sha}/check-runs")).await?;
        let runs = v["check_runs"].as_array().cloned().unwrap_or_default();
        Ok(runs
            .into_iter()
            .map(|r| {
                let conclusion = r["conclusion"]
                    .as_str()
                    .or_else(|| r["status"].as_str())
                    .unwrap_or("pending");
                CheckRun {
                    name: r["name"].as_str().unwrap_or_default().to_string(),
                    conclusion: check_state(conclusion),
                }
            })
            .collect())
    }

    async fn get_reviews(&self, owner: &str, repo: &str, number: i64) -> CoreResult<Vec<ProviderReview>> {
        let v = self.get_json(&format!("{BASE}/repos/{owner}/{repo}/pulls/{number}/reviews?per_page=100")).await?;
        let items = v.as_array().cloned().unwrap_or_default();
        Ok(items
            .into_iter()
            .map(|r| ProviderReview {
                reviewer: r["user"]["login"].as_str().unwrap_or_default().to_string(),
                state: review_state(r["state"].as_str().unwrap_or("PENDING")),
                submitted_at: r["submitted_at"]
                    .as_str()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(chrono::Utc::now),
            })
            .collect())
    }

    async fn compare_branches(&self, owner: &str, repo: &str, base: &str, head: &str) -> CoreResult<CompareResult> {
        let v = self.get_json(&format!("{BASE}/repos/{owner}/{repo}/compare/{base}...{head}")).await?;
        Ok(CompareResult {
            behind_by: v["behind_by"].as_u64().unwrap_or(0) as u32,
            ahead_by: v["ahead_by"].as_u64().unwrap_or(0) as u32,
        })
    }

    async fn update_branch(&self, owner: &str, repo: &str, number: i64) -> CoreResult<()> {
        let url = format!("{BASE}/repos/{owner}/{repo}/pulls/{number}/update-branch");
        self.send_json(reqwest::Method::PUT, &url, &json!({})).await?;
        Ok(())
    }

    async fn merge_pull_request(&self, owner: &str, repo: &str, number: i64, method: MergeMethod) -> CoreResult<String> {
        let merge_method = match method {
            MergeMethod::Merge => "merge",
            MergeMethod::Squash => "squash",
            MergeMethod::Rebase => "rebase",
        };
        let url = format!("{BASE}/repos/{owner}/{repo}/pulls/{number}/merge");
        let v = self.send_json(reqwest::Method::PUT, &url, &json!({ "merge_method": merge_method })).await?;
        Ok(v["sha"].as_str().unwrap_or_default().to_string())
    }

    async fn create_check_run(&self, owner: &str, repo: &str, sha: &str, name: &str, body: &str) -> CoreResult<String> {
        let url = format!("{BASE}/repos/{owner}/{repo}/check-runs");
        let v = self
            .send_json(
                reqwest::Method::POST,
                &url,
                &json!({ "name": name, "head_sha": sha, "status": "in_progress", "output": { "title": name, "summary": body } }),
            )
            .await?;
        let id = v["id"].as_i64().ok_or_else(|| CoreError::provider("create_check_run: missing id"))?;
        Ok(id.to_string())
    }

    async fn complete_check_run(&self, owner: &str, repo: &str, check_run_id: &str, conclusion: CheckConclusion, title: &str, summary: &str) -> CoreResult<()> {
        let conclusion = match conclusion {
            CheckConclusion::Success => "success",
            CheckConclusion::ActionRequired => "action_required",
            CheckConclusion::Failure => "failure",
            CheckConclusion::Cancelled => "cancelled",
            CheckConclusion::Neutral => "neutral",
        };
        let url = format!("{BASE}/repos/{owner}/{repo}/check-runs/{check_run_id}");
        self.send_json(
            reqwest::Method::PATCH,
            &url,
            &json!({ "status": "completed", "conclusion": conclusion, "output": { "title": title, "summary": summary } }),
        )
        .await?;
        Ok(())
    }

    async fn post_summary_comment(&self, owner: &str, repo: &str, number: i64, body: &str) -> CoreResult<()> {
        let url = format!("{BASE}/repos/{owner}/{repo}/issues/{number}/comments");
        self.send_json(reqwest::Method::POST, &url, &json!({ "body": body })).await?;
        Ok(())
    }

    async fn post_review_comment(&self, owner: &str, repo: &str, number: i64, file: &str, line: i64, body: &str) -> CoreResult<()> {
        let pr = self.get_pull_request(owner, repo, number).await?;
        let url = format!("{BASE}/repos/{owner}/{repo}/pulls/{number}/comments");
        self.send_json(
            reqwest::Method::POST,
            &url,
            &json!({ "body": body, "commit_id": pr.head_sha, "path": file, "line": line, "side": "RIGHT" }),
        )
        .await?;
        Ok(())
    }

    async fn get_file_content(&self, owner: &str, repo: &str, branch: &str, path: &str) -> CoreResult<String> {
        let url = format!("{BASE}/repos/{owner}/{repo}/contents/{path}?ref={branch}");
        let v = self.get_json(&url).await?;
        let encoded = v["content"].as_str().unwrap_or_default().replace('\n', "");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| CoreError::provider(format!("get_file_content: bad base64 for {path}: {e}")))?;
        String::from_utf8(decoded).map_err(|e| CoreError::provider(format!("get_file_content: non-utf8 {path}: {e}")))
    }

    async fn commit_file_change(&self, owner: &str, repo: &str, branch: &str, file: &str, content: &str, message: &str) -> CoreResult<String> {
        let existing = self
            .get_json(&format!("{BASE}/repos/{owner}/{repo}/contents/{file}?ref={branch}"))
            .await
            .ok();
        let sha = existing.as_ref().and_then(|v| v["sha"].as_str()).map(str::to_string);

        let encoded = base64::engine::general_purpose::STANDARD.encode(content.as_bytes());
        let mut payload = json!({ "message": message, "content": encoded, "branch": branch });
        if let Some(sha) = sha {
            payload["sha"] = json!(sha);
        }

        let url = format!("{BASE}/repos/{owner}/{repo}/contents/{file}");
        let v = self.send_json(reqwest::Method::PUT, &url, &payload).await?;
        v["commit"]["sha"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CoreError::provider("commit_file_change: missing commit sha"))
    }
}
