use std::sync::Arc;

use async_trait::async_trait;
use revflow_core::agent::{Agent, AgentContext, AgentOutput, AgentResult};
use revflow_core::types::{CodeSuggestion, CommentCategory, CommentStatus, ReviewArtifact, ReviewComment, Severity};
use serde::Deserialize;
use serde_json::Value;

use crate::ai::{extract_json, AiClient};
use crate::prompt::build_prompt;

const INSTRUCTION: &str = r#"## Task

Review this diff for bugs, security issues, performance problems, error
handling gaps, style and maintainability concerns. Respond with a single
JSON object, no prose, matching exactly:

{
  "comments": [
    {
      "file": "...",
      "line": 0,
      "severity": "nitpick|low|medium|high|critical",
      "category": "security|bug|performance|error_handling|style|maintainability",
      "message": "...",
      "suggestion": {"original_code": "...", "suggested_code": "..."},
      "confidence": 0.0
    }
  ]
}

Omit "suggestion" for comments that have no concrete fix.
"#;

#[derive(Deserialize)]
struct RawComment {
    file: String,
    line: i64,
    severity: Severity,
    category: CommentCategory,
    message: String,
    #[serde(default)]
    suggestion: Option<CodeSuggestion>,
    #[serde(default)]
    confidence: f64,
}

#[derive(Deserialize)]
struct RawReview {
    #[serde(default)]
    comments: Vec<RawComment>,
}

pub struct ReviewerAgent {
    ai: Arc<AiClient>,
}

impl ReviewerAgent {
    pub fn new(ai: Arc<AiClient>) -> Self {
        Self { ai }
    }
}

#[async_trait]
impl Agent for ReviewerAgent {
    fn name(&self) -> &'static str {
        "reviewer"
    }

    async fn run(&self, ctx: &AgentContext, extra: &Value) -> AgentResult {
        let prompt = build_prompt(ctx, INSTRUCTION, extra);
        let raw = match self.ai.call(&prompt).await {
            Ok(r) => r,
            Err(e) => return AgentResult::failed(e.to_string(), 0),
        };
        let Some(json) = extract_json(&raw) else {
            return AgentResult::failed("model did not return a JSON object", 0);
        };
        let parsed: RawReview = match serde_json::from_value(json) {
            Ok(p) => p,
            Err(e) => return AgentResult::failed(format!("malformed review: {e}"), 0),
        };

        let comments = parsed
            .comments
            .into_iter()
            .map(|c| ReviewComment {
                id: 0,
                workflow_id: ctx.workflow_id,
                file: c.file,
                line: c.line,
                severity: c.severity,
                category: c.category,
                message: c.message,
                suggestion: c.suggestion,
                status: CommentStatus::Pending,
                confidence: c.confidence.clamp(0.0, 1.0),
            })
            .collect();

        AgentResult::ok(
            AgentOutput::Review(ReviewArtifact {
                workflow_id: ctx.workflow_id,
                comments,
            }),
            0,
        )
    }
}
