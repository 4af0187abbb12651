use std::sync::Arc;

use async_trait::async_trait;
use revflow_core::agent::{Agent, AgentContext, AgentOutput, AgentResult};
use revflow_core::types::{DocArtifact, DocUpdate};
use serde::Deserialize;
use serde_json::Value;

use crate::ai::{extract_json, AiClient};
use crate::prompt::build_prompt;

const INSTRUCTION: &str = r#"## Task

Identify documentation (README, doc comments, changelog entries) that is
now stale because of this diff, and propose updated content. Respond
with a single JSON object, no prose, matching exactly:

{
  "updates": [{"file": "...", "content": "..."}]
}

Return an empty list if nothing needs updating.
"#;

#[derive(Deserialize)]
struct RawDocs {
    #[serde(default)]
    updates: Vec<DocUpdate>,
}

pub struct DocUpdaterAgent {
    ai: Arc<AiClient>,
}

impl DocUpdaterAgent {
    pub fn new(ai: Arc<AiClient>) -> Self {
        Self { ai }
    }
}

#[async_trait]
impl Agent for DocUpdaterAgent {
    fn name(&self) -> &'static str {
        "doc_updater"
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
        let parsed: RawDocs = match serde_json::from_value(json) {
            Ok(p) => p,
            Err(e) => return AgentResult::failed(format!("malformed doc output: {e}"), 0),
        };

        AgentResult::ok(
            AgentOutput::Docs(DocArtifact {
                workflow_id: ctx.workflow_id,
                updates: parsed.updates,
            }),
            0,
        )
    }
}
