use std::sync::Arc;

use async_trait::async_trait;
use revflow_core::agent::{Agent, AgentContext, AgentOutput, AgentResult};
use revflow_core::types::{GeneratedTestFile, TestArtifact};
use serde::Deserialize;
use serde_json::Value;

use crate::ai::{extract_json, AiClient};
use crate::prompt::build_prompt;

const INSTRUCTION: &str = r#"## Task

Generate or extend tests that cover the behavior introduced by this
diff. Respond with a single JSON object, no prose, matching exactly:

{
  "files": [{"file": "...", "content": "..."}],
  "summary": "..."
}
"#;

#[derive(Deserialize)]
struct RawTests {
    #[serde(default)]
    files: Vec<GeneratedTestFile>,
    #[serde(default)]
    summary: String,
}

pub struct TestGeneratorAgent {
    ai: Arc<AiClient>,
}

impl TestGeneratorAgent {
    pub fn new(ai: Arc<AiClient>) -> Self {
        Self { ai }
    }
}

#[async_trait]
impl Agent for TestGeneratorAgent {
    fn name(&self) -> &'static str {
        "test_generator"
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
        let parsed: RawTests = match serde_json::from_value(json) {
            Ok(p) => p,
            Err(e) => return AgentResult::failed(format!("malformed test output: {e}"), 0),
        };

        AgentResult::ok(
            AgentOutput::Tests(TestArtifact {
                workflow_id: ctx.workflow_id,
                files: parsed.files,
                summary: parsed.summary,
            }),
            0,
        )
    }
}
