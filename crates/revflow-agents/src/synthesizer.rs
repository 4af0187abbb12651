use std::sync::Arc;

use async_trait::async_trait;
use revflow_core::agent::{Agent, AgentContext, AgentOutput, AgentResult};
use revflow_core::types::SynthesisArtifact;
use serde::Deserialize;
use serde_json::Value;

use crate::ai::{extract_json, AiClient};
use crate::prompt::build_prompt;

const INSTRUCTION: &str = r#"## Task

Summarize the analysis, review comments, generated tests and doc updates
above into a short human-readable summary and a merge recommendation.
Respond with a single JSON object, no prose, matching exactly:

{
  "summary": "...",
  "recommendation": "..."
}
"#;

#[derive(Deserialize)]
struct RawSynthesis {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    recommendation: String,
}

pub struct SynthesizerAgent {
    ai: Arc<AiClient>,
}

impl SynthesizerAgent {
    pub fn new(ai: Arc<AiClient>) -> Self {
        Self { ai }
    }
}

#[async_trait]
impl Agent for SynthesizerAgent {
    fn name(&self) -> &'static str {
        "synthesizer"
    }

    async fn run(&self, ctx: &AgentContext, extra: &Value) -> AgentResult {
        let mut tail = String::new();
        if let Some(tests) = &ctx.tests {
            tail.push_str(&format!("\n## Generated Tests\n\n{} file(s): {}\n", tests.files.len(), tests.summary));
        }
        if let Some(docs) = &ctx.docs {
            tail.push_str(&format!("\n## Doc Updates\n\n{} file(s) updated\n", docs.updates.len()));
        }

        let instruction = format!("{INSTRUCTION}{tail}");
        let prompt = build_prompt(ctx, &instruction, extra);
        let raw = match self.ai.call(&prompt).await {
            Ok(r) => r,
            Err(e) => return AgentResult::failed(e.to_string(), 0),
        };
        let Some(json) = extract_json(&raw) else {
            return AgentResult::failed("model did not return a JSON object", 0);
        };
        let parsed: RawSynthesis = match serde_json::from_value(json) {
            Ok(p) => p,
            Err(e) => return AgentResult::failed(format!("malformed synthesis: {e}"), 0),
        };

        AgentResult::ok(
            AgentOutput::Synthesis(SynthesisArtifact {
                workflow_id: ctx.workflow_id,
                summary: parsed.summary,
                recommendation: parsed.recommendation,
            }),
            0,
        )
    }
}
