use std::sync::Arc;

use async_trait::async_trait;
use revflow_core::agent::{Agent, AgentContext, AgentOutput, AgentResult};
use revflow_core::types::{AnalysisArtifact, ChangeClassification, ImpactRadius, RiskLevel, SemanticChange};
use serde::Deserialize;
use serde_json::Value;

use crate::ai::{extract_json, AiClient};
use crate::prompt::build_prompt;

const INSTRUCTION: &str = r#"## Task

Classify this change and assess its risk. Respond with a single JSON
object, no prose, matching exactly:

{
  "classification": "feature|bugfix|refactor|docs|chore|test|deps",
  "risk": "low|medium|high|critical",
  "semantic_changes": [{"kind": "...", "symbol": "...", "file": "...", "impact": "..."}],
  "impact_radius": {"direct_files": ["..."], "transitive_files": ["..."]},
  "risk_factors": ["..."],
  "suggested_reviewers": ["..."]
}
"#;

#[derive(Deserialize)]
struct RawAnalysis {
    classification: ChangeClassification,
    risk: RiskLevel,
    #[serde(default)]
    semantic_changes: Vec<SemanticChange>,
    #[serde(default)]
    impact_radius: ImpactRadius,
    #[serde(default)]
    risk_factors: Vec<String>,
    #[serde(default)]
    suggested_reviewers: Vec<String>,
}

pub struct AnalyzerAgent {
    ai: Arc<AiClient>,
}

impl AnalyzerAgent {
    pub fn new(ai: Arc<AiClient>) -> Self {
        Self { ai }
    }
}

#[async_trait]
impl Agent for AnalyzerAgent {
    fn name(&self) -> &'static str {
        "analyzer"
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
        let parsed: RawAnalysis = match serde_json::from_value(json) {
            Ok(p) => p,
            Err(e) => return AgentResult::failed(format!("malformed analysis: {e}"), 0),
        };

        AgentResult::ok(
            AgentOutput::Analysis(AnalysisArtifact {
                workflow_id: ctx.workflow_id,
                classification: parsed.classification,
                risk: parsed.risk,
                files_changed: ctx.diff.files.len() as i64,
                additions: ctx.diff.total_additions,
                deletions: ctx.diff.total_deletions,
                semantic_changes: parsed.semantic_changes,
                impact_radius: parsed.impact_radius,
                risk_factors: parsed.risk_factors,
                suggested_reviewers: parsed.suggested_reviewers,
            }),
            0,
        )
    }
}
