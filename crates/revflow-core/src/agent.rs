use async_trait::async_trait;
use serde_json::Value;
use std::time::{Duration, Instant};

use crate::types::{AnalysisArtifact, DocArtifact, PullRequest, PullRequestDiff, ReviewArtifact, SynthesisArtifact, TestArtifact};

/// Everything an agent needs that isn't part of its own typed input: the
/// provider-fetched PR and diff, plus whatever upstream artifacts already
/// exist for this workflow run. Agents never reach out to collaborators
/// directly; everything they need is handed to them here.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub workflow_id: i64,
    pub pr: PullRequest,
    pub diff: PullRequestDiff,
    pub analysis: Option<AnalysisArtifact>,
    pub review: Option<ReviewArtifact>,
    pub tests: Option<TestArtifact>,
    pub docs: Option<DocArtifact>,
}

/// Typed output carried by any agent. Kept as a tagged union rather than a
/// generic so the registry can hold heterogeneous agents behind one trait
/// object and the orchestrator can persist whichever variant it receives.
#[derive(Debug, Clone)]
pub enum AgentOutput {
    Analysis(AnalysisArtifact),
    Review(ReviewArtifact),
    Tests(TestArtifact),
    Docs(DocArtifact),
    Synthesis(SynthesisArtifact),
}

/// Uniform result envelope every agent invocation produces. Agents never
/// propagate an `Err` for expected failure modes (model refused, malformed
/// response, upstream 4xx) — those become `success: false` with a message
/// instead. A hard `Err` is reserved for invocations the orchestrator
/// itself could not even attempt (e.g. the agent panicked inside
/// `tokio::spawn` and the join handle failed).
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub success: bool,
    pub data: Option<AgentOutput>,
    pub error: Option<String>,
    pub latency_ms: u64,
}

impl AgentResult {
    pub fn failed(error: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            latency_ms,
        }
    }

    pub fn ok(data: AgentOutput, latency_ms: u64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            latency_ms,
        }
    }
}

/// A single-purpose unit that produces one kind of artifact from PR inputs.
/// Implementors must not panic and must not perform any I/O beyond calling
/// into the AI client they were constructed with — everything else is
/// passed in through `AgentContext` so they stay unit-testable against
/// stub collaborators.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &AgentContext, extra: &Value) -> AgentResult;
}

/// Wraps a concrete agent's `run` with latency measurement at the call
/// site rather than inside each implementation.
pub async fn run_timed(agent: &dyn Agent, ctx: &AgentContext, extra: &Value) -> AgentResult {
    let start = Instant::now();
    let mut result = agent.run(ctx, extra).await;
    result.latency_ms = elapsed_ms(start);
    result
}

fn elapsed_ms(start: Instant) -> u64 {
    let d: Duration = start.elapsed();
    d.as_millis() as u64
}

/// Resolves agents by name so the orchestrator can look one up per stage
/// without knowing the concrete type behind it.
#[derive(Default)]
pub struct AgentRegistry {
    agents: std::collections::HashMap<&'static str, std::sync::Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: std::collections::HashMap::new(),
        }
    }

    pub fn register(&mut self, agent: std::sync::Arc<dyn Agent>) {
        self.agents.insert(agent.name(), agent);
    }

    pub fn get(&self, name: &str) -> Option<std::sync::Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }
}
