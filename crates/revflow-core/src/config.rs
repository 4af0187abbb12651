use std::collections::HashMap;
use std::str::FromStr;

use crate::types::{CommitStrategy, MergeMethod, MergeQueueConfig, RemediationConfig};

/// Full application configuration loaded from environment / `.env` file.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub github_token: String,
    pub ai_provider_url: String,
    pub ai_model: String,
    pub ai_api_key: String,

    pub web_bind: String,
    pub web_port: u16,

    pub agent_timeout_s: u64,
    pub max_concurrent_workflows: u32,

    pub merge_queue: MergeQueueConfig,
    pub remediation: RemediationConfig,

    pub session_ttl_minutes: u64,
}

/// Key/value source merging the process environment with an optional
/// `.env` file in the working directory; real environment variables win.
struct Env {
    dotenv: HashMap<String, String>,
}

impl Env {
    fn load() -> Self {
        let mut dotenv = HashMap::new();
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let Some((key, value)) = line.split_once('=') else { continue };
                dotenv.insert(key.trim().to_string(), value.trim().trim_matches('"').to_string());
            }
        }
        Self { dotenv }
    }

    fn raw(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().or_else(|| self.dotenv.get(key).cloned())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or_else(|| default.to_string())
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.raw(key).map(|v| v.to_ascii_lowercase()).as_deref() {
            Some("true" | "1" | "yes" | "on") => true,
            Some("false" | "0" | "no" | "off") => false,
            _ => default,
        }
    }

    /// Typed lookup; an unset or unparsable value falls back to the default
    /// rather than failing startup.
    fn parse<T: FromStr>(&self, key: &str, default: T) -> T {
        self.raw(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }
}

fn merge_method(raw: &str) -> MergeMethod {
    match raw {
        "merge" => MergeMethod::Merge,
        "rebase" => MergeMethod::Rebase,
        _ => MergeMethod::Squash,
    }
}

fn commit_strategy(raw: &str) -> CommitStrategy {
    match raw {
        "per-phase" => CommitStrategy::PerPhase,
        "per-file" => CommitStrategy::PerFile,
        _ => CommitStrategy::Single,
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let env = Env::load();

        let merge_queue = MergeQueueConfig {
            enabled: env.flag("MERGE_QUEUE_ENABLED", true),
            auto_merge_enabled: env.flag("MERGE_QUEUE_AUTO_MERGE", false),
            require_approvals: env.parse("MERGE_QUEUE_REQUIRE_APPROVALS", 1),
            require_checks: env.flag("MERGE_QUEUE_REQUIRE_CHECKS", true),
            require_up_to_date: env.flag("MERGE_QUEUE_REQUIRE_UP_TO_DATE", true),
            check_conflicts: env.flag("MERGE_QUEUE_CHECK_CONFLICTS", true),
            auto_resolve_conflicts: env.flag("MERGE_QUEUE_AUTO_RESOLVE_CONFLICTS", false),
            merge_method: merge_method(&env.string("MERGE_QUEUE_MERGE_METHOD", "squash")),
            batch_size: env.parse("MERGE_QUEUE_BATCH_SIZE", 1),
            max_wait_time_minutes: env.parse("MERGE_QUEUE_MAX_WAIT_MINUTES", 60),
            conflict_buffer_lines: env.parse("MERGE_QUEUE_CONFLICT_BUFFER_LINES", 3),
        };

        let remediation = RemediationConfig {
            auto_apply_threshold: env.parse("REMEDIATION_AUTO_APPLY_THRESHOLD", 0.8),
            skip_breaking_changes: env.flag("REMEDIATION_SKIP_BREAKING_CHANGES", true),
            commit_strategy: commit_strategy(&env.string("REMEDIATION_COMMIT_STRATEGY", "single")),
            trigger_reanalysis: env.flag("REMEDIATION_TRIGGER_REANALYSIS", true),
            dry_run: env.flag("REMEDIATION_DRY_RUN", false),
            ..RemediationConfig::default()
        };

        Ok(Config {
            database_url: env.string("DATABASE_URL", "postgres://localhost/revflow"),
            github_token: env.string("GITHUB_TOKEN", ""),
            ai_provider_url: env.string("AI_PROVIDER_URL", "http://localhost:11434"),
            ai_model: env.string("AI_MODEL", "llama3"),
            ai_api_key: env.string("AI_API_KEY", ""),
            web_bind: env.string("WEB_BIND", "127.0.0.1"),
            web_port: env.parse("WEB_PORT", 3737),
            agent_timeout_s: env.parse("AGENT_TIMEOUT_S", 300),
            max_concurrent_workflows: env.parse("MAX_CONCURRENT_WORKFLOWS", 8),
            merge_queue,
            remediation,
            session_ttl_minutes: env.parse("SESSION_TTL_MINUTES", 30),
        })
    }
}
