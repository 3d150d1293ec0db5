use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub orchestrator: OrchestratorConfig,
    pub executor: ExecutorConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Reject settings the orchestrator cannot run with.
    pub fn validate(&self) -> Result<()> {
        let o = &self.orchestrator;
        if o.max_concurrent == 0 {
            bail!("orchestrator.maxConcurrent must be at least 1");
        }
        if o.min_timeout_ms == 0 {
            bail!("orchestrator.minTimeoutMs must be at least 1");
        }
        if o.min_timeout_ms > o.max_timeout_ms {
            bail!(
                "orchestrator.minTimeoutMs ({}) exceeds orchestrator.maxTimeoutMs ({})",
                o.min_timeout_ms,
                o.max_timeout_ms
            );
        }
        if o.default_timeout_ms < o.min_timeout_ms || o.default_timeout_ms > o.max_timeout_ms {
            bail!(
                "orchestrator.defaultTimeoutMs ({}) must be within [{}, {}]",
                o.default_timeout_ms,
                o.min_timeout_ms,
                o.max_timeout_ms
            );
        }
        if self.executor.max_output_chars == 0 {
            bail!("executor.maxOutputChars must be at least 1");
        }
        Ok(())
    }
}

/// Admission and timeout limits for sub-agent tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorConfig {
    /// Ceiling on simultaneously running sub-agents. Spawns past it are rejected.
    pub max_concurrent: usize,
    /// Applied when a spawn does not name a timeout.
    pub default_timeout_ms: u64,
    pub min_timeout_ms: u64,
    pub max_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            default_timeout_ms: 300_000,
            min_timeout_ms: 1_000,
            max_timeout_ms: 600_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutorConfig {
    pub workspace: String,
    pub shell: String,
    /// Block commands that reference absolute paths outside the workspace.
    pub restrict_to_workspace: bool,
    pub max_output_chars: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workspace: "~/.deskhand/workspace".into(),
            shell: "sh".into(),
            restrict_to_workspace: true,
            max_output_chars: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    /// Extra `tracing` filter directives appended to `RUST_LOG`
    /// (e.g. "deskhand_core::subagent=debug").
    pub filter: String,
}
