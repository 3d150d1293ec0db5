use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::subagent::{SubAgentStatus, TaskOrchestrator};
use crate::tools::Tool;

/// Tool that lets the agent hand work to sub-agents and manage them.
pub struct DelegateTool {
    orchestrator: Arc<TaskOrchestrator>,
}

impl DelegateTool {
    pub fn new(orchestrator: Arc<TaskOrchestrator>) -> Self {
        Self { orchestrator }
    }

    async fn spawn(&self, params: &serde_json::Value) -> Result<String> {
        let instructions = params
            .get("instructions")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("missing required parameter: instructions"))?;
        let input = params.get("input").and_then(|v| v.as_str());
        let timeout_ms = match params.get("timeout_ms") {
            None | Some(serde_json::Value::Null) => None,
            Some(v) => Some(
                v.as_u64()
                    .ok_or_else(|| anyhow!("timeout_ms must be a non-negative integer"))?,
            ),
        };

        let result = self
            .orchestrator
            .spawn_task(instructions, input, timeout_ms)
            .await;
        Ok(serde_json::to_string_pretty(&result)?)
    }

    fn cancel(&self, params: &serde_json::Value) -> Result<String> {
        let id = task_id(params)?;
        if self.orchestrator.cancel_task(id) {
            Ok(format!("Sub-agent {id} cancelled."))
        } else {
            Ok(format!("Sub-agent {id} not found or already finished."))
        }
    }

    fn status(&self, params: &serde_json::Value) -> Result<String> {
        let id = task_id(params)?;
        match self.orchestrator.get_task(id) {
            Some(ctx) => Ok(serde_json::to_string_pretty(&ctx)?),
            None => Ok(format!("Error: sub-agent {id} not found")),
        }
    }

    fn list(&self, params: &serde_json::Value) -> Result<String> {
        let tasks = match params.get("status").and_then(|v| v.as_str()) {
            Some(s) => {
                let status = SubAgentStatus::from_str(s)
                    .ok_or_else(|| anyhow!("unknown status: {s}"))?;
                self.orchestrator.get_tasks_by_status(status)
            }
            None => self.orchestrator.get_all_tasks(),
        };
        if tasks.is_empty() {
            return Ok("No sub-agent tasks found.".into());
        }
        Ok(serde_json::to_string_pretty(&tasks)?)
    }
}

fn task_id(params: &serde_json::Value) -> Result<&str> {
    params
        .get("task_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("missing required parameter: task_id"))
}

#[async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> &str {
        "delegate"
    }

    fn description(&self) -> &str {
        "Delegate work to a sub-agent and manage running sub-agents.\n\
         Actions: spawn (run instructions and wait for the result), cancel, status, list, \
         summary, clear (remove finished tasks).\n\
         Only a few sub-agents may run at once; when the limit is reached spawn fails \
         and should be retried after a running task finishes."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["spawn", "cancel", "status", "list", "summary", "clear"],
                    "description": "Operation to perform"
                },
                "instructions": {
                    "type": "string",
                    "description": "What the sub-agent should do (spawn)"
                },
                "input": {
                    "type": "string",
                    "description": "Supplementary data for the sub-agent (spawn)"
                },
                "timeout_ms": {
                    "type": "integer",
                    "description": "Time limit in milliseconds (spawn)"
                },
                "task_id": {
                    "type": "string",
                    "description": "Sub-agent ID (cancel, status)"
                },
                "status": {
                    "type": "string",
                    "enum": ["pending", "running", "completed", "failed", "cancelled", "timeout"],
                    "description": "Filter by status (list)"
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        let action = params
            .get("action")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("missing required parameter: action"))?;

        match action {
            "spawn" => self.spawn(&params).await,
            "cancel" => self.cancel(&params),
            "status" => self.status(&params),
            "list" => self.list(&params),
            "summary" => Ok(serde_json::to_string_pretty(
                &self.orchestrator.get_summary(),
            )?),
            "clear" => {
                let removed = self.orchestrator.clear_finished_tasks();
                Ok(format!("Cleared {removed} finished sub-agent task(s)."))
            }
            other => Ok(format!("Error: unknown action '{other}'")),
        }
    }
}
