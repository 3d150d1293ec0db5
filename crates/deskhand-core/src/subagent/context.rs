use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a sub-agent task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SubAgentStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl SubAgentStatus {
    pub const ALL: [SubAgentStatus; 6] = [
        SubAgentStatus::Pending,
        SubAgentStatus::Running,
        SubAgentStatus::Completed,
        SubAgentStatus::Failed,
        SubAgentStatus::Cancelled,
        SubAgentStatus::Timeout,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            SubAgentStatus::Pending => "pending",
            SubAgentStatus::Running => "running",
            SubAgentStatus::Completed => "completed",
            SubAgentStatus::Failed => "failed",
            SubAgentStatus::Cancelled => "cancelled",
            SubAgentStatus::Timeout => "timeout",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "timeout" | "timed_out" => Some(Self::Timeout),
            _ => None,
        }
    }

    /// No transition leaves a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubAgentStatus::Completed
                | SubAgentStatus::Failed
                | SubAgentStatus::Cancelled
                | SubAgentStatus::Timeout
        )
    }
}

impl std::fmt::Display for SubAgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one spawned sub-agent task.
///
/// The orchestrator holds the only live copy; everything handed out is a clone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubAgentContext {
    pub id: String,
    pub instructions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    pub status: SubAgentStatus,
    pub timeout_ms: u64,
    pub created_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubAgentContext {
    /// Build a pending context. Callers validate `instructions` first.
    pub(crate) fn new(instructions: &str, input: Option<&str>, timeout_ms: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            instructions: instructions.trim().to_string(),
            input: input
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            status: SubAgentStatus::Pending,
            timeout_ms,
            created_at_ms: Utc::now().timestamp_millis(),
            started_at_ms: None,
            completed_at_ms: None,
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall-clock run time, once both ends are known.
    pub fn duration_ms(&self) -> Option<i64> {
        Some(self.completed_at_ms? - self.started_at_ms?)
    }

    /// `pending -> running`. Returns false for any other starting state.
    pub(crate) fn start(&mut self) -> bool {
        if self.status != SubAgentStatus::Pending {
            return false;
        }
        self.status = SubAgentStatus::Running;
        self.started_at_ms = Some(now_after(self.created_at_ms));
        true
    }

    pub(crate) fn complete(&mut self, result: String) -> bool {
        if self.status != SubAgentStatus::Running {
            return false;
        }
        self.result = Some(result);
        self.finish(SubAgentStatus::Completed);
        true
    }

    pub(crate) fn fail(&mut self, error: String) -> bool {
        if self.status != SubAgentStatus::Running {
            return false;
        }
        self.error = Some(error);
        self.finish(SubAgentStatus::Failed);
        true
    }

    pub(crate) fn time_out(&mut self, elapsed_ms: u64) -> bool {
        if self.status != SubAgentStatus::Running {
            return false;
        }
        self.error = Some(format!("Task timed out after {elapsed_ms}ms"));
        self.finish(SubAgentStatus::Timeout);
        true
    }

    /// `{pending, running} -> cancelled`.
    pub(crate) fn cancel(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.error = Some("cancelled".to_string());
        self.finish(SubAgentStatus::Cancelled);
        true
    }

    fn finish(&mut self, status: SubAgentStatus) {
        let floor = self.started_at_ms.unwrap_or(self.created_at_ms);
        self.status = status;
        self.completed_at_ms = Some(now_after(floor));
    }
}

// The system clock may step backwards; timestamps must not.
fn now_after(floor: i64) -> i64 {
    Utc::now().timestamp_millis().max(floor)
}
