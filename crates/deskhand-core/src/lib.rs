pub mod error;
pub mod subagent;
pub mod tools;

// Re-export key types
pub use error::SpawnError;
pub use subagent::{
    Broadcaster, Executor, SpawnResult, SubAgentContext, SubAgentStatus, TaskOrchestrator,
};
pub use tools::Tool;
