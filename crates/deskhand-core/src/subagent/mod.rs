//! Sub-agent task orchestration: admission control, timeouts, cancellation,
//! and status broadcasting for delegated units of work.

pub mod context;
pub mod orchestrator;
pub mod ports;
pub mod timeout;

pub use context::{SubAgentContext, SubAgentStatus};
pub use orchestrator::{OrchestratorLimits, SpawnResult, TaskOrchestrator, TaskSummary};
pub use ports::{Broadcaster, ChannelBroadcaster, Executor, FnExecutor, LogBroadcaster};
pub use timeout::{race_timeout, RaceOutcome};
