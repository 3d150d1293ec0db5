use std::future::Future;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::context::{SubAgentContext, SubAgentStatus};

/// Performs the work of a sub-agent task.
///
/// There is no cancel method. When the orchestrator times out or cancels a
/// task it stops waiting and drops the result; releasing whatever the abandoned
/// call holds is the implementor's job.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, instructions: &str, input: Option<&str>) -> Result<String>;
}

/// Observer notified with a snapshot on every status change.
///
/// Called while the orchestrator holds its table lock: implementations must
/// return quickly and must not call back into the orchestrator.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, snapshot: SubAgentContext);
}

impl<F> Broadcaster for F
where
    F: Fn(SubAgentContext) + Send + Sync,
{
    fn broadcast(&self, snapshot: SubAgentContext) {
        self(snapshot)
    }
}

/// Adapts an async closure to [`Executor`].
pub struct FnExecutor<F> {
    f: F,
}

impl<F, Fut> FnExecutor<F>
where
    F: Fn(String, Option<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Executor for FnExecutor<F>
where
    F: Fn(String, Option<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    async fn execute(&self, instructions: &str, input: Option<&str>) -> Result<String> {
        (self.f)(instructions.to_string(), input.map(str::to_string)).await
    }
}

/// Forwards snapshots over an unbounded channel, e.g. to the UI bridge.
pub struct ChannelBroadcaster {
    tx: mpsc::UnboundedSender<SubAgentContext>,
}

impl ChannelBroadcaster {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SubAgentContext>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn broadcast(&self, snapshot: SubAgentContext) {
        if self.tx.send(snapshot).is_err() {
            debug!("Sub-agent update dropped: receiver closed");
        }
    }
}

/// Logs every transition through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogBroadcaster;

impl Broadcaster for LogBroadcaster {
    fn broadcast(&self, snapshot: SubAgentContext) {
        match snapshot.status {
            SubAgentStatus::Failed | SubAgentStatus::Timeout => warn!(
                task_id = %snapshot.id,
                status = %snapshot.status,
                error = snapshot.error.as_deref().unwrap_or(""),
                "Sub-agent status changed"
            ),
            _ => info!(
                task_id = %snapshot.id,
                status = %snapshot.status,
                duration_ms = snapshot.duration_ms(),
                "Sub-agent status changed"
            ),
        }
    }
}
