use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use deskhand_config::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use super::context::{SubAgentContext, SubAgentStatus};
use super::ports::{Broadcaster, Executor};
use super::timeout::{race_timeout, RaceOutcome};
use crate::error::SpawnError;

/// Admission and timeout limits, fixed for the life of an orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorLimits {
    pub max_concurrent: usize,
    pub default_timeout: Duration,
    pub min_timeout: Duration,
    pub max_timeout: Duration,
}

impl Default for OrchestratorLimits {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

impl From<&OrchestratorConfig> for OrchestratorLimits {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent,
            default_timeout: Duration::from_millis(config.default_timeout_ms),
            min_timeout: Duration::from_millis(config.min_timeout_ms),
            max_timeout: Duration::from_millis(config.max_timeout_ms),
        }
    }
}

/// Outcome of [`TaskOrchestrator::spawn_task`]. Every call produces one.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SubAgentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timed_out: bool,
    pub cancelled: bool,
    /// Set when the spawn was refused before a task existed.
    #[serde(skip)]
    pub rejection: Option<SpawnError>,
}

impl SpawnResult {
    fn rejected(error: SpawnError) -> Self {
        Self {
            success: false,
            task_id: None,
            status: None,
            result: None,
            error: Some(error.to_string()),
            timed_out: false,
            cancelled: false,
            rejection: Some(error),
        }
    }

    fn from_context(ctx: &SubAgentContext) -> Self {
        Self {
            success: ctx.status == SubAgentStatus::Completed,
            task_id: Some(ctx.id.clone()),
            status: Some(ctx.status),
            result: ctx.result.clone(),
            error: ctx.error.clone(),
            timed_out: ctx.status == SubAgentStatus::Timeout,
            cancelled: ctx.status == SubAgentStatus::Cancelled,
            rejection: None,
        }
    }

    fn removed(id: &str) -> Self {
        Self {
            success: false,
            task_id: Some(id.to_string()),
            status: None,
            result: None,
            error: Some(format!("Task {id} was cleared before it settled")),
            timed_out: false,
            cancelled: true,
            rejection: None,
        }
    }
}

/// Task counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub timeout: usize,
    pub total: usize,
}

impl TaskSummary {
    pub fn count(&self, status: SubAgentStatus) -> usize {
        match status {
            SubAgentStatus::Pending => self.pending,
            SubAgentStatus::Running => self.running,
            SubAgentStatus::Completed => self.completed,
            SubAgentStatus::Failed => self.failed,
            SubAgentStatus::Cancelled => self.cancelled,
            SubAgentStatus::Timeout => self.timeout,
        }
    }

    fn record(&mut self, status: SubAgentStatus) {
        let slot = match status {
            SubAgentStatus::Pending => &mut self.pending,
            SubAgentStatus::Running => &mut self.running,
            SubAgentStatus::Completed => &mut self.completed,
            SubAgentStatus::Failed => &mut self.failed,
            SubAgentStatus::Cancelled => &mut self.cancelled,
            SubAgentStatus::Timeout => &mut self.timeout,
        };
        *slot += 1;
        self.total += 1;
    }
}

struct TaskEntry {
    context: SubAgentContext,
    /// Hands the terminal snapshot to the waiting caller.
    settled: Option<oneshot::Sender<SubAgentContext>>,
}

impl TaskEntry {
    fn settle(&mut self) {
        if let Some(tx) = self.settled.take() {
            // The receiver may already be dropped.
            let _ = tx.send(self.context.clone());
        }
    }
}

#[derive(Default)]
struct TaskTable {
    /// Insertion order.
    tasks: Vec<TaskEntry>,
    /// Always equals the number of `Running` entries.
    running: usize,
}

/// An admitted task, carrying what its supervisor needs outside the lock.
struct Admission {
    id: String,
    instructions: String,
    input: Option<String>,
    timeout: Duration,
    executor: Arc<dyn Executor>,
    settled: oneshot::Receiver<SubAgentContext>,
}

enum Settlement {
    Completed(String),
    Failed(String),
    TimedOut(Duration),
}

type ExecutorOutcome = RaceOutcome<Result<anyhow::Result<String>, JoinError>>;

impl From<ExecutorOutcome> for Settlement {
    fn from(outcome: ExecutorOutcome) -> Self {
        match outcome {
            RaceOutcome::Completed(Ok(Ok(result))) => Settlement::Completed(result),
            RaceOutcome::Completed(Ok(Err(e))) => Settlement::Failed(e.to_string()),
            RaceOutcome::Completed(Err(e)) if e.is_panic() => {
                Settlement::Failed("executor panicked".to_string())
            }
            RaceOutcome::Completed(Err(_)) => {
                Settlement::Failed("executor task was aborted".to_string())
            }
            RaceOutcome::TimedOut(limit) => Settlement::TimedOut(limit),
        }
    }
}

/// Task table and observer, shared with every supervisor task.
struct Shared {
    table: Mutex<TaskTable>,
    broadcaster: RwLock<Option<Arc<dyn Broadcaster>>>,
}

impl Shared {
    /// Drive one admitted task to a terminal state.
    ///
    /// Runs on its own tokio task, so the bookkeeping finishes even when the
    /// caller of `spawn_task` stops waiting.
    async fn supervise(self: Arc<Self>, admission: Admission) -> SpawnResult {
        let Admission {
            id,
            instructions,
            input,
            timeout,
            executor,
            mut settled,
        } = admission;

        // On its own task so losing the race detaches the call instead of dropping it.
        let handle =
            tokio::spawn(async move { executor.execute(&instructions, input.as_deref()).await });

        let settlement = tokio::select! {
            biased;
            snapshot = &mut settled => {
                // Cancelled, or removed by clear_all_tasks.
                return match snapshot {
                    Ok(snapshot) => SpawnResult::from_context(&snapshot),
                    Err(_) => SpawnResult::removed(&id),
                };
            }
            outcome = race_timeout(handle, timeout) => Settlement::from(outcome),
        };

        self.finalize(&id, settlement)
            .unwrap_or_else(|| match settled.try_recv() {
                Ok(snapshot) => SpawnResult::from_context(&snapshot),
                Err(_) => {
                    debug!("Sub-agent {id} settled after being cleared; outcome discarded");
                    SpawnResult::removed(&id)
                }
            })
    }

    /// Apply a settlement. Returns `None` if the task is no longer in the table.
    fn finalize(&self, id: &str, settlement: Settlement) -> Option<SpawnResult> {
        let mut guard = self.table();
        let table = &mut *guard;
        let entry = table.tasks.iter_mut().find(|e| e.context.id == id)?;

        let transitioned = match settlement {
            Settlement::Completed(result) => entry.context.complete(result),
            Settlement::Failed(error) => entry.context.fail(error),
            Settlement::TimedOut(limit) => entry.context.time_out(duration_ms(limit)),
        };

        if transitioned {
            table.running = table.running.saturating_sub(1);
            entry.settle();
            self.notify(&entry.context);
            match entry.context.status {
                SubAgentStatus::Completed => info!("Sub-agent {id} completed"),
                status => warn!(
                    "Sub-agent {id} {status}: {}",
                    entry.context.error.as_deref().unwrap_or("")
                ),
            }
        } else {
            debug!(
                "Sub-agent {id} already {}; late outcome discarded",
                entry.context.status
            );
        }

        Some(SpawnResult::from_context(&entry.context))
    }

    // Runs under the table lock so one task's notifications stay ordered.
    fn notify(&self, context: &SubAgentContext) {
        let broadcaster = self
            .broadcaster
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(broadcaster) = broadcaster {
            broadcaster.broadcast(context.clone());
        }
    }

    fn table(&self) -> MutexGuard<'_, TaskTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Spawns sub-agent tasks, bounds how many run at once, and tracks each one
/// from admission to a terminal state.
///
/// Build one per application and share it behind an `Arc`. Timeouts and
/// cancellation only change bookkeeping: the executor call keeps running
/// detached and whatever it eventually returns is dropped.
pub struct TaskOrchestrator {
    limits: OrchestratorLimits,
    shared: Arc<Shared>,
    executor: RwLock<Option<Arc<dyn Executor>>>,
}

impl TaskOrchestrator {
    pub fn new(limits: OrchestratorLimits) -> Self {
        Self {
            limits,
            shared: Arc::new(Shared {
                table: Mutex::new(TaskTable::default()),
                broadcaster: RwLock::new(None),
            }),
            executor: RwLock::new(None),
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(OrchestratorLimits::from(config))
    }

    pub fn limits(&self) -> &OrchestratorLimits {
        &self.limits
    }

    /// Install the executor used by subsequent spawns. Tasks already running
    /// keep the executor they were admitted with.
    pub fn set_executor(&self, executor: Arc<dyn Executor>) {
        *self.executor.write().unwrap_or_else(PoisonError::into_inner) = Some(executor);
    }

    pub fn clear_executor(&self) {
        *self.executor.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn has_executor(&self) -> bool {
        self.executor().is_some()
    }

    pub fn set_broadcaster(&self, broadcaster: Arc<dyn Broadcaster>) {
        *self
            .shared
            .broadcaster
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(broadcaster);
    }

    pub fn clear_broadcaster(&self) {
        *self
            .shared
            .broadcaster
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Run one sub-agent task and wait for it to settle.
    ///
    /// Rejections (no executor, blank instructions, timeout out of bounds,
    /// concurrency ceiling reached) return at once without creating a task.
    /// `timeout_ms` defaults to the configured default. Dropping the returned
    /// future stops the wait only; the task still settles and frees its slot.
    pub async fn spawn_task(
        &self,
        instructions: &str,
        input: Option<&str>,
        timeout_ms: Option<u64>,
    ) -> SpawnResult {
        let admission = match self.admit(instructions, input, timeout_ms) {
            Ok(admission) => admission,
            Err(e) => {
                warn!("Sub-agent spawn rejected ({}): {e}", e.kind());
                return SpawnResult::rejected(e);
            }
        };

        let id = admission.id.clone();
        match tokio::spawn(self.shared.clone().supervise(admission)).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Supervisor for sub-agent {id} failed: {e}");
                self.shared
                    .finalize(&id, Settlement::Failed(format!("supervisor failed: {e}")))
                    .unwrap_or_else(|| SpawnResult::removed(&id))
            }
        }
    }

    /// Mark a pending or running task cancelled. Returns false if the task is
    /// unknown or already terminal.
    pub fn cancel_task(&self, id: &str) -> bool {
        let mut guard = self.table();
        let table = &mut *guard;
        let Some(entry) = table.tasks.iter_mut().find(|e| e.context.id == id) else {
            return false;
        };
        let was_running = entry.context.status == SubAgentStatus::Running;
        if !entry.context.cancel() {
            return false;
        }
        if was_running {
            table.running = table.running.saturating_sub(1);
        }
        entry.settle();
        self.shared.notify(&entry.context);
        info!("Cancelled sub-agent {id}");
        true
    }

    pub fn get_task(&self, id: &str) -> Option<SubAgentContext> {
        self.table()
            .tasks
            .iter()
            .find(|e| e.context.id == id)
            .map(|e| e.context.clone())
    }

    pub fn get_all_tasks(&self) -> Vec<SubAgentContext> {
        self.table()
            .tasks
            .iter()
            .map(|e| e.context.clone())
            .collect()
    }

    pub fn get_tasks_by_status(&self, status: SubAgentStatus) -> Vec<SubAgentContext> {
        self.table()
            .tasks
            .iter()
            .filter(|e| e.context.status == status)
            .map(|e| e.context.clone())
            .collect()
    }

    pub fn get_summary(&self) -> TaskSummary {
        let mut summary = TaskSummary::default();
        for entry in &self.table().tasks {
            summary.record(entry.context.status);
        }
        summary
    }

    pub fn get_running_count(&self) -> usize {
        self.table().running
    }

    pub fn get_max_concurrent(&self) -> usize {
        self.limits.max_concurrent
    }

    /// Drop every terminal task. Returns how many were removed.
    pub fn clear_finished_tasks(&self) -> usize {
        let mut table = self.table();
        let before = table.tasks.len();
        table.tasks.retain(|e| !e.context.is_terminal());
        let removed = before - table.tasks.len();
        if removed > 0 {
            debug!("Cleared {removed} finished sub-agent task(s)");
        }
        removed
    }

    /// Empty the table regardless of status and reset the running count.
    ///
    /// Callers still waiting in `spawn_task` for a removed task return
    /// immediately; the executor calls themselves are abandoned.
    pub fn clear_all_tasks(&self) -> usize {
        let mut table = self.table();
        let removed = table.tasks.len();
        // Dropping each entry's sender releases its waiter.
        table.tasks.clear();
        table.running = 0;
        if removed > 0 {
            info!("Cleared all {removed} sub-agent task(s)");
        }
        removed
    }

    fn admit(
        &self,
        instructions: &str,
        input: Option<&str>,
        timeout_ms: Option<u64>,
    ) -> Result<Admission, SpawnError> {
        let executor = self.executor().ok_or(SpawnError::NoExecutor)?;
        if instructions.trim().is_empty() {
            return Err(SpawnError::EmptyInstructions);
        }
        let timeout = self.resolve_timeout(timeout_ms)?;

        let mut table = self.table();
        if table.running >= self.limits.max_concurrent {
            return Err(SpawnError::ConcurrencyLimit {
                limit: self.limits.max_concurrent,
            });
        }

        let mut context = SubAgentContext::new(instructions, input, duration_ms(timeout));
        context.start();
        let (settled_tx, settled_rx) = oneshot::channel();
        let admission = Admission {
            id: context.id.clone(),
            instructions: context.instructions.clone(),
            input: context.input.clone(),
            timeout,
            executor,
            settled: settled_rx,
        };

        table.running += 1;
        self.shared.notify(&context);
        info!(
            "Spawning sub-agent {} ({}/{} running, timeout {}ms): {}",
            context.id,
            table.running,
            self.limits.max_concurrent,
            context.timeout_ms,
            context.instructions
        );
        table.tasks.push(TaskEntry {
            context,
            settled: Some(settled_tx),
        });
        Ok(admission)
    }

    fn resolve_timeout(&self, timeout_ms: Option<u64>) -> Result<Duration, SpawnError> {
        let Some(requested_ms) = timeout_ms else {
            return Ok(self.limits.default_timeout);
        };
        let requested = Duration::from_millis(requested_ms);
        if requested < self.limits.min_timeout {
            return Err(SpawnError::TimeoutTooShort {
                requested_ms,
                min_ms: duration_ms(self.limits.min_timeout),
            });
        }
        if requested > self.limits.max_timeout {
            return Err(SpawnError::TimeoutTooLong {
                requested_ms,
                max_ms: duration_ms(self.limits.max_timeout),
            });
        }
        Ok(requested)
    }

    fn executor(&self) -> Option<Arc<dyn Executor>> {
        self.executor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn table(&self) -> MutexGuard<'_, TaskTable> {
        self.shared.table()
    }
}

impl Default for TaskOrchestrator {
    fn default() -> Self {
        Self::new(OrchestratorLimits::default())
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
