use std::future::Future;
use std::time::Duration;

/// Which side of a [`race_timeout`] settled first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaceOutcome<T> {
    Completed(T),
    /// The bound elapsed first. Carries the bound that was applied.
    TimedOut(Duration),
}

/// Bound `operation` to `limit`.
///
/// Settles exactly once. On timeout the operation is dropped with the race; to
/// let work outlive its caller, pass a `JoinHandle` and the spawned task keeps
/// running detached while its output is discarded.
pub async fn race_timeout<F>(operation: F, limit: Duration) -> RaceOutcome<F::Output>
where
    F: Future,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(value) => RaceOutcome::Completed(value),
        Err(_) => RaceOutcome::TimedOut(limit),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_operation_wins() {
        let outcome = race_timeout(
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                "done"
            },
            Duration::from_millis(100),
        )
        .await;
        assert_eq!(outcome, RaceOutcome::Completed("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_wins() {
        let outcome = race_timeout(
            tokio::time::sleep(Duration::from_millis(500)),
            Duration::from_millis(50),
        )
        .await;
        assert_eq!(outcome, RaceOutcome::TimedOut(Duration::from_millis(50)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_loser_keeps_running() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            flag.store(true, Ordering::SeqCst);
        });

        let outcome = race_timeout(handle, Duration::from_millis(20)).await;
        assert!(matches!(outcome, RaceOutcome::TimedOut(_)));
        assert!(!finished.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(finished.load(Ordering::SeqCst));
    }
}
