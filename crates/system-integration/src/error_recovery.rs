//! Error policy and retry with exponential back-off

use grid_config::RetryPolicy;
use grid_shared::{ErrorKind, GridError, GridResult};
use parking_lot::RwLock;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What the controller does with a normalised error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Keep the last rows visible and report; transport faults after their retries
    KeepRows,
    /// Publish an empty result set
    EmptyResult,
    /// Report and leave state untouched
    Surface,
    /// Report and reload the current page
    Refresh,
    /// Drop silently
    Silent,
    /// Fall back to in-memory preferences
    Degrade,
    /// Report and return the view to its defaults
    Reset,
}

/// Operation the error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Fetch,
    Mutate,
}

/// Maps error kinds to strategies and runs retries
#[derive(Clone, Default)]
pub struct ErrorRecovery {
    stats: Arc<RwLock<RecoveryStats>>,
}

impl ErrorRecovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strategy for an error raised during `phase`
    pub fn strategy_for(&self, kind: ErrorKind, phase: Phase) -> RecoveryStrategy {
        let strategy = match (kind, phase) {
            (ErrorKind::Cancelled, _) => RecoveryStrategy::Silent,
            (ErrorKind::NetworkUnavailable | ErrorKind::Timeout, _) => RecoveryStrategy::KeepRows,
            (ErrorKind::NotFound, Phase::Fetch) => RecoveryStrategy::EmptyResult,
            (ErrorKind::NotFound, Phase::Mutate) => RecoveryStrategy::Refresh,
            (ErrorKind::Conflict, _) => RecoveryStrategy::Refresh,
            (ErrorKind::Unauthorized | ErrorKind::Validation | ErrorKind::BadRow, _) => {
                RecoveryStrategy::Surface
            }
            (ErrorKind::StorageUnavailable | ErrorKind::StorageQuotaExceeded, _) => {
                RecoveryStrategy::Degrade
            }
            (ErrorKind::Internal, _) => RecoveryStrategy::Reset,
        };

        let mut stats = self.stats.write();
        stats.errors_handled += 1;
        match strategy {
            RecoveryStrategy::Refresh => stats.refreshes += 1,
            RecoveryStrategy::Reset => stats.resets += 1,
            RecoveryStrategy::Degrade => stats.degradations += 1,
            _ => {}
        }

        log::debug!("Recovery strategy for {kind:?} during {phase:?}: {strategy:?}");
        strategy
    }

    /// Run `operation` until it succeeds, fails with a non-retryable kind or
    /// runs out of attempts. Back-off sleeps end early on cancellation.
    pub async fn execute_with_retry<F, Fut, T>(
        &self,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> GridResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GridResult<T>>,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        self.stats.write().successful_recoveries += 1;
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.kind().is_retryable() || attempt >= max_attempts || cancel.is_cancelled() {
                return Err(error);
            }

            let delay = policy.delay_for(attempt);
            log::warn!("Retry attempt {attempt} failed: {error}; retrying in {delay:?}");
            self.stats.write().retries += 1;

            tokio::select! {
                _ = cancel.cancelled() => return Err(GridError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    pub fn get_stats(&self) -> RecoveryStats {
        self.stats.read().clone()
    }
}

/// Recovery statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStats {
    pub errors_handled: u64,
    pub retries: u64,
    pub refreshes: u64,
    pub resets: u64,
    pub degradations: u64,
    pub successful_recoveries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        }
    }

    fn offline() -> GridError {
        GridError::NetworkUnavailable {
            message: "offline".into(),
        }
    }

    #[test]
    fn test_policy_table() {
        let recovery = ErrorRecovery::new();
        use ErrorKind::*;
        assert_eq!(recovery.strategy_for(Timeout, Phase::Fetch), RecoveryStrategy::KeepRows);
        assert_eq!(recovery.strategy_for(NotFound, Phase::Fetch), RecoveryStrategy::EmptyResult);
        assert_eq!(recovery.strategy_for(NotFound, Phase::Mutate), RecoveryStrategy::Refresh);
        assert_eq!(recovery.strategy_for(Conflict, Phase::Mutate), RecoveryStrategy::Refresh);
        assert_eq!(recovery.strategy_for(Validation, Phase::Mutate), RecoveryStrategy::Surface);
        assert_eq!(recovery.strategy_for(Cancelled, Phase::Fetch), RecoveryStrategy::Silent);
        assert_eq!(recovery.strategy_for(Internal, Phase::Fetch), RecoveryStrategy::Reset);
        assert_eq!(
            recovery.strategy_for(StorageQuotaExceeded, Phase::Fetch),
            RecoveryStrategy::Degrade
        );
        assert_eq!(recovery.get_stats().errors_handled, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transport_errors_with_backoff() {
        let recovery = ErrorRecovery::new();
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let start = Instant::now();

        let result = recovery
            .execute_with_retry(&policy(3), &CancellationToken::new(), move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(offline())
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms then 200ms
        assert_eq!(start.elapsed(), Duration::from_millis(300));
        let stats = recovery.get_stats();
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.successful_recoveries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let recovery = ErrorRecovery::new();
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: GridResult<()> = recovery
            .execute_with_retry(&policy(2), &CancellationToken::new(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(offline())
            })
            .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::NetworkUnavailable);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_fast() {
        let recovery = ErrorRecovery::new();
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: GridResult<()> = recovery
            .execute_with_retry(&policy(5), &CancellationToken::new(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GridError::Unauthorized {
                    message: "expired".into(),
                })
            })
            .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Unauthorized);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_backoff() {
        let recovery = ErrorRecovery::new();
        let token = CancellationToken::new();
        let cancel = token.clone();
        let retry_policy = policy(5);

        let (result, _) = tokio::join!(
            recovery.execute_with_retry(&retry_policy, &token, || async {
                Err::<(), _>(offline())
            }),
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            }
        );
        assert_eq!(result.unwrap_err(), GridError::Cancelled);
    }
}
