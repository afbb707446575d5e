//! Per-session operation locks
//!
//! A lock key is scoped to its session, so two sessions never contend. An
//! attempt to take a held key fails with `E_BUSY` straight away; callers
//! retry rather than queue. Each held key carries a ticket so a guard from a
//! cleared generation can never release a key someone else re-acquired.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::error::{InspectError, InspectResult};

type LockKey = (String, String);

#[derive(Debug, Default)]
struct LockTable {
    held: Mutex<HashMap<LockKey, u64>>,
    next_ticket: AtomicU64,
}

/// Session-scoped, non-blocking mutual exclusion
#[derive(Debug, Clone, Default)]
pub struct OperationLockManager {
    table: Arc<LockTable>,
}

/// Releases its key on drop, whatever way the operation ended
#[derive(Debug)]
pub struct LockGuard {
    table: Arc<LockTable>,
    key: LockKey,
    ticket: u64,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let mut held = self.table.held.lock();
        if held.get(&self.key) == Some(&self.ticket) {
            held.remove(&self.key);
        }
    }
}

impl OperationLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take `key` for `session_id`, or fail with `E_BUSY` if it is held
    pub fn try_acquire(&self, session_id: &str, key: &str) -> InspectResult<LockGuard> {
        let lock_key = (session_id.to_string(), key.to_string());
        let mut held = self.table.held.lock();
        if held.contains_key(&lock_key) {
            tracing::debug!(session = %session_id, %key, "Lock contended");
            return Err(InspectError::busy(key));
        }

        let ticket = self.table.next_ticket.fetch_add(1, Ordering::Relaxed);
        held.insert(lock_key.clone(), ticket);

        Ok(LockGuard {
            table: Arc::clone(&self.table),
            key: lock_key,
            ticket,
        })
    }

    /// Run `op` while holding `key`
    ///
    /// The token handed to `op` fires when either the per-call timeout
    /// elapses or `parent` is cancelled. A timeout returns `E_BUSY`, a
    /// cancelled parent returns `E_SESSION_TERMINATED`.
    pub async fn with_lock<T, F, Fut>(
        &self,
        session_id: &str,
        key: &str,
        timeout: Duration,
        parent: &CancellationToken,
        op: F,
    ) -> InspectResult<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = InspectResult<T>>,
    {
        if parent.is_cancelled() {
            return Err(InspectError::session_terminated(session_id));
        }

        let _guard = self.try_acquire(session_id, key)?;
        let call_token = parent.child_token();

        let result = tokio::select! {
            res = op(call_token.clone()) => res,
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(session = %session_id, %key, timeout_ms = timeout.as_millis() as u64, "Operation timed out");
                Err(InspectError::busy_timeout(key, timeout.as_millis() as u64))
            }
            _ = parent.cancelled() => {
                tracing::debug!(session = %session_id, %key, "Operation cancelled by session");
                Err(InspectError::session_terminated(session_id))
            }
        };

        // Anything the operation spawned must observe the end of the call
        call_token.cancel();
        result
    }

    /// Drop every held key for `session_id`
    ///
    /// Guards still alive from before the release become inert.
    pub fn release_session(&self, session_id: &str) -> usize {
        let mut held = self.table.held.lock();
        let before = held.len();
        held.retain(|(session, _), _| session != session_id);
        before - held.len()
    }

    pub fn is_held(&self, session_id: &str, key: &str) -> bool {
        self.table
            .held
            .lock()
            .contains_key(&(session_id.to_string(), key.to_string()))
    }

    pub fn held_count(&self, session_id: &str) -> usize {
        self.table
            .held
            .lock()
            .keys()
            .filter(|(session, _)| session == session_id)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::error::ErrorCode;
    use tokio::sync::oneshot;

    const SECOND: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_second_caller_gets_busy_immediately() {
        let locks = OperationLockManager::new();
        let token = CancellationToken::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();

        let first = {
            let locks = locks.clone();
            let token = token.clone();
            tokio::spawn(async move {
                locks
                    .with_lock("s1", "list", SECOND * 5, &token, |_| async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Ok(1)
                    })
                    .await
            })
        };
        started_rx.await.unwrap();

        let start = tokio::time::Instant::now();
        let second = locks
            .with_lock("s1", "list", SECOND * 5, &token, |_| async { Ok(2) })
            .await;
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(second.unwrap_err().code, ErrorCode::Busy);

        release_tx.send(()).unwrap();
        assert_eq!(first.await.unwrap().unwrap(), 1);
        assert!(!locks.is_held("s1", "list"));
    }

    #[tokio::test]
    async fn test_sessions_do_not_contend() {
        let locks = OperationLockManager::new();
        let _held = locks.try_acquire("a", "list").unwrap();
        assert!(locks.try_acquire("b", "list").is_ok());
        assert!(locks.try_acquire("a", "list").is_err());
    }

    #[tokio::test]
    async fn test_lock_released_after_error() {
        let locks = OperationLockManager::new();
        let token = CancellationToken::new();

        let result: InspectResult<()> = locks
            .with_lock("s1", "set", SECOND, &token, |_| async {
                Err(InspectError::internal("boom"))
            })
            .await;
        assert!(result.is_err());
        assert!(locks.try_acquire("s1", "set").is_ok());
    }

    #[tokio::test]
    async fn test_lock_released_after_panic() {
        let locks = OperationLockManager::new();
        let token = CancellationToken::new();

        let task = {
            let locks = locks.clone();
            tokio::spawn(async move {
                locks
                    .with_lock("s1", "set", SECOND, &token, |_| async {
                        if true {
                            panic!("operation blew up");
                        }
                        Ok(())
                    })
                    .await
            })
        };
        assert!(task.await.unwrap_err().is_panic());
        assert!(!locks.is_held("s1", "set"));
    }

    #[tokio::test]
    async fn test_timeout_is_busy_and_cancels_operation() {
        let locks = OperationLockManager::new();
        let token = CancellationToken::new();
        let (seen_tx, seen_rx) = oneshot::channel::<CancellationToken>();

        let result: InspectResult<()> = locks
            .with_lock("s1", "slow", Duration::from_millis(20), &token, |call| async move {
                let _ = seen_tx.send(call);
                std::future::pending::<()>().await;
                Ok(())
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.code, ErrorCode::Busy);
        assert!(err.message.contains("exceeded timeout of 20ms"));
        assert!(seen_rx.await.unwrap().is_cancelled());
        assert!(!token.is_cancelled());
        assert!(!locks.is_held("s1", "slow"));
    }

    #[tokio::test]
    async fn test_parent_cancellation_is_session_terminated() {
        let locks = OperationLockManager::new();
        let token = CancellationToken::new();

        let canceller = token.clone();
        let result: InspectResult<()> = locks
            .with_lock("s1", "list", SECOND * 5, &token, |_| async move {
                canceller.cancel();
                std::future::pending::<()>().await;
                Ok(())
            })
            .await;
        assert_eq!(result.unwrap_err().code, ErrorCode::SessionTerminated);

        let after: InspectResult<()> = locks
            .with_lock("s1", "list", SECOND, &token, |_| async { Ok(()) })
            .await;
        assert_eq!(after.unwrap_err().code, ErrorCode::SessionTerminated);
    }

    #[tokio::test]
    async fn test_stale_guard_does_not_release_new_holder() {
        let locks = OperationLockManager::new();
        let stale = locks.try_acquire("s1", "list").unwrap();

        assert_eq!(locks.release_session("s1"), 1);
        let fresh = locks.try_acquire("s1", "list").unwrap();

        drop(stale);
        assert!(locks.is_held("s1", "list"));
        drop(fresh);
        assert!(!locks.is_held("s1", "list"));
    }
}
