//! Execution context shared by a database handle and its collections
//!
//! Every backend call is raced against the context's cancellation token and
//! deadline, so a cancelled or expired context aborts the call in flight.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::{BoilerError, Result};

/// Cancellation and deadline carried through every operation.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl ExecContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context whose deadline is `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().deadline_at(Instant::now() + timeout)
    }

    /// Wrap an existing cancellation token (e.g. one owned by a scheduler).
    pub fn from_token(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Set or tighten the deadline. A later deadline than the current one is ignored.
    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    /// Derive a context that is cancelled with this one but can also be
    /// cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `fut` under this context.
    ///
    /// Fails with [`BoilerError::Cancelled`] or [`BoilerError::DeadlineExceeded`]
    /// without polling `fut` when the context is already cancelled or expired,
    /// and with the same errors when that happens while `fut` is pending. The
    /// future is dropped in every failure case.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output>
    where
        F: Future,
    {
        if self.cancel.is_cancelled() {
            return Err(BoilerError::Cancelled);
        }
        // timeout_at polls the inner future once before looking at the clock
        if self.deadline.is_some_and(|deadline| deadline <= Instant::now()) {
            return Err(BoilerError::DeadlineExceeded);
        }

        let bounded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, fut).await.map_err(|_| {
                    debug!("Operation exceeded context deadline");
                    BoilerError::DeadlineExceeded
                }),
                None => Ok(fut.await),
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(BoilerError::Cancelled),
            out = bounded => out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_runs_to_completion() {
        let ctx = ExecContext::background();
        let value = tokio_test::assert_ok!(ctx.run(async { 7 }).await);
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_cancelled_context_does_not_poll() {
        let ctx = ExecContext::background();
        ctx.cancel();

        let polled = std::sync::atomic::AtomicBool::new(false);
        let out = ctx
            .run(async {
                polled.store(true, std::sync::atomic::Ordering::SeqCst);
            })
            .await;

        assert!(matches!(out, Err(BoilerError::Cancelled)));
        assert!(!polled.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_call() {
        let ctx = ExecContext::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let out = ctx.run(std::future::pending::<()>()).await;
        assert!(matches!(out, Err(BoilerError::Cancelled)));
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let ctx = ExecContext::with_timeout(Duration::from_millis(20));
        let out = ctx
            .run(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert!(matches!(out, Err(BoilerError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_expired_context_does_not_poll() {
        let ctx = ExecContext::with_timeout(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(1)).await;

        let out = ctx.run(async { 1 }).await;
        assert!(matches!(out, Err(BoilerError::DeadlineExceeded)));
    }

    #[test]
    fn test_deadline_only_tightens() {
        let now = Instant::now();
        let ctx = ExecContext::background()
            .deadline_at(now + Duration::from_secs(1))
            .deadline_at(now + Duration::from_secs(10));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(1)));
    }

    #[test]
    fn test_child_follows_parent_cancellation() {
        let parent = ExecContext::background();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_cancelled());

        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
    }
}
