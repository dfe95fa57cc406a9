//! One-shot completion handed to a strategy.
//!
//! `success` and `fail` consume the completion, so a strategy can resolve a
//! request at most once. The dispatcher holds the paired
//! [`PendingCompletion`] and consumes the outcome exactly once.

use std::time::Duration;

use tokio::sync::oneshot;

use super::AllocationError;

pub struct Completion<T> {
    tx: oneshot::Sender<Result<T, AllocationError>>,
}

pub struct PendingCompletion<T> {
    rx: oneshot::Receiver<Result<T, AllocationError>>,
}

/// Creates a connected completion pair.
pub fn channel<T>() -> (Completion<T>, PendingCompletion<T>) {
    let (tx, rx) = oneshot::channel();
    (Completion { tx }, PendingCompletion { rx })
}

impl<T> Completion<T> {
    pub fn success(self, value: T) {
        self.complete(Ok(value));
    }

    pub fn fail(self, error: AllocationError) {
        self.complete(Err(error));
    }

    pub fn complete(self, result: Result<T, AllocationError>) {
        // The waiting side is gone once the request timed out.
        let _ = self.tx.send(result);
    }

    /// True once nobody is waiting for the result any more.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<T> PendingCompletion<T> {
    /// Waits for the strategy's outcome.
    pub async fn wait(self) -> Result<T, AllocationError> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(AllocationError::Abandoned))
    }

    /// Waits for the outcome, giving up after `deadline` if one is set.
    pub async fn wait_with_deadline(
        self,
        deadline: Option<Duration>,
    ) -> Result<T, AllocationError> {
        match deadline {
            None => self.wait().await,
            Some(deadline) => tokio::time::timeout(deadline, self.wait())
                .await
                .unwrap_or_else(|_| Err(AllocationError::TimedOut(deadline))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_success_from_another_task() {
        let (completion, pending) = channel::<u32>();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            completion.success(7);
        });
        assert_eq!(pending.wait().await, Ok(7));
    }

    #[tokio::test]
    async fn test_dropped_completion_is_abandoned() {
        let (completion, pending) = channel::<u32>();
        drop(completion);
        assert_eq!(pending.wait().await, Err(AllocationError::Abandoned));
    }

    #[tokio::test]
    async fn test_deadline_elapses() {
        let (completion, pending) = channel::<u32>();
        let deadline = Duration::from_millis(20);
        assert_eq!(
            pending.wait_with_deadline(Some(deadline)).await,
            Err(AllocationError::TimedOut(deadline))
        );
        assert!(completion.is_abandoned());
    }
}
