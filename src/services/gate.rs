use super::error::EngineError;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Hard cap on simultaneously in-flight scan and delete tasks.
///
/// Backed by a tokio [`Semaphore`], whose waiters are woken in FIFO order.
/// Clones share the same permits.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    permits: usize,
}

impl AdmissionGate {
    pub fn new(permits: usize) -> Self {
        let permits = permits.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            permits,
        }
    }

    /// Total number of permits
    pub fn permits(&self) -> usize {
        self.permits
    }

    /// Permits not currently held
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a permit. The permit is released when dropped.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, EngineError> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| EngineError::GateClosed)
    }

    /// Wait for a permit unless the run is cancelled first
    pub async fn acquire_or_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::OperationCancelled);
        }

        tokio::select! {
            permit = self.acquire() => permit,
            _ = cancel.cancelled() => Err(EngineError::OperationCancelled),
        }
    }
}
