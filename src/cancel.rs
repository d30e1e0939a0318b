use crate::client::types::ApiReply;
use crate::error::{TrackerError, TrackerResult};
use crate::guard::{FetchOutcome, SessionAwareFetchGuard};
use crate::manager::state::OperationStore;
use crate::operation::{machine, OperationRecord};
use crate::poller::PollScheduler;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// Server acknowledged; the record is now `Canceled` locally
    Canceled(OperationRecord),
    /// Another cancel for this operation is still waiting on the server
    AlreadyInFlight,
    /// Nothing to cancel
    AlreadyTerminal(OperationRecord),
}

/// Turns a cancel action into one server request plus a scheduler stop
#[derive(Default)]
pub struct CancellationCoordinator {
    in_flight: Mutex<HashSet<String>>,
}

impl CancellationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelling(&self, operation_id: &str) -> bool {
        self.pending().contains(operation_id)
    }

    /// Cancel `operation_id` by running `request`.
    ///
    /// Re-entry while a request is outstanding sends nothing. On
    /// acknowledgement the scheduler is stopped before the record is marked
    /// `Canceled`, so a poll racing the cancel cannot overwrite it. On
    /// rejection polling and phase are left alone.
    pub async fn cancel<F, Fut>(
        &self,
        operation_id: &str,
        scheduler: &PollScheduler,
        store: &OperationStore,
        guard: &SessionAwareFetchGuard,
        request: F,
    ) -> TrackerResult<CancelOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TrackerResult<ApiReply>>,
    {
        let current = store
            .get(operation_id)
            .ok_or_else(|| TrackerError::OperationNotFound(operation_id.to_string()))?;
        if current.is_terminal() {
            debug!(id = operation_id, phase = ?current.phase, "cancel ignored, operation already finished");
            return Ok(CancelOutcome::AlreadyTerminal(current));
        }

        let _reservation = match Reservation::acquire(self, operation_id) {
            Some(reservation) => reservation,
            None => {
                debug!(id = operation_id, "cancel already in flight");
                return Ok(CancelOutcome::AlreadyInFlight);
            }
        };

        let reply = match request().await {
            Ok(reply) => guard.classify_command(&reply),
            Err(TrackerError::AuthExpired) => FetchOutcome::AuthExpired,
            Err(e @ TrackerError::UnsupportedOperation(_)) => {
                debug!(id = operation_id, error = %e, "cancel not offered for this operation");
                return Err(e);
            }
            Err(e) => FetchOutcome::Terminal(e.to_string()),
        };

        match reply {
            FetchOutcome::Success(()) => {
                scheduler.stop();
                let record = store.apply(operation_id, |existing| match existing {
                    Some(existing) => machine::cancel(existing),
                    None => machine::cancel(&current),
                });
                info!(id = operation_id, phase = ?record.phase, "operation canceled");
                Ok(CancelOutcome::Canceled(record))
            }
            FetchOutcome::AuthExpired => Err(TrackerError::AuthExpired),
            FetchOutcome::Transient(message) | FetchOutcome::Terminal(message) => {
                warn!(id = operation_id, %message, "cancel rejected");
                Err(TrackerError::CancelRejected(message))
            }
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashSet<String>> {
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Marks one operation as being cancelled until dropped
struct Reservation<'a> {
    coordinator: &'a CancellationCoordinator,
    operation_id: String,
}

impl<'a> Reservation<'a> {
    fn acquire(coordinator: &'a CancellationCoordinator, operation_id: &str) -> Option<Self> {
        if !coordinator.pending().insert(operation_id.to_string()) {
            return None;
        }
        Some(Self {
            coordinator,
            operation_id: operation_id.to_string(),
        })
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.coordinator.pending().remove(&self.operation_id);
    }
}
