pub mod state;

use crate::cancel::{CancelOutcome, CancellationCoordinator};
use crate::client::types::{ApiReply, OperationKind, RawOperationPayload, TriggerRequest, TriggerResponse};
use crate::client::OperationClient;
use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::guard::{FetchOutcome, SessionAuthority, SessionAwareFetchGuard};
use crate::operation::{machine, OperationRecord, OptimisticPlaceholder, PlaceholderKey};
use crate::poller::aggregator::{ProgressAggregator, ProgressSummary};
use crate::poller::{PollControl, PollScheduler};
use state::OperationStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

/// Polling session for one operation
struct Watch {
    kind: OperationKind,
    scheduler: PollScheduler,
    guard: Arc<SessionAwareFetchGuard>,
}

/// Tracks server-side operations from trigger to terminal phase.
///
/// Every watched operation gets its own scheduler and fetch guard; records
/// live in one shared store.
pub struct OperationTracker {
    client: Arc<OperationClient>,
    session: Arc<dyn SessionAuthority>,
    store: Arc<OperationStore>,
    coordinator: CancellationCoordinator,
    watches: Mutex<HashMap<String, Arc<Watch>>>,
    events: broadcast::Sender<OperationRecord>,
    poll_interval: Duration,
}

impl OperationTracker {
    pub fn new(config: TrackerConfig, session: Arc<dyn SessionAuthority>) -> TrackerResult<Self> {
        let client = Arc::new(OperationClient::new(&config, session.clone())?);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            client,
            session,
            store: Arc::new(OperationStore::new()),
            coordinator: CancellationCoordinator::new(),
            watches: Mutex::new(HashMap::new()),
            events,
            poll_interval: config.poll_interval,
        })
    }

    /// Start an operation and begin watching it.
    ///
    /// A `New` placeholder is visible as soon as the server accepts the
    /// trigger. It is keyed by the returned id, or by the request name when
    /// the endpoint returns nothing. Returns the id the operation is tracked by.
    pub async fn trigger(&self, kind: OperationKind, request: TriggerRequest) -> TrackerResult<String> {
        let reply = self.client.trigger(kind, &request).await?;

        let guard = SessionAwareFetchGuard::new(self.session.clone());
        guard.classify_command(&reply).into_result()?;

        let response: TriggerResponse = if reply.body.trim().is_empty() {
            TriggerResponse::default()
        } else {
            serde_json::from_str(&reply.body).unwrap_or_else(|e| {
                debug!(error = %e, "trigger response carried no identifier");
                TriggerResponse::default()
            })
        };

        let key = match response.id.or(response.name) {
            Some(id) => PlaceholderKey::Id(id),
            None => PlaceholderKey::Name(request.name.clone()),
        };
        let id = key.as_str().to_string();

        let placeholder = OptimisticPlaceholder::new(key, kind);
        let record = placeholder.record.clone();
        self.store.insert_placeholder(placeholder);
        let _ = self.events.send(record);
        info!(%kind, id = %id, "operation triggered");

        self.watch(kind, &id)?;
        Ok(id)
    }

    /// Poll an operation until it reaches a terminal phase.
    ///
    /// An operation the tracker has no record of yet shows up as a `New`
    /// placeholder right away, so it can be canceled before the first
    /// successful poll. Watching an operation that is already watched
    /// restarts its polling.
    pub fn watch(&self, kind: OperationKind, id: &str) -> TrackerResult<()> {
        let watch = Arc::new(Watch {
            kind,
            scheduler: PollScheduler::new(),
            guard: Arc::new(SessionAwareFetchGuard::new(self.session.clone())),
        });

        if self.store.get(id).is_none() {
            let placeholder = OptimisticPlaceholder::new(PlaceholderKey::Id(id.to_string()), kind);
            let record = placeholder.record.clone();
            self.store.insert_placeholder(placeholder);
            let _ = self.events.send(record);
        }

        // Only the raw reply crosses back to the scheduler; it is classified
        // in the handler, under the running gate.
        let poll_fn = {
            let client = self.client.clone();
            let guard = watch.guard.clone();
            let id = id.to_string();
            move || {
                let client = client.clone();
                let guard = guard.clone();
                let id = id.clone();
                async move {
                    if !guard.is_session_valid() {
                        return Err(TrackerError::AuthExpired);
                    }
                    client.fetch_status(kind, &id).await
                }
            }
        };

        let handler = {
            let store = self.store.clone();
            let guard = watch.guard.clone();
            let events = self.events.clone();
            let id = id.to_string();
            move |result: TrackerResult<ApiReply>| match guard.settle::<RawOperationPayload>(result) {
                FetchOutcome::Success(mut raw) => {
                    raw.id = Some(id.clone());
                    let record = store.apply(&id, |current| machine::advance(current, kind, raw));
                    let summary = ProgressAggregator::summarize(&record);
                    debug!(id = %id, status = %summary.status_line(), "operation polled");
                    let _ = events.send(record.clone());

                    if record.is_terminal() {
                        info!(id = %id, phase = ?record.phase, "operation finished");
                        PollControl::Stop
                    } else {
                        PollControl::Continue
                    }
                }
                FetchOutcome::AuthExpired => {
                    warn!(id = %id, "session expired, polling stopped");
                    PollControl::Stop
                }
                FetchOutcome::Transient(message) => {
                    debug!(id = %id, failures = guard.consecutive_failures(), %message, "poll will retry");
                    PollControl::Continue
                }
                FetchOutcome::Terminal(message) => {
                    let record = store.apply(&id, |current| machine::fail(current, kind, &id, &message));
                    warn!(id = %id, %message, "operation failed");
                    let _ = events.send(record);
                    PollControl::Stop
                }
            }
        };

        watch.scheduler.start_with_handler(poll_fn, handler, self.poll_interval)?;

        if let Some(previous) = self.watches().insert(id.to_string(), watch) {
            previous.scheduler.stop();
        }
        debug!(%kind, id, "watching operation");
        Ok(())
    }

    /// Cancel a watched operation
    pub async fn cancel(&self, id: &str) -> TrackerResult<CancelOutcome> {
        let watch = self
            .watches()
            .get(id)
            .cloned()
            .ok_or_else(|| TrackerError::OperationNotFound(id.to_string()))?;

        let outcome = self
            .coordinator
            .cancel(id, &watch.scheduler, &self.store, &watch.guard, || {
                self.client.cancel(watch.kind, id)
            })
            .await?;

        if let CancelOutcome::Canceled(record) = &outcome {
            let _ = self.events.send(record.clone());
        }
        Ok(outcome)
    }

    /// Latest record (or placeholder) for an operation
    pub fn record(&self, id: &str) -> Option<OperationRecord> {
        self.store.get(id)
    }

    pub fn list(&self) -> Vec<OperationRecord> {
        self.store.list()
    }

    pub fn summary(&self, id: &str) -> Option<ProgressSummary> {
        self.store.get(id).map(|record| ProgressAggregator::summarize(&record))
    }

    /// Transient poll failures in a row, for "having trouble reaching the server" messaging
    pub fn consecutive_failures(&self, id: &str) -> Option<u32> {
        self.watches().get(id).map(|w| w.guard.consecutive_failures())
    }

    pub fn is_watching(&self, id: &str) -> bool {
        self.watches().get(id).is_some_and(|w| w.scheduler.is_running())
    }

    /// Every record the tracker materializes, placeholders included
    pub fn subscribe(&self) -> broadcast::Receiver<OperationRecord> {
        self.events.subscribe()
    }

    /// Stop polling an operation and forget it
    pub fn unwatch(&self, id: &str) -> Option<OperationRecord> {
        if let Some(watch) = self.watches().remove(id) {
            watch.scheduler.stop();
        }
        self.store.remove(id)
    }

    pub fn shutdown(&self) {
        for (_, watch) in self.watches().drain() {
            watch.scheduler.stop();
        }
    }

    fn watches(&self) -> MutexGuard<'_, HashMap<String, Arc<Watch>>> {
        self.watches.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for OperationTracker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
