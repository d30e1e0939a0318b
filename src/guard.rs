//! Classification of every poll's network outcome.
//!
//! | reply                              | outcome       | scheduler |
//! |------------------------------------|---------------|-----------|
//! | 2xx                                | `Success`     | continue  |
//! | 401, or session already invalid    | `AuthExpired` | stop      |
//! | 5xx, transport error, bad 2xx body | `Transient`   | continue  |
//! | other 4xx with `{"error": ...}`    | `Terminal`    | stop      |
//! | anything else                      | `Transient`   | continue  |

use crate::client::types::ApiReply;
use crate::error::{TrackerError, TrackerResult};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Authentication capability injected by the embedding console
pub trait SessionAuthority: Send + Sync {
    fn is_session_valid(&self) -> bool;

    /// Global "log out" side effect
    fn force_logout(&self);

    /// Value for the `Authorization` header, if any
    fn auth_token(&self) -> Option<String> {
        None
    }
}

/// Session backed by a fixed token; logging out invalidates it for good
pub struct TokenSession {
    token: Option<String>,
    valid: AtomicBool,
}

impl TokenSession {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token,
            valid: AtomicBool::new(true),
        }
    }
}

impl SessionAuthority for TokenSession {
    fn is_session_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    fn force_logout(&self) {
        if self.valid.swap(false, Ordering::SeqCst) {
            warn!("session expired, logging out");
        }
    }

    fn auth_token(&self) -> Option<String> {
        self.token.clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<T> {
    Success(T),
    /// Stop polling; this is not a failure of the operation
    AuthExpired,
    /// Try again on the next tick
    Transient(String),
    /// The operation itself failed with this message
    Terminal(String),
}

impl<T> FetchOutcome<T> {
    pub fn into_result(self) -> TrackerResult<T> {
        match self {
            FetchOutcome::Success(value) => Ok(value),
            FetchOutcome::AuthExpired => Err(TrackerError::AuthExpired),
            FetchOutcome::Transient(message) => Err(TrackerError::Transient(message)),
            FetchOutcome::Terminal(message) => Err(TrackerError::Terminal(message)),
        }
    }
}

/// Wraps the network call of a poll tick
pub struct SessionAwareFetchGuard {
    session: Arc<dyn SessionAuthority>,
    consecutive_failures: AtomicU32,
}

impl SessionAwareFetchGuard {
    pub fn new(session: Arc<dyn SessionAuthority>) -> Self {
        Self {
            session,
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Run `fetch` unless the session is already gone, then classify its reply
    pub async fn fetch<T, F, Fut>(&self, fetch: F) -> FetchOutcome<T>
    where
        T: DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = TrackerResult<ApiReply>>,
    {
        if !self.is_session_valid() {
            debug!("session invalid, skipping fetch");
            return self.expire();
        }
        self.settle(fetch().await)
    }

    pub fn is_session_valid(&self) -> bool {
        self.session.is_session_valid()
    }

    /// Classify the raw result of a fetch that ran elsewhere.
    ///
    /// Side effects (failure counter, logout) happen here and nowhere else, so
    /// a caller that discards a result never gets them.
    pub fn settle<T: DeserializeOwned>(&self, result: TrackerResult<ApiReply>) -> FetchOutcome<T> {
        match result {
            Ok(reply) => self.classify(reply),
            Err(TrackerError::AuthExpired) => self.expire(),
            Err(e) if e.is_transient() => self.transient(e.to_string()),
            Err(e) => FetchOutcome::Terminal(e.to_string()),
        }
    }

    pub fn classify<T: DeserializeOwned>(&self, reply: ApiReply) -> FetchOutcome<T> {
        let status = reply.status;

        if status.is_success() {
            return match serde_json::from_str::<T>(&reply.body) {
                Ok(payload) => {
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                    FetchOutcome::Success(payload)
                }
                Err(e) => self.transient(format!("malformed response body: {}", e)),
            };
        }

        if status == StatusCode::UNAUTHORIZED {
            return self.expire();
        }

        if status.is_server_error() {
            return self.transient(format!("server error {}", status));
        }

        if status.is_client_error() {
            if let Some(message) = reply.error_message() {
                debug!(%status, %message, "operation reported terminal failure");
                return FetchOutcome::Terminal(message);
            }
        }

        self.transient(format!("unexpected response {}", status))
    }

    /// Classify the reply to a command (cancel, trigger).
    ///
    /// Leaves the poll failure counter alone; only a 401 has a side effect.
    pub fn classify_command(&self, reply: &ApiReply) -> FetchOutcome<()> {
        let status = reply.status;
        if status.is_success() {
            return FetchOutcome::Success(());
        }
        if status == StatusCode::UNAUTHORIZED {
            return self.expire();
        }

        let message = reply
            .error_message()
            .unwrap_or_else(|| format!("unexpected response {}", status));
        if status.is_server_error() {
            FetchOutcome::Transient(message)
        } else {
            FetchOutcome::Terminal(message)
        }
    }

    /// Failures since the last successful fetch
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    fn expire<T>(&self) -> FetchOutcome<T> {
        self.session.force_logout();
        FetchOutcome::AuthExpired
    }

    fn transient<T>(&self, message: String) -> FetchOutcome<T> {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(failures, %message, "transient poll failure");
        FetchOutcome::Transient(message)
    }
}
