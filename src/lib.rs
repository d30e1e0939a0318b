//! # op-tracker
//!
//! Tracks long-running server-side operations (backups, restores, image
//! rewrites, provider reconciles) of an application-management platform.
//!
//! ## Features
//!
//! - Fixed-interval polling with at most one request in flight per operation
//! - Phase state machine with terminal absorption and stale-payload rejection
//! - Aggregate progress and remaining time across volumes
//! - Session-aware fetches: 401 logs the user out, 5xx retries, structured 4xx fails
//! - Idempotent cancellation that wins against a racing poll
//! - Optimistic `New` placeholders right after a trigger

pub mod cancel;
pub mod client;
pub mod config;
pub mod error;
pub mod guard;
pub mod manager;
pub mod operation;
pub mod poller;

pub use cancel::{CancelOutcome, CancellationCoordinator};
pub use client::types::{OperationKind, TriggerRequest};
pub use client::OperationClient;
pub use config::TrackerConfig;
pub use error::{TrackerError, TrackerResult};
pub use guard::{FetchOutcome, SessionAuthority, SessionAwareFetchGuard, TokenSession};
pub use manager::state::OperationStore;
pub use manager::OperationTracker;
pub use operation::machine::AlertLevel;
pub use operation::{Message, OperationRecord, Phase, SubUnit};
pub use poller::aggregator::{ProgressAggregator, ProgressSummary};
pub use poller::{PollControl, PollHandle, PollScheduler};

/// Default platform API endpoint
pub const DEFAULT_BASE_URL: &str = "http://localhost:8800";

/// Default poll interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;
