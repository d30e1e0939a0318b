use super::{Message, OperationRecord, Phase, SubUnit};
use crate::client::types::{OperationKind, RawOperationPayload};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, trace, warn};

/// Phase as reported by the server, before terminal classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportedPhase {
    New,
    Preparing,
    InProgress,
    Succeeded,
    SucceededWithIssues,
    Failed,
    Deleting,
    Canceled,
}

/// How loudly a record should be shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum AlertLevel {
    None,
    Warning,
    Error,
}

/// Map a server phase string to its lifecycle meaning
pub fn map_phase(raw: &str) -> ReportedPhase {
    let normalized: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();

    match normalized.as_str() {
        "" | "new" | "pending" => ReportedPhase::New,
        "preparing" | "waiting" => ReportedPhase::Preparing,
        "inprogress" | "running" | "waitingforpluginoperations" => ReportedPhase::InProgress,
        s if s.starts_with("finalizing") => ReportedPhase::InProgress,
        "completed" | "complete" | "succeeded" | "success" => ReportedPhase::Succeeded,
        "partiallyfailed" => ReportedPhase::SucceededWithIssues,
        "failed" | "failedvalidation" | "error" => ReportedPhase::Failed,
        "deleting" => ReportedPhase::Deleting,
        "canceled" | "cancelled" => ReportedPhase::Canceled,
        _ => {
            warn!(phase = raw, "unknown operation phase, treating as in progress");
            ReportedPhase::InProgress
        }
    }
}

/// Feed one polled payload into the lifecycle of an operation.
///
/// Terminal records are absorbing: a late or duplicate poll returns `current`
/// untouched. A payload whose phase ranks below the current one is treated as
/// stale. Otherwise the new payload replaces the record wholesale.
pub fn advance(current: Option<&OperationRecord>, kind: OperationKind, raw: RawOperationPayload) -> OperationRecord {
    if let Some(current) = current {
        if current.is_terminal() {
            trace!(id = %current.id, phase = ?current.phase, "ignoring poll for terminal operation");
            return current.clone();
        }
    }

    let observed_at = Utc::now();
    let reported = match raw.phase.as_deref() {
        Some(phase) => map_phase(phase),
        None => current.map_or(ReportedPhase::New, |c| reported_from(c.phase)),
    };

    let mut errors: Vec<Message> = raw.errors.into_iter().map(Message::from).collect();
    let mut warnings: Vec<Message> = raw.warnings.into_iter().map(Message::from).collect();

    let phase = match reported {
        ReportedPhase::New => Phase::New,
        ReportedPhase::Preparing => Phase::Preparing,
        ReportedPhase::InProgress => Phase::InProgress,
        ReportedPhase::Deleting => Phase::Deleting,
        ReportedPhase::Succeeded if errors.is_empty() => Phase::Completed,
        ReportedPhase::Succeeded | ReportedPhase::SucceededWithIssues => Phase::PartiallyFailed,
        ReportedPhase::Failed => Phase::Failed,
        ReportedPhase::Canceled => Phase::Canceled,
    };

    if let Some(current) = current {
        if phase.rank() < current.phase.rank() {
            debug!(id = %current.id, current = ?current.phase, reported = ?phase, "discarding stale poll");
            return current.clone();
        }
    }

    if phase.is_failure() {
        if errors.is_empty() && (phase == Phase::Failed || warnings.is_empty()) {
            errors.push(fallback_error(phase));
        }
    } else if !errors.is_empty() {
        // Errors imply a failed phase; keep them visible as warnings until the server decides.
        warnings.append(&mut errors);
    }

    let id = current
        .map(|c| c.id.clone())
        .or_else(|| raw.id.clone())
        .or_else(|| raw.name.clone())
        .unwrap_or_default();
    let name = raw.name.or_else(|| current.and_then(|c| c.name.clone()));
    let kind = current.map_or(kind, |c| c.kind);

    let started_at = parse_timestamp(raw.started_at.as_deref()).or_else(|| current.and_then(|c| c.started_at));
    let finished_at = if phase.is_terminal() {
        parse_timestamp(raw.finished_at.as_deref()).or(Some(observed_at))
    } else {
        None
    };

    OperationRecord {
        id,
        kind,
        name,
        phase,
        started_at,
        finished_at,
        errors,
        warnings,
        sub_units: raw.volumes.into_iter().map(SubUnit::from).collect(),
        observed_at,
    }
}

/// Record for an operation the fetch guard declared failed
pub fn fail(current: Option<&OperationRecord>, kind: OperationKind, id: &str, message: &str) -> OperationRecord {
    if let Some(current) = current.filter(|c| c.is_terminal()) {
        return current.clone();
    }

    let now = Utc::now();
    let message = if message.trim().is_empty() {
        fallback_error(Phase::Failed)
    } else {
        Message::new("Operation failed", message)
    };

    let mut record = current
        .cloned()
        .unwrap_or_else(|| OperationRecord::placeholder(id, kind, None));
    record.phase = Phase::Failed;
    record.errors = vec![message];
    record.finished_at = Some(now);
    record.observed_at = now;
    record
}

/// Local, optimistic cancel: terminal even without a confirming poll
pub fn cancel(current: &OperationRecord) -> OperationRecord {
    if current.is_terminal() {
        return current.clone();
    }

    let now = Utc::now();
    let mut record = current.clone();
    record.phase = Phase::Canceled;
    record.finished_at = Some(now);
    record.observed_at = now;
    record
}

/// Errors win over warnings for alerting; warnings alone only ever warn
pub fn alert_level(record: &OperationRecord) -> AlertLevel {
    match record.phase {
        Phase::Failed => AlertLevel::Error,
        Phase::PartiallyFailed if !record.errors.is_empty() => AlertLevel::Error,
        Phase::PartiallyFailed => AlertLevel::Warning,
        _ if !record.warnings.is_empty() => AlertLevel::Warning,
        _ => AlertLevel::None,
    }
}

pub(crate) fn fallback_error(phase: Phase) -> Message {
    match phase {
        Phase::PartiallyFailed => Message::new(
            "Operation partially failed",
            "The operation finished with issues but the server did not report any details",
        ),
        _ => Message::new(
            "Operation failed",
            "The operation failed but the server did not report a reason",
        ),
    }
}

fn reported_from(phase: Phase) -> ReportedPhase {
    match phase {
        Phase::New => ReportedPhase::New,
        Phase::Preparing => ReportedPhase::Preparing,
        Phase::InProgress => ReportedPhase::InProgress,
        Phase::Deleting => ReportedPhase::Deleting,
        Phase::Completed => ReportedPhase::Succeeded,
        Phase::PartiallyFailed => ReportedPhase::SucceededWithIssues,
        Phase::Failed => ReportedPhase::Failed,
        Phase::Canceled => ReportedPhase::Canceled,
    }
}

fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            debug!(timestamp = raw, error = %e, "unparseable timestamp");
            None
        }
    }
}
