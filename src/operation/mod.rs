//! Canonical view of tracked server-side jobs.

pub mod machine;

use crate::client::types::{OperationKind, RawMessage, RawSubUnit};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    New,
    Preparing,
    InProgress,
    Completed,
    PartiallyFailed,
    Failed,
    Deleting,
    Canceled,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Phase::Completed | Phase::PartiallyFailed | Phase::Failed | Phase::Canceled
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Phase::Failed | Phase::PartiallyFailed)
    }

    /// Position along `New -> Preparing -> InProgress -> Deleting -> terminal`
    pub(crate) fn rank(&self) -> u8 {
        match self {
            Phase::New => 0,
            Phase::Preparing => 1,
            Phase::InProgress => 2,
            Phase::Deleting => 3,
            Phase::Completed | Phase::PartiallyFailed | Phase::Failed | Phase::Canceled => 4,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::New => "New",
            Phase::Preparing => "Preparing",
            Phase::InProgress => "In progress",
            Phase::Completed => "Completed",
            Phase::PartiallyFailed => "Partially failed",
            Phase::Failed => "Failed",
            Phase::Deleting => "Deleting",
            Phase::Canceled => "Canceled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub title: String,
    pub message: String,
}

impl Message {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }
}

impl From<RawMessage> for Message {
    fn from(raw: RawMessage) -> Self {
        Self::new(raw.title, raw.message)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.title.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.title, self.message)
        }
    }
}

/// Independently progressing piece of an operation, e.g. one volume of a restore
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubUnit {
    pub name: String,
    /// 0-100; `None` when the server has not reported a figure yet
    pub completion_percent: Option<f64>,
    pub time_remaining_seconds: Option<u64>,
}

impl From<RawSubUnit> for SubUnit {
    fn from(raw: RawSubUnit) -> Self {
        Self {
            name: raw.name,
            completion_percent: raw.completion_percent.map(|p| p.clamp(0.0, 100.0)),
            time_remaining_seconds: raw.time_remaining_seconds,
        }
    }
}

/// Immutable snapshot of one tracked job. Each poll produces a new record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationRecord {
    pub id: String,
    pub kind: OperationKind,
    /// Server-side job name, when it differs from or precedes the id
    pub name: Option<String>,
    pub phase: Phase,
    pub started_at: Option<DateTime<Utc>>,
    /// Only set on terminal phases
    pub finished_at: Option<DateTime<Utc>>,
    pub errors: Vec<Message>,
    pub warnings: Vec<Message>,
    pub sub_units: Vec<SubUnit>,
    pub observed_at: DateTime<Utc>,
}

impl OperationRecord {
    /// Record shown right after a trigger, before the first poll answers
    pub fn placeholder(id: impl Into<String>, kind: OperationKind, name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            name,
            phase: Phase::New,
            started_at: Some(now),
            finished_at: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            sub_units: Vec::new(),
            observed_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Messages to put in front of the user, errors first.
    ///
    /// A failed phase always yields at least one message.
    pub fn display_messages(&self) -> Vec<Message> {
        let mut messages: Vec<Message> = self.errors.iter().chain(self.warnings.iter()).cloned().collect();
        if self.phase.is_failure() && self.errors.is_empty() && messages.is_empty() {
            messages.push(machine::fallback_error(self.phase));
        }
        messages
    }
}

/// Key of an optimistic placeholder
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlaceholderKey {
    /// The trigger endpoint returned an id
    Id(String),
    /// Legacy trigger without an id; matched by job name
    Name(String),
}

impl PlaceholderKey {
    pub fn as_str(&self) -> &str {
        match self {
            PlaceholderKey::Id(s) | PlaceholderKey::Name(s) => s,
        }
    }

    /// Whether an authoritative record supersedes the placeholder with this key
    pub fn matches(&self, record: &OperationRecord) -> bool {
        match self {
            PlaceholderKey::Id(id) => record.id == *id,
            PlaceholderKey::Name(name) => {
                record.name.as_deref() == Some(name.as_str()) || record.id == *name
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticPlaceholder {
    pub key: PlaceholderKey,
    pub record: OperationRecord,
}

impl OptimisticPlaceholder {
    pub fn new(key: PlaceholderKey, kind: OperationKind) -> Self {
        let name = match &key {
            PlaceholderKey::Name(name) => Some(name.clone()),
            PlaceholderKey::Id(_) => None,
        };
        let record = OperationRecord::placeholder(key.as_str(), kind, name);
        Self { key, record }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_phases() {
        assert!(Phase::Completed.is_terminal());
        assert!(Phase::PartiallyFailed.is_terminal());
        assert!(Phase::Failed.is_terminal());
        assert!(Phase::Canceled.is_terminal());
        assert!(!Phase::Deleting.is_terminal());
        assert!(!Phase::New.is_terminal());
    }

    #[test]
    fn test_placeholder_is_new() {
        let placeholder = OptimisticPlaceholder::new(PlaceholderKey::Name("restore-1".to_string()), OperationKind::Restore);
        assert_eq!(placeholder.record.phase, Phase::New);
        assert_eq!(placeholder.record.id, "restore-1");
        assert_eq!(placeholder.record.name.as_deref(), Some("restore-1"));
        assert!(placeholder.record.finished_at.is_none());
    }

    #[test]
    fn test_placeholder_key_matching() {
        let mut record = OperationRecord::placeholder("abc123", OperationKind::Backup, Some("nightly".to_string()));
        record.phase = Phase::InProgress;

        assert!(PlaceholderKey::Id("abc123".to_string()).matches(&record));
        assert!(PlaceholderKey::Name("nightly".to_string()).matches(&record));
        assert!(!PlaceholderKey::Id("nightly".to_string()).matches(&record));
    }

    #[test]
    fn test_failed_record_always_has_a_message() {
        let mut record = OperationRecord::placeholder("b1", OperationKind::Backup, None);
        record.phase = Phase::Failed;
        let messages = record.display_messages();
        assert_eq!(messages.len(), 1);
        assert!(!messages[0].message.is_empty());
    }

    #[test]
    fn test_message_display() {
        assert_eq!(Message::new("velero", "timed out").to_string(), "velero: timed out");
        assert_eq!(Message::new("", "timed out").to_string(), "timed out");
    }
}
