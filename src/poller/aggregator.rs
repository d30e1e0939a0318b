use crate::operation::machine::{alert_level, AlertLevel};
use crate::operation::{OperationRecord, Phase};
use serde::Serialize;
use std::time::Duration;

/// Aggregate progress across the sub-units of one operation.
///
/// Holds no state: everything is derived from the latest record.
pub struct ProgressAggregator;

impl ProgressAggregator {
    /// Mean completion of all sub-units, missing figures counting as 0.
    /// `None` until the server reports at least one sub-unit.
    pub fn overall_percent(record: &OperationRecord) -> Option<f64> {
        if record.sub_units.is_empty() {
            return None;
        }

        let total: f64 = record
            .sub_units
            .iter()
            .map(|u| u.completion_percent.unwrap_or(0.0))
            .sum();
        Some(total / record.sub_units.len() as f64)
    }

    /// The slowest sub-unit gates completion. Unknown unless every sub-unit has an estimate.
    pub fn estimated_remaining(record: &OperationRecord) -> Option<Duration> {
        if record.sub_units.is_empty() {
            return None;
        }

        record
            .sub_units
            .iter()
            .map(|u| u.time_remaining_seconds)
            .collect::<Option<Vec<u64>>>()?
            .into_iter()
            .max()
            .map(Duration::from_secs)
    }

    pub fn summarize(record: &OperationRecord) -> ProgressSummary {
        ProgressSummary {
            phase: record.phase,
            overall_percent: Self::overall_percent(record),
            estimated_remaining: Self::estimated_remaining(record),
            completed_units: record
                .sub_units
                .iter()
                .filter(|u| u.completion_percent.is_some_and(|p| p >= 100.0))
                .count(),
            total_units: record.sub_units.len(),
            error_count: record.errors.len(),
            warning_count: record.warnings.len(),
            alert: alert_level(record),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSummary {
    pub phase: Phase,
    pub overall_percent: Option<f64>,
    pub estimated_remaining: Option<Duration>,
    pub completed_units: usize,
    pub total_units: usize,
    pub error_count: usize,
    pub warning_count: usize,
    pub alert: AlertLevel,
}

impl ProgressSummary {
    /// One-line description for status bars and logs
    pub fn status_line(&self) -> String {
        if self.phase.is_terminal() {
            let mut line = self.phase.to_string();
            if self.error_count > 0 {
                line.push_str(&format!(" ({} errors)", self.error_count));
            }
            if self.warning_count > 0 {
                line.push_str(&format!(" ({} warnings)", self.warning_count));
            }
            return line;
        }

        match (self.overall_percent, self.estimated_remaining) {
            (Some(percent), Some(eta)) => format!(
                "{}: {:.0}% ({}/{} volumes), about {}s remaining",
                self.phase,
                percent,
                self.completed_units,
                self.total_units,
                eta.as_secs()
            ),
            (Some(percent), None) => format!(
                "{}: {:.0}% ({}/{} volumes)",
                self.phase, percent, self.completed_units, self.total_units
            ),
            (None, _) => self.phase.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::types::OperationKind;
    use crate::operation::SubUnit;

    fn record_with(units: Vec<(Option<f64>, Option<u64>)>) -> OperationRecord {
        let mut record = OperationRecord::placeholder("restore-1", OperationKind::Restore, None);
        record.phase = Phase::InProgress;
        record.sub_units = units
            .into_iter()
            .enumerate()
            .map(|(i, (percent, eta))| SubUnit {
                name: format!("vol{}", i + 1),
                completion_percent: percent,
                time_remaining_seconds: eta,
            })
            .collect();
        record
    }

    #[test]
    fn test_overall_percent_is_mean() {
        let record = record_with(vec![(Some(50.0), None), (Some(100.0), None), (Some(0.0), None)]);
        assert_eq!(ProgressAggregator::overall_percent(&record), Some(50.0));
    }

    #[test]
    fn test_overall_percent_missing_counts_as_zero() {
        let record = record_with(vec![(Some(80.0), None), (None, None)]);
        assert_eq!(ProgressAggregator::overall_percent(&record), Some(40.0));
    }

    #[test]
    fn test_overall_percent_without_sub_units() {
        let record = record_with(vec![]);
        assert_eq!(ProgressAggregator::overall_percent(&record), None);
        assert_eq!(ProgressAggregator::estimated_remaining(&record), None);
    }

    #[test]
    fn test_estimated_remaining_is_slowest_unit() {
        let record = record_with(vec![(Some(10.0), Some(300)), (Some(90.0), Some(20))]);
        assert_eq!(
            ProgressAggregator::estimated_remaining(&record),
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn test_estimated_remaining_unknown_if_any_missing() {
        let record = record_with(vec![(Some(10.0), Some(300)), (Some(90.0), None)]);
        assert_eq!(ProgressAggregator::estimated_remaining(&record), None);
    }

    #[test]
    fn test_summary_status_line() {
        let record = record_with(vec![(Some(100.0), Some(0)), (Some(40.0), Some(90))]);
        let summary = ProgressAggregator::summarize(&record);
        assert_eq!(summary.completed_units, 1);
        assert_eq!(summary.total_units, 2);
        assert_eq!(summary.status_line(), "In progress: 70% (1/2 volumes), about 90s remaining");

        let mut done = record.clone();
        done.phase = Phase::Completed;
        assert_eq!(ProgressAggregator::summarize(&done).status_line(), "Completed");
    }
}
