//! Bounded per-table log of refresh attempts.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::model::RefreshMode;

/// Entries beyond this count are dropped oldest-first; a refresh history
/// deeper than this has no operational value over what metrics/logging
/// already retain.
pub const MAX_AUDIT_ENTRIES: usize = 100;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Success { rows_affected: Option<u64> },
    Failure { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub mode: RefreshMode,
    pub outcome: Outcome,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

#[derive(Default)]
pub struct AuditLog(VecDeque<AuditEntry>);

impl AuditLog {
    pub fn push(&mut self, entry: AuditEntry) {
        self.0.push_back(entry);
        while self.0.len() > MAX_AUDIT_ENTRIES {
            self.0.pop_front();
        }
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.0.iter().cloned().collect()
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u128(d.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: u64) -> AuditEntry {
        AuditEntry {
            timestamp: DateTime::from_timestamp(n as i64, 0).unwrap(),
            mode: RefreshMode::Full,
            outcome: Outcome::Success { rows_affected: Some(n) },
            duration: Duration::from_millis(1),
        }
    }

    #[test]
    fn log_is_bounded_to_max_entries() {
        let mut log = AuditLog::default();
        for i in 0..(MAX_AUDIT_ENTRIES as u64 + 10) {
            log.push(entry(i));
        }
        assert_eq!(log.entries().len(), MAX_AUDIT_ENTRIES);
        // Oldest entries were evicted first.
        assert_eq!(log.entries().first().unwrap().timestamp, entry(10).timestamp);
    }
}
