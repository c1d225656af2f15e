//! Append-only audit trail for one attestation flow

use std::time::SystemTime;

/// A single timestamped trail entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrailEntry {
    at: SystemTime,
    message: String,
}

impl TrailEntry {
    /// When the entry was recorded
    pub fn at(&self) -> SystemTime {
        self.at
    }

    /// The human-readable entry text
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Ordered record of what happened while handling one request.
///
/// Entries can only be appended. Nothing removes or reorders them, so the
/// trail stays usable as a forensic record even when the flow is denied.
#[derive(Debug, Clone)]
pub struct ExecutionTrail {
    started_at: SystemTime,
    entries: Vec<TrailEntry>,
}

impl ExecutionTrail {
    pub fn new() -> Self {
        Self {
            started_at: SystemTime::now(),
            entries: Vec::new(),
        }
    }

    /// Append an entry
    pub fn add(&mut self, message: impl Into<String>) {
        self.entries.push(TrailEntry {
            at: SystemTime::now(),
            message: message.into(),
        });
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn entries(&self) -> &[TrailEntry] {
        &self.entries
    }

    /// Entry texts in recording order
    pub fn steps(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(TrailEntry::message)
    }

    /// True if any entry equals `message`
    pub fn contains(&self, message: &str) -> bool {
        self.steps().any(|step| step == message)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ExecutionTrail {
    fn default() -> Self {
        Self::new()
    }
}
