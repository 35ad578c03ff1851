//! Bounded transition history.
//!
//! Entries are appended in settle order, which may differ from launch order:
//! a superseded transition can settle (and be recorded) after the machine has
//! already moved past it. The history holds at most [`HISTORY_CAPACITY`]
//! entries; the oldest entry is evicted on overflow.

use super::status::TransitionStatus;
use super::trigger::{Hints, StateId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use uuid::Uuid;

/// Upper bound on retained history entries.
pub const HISTORY_CAPACITY: usize = 100;

/// Record of one transition event (launch, supersede or settle).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Identity of the transition this entry describes
    pub transition: Uuid,
    /// State the transition left (`None` for the entrypoint move)
    pub from: Option<StateId>,
    /// State the transition targets
    pub to: StateId,
    pub hints: Hints,
    pub status: TransitionStatus,
    /// Result value, or the rendered error for failures
    pub value: Value,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(
        transition: Uuid,
        from: Option<StateId>,
        to: StateId,
        hints: Hints,
        status: TransitionStatus,
        value: Value,
    ) -> Self {
        Self {
            transition,
            from,
            to,
            hints,
            status,
            value,
            timestamp: Utc::now(),
        }
    }
}

/// Fixed-capacity FIFO of [`HistoryEntry`] values.
///
/// # Example
///
/// ```rust
/// use switchboard::core::{HistoryEntry, StateHistory, TransitionStatus};
/// use serde_json::Value;
/// use uuid::Uuid;
///
/// let mut history = StateHistory::with_capacity(2);
/// for to in ["A", "B", "C"] {
///     history.record(HistoryEntry::new(
///         Uuid::new_v4(),
///         None,
///         to.to_string(),
///         Value::Null,
///         TransitionStatus::Executed,
///         Value::Null,
///     ));
/// }
///
/// assert_eq!(history.len(), 2);
/// assert_eq!(history.path(), vec!["B", "C"]);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(from = "RawHistory")]
pub struct StateHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

/// Unchecked wire form; bounds are re-applied on conversion.
#[derive(Deserialize)]
struct RawHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl From<RawHistory> for StateHistory {
    fn from(raw: RawHistory) -> Self {
        let mut history = Self::with_capacity(raw.capacity);
        for entry in raw.entries {
            history.record(entry);
        }
        history
    }
}

impl Default for StateHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl StateHistory {
    /// Create an empty history holding up to [`HISTORY_CAPACITY`] entries.
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    /// Create an empty history with a smaller bound.
    ///
    /// The capacity is clamped to `1..=HISTORY_CAPACITY`.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, HISTORY_CAPACITY);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest one when full.
    pub fn record(&mut self, entry: HistoryEntry) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &HistoryEntry> + ExactSizeIterator {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// States successfully entered, in settle order.
    pub fn path(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|entry| entry.status == TransitionStatus::Executed)
            .map(|entry| entry.to.as_str())
            .collect()
    }

    /// Time between the oldest and newest retained entries.
    pub fn duration(&self) -> Option<Duration> {
        let (first, last) = (self.entries.front()?, self.entries.back()?);
        last.timestamp
            .signed_duration_since(first.timestamp)
            .to_std()
            .ok()
    }
}
