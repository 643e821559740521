use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Events retained between dispatches.
pub const SKIPPED_CAPACITY: usize = 20;

/// An event the gate suppressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedEvent {
    pub event_type: String,
    pub at: DateTime<Utc>,
    pub summary: String,
}

/// Bounded FIFO of suppressed events.
///
/// The oldest entry is evicted when full. [`SkippedEvents::drain`] takes every
/// entry in one step so a prompt sees each skipped event exactly once.
#[derive(Debug, Clone)]
pub struct SkippedEvents {
    entries: VecDeque<SkippedEvent>,
    capacity: usize,
}

impl Default for SkippedEvents {
    fn default() -> Self {
        Self::with_capacity(SKIPPED_CAPACITY)
    }
}

impl SkippedEvents {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, event: SkippedEvent) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<SkippedEvent> {
        self.entries.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skipped(n: usize) -> SkippedEvent {
        SkippedEvent {
            event_type: "BATTLE_SUMMARY".to_string(),
            at: Utc::now(),
            summary: format!("battle {n}"),
        }
    }

    #[test]
    fn test_evicts_oldest() {
        let mut buffer = SkippedEvents::default();
        for n in 0..25 {
            buffer.push(skipped(n));
        }
        assert_eq!(buffer.len(), SKIPPED_CAPACITY);

        let drained = buffer.drain();
        assert_eq!(drained.first().unwrap().summary, "battle 5");
        assert_eq!(drained.last().unwrap().summary, "battle 24");
        assert!(buffer.is_empty());
        assert!(buffer.drain().is_empty());
    }
}
