use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard},
};

use crate::models::Decision;

/// Bounded history of recent decisions across all lanes.
#[derive(Debug)]
pub struct DecisionLog {
    capacity: usize,
    entries: Mutex<VecDeque<Decision>>,
}

impl DecisionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Decision>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn push(&self, decision: Decision) {
        let mut entries = self.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(decision);
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<Decision> {
        self.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DenialReason, LaneId, Outcome};
    use chrono::Utc;

    fn denied(plate: &str) -> Decision {
        Decision {
            lane: LaneId::from("entry"),
            plate: plate.to_string(),
            confidence: 0.9,
            recognizer: "test_stub",
            outcome: Outcome::Denied {
                reason: DenialReason::NotRegistered,
            },
            decided_at: Utc::now(),
        }
    }

    #[test]
    fn keeps_only_the_newest_entries() {
        let log = DecisionLog::new(2);
        log.push(denied("AA11AA1111"));
        log.push(denied("BB22BB2222"));
        log.push(denied("CC33CC3333"));

        let recent = log.recent(10);
        assert_eq!(log.len(), 2);
        assert_eq!(recent[0].plate, "CC33CC3333");
        assert_eq!(recent[1].plate, "BB22BB2222");
        assert_eq!(log.recent(1).len(), 1);
    }
}
