//! Suppresses repeated triggers from one vehicle that stays in view across
//! many consecutive frames.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::BoundingBox;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DedupConfig {
    /// Maximum top-left corner drift, per axis, for two boxes to count as one vehicle.
    pub position_tolerance_px: u32,
    pub capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            position_tolerance_px: 50,
            capacity: 256,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    text: String,
    bbox: BoundingBox,
    seen_at: DateTime<Utc>,
}

/// Shared across lanes; one mutex guards the whole window.
#[derive(Debug)]
pub struct DedupCache {
    cooldown: chrono::Duration,
    tolerance: u32,
    capacity: usize,
    entries: Mutex<VecDeque<Entry>>,
}

impl DedupCache {
    pub fn new(cooldown: Duration, config: &DedupConfig) -> Self {
        Self {
            cooldown: chrono::Duration::milliseconds(cooldown.as_millis() as i64),
            tolerance: config.position_tolerance_px,
            capacity: config.capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Entry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn purge(&self, entries: &mut VecDeque<Entry>, now: DateTime<Utc>) {
        entries.retain(|e| now - e.seen_at < self.cooldown);
    }

    /// True when the same text was recorded near `bbox` less than one cooldown ago.
    pub fn should_suppress(&self, text: &str, bbox: &BoundingBox, now: DateTime<Utc>) -> bool {
        let mut entries = self.lock();
        self.purge(&mut entries, now);
        entries
            .iter()
            .any(|e| e.text == text && e.bbox.is_near(bbox, self.tolerance))
    }

    pub fn record(&self, text: &str, bbox: &BoundingBox, now: DateTime<Utc>) {
        let mut entries = self.lock();
        self.purge(&mut entries, now);
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(Entry {
            text: text.to_string(),
            bbox: *bbox,
            seen_at: now,
        });
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
    use chrono::TimeZone;

    fn cache() -> DedupCache {
        DedupCache::new(Duration::from_secs(10), &DedupConfig::default())
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("valid timestamp")
    }

    #[test]
    fn suppresses_same_plate_nearby_within_cooldown() {
        let cache = cache();
        let bbox = BoundingBox::new(200, 180, 240, 70);
        assert!(!cache.should_suppress("KA01AB1234", &bbox, t(0)));
        cache.record("KA01AB1234", &bbox, t(0));

        let drifted = BoundingBox::new(230, 200, 240, 70);
        assert!(cache.should_suppress("KA01AB1234", &drifted, t(3)));
        assert!(!cache.should_suppress("KA01AB1234", &drifted, t(10)));
    }

    #[test]
    fn different_text_or_far_position_is_not_suppressed() {
        let cache = cache();
        let bbox = BoundingBox::new(200, 180, 240, 70);
        cache.record("KA01AB1234", &bbox, t(0));

        assert!(!cache.should_suppress("MH12DE1433", &bbox, t(1)));
        let far = BoundingBox::new(260, 180, 240, 70);
        assert!(!cache.should_suppress("KA01AB1234", &far, t(1)));
    }

    #[test]
    fn expired_entries_are_purged_and_capacity_is_bounded() {
        let cache = DedupCache::new(
            Duration::from_secs(10),
            &DedupConfig {
                capacity: 2,
                ..DedupConfig::default()
            },
        );
        let bbox = BoundingBox::new(0, 0, 100, 30);
        cache.record("AAA", &bbox, t(0));
        cache.record("BBB", &bbox, t(1));
        cache.record("CCC", &bbox, t(2));
        assert_eq!(cache.len(), 2);
        assert!(!cache.should_suppress("AAA", &bbox, t(3)));

        assert!(!cache.should_suppress("CCC", &bbox, t(20)));
        assert!(cache.is_empty());
    }
}
