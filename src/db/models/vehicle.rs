use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registry entry for a vehicle allowed through the gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VehicleRecord {
    pub plate: String,
    pub holder_name: Option<String>,
    pub holder_contact: Option<String>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub slot: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VehicleRecord {
    pub fn new(plate: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            plate: plate.into(),
            holder_name: None,
            holder_contact: None,
            valid_from: None,
            valid_until: None,
            slot: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Open-ended on either side when a bound is unset.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_from.map_or(true, |from| at >= from)
            && self.valid_until.map_or(true, |until| at <= until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn validity_window_bounds_are_inclusive_and_optional() {
        let now = Utc::now();
        let mut record = VehicleRecord::new("KA01AB1234");
        assert!(record.is_valid_at(now));

        record.valid_from = Some(now);
        record.valid_until = Some(now + Duration::days(30));
        assert!(record.is_valid_at(now));
        assert!(!record.is_valid_at(now - Duration::seconds(1)));
        assert!(!record.is_valid_at(now + Duration::days(31)));
    }
}
