use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::registration::RegistrationStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Training {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub location: String,
    pub start_date_time: DateTime<Utc>,
    pub end_date_time: DateTime<Utc>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub capacity: i64,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,

    // Derived per fetch. Serialized for display only; writes use
    // `NewTraining` and `TrainingUpdate`
    #[serde(default)]
    pub confirmed_count: i64,
    #[serde(default)]
    pub user_registration_status: Option<RegistrationStatus>,
}

impl Training {
    pub const TABLE: &'static str = "trainings";

    pub fn is_in_progress(&self, now: DateTime<Utc>) -> bool {
        self.end_date_time >= now
    }

    pub fn is_archived(&self, now: DateTime<Utc>) -> bool {
        matches!(self.archived_at, Some(at) if at <= now)
    }

    pub fn seats_left(&self) -> i64 {
        (self.capacity - self.confirmed_count).max(0)
    }
}

/// Insert payload; ids, audit fields and `created_by` are assigned on insert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTraining {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub location: String,
    pub start_date_time: DateTime<Utc>,
    pub end_date_time: DateTime<Utc>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub capacity: i64,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,
}

/// Partial update; `None` leaves a column untouched, `Some(None)` clears it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<Option<DateTime<Utc>>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn partial_update_serializes_only_set_fields() {
        let update = TrainingUpdate {
            capacity: Some(20),
            image_url: Some(None),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&update).unwrap(), json!({"capacity": 20, "image_url": null}));
    }

    #[test]
    fn write_payloads_never_carry_derived_fields() {
        let now = Utc::now();
        let new = NewTraining {
            name: "Intro".into(),
            description: None,
            location: "Room 1".into(),
            start_date_time: now,
            end_date_time: now + Duration::hours(1),
            topics: vec![],
            capacity: 3,
            image_url: None,
            archived_at: None,
        };
        for payload in [serde_json::to_value(&new).unwrap(), serde_json::to_value(TrainingUpdate::default()).unwrap()] {
            assert!(payload.get("confirmed_count").is_none());
            assert!(payload.get("user_registration_status").is_none());
        }
    }

    #[test]
    fn derived_fields_default_when_absent() {
        let row = json!({
            "id": 1, "name": "Intro", "location": "Room 1",
            "start_date_time": "2030-01-01T09:00:00Z", "end_date_time": "2030-01-01T17:00:00Z",
            "capacity": 3, "created_at": "2029-01-01T00:00:00Z", "updated_at": "2029-01-01T00:00:00Z"
        });
        let training: Training = serde_json::from_value(row).unwrap();
        assert_eq!(training.confirmed_count, 0);
        assert!(training.user_registration_status.is_none());
        assert!(training.topics.is_empty());
        assert_eq!(training.seats_left(), 3);
    }

    #[test]
    fn archive_and_progress_checks() {
        let now = Utc::now();
        let row = json!({
            "id": 1, "name": "Intro", "location": "Room 1",
            "start_date_time": now - Duration::hours(2), "end_date_time": now - Duration::hours(1),
            "capacity": 3, "created_at": now, "updated_at": now,
            "archived_at": now - Duration::minutes(1)
        });
        let training: Training = serde_json::from_value(row).unwrap();
        assert!(!training.is_in_progress(now));
        assert!(training.is_archived(now));
    }
}
