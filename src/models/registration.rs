use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl RegistrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Pending => "pending",
            RegistrationStatus::Confirmed => "confirmed",
            RegistrationStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub id: i64,
    pub training_id: i64,
    pub training_name: String,
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub status: RegistrationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Registration {
    pub const TABLE: &'static str = "training_registrations";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRegistration {
    pub training_id: i64,
    pub training_name: String,
    pub status: RegistrationStatus,
}

impl NewRegistration {
    /// Insert row; the caller's identity comes from the session, not the form
    pub fn into_row(self, user_id: &str, user_name: &str, user_email: &str) -> Value {
        json!({
            "training_id": self.training_id,
            "training_name": self.training_name,
            "status": self.status,
            "user_id": user_id,
            "user_name": user_name,
            "user_email": user_email,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RegistrationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
}

impl RegistrationUpdate {
    pub fn status(status: RegistrationStatus) -> Self {
        Self { status: Some(status), ..Default::default() }
    }

    pub fn confirms(&self) -> bool {
        self.status == Some(RegistrationStatus::Confirmed)
    }
}
