use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::User;
use crate::types::Role;

/// Emails granted the admin role, normalised to trimmed lower case
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminAllowList {
    emails: Vec<String>,
}

impl AdminAllowList {
    /// Parse a comma-separated list; blank entries are dropped
    pub fn from_csv(raw: &str) -> Self {
        let emails = raw
            .split(',')
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        Self { emails }
    }

    pub fn contains(&self, email: &str) -> bool {
        let email = email.trim().to_lowercase();
        self.emails.iter().any(|e| *e == email)
    }

    pub fn role_for(&self, email: &str) -> Role {
        if self.contains(email) {
            Role::Admin
        } else {
            Role::User
        }
    }

    pub fn len(&self) -> usize {
        self.emails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }
}

/// Client-derived view of the signed-in identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub user_type: Role,
    #[serde(default)]
    pub sex: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub contact_number: Option<String>,
}

impl Profile {
    pub fn from_user(user: &User, role: Role, full_name: Option<&str>) -> Self {
        let metadata = |key: &str| {
            user.user_metadata
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
        };
        Self {
            id: user.id.clone(),
            email: user.email_or_empty().to_string(),
            full_name: full_name.map(str::to_string).unwrap_or_else(|| user.display_name()),
            user_type: role,
            sex: metadata("sex"),
            address: metadata("address"),
            contact_number: metadata("contact_number"),
        }
    }

    /// Admins are always complete; users need sex, address and contact number
    pub fn is_complete(&self) -> bool {
        self.user_type != Role::User
            || (self.sex.is_some() && self.address.is_some() && self.contact_number.is_some())
    }
}
