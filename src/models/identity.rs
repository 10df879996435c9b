use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Seconds before the stated expiry at which a session counts as expired
pub const EXPIRY_MARGIN_SECS: i64 = 10;

/// Backend-issued user record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Value,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn email_or_empty(&self) -> &str {
        self.email.as_deref().unwrap_or("")
    }

    fn metadata_str(&self, key: &str) -> Option<&str> {
        self.user_metadata
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// `full_name` metadata, then `name` (OAuth providers), then the email
    /// local part, then "User"
    pub fn display_name(&self) -> String {
        if let Some(name) = self.metadata_str("full_name").or_else(|| self.metadata_str("name")) {
            return name.to_string();
        }
        match self.email_or_empty().split('@').next() {
            Some(local) if !local.is_empty() => local.to_string(),
            _ => "User".to_string(),
        }
    }
}

/// Backend-issued credential bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

#[derive(Debug, Deserialize)]
struct AccessClaims {
    exp: Option<i64>,
}

impl Session {
    /// Expiry in unix seconds, falling back to the access token's `exp` claim
    pub fn expiry(&self) -> Option<i64> {
        self.expires_at.or_else(|| token_expiry(&self.access_token))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiry() {
            Some(exp) => exp - EXPIRY_MARGIN_SECS <= now.timestamp(),
            None => false,
        }
    }
}

/// Read `exp` without verifying the signature; the backend verifies tokens,
/// the client only needs to know when to refresh
fn token_expiry(token: &str) -> Option<i64> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<AccessClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .ok()
        .and_then(|data| data.claims.exp)
}
