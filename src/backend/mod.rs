//! Boundary to the hosted backend: identity, tables, blob storage and the
//! realtime change feed. Everything backend-specific lives behind these
//! traits; controllers only see `Filter`, JSON rows and the model types.

pub mod memory;
pub mod realtime;
pub mod rest;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::filter::{Filter, FilterError};
use crate::models::{Session, User};
use crate::types::Operation;

pub use memory::MemoryBackend;
pub use realtime::RealtimeFeed;
pub use rest::RestBackend;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(String),

    /// Identity service rejected the request (bad credentials, expired link, ...)
    #[error("{0}")]
    Auth(String),

    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("Subscription closed: {0}")]
    Closed(String),

    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("State file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid backend URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Decode(err.to_string())
    }
}

// ============================================
// Identity
// ============================================

/// Identity events pushed by the backend client
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
}

impl AuthEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AuthEvent::SignedIn(_) => "SIGNED_IN",
            AuthEvent::SignedOut => "SIGNED_OUT",
            AuthEvent::TokenRefreshed(_) => "TOKEN_REFRESHED",
        }
    }
}

/// Result of a password sign-in or sign-up. A sign-up that needs email
/// confirmation returns a user without a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: Option<User>,
    pub session: Option<Session>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OAuthRequest {
    pub provider: OAuthProvider,
    pub redirect_to: String,
    pub query_params: Vec<(String, String)>,
}

/// `{origin}/auth/v1/authorize?provider=..&redirect_to=..&<extra params>`
pub(crate) fn authorize_url(origin: &str, request: &OAuthRequest) -> Result<String, BackendError> {
    let mut url = url::Url::parse(&format!("{}/auth/v1/authorize", origin.trim_end_matches('/')))?;
    url.query_pairs_mut()
        .append_pair("provider", request.provider.as_str())
        .append_pair("redirect_to", &request.redirect_to)
        .extend_pairs(request.query_params.iter());
    Ok(url.into())
}

#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Current session, restoring or refreshing a stored one when possible
    async fn get_session(&self) -> Result<Option<Session>, BackendError>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthResponse, BackendError>;

    async fn sign_up(&self, email: &str, password: &str, metadata: Value) -> Result<AuthResponse, BackendError>;

    /// Provider authorization URL the caller navigates to
    async fn sign_in_with_oauth(&self, request: OAuthRequest) -> Result<String, BackendError>;

    /// Complete an OAuth redirect from the tokens the provider handed back
    async fn exchange_oauth_tokens(&self, access_token: &str, refresh_token: &str) -> Result<Session, BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;

    async fn refresh_session(&self) -> Result<Session, BackendError>;

    /// One receiver per subscriber; events sent before subscribing are not replayed
    fn events(&self) -> broadcast::Receiver<AuthEvent>;
}

// ============================================
// Tables
// ============================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectResult {
    pub rows: Vec<Value>,
    /// Present when the filter asked for a count
    pub count: Option<i64>,
}

impl SelectResult {
    pub fn into_rows<T: DeserializeOwned>(self) -> Result<Vec<T>, BackendError> {
        self.rows
            .into_iter()
            .map(|row| serde_json::from_value(row).map_err(BackendError::from))
            .collect()
    }

    pub fn first<T: DeserializeOwned>(self) -> Result<Option<T>, BackendError> {
        match self.rows.into_iter().next() {
            Some(row) => Ok(Some(serde_json::from_value(row)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
pub trait TableService: Send + Sync {
    async fn select(&self, filter: &Filter) -> Result<SelectResult, BackendError>;

    /// Insert one row and return it as stored
    async fn insert(&self, table: &str, row: Value) -> Result<Value, BackendError>;

    /// Patch the single row selected by `filter` and return it as stored
    async fn update(&self, filter: &Filter, patch: Value) -> Result<Value, BackendError>;

    async fn delete(&self, filter: &Filter) -> Result<(), BackendError>;
}

/// Enforce `single` / `maybe_single` cardinality on a result set
pub(crate) fn check_cardinality(filter: &Filter, rows: &[Value]) -> Result<(), BackendError> {
    use crate::filter::Cardinality;
    match (filter.cardinality(), rows.len()) {
        (Cardinality::Single, 1) | (Cardinality::Many, _) | (Cardinality::MaybeSingle, 0 | 1) => Ok(()),
        (Cardinality::Single, 0) => Err(BackendError::NotFound(format!("No rows in {}", filter.table()))),
        (_, n) => Err(BackendError::Status {
            status: 406,
            message: format!("Expected a single row from {}, found {}", filter.table(), n),
        }),
    }
}

// ============================================
// Blob storage
// ============================================

#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn upload(&self, bucket: &str, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), BackendError>;

    fn public_url(&self, bucket: &str, path: &str) -> String;

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), BackendError>;
}

// ============================================
// Change feed
// ============================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSubscription {
    pub channel: String,
    pub schema: String,
    pub table: String,
    /// `None` subscribes to every change kind
    pub event: Option<Operation>,
}

impl ChangeSubscription {
    pub fn all_events(channel: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            schema: "public".to_string(),
            table: table.into(),
            event: None,
        }
    }

    pub fn accepts(&self, event: &ChangeEvent) -> bool {
        event.table == self.table
            && event.schema == self.schema
            && self.event.map_or(true, |kind| kind == event.kind)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub schema: String,
    pub table: String,
    pub kind: Operation,
    pub record: Value,
    pub old_record: Value,
}

type Teardown = Box<dyn FnOnce() + Send>;

/// Live subscription; dropping it tears the subscription down
pub struct ChangeStream {
    receiver: mpsc::UnboundedReceiver<ChangeEvent>,
    teardown: Option<Teardown>,
}

impl ChangeStream {
    pub fn new(receiver: mpsc::UnboundedReceiver<ChangeEvent>, teardown: impl FnOnce() + Send + 'static) -> Self {
        Self { receiver, teardown: Some(Box::new(teardown)) }
    }

    /// Next event, or `None` once the feed is closed
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }

    pub fn unsubscribe(self) {}
}

impl Drop for ChangeStream {
    fn drop(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl std::fmt::Debug for ChangeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeStream").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, subscription: ChangeSubscription) -> Result<ChangeStream, BackendError>;
}

// ============================================
// Bundle
// ============================================

/// The four backend services, shared by every controller
#[derive(Clone)]
pub struct Backend {
    pub identity: Arc<dyn IdentityService>,
    pub tables: Arc<dyn TableService>,
    pub storage: Arc<dyn BlobStorage>,
    pub changes: Arc<dyn ChangeFeed>,
}

impl Backend {
    /// All services served by one in-process store
    pub fn memory(store: Arc<MemoryBackend>) -> Self {
        Self {
            identity: store.clone(),
            tables: store.clone(),
            storage: store.clone(),
            changes: store,
        }
    }

    /// HTTP services plus the websocket change feed
    pub fn remote(config: &crate::config::AppConfig) -> Result<Self, BackendError> {
        let rest = Arc::new(RestBackend::new(config)?);
        let feed = Arc::new(RealtimeFeed::new(&config.backend, rest.clone()));
        Ok(Self {
            identity: rest.clone(),
            tables: rest.clone(),
            storage: rest,
            changes: feed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cardinality_rules() {
        let single = Filter::new("t").unwrap().single();
        assert!(check_cardinality(&single, &[json!({})]).is_ok());
        assert!(matches!(check_cardinality(&single, &[]), Err(BackendError::NotFound(_))));

        let maybe = Filter::new("t").unwrap().maybe_single();
        assert!(check_cardinality(&maybe, &[]).is_ok());
        assert!(check_cardinality(&maybe, &[json!({}), json!({})]).is_err());
    }

    #[test]
    fn subscription_filters_events() {
        let sub = ChangeSubscription::all_events("trainings-changes", "trainings");
        let event = ChangeEvent {
            schema: "public".into(),
            table: "trainings".into(),
            kind: Operation::Delete,
            record: Value::Null,
            old_record: json!({"id": 1}),
        };
        assert!(sub.accepts(&event));
        let other = ChangeEvent { table: "training_registrations".into(), ..event };
        assert!(!sub.accepts(&other));
    }

    #[test]
    fn authorize_url_carries_provider_params() {
        let request = OAuthRequest {
            provider: OAuthProvider::Google,
            redirect_to: "http://localhost:5173/auth/callback?role=user".into(),
            query_params: vec![("access_type".into(), "offline".into()), ("prompt".into(), "consent".into())],
        };
        let url = url::Url::parse(&authorize_url("http://localhost:54321/", &request).unwrap()).unwrap();
        assert_eq!(url.path(), "/auth/v1/authorize");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("provider".into(), "google".into())));
        assert!(pairs.contains(&("redirect_to".into(), "http://localhost:5173/auth/callback?role=user".into())));
        assert!(pairs.contains(&("prompt".into(), "consent".into())));
    }

    #[test]
    fn dropping_stream_runs_teardown() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let seen = flag.clone();
        let stream = ChangeStream::new(rx, move || seen.store(true, std::sync::atomic::Ordering::SeqCst));
        stream.unsubscribe();
        assert!(flag.load(std::sync::atomic::Ordering::SeqCst));
    }
}
