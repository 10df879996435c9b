//! In-process backend serving identity, tables, blobs and change events from
//! one shared state. Backs the integration tests and the offline CLI mode.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use super::{
    authorize_url, check_cardinality, AuthEvent, AuthResponse, BackendError, BlobStorage, ChangeEvent, ChangeFeed,
    ChangeStream, ChangeSubscription, IdentityService, OAuthRequest, SelectResult, TableService,
};
use crate::filter::{CountMode, Filter};
use crate::models::{Session, User};
use crate::types::Operation;

pub const MEMORY_ORIGIN: &str = "http://memory.local";
const SESSION_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Account {
    user: User,
    password: String,
}

/// Everything that survives a `save` / `load` round trip
#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoryState {
    accounts: HashMap<String, Account>,
    session: Option<Session>,
    tables: HashMap<String, Vec<Value>>,
    next_ids: HashMap<String, i64>,
    blobs: HashMap<String, Vec<u8>>,
    #[serde(skip)]
    pending_oauth: HashMap<String, String>,
    #[serde(skip)]
    require_confirmation: bool,
    #[serde(skip)]
    failures: HashMap<String, String>,
    #[serde(skip)]
    calls: HashMap<String, usize>,
}

struct Subscriber {
    id: u64,
    subscription: ChangeSubscription,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    next_subscriber: AtomicU64,
    events: broadcast::Sender<AuthEvent>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn blob_key(bucket: &str, path: &str) -> String {
    format!("{}/{}", bucket, path)
}

fn issue_session(user: &User) -> Session {
    let now = Utc::now().timestamp();
    Session {
        access_token: format!("mem-access-{}", Uuid::new_v4()),
        refresh_token: format!("mem-refresh-{}", Uuid::new_v4()),
        token_type: "bearer".to_string(),
        expires_in: Some(SESSION_TTL_SECS),
        expires_at: Some(now + SESSION_TTL_SECS),
        user: user.clone(),
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::from_state(MemoryState::default())
    }

    fn from_state(state: MemoryState) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(state),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_subscriber: AtomicU64::new(1),
            events,
        }
    }

    /// Restore a snapshot written by [`MemoryBackend::save`]; a missing file
    /// yields an empty backend
    pub fn load(path: &Path) -> Result<Self, BackendError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        let state: MemoryState = serde_json::from_str(&content)?;
        tracing::debug!("Loaded offline state from {}", path.display());
        Ok(Self::from_state(state))
    }

    pub fn save(&self, path: &Path) -> Result<(), BackendError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&*lock(&self.state))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    // ---- test and seeding hooks ----

    /// Create a confirmed account; returns the stored user
    pub fn register_account(&self, email: &str, password: &str, metadata: Value) -> User {
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: Some(email.to_lowercase()),
            user_metadata: metadata,
            created_at: Some(Utc::now()),
        };
        lock(&self.state).accounts.insert(
            email.to_lowercase(),
            Account { user: user.clone(), password: password.to_string() },
        );
        user
    }

    /// When set, sign-up returns a user without a session
    pub fn require_email_confirmation(&self, required: bool) {
        lock(&self.state).require_confirmation = required;
    }

    /// Tokens a provider redirect would carry for `email`, creating the
    /// account on first use
    pub fn issue_oauth_tokens(&self, email: &str, full_name: &str) -> (String, String) {
        let access = format!("mem-oauth-{}", Uuid::new_v4());
        let refresh = format!("mem-refresh-{}", Uuid::new_v4());
        let exists = lock(&self.state).accounts.contains_key(&email.to_lowercase());
        if !exists {
            self.register_account(email, &Uuid::new_v4().to_string(), json!({ "name": full_name }));
        }
        lock(&self.state).pending_oauth.insert(access.clone(), email.to_lowercase());
        (access, refresh)
    }

    pub fn current_session(&self) -> Option<Session> {
        lock(&self.state).session.clone()
    }

    /// Push the stored session's expiry into the past
    pub fn expire_session(&self) {
        if let Some(session) = lock(&self.state).session.as_mut() {
            session.expires_at = Some(Utc::now().timestamp() - 60);
        }
    }

    /// Broadcast an identity event as the backend client would
    pub fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }

    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        let mut state = lock(&self.state);
        let max_id = rows.iter().filter_map(|r| r.get("id").and_then(Value::as_i64)).max().unwrap_or(0);
        let next = state.next_ids.entry(table.to_string()).or_insert(0);
        *next = (*next).max(max_id);
        state.tables.entry(table.to_string()).or_default().extend(rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        lock(&self.state).tables.get(table).cloned().unwrap_or_default()
    }

    pub fn blob(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        lock(&self.state).blobs.get(&blob_key(bucket, path)).cloned()
    }

    pub fn blob_count(&self) -> usize {
        lock(&self.state).blobs.len()
    }

    /// Make every call of `op` fail with `message`. Ops are
    /// method names (`sign_out`, `select`, `upload`, ...), optionally
    /// suffixed with `:<table>` for table calls.
    pub fn fail_on(&self, op: &str, message: &str) {
        lock(&self.state).failures.insert(op.to_string(), message.to_string());
    }

    pub fn call_count(&self, op: &str) -> usize {
        lock(&self.state).calls.get(op).copied().unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|s| !s.sender.is_closed());
        subscribers.len()
    }

    // ---- internals ----

    fn record(&self, op: &str, table: Option<&str>) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        *state.calls.entry(op.to_string()).or_insert(0) += 1;
        let scoped = table.map(|t| format!("{}:{}", op, t));
        if let Some(scoped) = &scoped {
            *state.calls.entry(scoped.clone()).or_insert(0) += 1;
        }
        let failure = state
            .failures
            .get(op)
            .or_else(|| scoped.as_ref().and_then(|s| state.failures.get(s)))
            .cloned();
        match failure {
            Some(message) => Err(BackendError::Status { status: 500, message }),
            None => Ok(()),
        }
    }

    fn notify(&self, table: &str, kind: Operation, record: Value, old_record: Value) {
        let event = ChangeEvent {
            schema: "public".to_string(),
            table: table.to_string(),
            kind,
            record,
            old_record,
        };
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|s| !s.sender.is_closed());
        for subscriber in subscribers.iter().filter(|s| s.subscription.accepts(&event)) {
            let _ = subscriber.sender.send(event.clone());
        }
    }

    fn start_session(&self, user: &User) -> Session {
        let session = issue_session(user);
        lock(&self.state).session = Some(session.clone());
        self.emit(AuthEvent::SignedIn(session.clone()));
        session
    }

    fn password_sign_in(&self, email: &str, password: &str) -> Result<AuthResponse, BackendError> {
        let user = {
            let state = lock(&self.state);
            match state.accounts.get(&email.to_lowercase()) {
                Some(account) if account.password == password => account.user.clone(),
                _ => return Err(BackendError::Auth("Invalid login credentials".to_string())),
            }
        };
        let session = self.start_session(&user);
        Ok(AuthResponse { user: Some(user), session: Some(session) })
    }

    fn register(&self, email: &str, password: &str, metadata: Value) -> Result<AuthResponse, BackendError> {
        let require_confirmation = {
            let state = lock(&self.state);
            if state.accounts.contains_key(&email.to_lowercase()) {
                return Err(BackendError::Auth("User already registered".to_string()));
            }
            state.require_confirmation
        };
        let user = self.register_account(email, password, metadata);
        if require_confirmation {
            return Ok(AuthResponse { user: Some(user), session: None });
        }
        let session = self.start_session(&user);
        Ok(AuthResponse { user: Some(user), session: Some(session) })
    }

    fn exchange(&self, access_token: &str) -> Result<Session, BackendError> {
        let user = {
            let mut state = lock(&self.state);
            let email = state
                .pending_oauth
                .remove(access_token)
                .ok_or_else(|| BackendError::Auth("Invalid OAuth tokens".to_string()))?;
            state
                .accounts
                .get(&email)
                .map(|a| a.user.clone())
                .ok_or_else(|| BackendError::Auth("User not found".to_string()))?
        };
        Ok(self.start_session(&user))
    }

    fn refresh(&self) -> Result<Session, BackendError> {
        let session = {
            let mut state = lock(&self.state);
            let current = state
                .session
                .as_ref()
                .ok_or_else(|| BackendError::Auth("Auth session missing!".to_string()))?;
            let refreshed = issue_session(&current.user);
            state.session = Some(refreshed.clone());
            refreshed
        };
        self.emit(AuthEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }

    fn select_rows(&self, filter: &Filter) -> Result<SelectResult, BackendError> {
        // Same validation the HTTP backend applies when rendering the query
        filter.to_query_pairs()?;
        let rows = lock(&self.state).tables.get(filter.table()).cloned().unwrap_or_default();
        let (rows, total) = filter.apply(rows);
        check_cardinality(filter, &rows)?;
        Ok(match filter.count_mode() {
            CountMode::None => SelectResult { rows, count: None },
            CountMode::Exact => SelectResult { rows, count: Some(total) },
            CountMode::Head => SelectResult { rows: vec![], count: Some(total) },
        })
    }

    fn insert_row(&self, table: &str, row: Value) -> Result<Value, BackendError> {
        let Value::Object(mut fields) = row else {
            return Err(BackendError::Status { status: 400, message: "Insert payload must be an object".to_string() });
        };
        let stored = {
            let mut state = lock(&self.state);
            let next = state.next_ids.entry(table.to_string()).or_insert(0);
            match fields.get("id").and_then(Value::as_i64) {
                Some(id) => *next = (*next).max(id),
                None => {
                    *next += 1;
                    fields.insert("id".to_string(), json!(*next));
                }
            }
            let now = json!(Utc::now().to_rfc3339());
            fields.entry("created_at").or_insert(now.clone());
            fields.entry("updated_at").or_insert(now);
            let row = Value::Object(fields);
            state.tables.entry(table.to_string()).or_default().push(row.clone());
            row
        };
        self.notify(table, Operation::Insert, stored.clone(), Value::Null);
        Ok(stored)
    }

    fn update_row(&self, filter: &Filter, patch: Value) -> Result<Value, BackendError> {
        let Value::Object(patch) = patch else {
            return Err(BackendError::Status { status: 400, message: "Update payload must be an object".to_string() });
        };
        filter.to_where_pairs()?;
        let (old, new) = {
            let mut state = lock(&self.state);
            let rows = state.tables.entry(filter.table().to_string()).or_default();
            let matching: Vec<usize> =
                rows.iter().enumerate().filter(|(_, row)| filter.matches(row)).map(|(i, _)| i).collect();
            let index = match matching.as_slice() {
                [index] => *index,
                [] => return Err(BackendError::NotFound(format!("No rows in {}", filter.table()))),
                many => {
                    return Err(BackendError::Status {
                        status: 406,
                        message: format!("Expected a single row from {}, found {}", filter.table(), many.len()),
                    })
                }
            };
            let old = rows[index].clone();
            if let Value::Object(fields) = &mut rows[index] {
                fields.extend(patch);
                fields.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));
            }
            (old, rows[index].clone())
        };
        self.notify(filter.table(), Operation::Update, new.clone(), old);
        Ok(new)
    }

    fn delete_rows(&self, filter: &Filter) -> Result<(), BackendError> {
        filter.to_where_pairs()?;
        let removed: Vec<Value> = {
            let mut state = lock(&self.state);
            let rows = state.tables.entry(filter.table().to_string()).or_default();
            let (removed, kept): (Vec<Value>, Vec<Value>) = rows.drain(..).partition(|row| filter.matches(row));
            *rows = kept;
            removed
        };
        for row in removed {
            self.notify(filter.table(), Operation::Delete, Value::Null, row);
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityService for MemoryBackend {
    async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        self.record("get_session", None)?;
        let current = lock(&self.state).session.clone();
        match current {
            Some(session) if session.is_expired(Utc::now()) => self.refresh().map(Some),
            other => Ok(other),
        }
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthResponse, BackendError> {
        self.record("sign_in_with_password", None)?;
        self.password_sign_in(email, password)
    }

    async fn sign_up(&self, email: &str, password: &str, metadata: Value) -> Result<AuthResponse, BackendError> {
        self.record("sign_up", None)?;
        self.register(email, password, metadata)
    }

    async fn sign_in_with_oauth(&self, request: OAuthRequest) -> Result<String, BackendError> {
        self.record("sign_in_with_oauth", None)?;
        authorize_url(MEMORY_ORIGIN, &request)
    }

    async fn exchange_oauth_tokens(&self, access_token: &str, _refresh_token: &str) -> Result<Session, BackendError> {
        self.record("exchange_oauth_tokens", None)?;
        self.exchange(access_token)
    }

    /// The local session is dropped even when revocation fails
    async fn sign_out(&self) -> Result<(), BackendError> {
        let result = self.record("sign_out", None);
        lock(&self.state).session = None;
        self.emit(AuthEvent::SignedOut);
        result
    }

    async fn refresh_session(&self) -> Result<Session, BackendError> {
        self.record("refresh_session", None)?;
        self.refresh()
    }

    fn events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl TableService for MemoryBackend {
    async fn select(&self, filter: &Filter) -> Result<SelectResult, BackendError> {
        self.record("select", Some(filter.table()))?;
        self.select_rows(filter)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value, BackendError> {
        self.record("insert", Some(table))?;
        self.insert_row(table, row)
    }

    async fn update(&self, filter: &Filter, patch: Value) -> Result<Value, BackendError> {
        self.record("update", Some(filter.table()))?;
        self.update_row(filter, patch)
    }

    async fn delete(&self, filter: &Filter) -> Result<(), BackendError> {
        self.record("delete", Some(filter.table()))?;
        self.delete_rows(filter)
    }
}

#[async_trait]
impl BlobStorage for MemoryBackend {
    async fn upload(&self, bucket: &str, path: &str, bytes: Vec<u8>, _content_type: &str) -> Result<(), BackendError> {
        self.record("upload", None)?;
        let mut state = lock(&self.state);
        let key = blob_key(bucket, path);
        if state.blobs.contains_key(&key) {
            return Err(BackendError::Status { status: 409, message: "The resource already exists".to_string() });
        }
        state.blobs.insert(key, bytes);
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", MEMORY_ORIGIN, bucket, path)
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), BackendError> {
        self.record("remove", None)?;
        let mut state = lock(&self.state);
        for path in paths {
            state.blobs.remove(&blob_key(bucket, path));
        }
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe(&self, subscription: ChangeSubscription) -> Result<ChangeStream, BackendError> {
        self.record("subscribe", Some(&subscription.table))?;
        let id = self.next_subscriber.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::unbounded_channel();
        tracing::debug!("Memory feed subscription {} on {}", id, subscription.table);
        lock(&self.subscribers).push(Subscriber { id, subscription, sender });

        let subscribers = Arc::clone(&self.subscribers);
        Ok(ChangeStream::new(receiver, move || {
            lock(&subscribers).retain(|s| s.id != id);
        }))
    }
}
