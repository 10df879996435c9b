//! HTTP client for a Supabase-style backend: `/auth/v1` (GoTrue),
//! `/rest/v1` (PostgREST) and `/storage/v1`.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_RANGE, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, RwLock};

use super::{
    authorize_url, check_cardinality, AuthEvent, AuthResponse, BackendError, BlobStorage, IdentityService,
    OAuthRequest, SelectResult, TableService,
};
use crate::config::AppConfig;
use crate::filter::{CountMode, Filter};
use crate::models::{Session, User};

pub struct RestBackend {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    session: RwLock<Option<Session>>,
    session_file: Option<PathBuf>,
    events: broadcast::Sender<AuthEvent>,
}

/// Sign-up answers with a full session, or with the bare user when email
/// confirmation is pending
#[derive(Deserialize)]
#[serde(untagged)]
enum SignUpBody {
    Session(Session),
    User(User),
}

/// Total from a PostgREST `Content-Range` header (`0-9/42`, `*/42`)
pub fn parse_content_range(value: &str) -> Option<i64> {
    value.rsplit('/').next().and_then(|total| total.trim().parse().ok())
}

/// Best human-readable message from a GoTrue / PostgREST / storage error body
fn error_message(status: StatusCode, body: &Value) -> String {
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16()))
}

impl RestBackend {
    pub fn new(config: &AppConfig) -> Result<Self, BackendError> {
        if config.backend.url.is_empty() {
            return Err(BackendError::ConfigMissing("BACKEND_URL"));
        }
        if config.backend.anon_key.is_empty() {
            return Err(BackendError::ConfigMissing("BACKEND_ANON_KEY"));
        }

        let mut headers = HeaderMap::new();
        let apikey = HeaderValue::from_str(&config.backend.anon_key)
            .map_err(|_| BackendError::ConfigMissing("BACKEND_ANON_KEY"))?;
        headers.insert("apikey", apikey);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.backend.request_timeout_secs))
            .gzip(true)
            .build()?;

        let (events, _) = broadcast::channel(64);
        Ok(Self {
            client,
            base_url: config.backend.url.trim_end_matches('/').to_string(),
            anon_key: config.backend.anon_key.clone(),
            session: RwLock::new(None),
            session_file: config.auth.session_file.clone(),
            events,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, format!("{}{}", self.base_url, path))
    }

    /// Access token of the live session, or the anon key for anonymous calls
    async fn bearer(&self) -> String {
        match self.get_session().await {
            Ok(Some(session)) => session.access_token,
            _ => self.anon_key.clone(),
        }
    }

    async fn failure(response: Response, identity: bool) -> BackendError {
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let message = error_message(status, &body);
        match status {
            StatusCode::NOT_FOUND => BackendError::NotFound(message),
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::UNPROCESSABLE_ENTITY
                if identity =>
            {
                BackendError::Auth(message)
            }
            _ => BackendError::Status { status: status.as_u16(), message },
        }
    }

    async fn identity_json(&self, builder: RequestBuilder) -> Result<Value, BackendError> {
        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(Self::failure(response, true).await);
        }
        Ok(response.json().await?)
    }

    async fn table_response(&self, builder: RequestBuilder) -> Result<Response, BackendError> {
        let response = builder.bearer_auth(self.bearer().await).send().await?;
        if !response.status().is_success() {
            return Err(Self::failure(response, false).await);
        }
        Ok(response)
    }

    // ---- session bookkeeping ----

    fn read_session_file(&self) -> Option<Session> {
        let path = self.session_file.as_ref()?;
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!("Ignoring unreadable session file {}: {}", path.display(), e);
                None
            }
        }
    }

    fn write_session_file(&self, session: Option<&Session>) {
        let Some(path) = &self.session_file else { return };
        let result = match session {
            Some(session) => serde_json::to_string_pretty(session)
                .map_err(std::io::Error::other)
                .and_then(|content| {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(path, content)
                }),
            None if path.exists() => std::fs::remove_file(path),
            None => Ok(()),
        };
        if let Err(e) = result {
            tracing::warn!("Failed to persist session to {}: {}", path.display(), e);
        }
    }

    async fn store_session(&self, session: Option<Session>) {
        self.write_session_file(session.as_ref());
        *self.session.write().await = session;
    }

    fn emit(&self, event: AuthEvent) {
        tracing::debug!("Identity event {}", event.name());
        let _ = self.events.send(event);
    }

    async fn refresh_with(&self, refresh_token: &str) -> Result<Session, BackendError> {
        let body = self
            .identity_json(
                self.request(Method::POST, "/auth/v1/token")
                    .query(&[("grant_type", "refresh_token")])
                    .json(&json!({ "refresh_token": refresh_token })),
            )
            .await?;
        let session: Session = serde_json::from_value(body)?;
        self.store_session(Some(session.clone())).await;
        self.emit(AuthEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }
}

#[async_trait]
impl IdentityService for RestBackend {
    async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        let cached = self.session.read().await.clone();
        let current = match cached {
            Some(session) => Some(session),
            None => {
                let restored = self.read_session_file();
                if restored.is_some() {
                    tracing::debug!("Restored session from disk");
                    *self.session.write().await = restored.clone();
                }
                restored
            }
        };

        match current {
            Some(session) if session.is_expired(Utc::now()) => {
                tracing::info!("Session expired, refreshing");
                match self.refresh_with(&session.refresh_token).await {
                    Ok(refreshed) => Ok(Some(refreshed)),
                    Err(e) => {
                        self.store_session(None).await;
                        Err(e)
                    }
                }
            }
            other => Ok(other),
        }
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthResponse, BackendError> {
        let body = self
            .identity_json(
                self.request(Method::POST, "/auth/v1/token")
                    .query(&[("grant_type", "password")])
                    .json(&json!({ "email": email, "password": password })),
            )
            .await?;
        let session: Session = serde_json::from_value(body)?;
        self.store_session(Some(session.clone())).await;
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(AuthResponse { user: Some(session.user.clone()), session: Some(session) })
    }

    async fn sign_up(&self, email: &str, password: &str, metadata: Value) -> Result<AuthResponse, BackendError> {
        let body = self
            .identity_json(
                self.request(Method::POST, "/auth/v1/signup")
                    .json(&json!({ "email": email, "password": password, "data": metadata })),
            )
            .await?;
        match serde_json::from_value(body)? {
            SignUpBody::Session(session) => {
                self.store_session(Some(session.clone())).await;
                self.emit(AuthEvent::SignedIn(session.clone()));
                Ok(AuthResponse { user: Some(session.user.clone()), session: Some(session) })
            }
            SignUpBody::User(user) => Ok(AuthResponse { user: Some(user), session: None }),
        }
    }

    async fn sign_in_with_oauth(&self, request: OAuthRequest) -> Result<String, BackendError> {
        authorize_url(&self.base_url, &request)
    }

    async fn exchange_oauth_tokens(&self, access_token: &str, refresh_token: &str) -> Result<Session, BackendError> {
        let body = self
            .identity_json(self.request(Method::GET, "/auth/v1/user").bearer_auth(access_token))
            .await?;
        let user: User = serde_json::from_value(body)?;
        let session = Session {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            token_type: "bearer".to_string(),
            expires_in: None,
            expires_at: None,
            user,
        };
        self.store_session(Some(session.clone())).await;
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        let current = self.session.read().await.clone();
        let result = match current {
            Some(session) => {
                let response = self
                    .request(Method::POST, "/auth/v1/logout")
                    .bearer_auth(&session.access_token)
                    .send()
                    .await;
                match response {
                    Ok(r) if r.status().is_success() || r.status() == StatusCode::UNAUTHORIZED => Ok(()),
                    Ok(r) => Err(Self::failure(r, true).await),
                    Err(e) => Err(e.into()),
                }
            }
            None => Ok(()),
        };
        self.store_session(None).await;
        self.emit(AuthEvent::SignedOut);
        result
    }

    async fn refresh_session(&self) -> Result<Session, BackendError> {
        let current = self.session.read().await.clone().or_else(|| self.read_session_file());
        let session = current.ok_or_else(|| BackendError::Auth("Auth session missing!".to_string()))?;
        self.refresh_with(&session.refresh_token).await
    }

    fn events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl TableService for RestBackend {
    async fn select(&self, filter: &Filter) -> Result<SelectResult, BackendError> {
        let pairs = filter.to_query_pairs()?;
        let path = format!("/rest/v1/{}", filter.table());
        let (method, prefer) = match filter.count_mode() {
            CountMode::None => (Method::GET, None),
            CountMode::Exact => (Method::GET, Some("count=exact")),
            CountMode::Head => (Method::HEAD, Some("count=exact")),
        };

        let mut builder = self.request(method.clone(), &path).query(&pairs);
        if let Some(prefer) = prefer {
            builder = builder.header("Prefer", prefer);
        }
        let response = self.table_response(builder).await?;

        let count = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range);
        let rows: Vec<Value> = if method == Method::HEAD { vec![] } else { response.json().await? };

        if filter.count_mode() != CountMode::Head {
            check_cardinality(filter, &rows)?;
        }
        if filter.count_mode() != CountMode::None && count.is_none() {
            tracing::warn!("No Content-Range header on counted select from {}", filter.table());
        }
        Ok(SelectResult { rows, count })
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value, BackendError> {
        let builder = self
            .request(Method::POST, &format!("/rest/v1/{}", table))
            .query(&[("select", "*")])
            .header("Prefer", "return=representation")
            .json(&row);
        let rows: Vec<Value> = self.table_response(builder).await?.json().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::Decode(format!("Insert into {} returned no row", table)))
    }

    async fn update(&self, filter: &Filter, patch: Value) -> Result<Value, BackendError> {
        let mut pairs = filter.to_where_pairs()?;
        pairs.push(("select".to_string(), "*".to_string()));
        let builder = self
            .request(Method::PATCH, &format!("/rest/v1/{}", filter.table()))
            .query(&pairs)
            .header("Prefer", "return=representation")
            .json(&patch);
        let rows: Vec<Value> = self.table_response(builder).await?.json().await?;
        check_cardinality(&filter.clone().single(), &rows)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::NotFound(format!("No rows in {}", filter.table())))
    }

    async fn delete(&self, filter: &Filter) -> Result<(), BackendError> {
        let pairs = filter.to_where_pairs()?;
        let builder = self.request(Method::DELETE, &format!("/rest/v1/{}", filter.table())).query(&pairs);
        self.table_response(builder).await?;
        Ok(())
    }
}

#[async_trait]
impl BlobStorage for RestBackend {
    async fn upload(&self, bucket: &str, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), BackendError> {
        let builder = self
            .request(Method::POST, &format!("/storage/v1/object/{}/{}", bucket, path))
            .header(CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .header("cache-control", "max-age=3600")
            .body(bytes);
        self.table_response(builder).await?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.base_url, bucket, path)
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), BackendError> {
        let builder = self
            .request(Method::DELETE, &format!("/storage/v1/object/{}", bucket))
            .json(&json!({ "prefixes": paths }));
        self.table_response(builder).await?;
        Ok(())
    }
}

impl std::fmt::Debug for RestBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestBackend").field("base_url", &self.base_url).finish_non_exhaustive()
    }
}
