//! Sign-in, sign-up, OAuth and sign-out against the backend identity
//! service, reconciled into the shared [`SessionStore`](crate::session::SessionStore).

pub mod listener;
pub mod routes;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::json;

use crate::backend::{IdentityService, OAuthProvider, OAuthRequest};
use crate::config::AppConfig;
use crate::error::PortalError;
use crate::session::SharedSession;
use crate::types::Role;

pub use listener::{apply_event, AuthChangeListener, ListenerHandle};
pub use routes::{CallbackParams, Route};

pub const SIGN_IN_FAILED: &str = "An error occurred during sign in";
pub const SIGN_UP_FAILED: &str = "An error occurred during sign up";
pub const GOOGLE_SIGN_IN_FAILED: &str = "An error occurred during Google sign in";
pub const CALLBACK_FAILED: &str = "An error occurred during authentication";
pub const SIGN_OUT_FAILED: &str = "An error occurred during sign out";
pub const CONFIRM_EMAIL: &str = "Please check your email to confirm your account before signing in.";

/// Result object returned by every auth operation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuthOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<Route>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub requires_confirmation: bool,
}

impl AuthOutcome {
    pub fn ok() -> Self {
        Self { success: true, ..Default::default() }
    }

    pub fn redirect(route: Route) -> Self {
        Self { success: true, redirect: Some(route), ..Default::default() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, error: Some(message.into()), ..Default::default() }
    }
}

/// Backend message when it has one, otherwise the operation's generic text
fn failure_message(err: &PortalError, fallback: &str) -> String {
    let message = err.message();
    if message.trim().is_empty() {
        fallback.to_string()
    } else {
        message.to_string()
    }
}

pub struct AuthFlow {
    identity: Arc<dyn IdentityService>,
    store: SharedSession,
    site_url: String,
    loading: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl AuthFlow {
    pub fn new(identity: Arc<dyn IdentityService>, store: SharedSession, config: &AppConfig) -> Self {
        Self {
            identity,
            store,
            site_url: config.auth.site_url.clone(),
            loading: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    pub fn loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn begin(&self) {
        self.loading.store(true, Ordering::SeqCst);
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn finish(&self, outcome: AuthOutcome) -> AuthOutcome {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = outcome.error.clone();
        self.loading.store(false, Ordering::SeqCst);
        outcome
    }

    /// Restore an existing session into the store. Always ends with the
    /// store no longer loading.
    pub async fn initialize(&self) -> AuthOutcome {
        self.store.write().await.set_loading(true);
        let outcome = match self.identity.get_session().await {
            Ok(Some(session)) => {
                tracing::info!("Restored session for {}", session.user.email_or_empty());
                self.store.write().await.establish(session);
                AuthOutcome::ok()
            }
            Ok(None) => AuthOutcome::ok(),
            Err(e) => {
                tracing::error!("Error initializing auth: {}", e);
                self.store.write().await.clear();
                AuthOutcome::failed(failure_message(&PortalError::from(e), CALLBACK_FAILED))
            }
        };
        self.store.write().await.set_loading(false);
        outcome
    }

    pub async fn sign_in(&self, email: &str, password: &str, expected_role: Option<Role>) -> AuthOutcome {
        self.begin();
        let outcome = match self.try_sign_in(email, password, expected_role).await {
            Ok(route) => AuthOutcome::redirect(route),
            Err(e) => {
                tracing::error!("Sign in error: {}", e);
                AuthOutcome::failed(failure_message(&e, SIGN_IN_FAILED))
            }
        };
        self.finish(outcome)
    }

    async fn try_sign_in(&self, email: &str, password: &str, expected_role: Option<Role>) -> Result<Route, PortalError> {
        let response = self.identity.sign_in_with_password(email, password).await?;
        let (Some(session), Some(_)) = (response.session, response.user) else {
            return Err(PortalError::backend(SIGN_IN_FAILED));
        };

        let actual = self.store.read().await.determine_role(session.user.email_or_empty());
        if let Some(expected) = expected_role {
            if expected != actual {
                if let Err(e) = self.identity.sign_out().await {
                    tracing::warn!("Failed to revoke mismatched session: {}", e);
                }
                self.store.write().await.clear();
                return Err(PortalError::RoleMismatch { actual });
            }
        }

        self.store.write().await.establish_as(session, actual, None);
        tracing::info!("Signed in {} as {}", email, actual);
        Ok(Route::dashboard_for(actual))
    }

    /// Self-service registration, never for allow-listed admin emails
    pub async fn sign_up(&self, email: &str, password: &str, full_name: &str) -> AuthOutcome {
        self.begin();
        let outcome = match self.try_sign_up(email, password, full_name).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Sign up error: {}", e);
                AuthOutcome::failed(failure_message(&e, SIGN_UP_FAILED))
            }
        };
        self.finish(outcome)
    }

    async fn try_sign_up(&self, email: &str, password: &str, full_name: &str) -> Result<AuthOutcome, PortalError> {
        if self.store.read().await.determine_role(email) == Role::Admin {
            return Err(PortalError::AdminRegistration);
        }

        let response = self
            .identity
            .sign_up(email, password, json!({ "full_name": full_name }))
            .await?;
        if response.user.is_none() {
            return Err(PortalError::backend(SIGN_UP_FAILED));
        }

        match response.session {
            Some(session) => {
                self.store.write().await.establish_as(session, Role::User, Some(full_name));
                Ok(AuthOutcome::redirect(Route::UserDashboard))
            }
            None => {
                tracing::info!("Sign up for {} awaits email confirmation", email);
                Ok(AuthOutcome {
                    success: true,
                    message: Some(CONFIRM_EMAIL.to_string()),
                    requires_confirmation: true,
                    ..Default::default()
                })
            }
        }
    }

    /// Start the Google OAuth redirect; only ever grants the user role
    pub async fn sign_in_with_google(&self) -> AuthOutcome {
        self.begin();
        let request = OAuthRequest {
            provider: OAuthProvider::Google,
            redirect_to: Route::AuthCallback { role: Role::User }.url(&self.site_url),
            query_params: vec![
                ("access_type".to_string(), "offline".to_string()),
                ("prompt".to_string(), "consent".to_string()),
            ],
        };
        let outcome = match self.identity.sign_in_with_oauth(request).await {
            Ok(url) => AuthOutcome { success: true, url: Some(url), ..Default::default() },
            Err(e) => {
                tracing::error!("Google sign in error: {}", e);
                AuthOutcome::failed(failure_message(&PortalError::from(e), GOOGLE_SIGN_IN_FAILED))
            }
        };
        self.finish(outcome)
    }

    /// Finish an OAuth redirect once the backend holds the new session
    pub async fn handle_oauth_callback(&self) -> AuthOutcome {
        self.begin();
        let outcome = match self.try_oauth_callback().await {
            Ok(route) => AuthOutcome::redirect(route),
            Err(e) => {
                tracing::error!("OAuth callback error: {}", e);
                AuthOutcome::failed(failure_message(&e, CALLBACK_FAILED))
            }
        };
        self.finish(outcome)
    }

    async fn try_oauth_callback(&self) -> Result<Route, PortalError> {
        let session = self.identity.get_session().await?.ok_or(PortalError::NoSession)?;
        self.store.write().await.establish_as(session, Role::User, None);
        Ok(Route::UserDashboard)
    }

    /// Exchange the tokens carried by a callback URL, then finish as
    /// [`AuthFlow::handle_oauth_callback`]
    pub async fn complete_oauth_redirect(&self, callback_url: &str) -> AuthOutcome {
        let params = match CallbackParams::parse(callback_url) {
            Ok(params) => params,
            Err(e) => return self.finish(AuthOutcome::failed(format!("Invalid callback URL: {}", e))),
        };
        if let Some(error) = params.error {
            tracing::error!("OAuth provider returned error: {}", error);
            return self.finish(AuthOutcome::failed(error));
        }
        if let Some((access, refresh)) = params.tokens() {
            if let Err(e) = self.identity.exchange_oauth_tokens(access, refresh).await {
                tracing::error!("OAuth token exchange error: {}", e);
                return self.finish(AuthOutcome::failed(failure_message(&PortalError::from(e), CALLBACK_FAILED)));
            }
        }
        self.handle_oauth_callback().await
    }

    /// Revoke the backend session and clear the store, even when revocation fails
    pub async fn sign_out(&self) -> AuthOutcome {
        self.begin();
        let revoked = self.identity.sign_out().await;
        self.store.write().await.clear();
        let outcome = match revoked {
            Ok(()) => AuthOutcome::redirect(Route::Landing),
            Err(e) => {
                tracing::error!("Sign out error: {}", e);
                AuthOutcome {
                    redirect: Some(Route::Landing),
                    ..AuthOutcome::failed(failure_message(&PortalError::from(e), SIGN_OUT_FAILED))
                }
            }
        };
        self.finish(outcome)
    }
}
