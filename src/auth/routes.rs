use serde::{Serialize, Serializer};
use url::Url;

use crate::types::Role;

/// Navigation targets produced by the auth flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Landing,
    AdminDashboard,
    UserDashboard,
    AuthCallback { role: Role },
}

impl Route {
    pub fn dashboard_for(role: Role) -> Self {
        match role {
            Role::Admin => Route::AdminDashboard,
            Role::User => Route::UserDashboard,
        }
    }

    pub fn path(&self) -> String {
        match self {
            Route::Landing => "/".to_string(),
            Route::AdminDashboard => "/admin/dashboard".to_string(),
            Route::UserDashboard => "/user/dashboard".to_string(),
            Route::AuthCallback { role } => format!("/auth/callback?role={}", role),
        }
    }

    /// Absolute URL under `site_url`
    pub fn url(&self, site_url: &str) -> String {
        format!("{}{}", site_url.trim_end_matches('/'), self.path())
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path())
    }
}

impl Serialize for Route {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.path())
    }
}

/// What an OAuth redirect back to `/auth/callback` carries. Tokens arrive in
/// the fragment (implicit flow); the role and any provider error in either
/// the query or the fragment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallbackParams {
    pub role: Option<Role>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub error: Option<String>,
}

impl CallbackParams {
    pub fn parse(callback_url: &str) -> Result<Self, url::ParseError> {
        let url = Url::parse(callback_url)?;
        let fragment_pairs = url
            .fragment()
            .map(|f| url::form_urlencoded::parse(f.as_bytes()).into_owned().collect::<Vec<_>>())
            .unwrap_or_default();

        let mut params = CallbackParams::default();
        for (key, value) in url.query_pairs().into_owned().chain(fragment_pairs) {
            match key.as_str() {
                "role" => params.role = value.parse().ok(),
                "access_token" => params.access_token = Some(value),
                "refresh_token" => params.refresh_token = Some(value),
                "error_description" => params.error = Some(value),
                "error" if params.error.is_none() => params.error = Some(value),
                _ => {}
            }
        }
        Ok(params)
    }

    pub fn tokens(&self) -> Option<(&str, &str)> {
        match (&self.access_token, &self.refresh_token) {
            (Some(access), Some(refresh)) => Some((access.as_str(), refresh.as_str())),
            _ => None,
        }
    }
}
