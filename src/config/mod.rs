use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Application configuration, built once at startup and passed by reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub backend: BackendConfig,
    pub auth: AuthConfig,
    pub list: ListConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub url: String,
    pub anon_key: String,
    pub request_timeout_secs: u64,
    pub storage_bucket: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Raw comma-separated admin allow-list
    pub admin_emails: String,
    /// Origin the OAuth provider redirects back to
    pub site_url: String,
    pub session_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListConfig {
    pub page_size: i64,
    pub max_page_size: i64,
    pub debug_logging: bool,
}

impl ListConfig {
    /// Clamp a requested page size to `1..=max_page_size`
    pub fn clamp(&self, requested: i64) -> i64 {
        let max = self.max_page_size.max(1);
        if requested > max {
            if self.debug_logging {
                tracing::warn!("Page size {} exceeds max {}, capping to max", requested, max);
            }
            max
        } else {
            requested.max(1)
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Backend overrides
        if let Ok(v) = env::var("BACKEND_URL") {
            self.backend.url = v.trim_end_matches('/').to_string();
        }
        if let Ok(v) = env::var("BACKEND_ANON_KEY") {
            self.backend.anon_key = v;
        }
        if let Ok(v) = env::var("BACKEND_REQUEST_TIMEOUT_SECS") {
            self.backend.request_timeout_secs = v.parse().unwrap_or(self.backend.request_timeout_secs);
        }
        if let Ok(v) = env::var("STORAGE_BUCKET") {
            self.backend.storage_bucket = v;
        }

        // Auth overrides
        if let Ok(v) = env::var("ADMIN_EMAILS") {
            self.auth.admin_emails = v;
        }
        if let Ok(v) = env::var("SITE_URL") {
            self.auth.site_url = v.trim_end_matches('/').to_string();
        }
        if let Ok(v) = env::var("SESSION_FILE") {
            self.auth.session_file = if v.is_empty() { None } else { Some(PathBuf::from(v)) };
        }

        // List overrides
        if let Ok(v) = env::var("LIST_PAGE_SIZE") {
            self.list.page_size = v.parse().unwrap_or(self.list.page_size);
        }
        if let Ok(v) = env::var("LIST_MAX_PAGE_SIZE") {
            self.list.max_page_size = v.parse().unwrap_or(self.list.max_page_size);
        }
        if let Ok(v) = env::var("LIST_DEBUG_LOGGING") {
            self.list.debug_logging = v.parse().unwrap_or(self.list.debug_logging);
        }

        self
    }

    pub fn clamp_page_size(&self, requested: i64) -> i64 {
        self.list.clamp(requested)
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            backend: BackendConfig {
                url: "http://localhost:54321".to_string(),
                anon_key: String::new(),
                request_timeout_secs: 30,
                storage_bucket: "trainings".to_string(),
            },
            auth: AuthConfig {
                admin_emails: String::new(),
                site_url: "http://localhost:5173".to_string(),
                session_file: None,
            },
            list: ListConfig {
                page_size: 10,
                max_page_size: 1000,
                debug_logging: true,
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            backend: BackendConfig {
                url: String::new(),
                anon_key: String::new(),
                request_timeout_secs: 15,
                storage_bucket: "trainings".to_string(),
            },
            auth: AuthConfig {
                admin_emails: String::new(),
                site_url: "https://staging.example.com".to_string(),
                session_file: None,
            },
            list: ListConfig {
                page_size: 10,
                max_page_size: 500,
                debug_logging: false,
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            backend: BackendConfig {
                url: String::new(),
                anon_key: String::new(),
                request_timeout_secs: 10,
                storage_bucket: "trainings".to_string(),
            },
            auth: AuthConfig {
                admin_emails: String::new(),
                site_url: "https://app.example.com".to_string(),
                session_file: None,
            },
            list: ListConfig {
                page_size: 10,
                max_page_size: 100,
                debug_logging: false,
            },
        }
    }

    /// Development preset without reading the environment
    pub fn for_tests(admin_emails: &str) -> Self {
        let mut config = Self::development();
        config.auth.admin_emails = admin_emails.to_string();
        config.list.debug_logging = false;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = AppConfig::development();
        assert_eq!(config.list.page_size, 10);
        assert_eq!(config.list.max_page_size, 1000);
        assert_eq!(config.backend.storage_bucket, "trainings");
    }

    #[test]
    fn test_default_production_config() {
        let config = AppConfig::production();
        assert_eq!(config.list.max_page_size, 100);
        assert!(!config.list.debug_logging);
    }

    #[test]
    fn clamps_page_size() {
        let config = AppConfig::production();
        assert_eq!(config.clamp_page_size(500), 100);
        assert_eq!(config.clamp_page_size(0), 1);
        assert_eq!(config.clamp_page_size(25), 25);
    }
}
